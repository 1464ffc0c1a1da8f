//! IPC layer for rollcalld
//!
//! Provides:
//! - Unix domain socket server
//! - NDJSON (newline-delimited JSON) protocol
//! - Client connection management
//! - Connection roles derived from peer credentials

mod client;
mod server;

pub use client::*;
pub use server::*;

use rollcall_api::ErrorCode;
use thiserror::Error;

/// IPC errors
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Server not started")]
    NotStarted,

    /// rollcalld answered with an error instead of the expected payload
    #[error("Request rejected ({code:?}): {message}")]
    Rejected { code: ErrorCode, message: String },
}

pub type IpcResult<T> = Result<T, IpcError>;
