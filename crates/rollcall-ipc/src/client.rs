//! IPC client implementation

use rollcall_api::{Caller, Command, Event, Request, Response, ResponseResult};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use crate::{IpcError, IpcResult};

/// IPC Client for connecting to rollcalld
pub struct IpcClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    next_request_id: u64,
}

impl IpcClient {
    /// Connect to rollcalld
    pub async fn connect(socket_path: impl AsRef<Path>) -> IpcResult<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            next_request_id: 1,
        })
    }

    /// Send a command without a caller and wait for the response
    pub async fn send(&mut self, command: Command) -> IpcResult<Response> {
        self.send_as(None, command).await
    }

    /// Send a command on behalf of `caller` and wait for the response
    pub async fn send_as(&mut self, caller: Option<Caller>, command: Command) -> IpcResult<Response> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let mut request = Request::new(request_id, command);
        request.caller = caller;

        let mut json = serde_json::to_string(&request)?;
        json.push('\n');
        self.writer.write_all(json.as_bytes()).await?;

        let line = read_line(&mut self.reader).await?;
        Ok(serde_json::from_str(&line)?)
    }

    /// Subscribe to events and consume this client to return an event stream
    pub async fn subscribe(mut self) -> IpcResult<EventStream> {
        let response = self.send(Command::SubscribeEvents).await?;

        if let ResponseResult::Err(e) = response.result {
            return Err(IpcError::Rejected {
                code: e.code,
                message: e.message,
            });
        }

        Ok(EventStream {
            reader: self.reader,
            _writer: self.writer,
        })
    }
}

/// Stream of events from rollcalld
pub struct EventStream {
    reader: BufReader<OwnedReadHalf>,
    // Dropping the write half would shut down our side of the socket
    _writer: OwnedWriteHalf,
}

impl EventStream {
    /// Wait for the next event
    pub async fn next(&mut self) -> IpcResult<Event> {
        let line = read_line(&mut self.reader).await?;
        Ok(serde_json::from_str(&line)?)
    }
}

async fn read_line(reader: &mut BufReader<OwnedReadHalf>) -> IpcResult<String> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(IpcError::ConnectionClosed);
    }
    Ok(line.trim().to_string())
}
