//! rollcalld - The rollcall background service
//!
//! This is the main entry point for the rollcalld service.
//! It wires together all the components:
//! - Configuration loading
//! - Store initialization
//! - Core engine
//! - IPC server
//! - Booking expiry sweep

mod dispatch;

use anyhow::{Context, Result};
use clap::Parser;
use rollcall_api::{ClientRole, Event, EventPayload};
use rollcall_config::{load_config, Policy};
use rollcall_core::{CoreEngine, CoreEvent};
use rollcall_ipc::{IpcServer, ServerMessage};
use rollcall_store::{AuditEvent, AuditEventType, SqliteStore, Store};
use rollcall_util::default_config_path;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Mutex;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use dispatch::RequestContext;

/// rollcalld - Attendance and venue booking service
#[derive(Parser, Debug)]
#[command(name = "rollcalld")]
#[command(about = "Attendance and venue booking service", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/rollcall/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Socket path override (or set ROLLCALL_SOCKET env var)
    #[arg(short, long, env = "ROLLCALL_SOCKET")]
    socket: Option<PathBuf>,

    /// Data directory override (or set ROLLCALL_DATA_DIR env var)
    #[arg(short, long, env = "ROLLCALL_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Main service state
struct Service {
    engine: CoreEngine,
    ipc: Arc<IpcServer>,
    store: Arc<dyn Store>,
    config_path: PathBuf,
}

impl Service {
    async fn new(args: &Args) -> Result<Self> {
        let policy = if args.config.exists() {
            let policy = load_config(&args.config)
                .with_context(|| format!("Failed to load config from {:?}", args.config))?;
            info!(
                config_path = %args.config.display(),
                venue_count = policy.venues.len(),
                "Configuration loaded"
            );
            policy
        } else {
            warn!(
                config_path = %args.config.display(),
                "Config file not found, running with built-in defaults"
            );
            Policy::default()
        };

        let socket_path = args
            .socket
            .clone()
            .unwrap_or_else(|| policy.service.socket_path.clone());

        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| policy.service.data_dir.clone());

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = data_dir.join("rollcall.db");
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        store.append_audit(AuditEvent::new(AuditEventType::ServiceStarted))?;

        let engine = CoreEngine::new(policy, store.clone());
        let seeded = engine.seed_venues().context("Failed to seed venues")?;
        if seeded > 0 {
            info!(seeded, "Venues created from config");
        }

        // Bookings may have lapsed while the daemon was down
        match engine.sweep_expired(rollcall_util::now()) {
            Ok(outcome) if !outcome.value.is_noop() => info!(
                released = outcome.value.released.len(),
                failed = outcome.value.failed.len(),
                "Startup sweep finished"
            ),
            Ok(_) => debug!("Startup sweep found nothing to release"),
            Err(e) => warn!(error = %e, "Startup sweep failed"),
        }

        let mut ipc = IpcServer::new(&socket_path);
        ipc.start().await?;

        info!(socket_path = %socket_path.display(), "IPC server started");

        Ok(Self {
            engine,
            ipc: Arc::new(ipc),
            store,
            config_path: args.config.clone(),
        })
    }

    async fn run(self) -> Result<()> {
        let ipc_ref = self.ipc.clone();
        let mut ipc_messages = ipc_ref
            .take_message_receiver()
            .await
            .context("IPC message receiver already taken")?;

        let mut sweep_period = self.engine.policy().service.sweep_interval;
        let engine = Arc::new(Mutex::new(self.engine));
        let store = self.store.clone();
        let config_path = self.config_path;

        let ipc_accept = ipc_ref.clone();
        tokio::spawn(async move {
            if let Err(e) = ipc_accept.run().await {
                error!(error = %e, "IPC server error");
            }
        });

        let mut sigterm = signal(SignalKind::terminate())
            .context("Failed to create SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt())
            .context("Failed to create SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup())
            .context("Failed to create SIGHUP handler")?;

        let mut sweep_timer = sweep_interval(sweep_period);

        info!(sweep_interval_secs = sweep_period.as_secs(), "Service running");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, shutting down gracefully");
                    break;
                }

                _ = sweep_timer.tick() => {
                    Self::sweep(&engine, &ipc_ref).await;
                }

                Some(msg) = ipc_messages.recv() => {
                    let reloaded = Self::handle_ipc_message(&engine, &ipc_ref, &store, &config_path, msg).await;

                    if reloaded {
                        let period = engine.lock().await.policy().service.sweep_interval;
                        if period != sweep_period {
                            info!(
                                old_secs = sweep_period.as_secs(),
                                new_secs = period.as_secs(),
                                "Sweep interval changed"
                            );
                            sweep_period = period;
                            sweep_timer = sweep_interval(period);
                        }
                    }
                }
            }
        }

        info!("Shutting down rollcalld");

        ipc_ref.broadcast_event(Event::new(EventPayload::Shutdown));

        if let Err(e) = store.append_audit(AuditEvent::new(AuditEventType::ServiceStopped)) {
            warn!(error = %e, "Failed to log service shutdown");
        }

        info!("Shutdown complete");
        Ok(())
    }

    async fn sweep(engine: &Arc<Mutex<CoreEngine>>, ipc: &Arc<IpcServer>) {
        let outcome = {
            let engine = engine.lock().await;
            engine.sweep_expired(rollcall_util::now())
        };

        match outcome {
            Ok(outcome) => {
                if !outcome.value.is_noop() {
                    debug!(
                        released = outcome.value.released.len(),
                        failed = outcome.value.failed.len(),
                        "Sweep tick finished"
                    );
                }
                Self::broadcast(ipc, outcome.events);
            }
            Err(e) => warn!(error = %e, "Sweep tick failed"),
        }
    }

    fn broadcast(ipc: &Arc<IpcServer>, events: Vec<CoreEvent>) {
        for event in events {
            ipc.broadcast_event(Event::new(dispatch::event_payload(event)));
        }
    }

    /// Returns true when the policy was reloaded
    async fn handle_ipc_message(
        engine: &Arc<Mutex<CoreEngine>>,
        ipc: &Arc<IpcServer>,
        store: &Arc<dyn Store>,
        config_path: &Path,
        msg: ServerMessage,
    ) -> bool {
        match msg {
            ServerMessage::Request { client_id, request } => {
                let request_id = request.request_id;
                let role = ipc
                    .get_client_info(&client_id)
                    .await
                    .map(|info| info.role)
                    .unwrap_or(ClientRole::Gateway);

                let dispatched = {
                    let mut engine = engine.lock().await;
                    let ctx = RequestContext {
                        client_id: &client_id,
                        role,
                        config_path,
                        now: rollcall_util::now(),
                    };
                    dispatch::handle_command(&mut engine, &ctx, request)
                };

                let reloaded = dispatched
                    .events
                    .iter()
                    .any(|e| matches!(e, CoreEvent::PolicyReloaded { .. }));

                if let Err(e) = ipc.send_response(&client_id, dispatched.response).await {
                    warn!(client_id = %client_id, request_id, error = %e, "Failed to send response");
                }

                Self::broadcast(ipc, dispatched.events);
                reloaded
            }

            ServerMessage::ClientConnected { client_id, info } => {
                info!(
                    client_id = %client_id,
                    role = ?info.role,
                    uid = ?info.uid,
                    "Client connected"
                );

                let _ = store.append_audit(AuditEvent::new(AuditEventType::ClientConnected {
                    client_id: client_id.to_string(),
                    role: format!("{:?}", info.role),
                    uid: info.uid,
                }));
                false
            }

            ServerMessage::ClientDisconnected { client_id } => {
                debug!(client_id = %client_id, "Client disconnected");

                let _ = store.append_audit(AuditEvent::new(AuditEventType::ClientDisconnected {
                    client_id: client_id.to_string(),
                }));
                false
            }
        }
    }
}

/// Sweep timer whose first tick is one period away; the startup sweep covers now
fn sweep_interval(period: Duration) -> Interval {
    let mut timer = tokio::time::interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "rollcalld starting"
    );

    let service = Service::new(&args).await?;
    service.run().await
}
