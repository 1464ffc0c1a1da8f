//! IPC server implementation

use rollcall_api::{ClientInfo, ClientRole, Command, ErrorCode, ErrorInfo, Event, Request, Response};
use rollcall_util::ClientId;
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::{IpcError, IpcResult};

/// Message from client to server
#[derive(Debug)]
pub enum ServerMessage {
    Request {
        client_id: ClientId,
        request: Request,
    },
    ClientConnected {
        client_id: ClientId,
        info: ClientInfo,
    },
    ClientDisconnected {
        client_id: ClientId,
    },
}

type ClientMap = Arc<RwLock<HashMap<ClientId, ClientHandle>>>;

/// IPC Server
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    clients: ClientMap,
    event_tx: broadcast::Sender<Event>,
    message_tx: mpsc::UnboundedSender<ServerMessage>,
    message_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<ServerMessage>>>>,
}

struct ClientHandle {
    info: ClientInfo,
    response_tx: mpsc::UnboundedSender<String>,
    subscribed: bool,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            listener: None,
            clients: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            message_tx,
            message_rx: Arc::new(Mutex::new(Some(message_rx))),
        }
    }

    /// Bind the socket
    pub async fn start(&mut self) -> IpcResult<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;

        // Owner and group only; the request layer joins the group
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o660))?;

        info!(path = %self.socket_path.display(), "IPC server listening");

        self.listener = Some(listener);

        Ok(())
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Get receiver for server messages. Only the first call gets it.
    pub async fn take_message_receiver(&self) -> Option<mpsc::UnboundedReceiver<ServerMessage>> {
        self.message_rx.lock().await.take()
    }

    /// Accept connections in a loop
    pub async fn run(&self) -> IpcResult<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or(IpcError::NotStarted)?;

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let client_id = ClientId::new();
                    let uid = get_peer_uid(&stream);
                    let role = role_for_uid(uid, nix::unistd::getuid().as_raw());

                    let info = match uid {
                        Some(u) => ClientInfo::new(role).with_uid(u),
                        None => ClientInfo::new(role),
                    };

                    info!(client_id = %client_id, uid = ?uid, role = ?role, "Client connected");

                    self.handle_client(stream, client_id, info).await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn handle_client(&self, stream: UnixStream, client_id: ClientId, info: ClientInfo) {
        let (read_half, write_half) = stream.into_split();
        let (response_tx, mut response_rx) = mpsc::unbounded_channel::<String>();

        self.clients.write().await.insert(
            client_id.clone(),
            ClientHandle {
                info: info.clone(),
                response_tx,
                subscribed: false,
            },
        );

        let _ = self.message_tx.send(ServerMessage::ClientConnected {
            client_id: client_id.clone(),
            info,
        });

        let clients = self.clients.clone();
        let message_tx = self.message_tx.clone();
        let reader_id = client_id.clone();

        tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!(client_id = %reader_id, "Client disconnected (EOF)");
                        break;
                    }
                    Ok(_) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }

                        match serde_json::from_str::<Request>(line) {
                            Ok(request) => {
                                set_subscription(&clients, &reader_id, &request.command).await;
                                let _ = message_tx.send(ServerMessage::Request {
                                    client_id: reader_id.clone(),
                                    request,
                                });
                            }
                            Err(e) => {
                                warn!(client_id = %reader_id, error = %e, "Invalid request");
                                reply_invalid(&clients, &reader_id, &e).await;
                            }
                        }
                    }
                    Err(e) => {
                        debug!(client_id = %reader_id, error = %e, "Read error");
                        break;
                    }
                }
            }

            disconnect(&clients, &message_tx, &reader_id).await;
        });

        let mut event_rx = self.event_tx.subscribe();
        let clients = self.clients.clone();
        let message_tx = self.message_tx.clone();
        let writer_id = client_id;

        tokio::spawn(async move {
            let mut writer = write_half;

            loop {
                let line = tokio::select! {
                    response = response_rx.recv() => match response {
                        Some(json) => json,
                        // Handle dropped: the reader saw the client go away
                        None => break,
                    },

                    event = event_rx.recv() => match event {
                        Ok(event) => {
                            let subscribed = clients
                                .read()
                                .await
                                .get(&writer_id)
                                .is_some_and(|h| h.subscribed);
                            if !subscribed {
                                continue;
                            }
                            match serde_json::to_string(&event) {
                                Ok(json) => json,
                                Err(e) => {
                                    warn!(error = %e, "Failed to encode event");
                                    continue;
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(client_id = %writer_id, skipped, "Client lagging, events dropped");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                };

                if let Err(e) = write_line(&mut writer, line).await {
                    debug!(client_id = %writer_id, error = %e, "Write error");
                    break;
                }
            }

            disconnect(&clients, &message_tx, &writer_id).await;
        });
    }

    /// Send a response to a specific client
    pub async fn send_response(&self, client_id: &ClientId, response: Response) -> IpcResult<()> {
        let json = serde_json::to_string(&response)?;

        let clients = self.clients.read().await;
        if let Some(handle) = clients.get(client_id) {
            handle
                .response_tx
                .send(json)
                .map_err(|_| IpcError::ConnectionClosed)?;
        }

        Ok(())
    }

    /// Broadcast an event to all subscribed clients
    pub fn broadcast_event(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    pub async fn get_client_info(&self, client_id: &ClientId) -> Option<ClientInfo> {
        let clients = self.clients.read().await;
        clients.get(client_id).map(|h| h.info.clone())
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Remove the socket file
    pub fn shutdown(&self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn set_subscription(clients: &ClientMap, client_id: &ClientId, command: &Command) {
    let subscribed = match command {
        Command::SubscribeEvents => true,
        Command::UnsubscribeEvents => false,
        _ => return,
    };

    if let Some(handle) = clients.write().await.get_mut(client_id) {
        handle.subscribed = subscribed;
    }
}

async fn reply_invalid(clients: &ClientMap, client_id: &ClientId, err: &serde_json::Error) {
    let response = Response::error(
        0,
        ErrorInfo::new(ErrorCode::InvalidRequest, format!("Malformed request: {}", err)),
    );
    let Ok(json) = serde_json::to_string(&response) else {
        return;
    };

    if let Some(handle) = clients.read().await.get(client_id) {
        let _ = handle.response_tx.send(json);
    }
}

/// Forget a client. Only the first caller (reader or writer) reports it.
async fn disconnect(
    clients: &ClientMap,
    message_tx: &mpsc::UnboundedSender<ServerMessage>,
    client_id: &ClientId,
) {
    if clients.write().await.remove(client_id).is_some() {
        let _ = message_tx.send(ServerMessage::ClientDisconnected {
            client_id: client_id.clone(),
        });
    }
}

async fn write_line(writer: &mut tokio::net::unix::OwnedWriteHalf, mut line: String) -> std::io::Result<()> {
    line.push('\n');
    writer.write_all(line.as_bytes()).await
}

/// Root and the daemon's own user operate the service; anyone else who can
/// reach the socket is treated as the request layer.
fn role_for_uid(uid: Option<u32>, own_uid: u32) -> ClientRole {
    match uid {
        Some(0) => ClientRole::Operator,
        Some(u) if u == own_uid => ClientRole::Operator,
        _ => ClientRole::Gateway,
    }
}

/// Get peer UID from Unix socket
fn get_peer_uid(stream: &UnixStream) -> Option<u32> {
    use std::os::unix::io::AsFd;

    let fd = stream.as_fd();

    match nix::sys::socket::getsockopt(&fd, nix::sys::socket::sockopt::PeerCredentials) {
        Ok(cred) => Some(cred.uid()),
        Err(_) => None,
    }
}
