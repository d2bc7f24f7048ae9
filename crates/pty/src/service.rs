//! Unix-domain-socket front end (component C10) for the PTY session
//! manager: one newline-delimited JSON request per connection, then (for
//! `create`/`attach`) a bidirectional stream of JSON-line events and
//! client commands until the process exits or the peer disconnects.
//! The accept loop is grounded on `Listener::run` (`listener/mod.rs`):
//! spawn a task per connection off a single `UnixListener`, never block
//! the accept loop on a slow peer.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use agentic_c_eda_core::PtySessionInfo;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::manager::PtySessionManager;
use crate::prompts::detect_prompt_type;
use crate::session::PtySession;

const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ClientRequest {
    Create {
        command: String,
        #[serde(default = "default_timeout")]
        timeout: u64,
    },
    Attach {
        session_id: String,
    },
    List,
    Close {
        session_id: String,
    },
}

fn default_timeout() -> u64 {
    DEFAULT_SESSION_TIMEOUT_SECS
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamCommand {
    Input { data: String },
    Signal { signal: String },
    Resize,
}

pub struct PtyService {
    socket_path: PathBuf,
    manager: Arc<PtySessionManager>,
}

impl PtyService {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self { socket_path: socket_path.into(), manager: Arc::new(PtySessionManager::new()) }
    }

    pub async fn run(self) -> std::io::Result<()> {
        if let Some(dir) = self.socket_path.parent() {
            std::fs::create_dir_all(dir)?;
            let _ = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o777));
        }
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o666))?;
        info!(path = %self.socket_path.display(), "pty service listening");

        let manager = Arc::clone(&self.manager);
        tokio::spawn(async move { manager.start_cleanup_loop().await });

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let manager = Arc::clone(&self.manager);
                    tokio::spawn(async move {
                        if let Err(error) = handle_connection(stream, manager).await {
                            warn!(%error, "error handling pty connection");
                        }
                    });
                }
                Err(error) => error!(%error, "accept error"),
            }
        }
    }
}

async fn handle_connection(stream: UnixStream, manager: Arc<PtySessionManager>) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut line = String::new();
    let read = timeout(REQUEST_READ_TIMEOUT, reader.read_line(&mut line)).await;
    let Ok(Ok(bytes_read)) = read else {
        return Ok(());
    };
    if bytes_read == 0 {
        return Ok(());
    }

    let request: ClientRequest = match serde_json::from_str(line.trim_end()) {
        Ok(request) => request,
        Err(error) => {
            warn!(%error, "invalid JSON from pty client");
            return Ok(());
        }
    };

    match request {
        ClientRequest::Create { command, timeout: timeout_secs } => {
            if command.is_empty() {
                send(&mut write_half, json!({"status": "error", "message": "No command provided"})).await;
                return Ok(());
            }
            let uuid = uuid::Uuid::new_v4().simple().to_string();
            let session_id = uuid[..8].to_string();
            match manager.create_session(session_id.clone(), command, Duration::from_secs(timeout_secs)).await {
                Ok(session) => {
                    send(&mut write_half, json!({"status": "created", "session_id": session_id})).await;
                    stream_session(session, reader, write_half).await;
                }
                Err(error) => {
                    warn!(%error, "failed to create pty session");
                    send(&mut write_half, json!({"status": "error", "message": "Failed to create PTY session"})).await;
                }
            }
        }
        ClientRequest::Attach { session_id } => match manager.get_session(&session_id).await {
            Some(session) => {
                send(&mut write_half, json!({"status": "attached", "session_id": session_id})).await;
                stream_session(session, reader, write_half).await;
            }
            None => send(&mut write_half, json!({"status": "error", "message": "Session not found"})).await,
        },
        ClientRequest::List => {
            let sessions: Vec<PtySessionInfo> = manager
                .list_sessions()
                .await
                .iter()
                .map(|s| PtySessionInfo {
                    session_id: s.session_id.clone(),
                    command: s.command.chars().take(50).collect(),
                    created_at: s.created_at,
                    last_activity: s.created_at,
                    alive: s.is_running(),
                })
                .collect();
            send(&mut write_half, json!({"status": "ok", "sessions": sessions})).await;
        }
        ClientRequest::Close { session_id } => {
            manager.close_session(&session_id).await;
            send(&mut write_half, json!({"status": "closed", "session_id": session_id})).await;
        }
    }

    Ok(())
}

type OwnedReader = BufReader<tokio::net::unix::OwnedReadHalf>;
type OwnedWriter = tokio::net::unix::OwnedWriteHalf;

/// Pumps pty output to the socket and client commands into the pty,
/// concurrently, until the process exits and its output drains or the
/// peer disconnects. Grounded on `_stream_session`.
async fn stream_session(session: Arc<PtySession>, reader: OwnedReader, writer: OwnedWriter) {
    let output_session = Arc::clone(&session);
    let output_task = tokio::spawn(pump_output(output_session, writer));
    let input_task = tokio::spawn(pump_input(session, reader));
    let _ = tokio::join!(output_task, input_task);
}

async fn pump_output(session: Arc<PtySession>, mut writer: OwnedWriter) {
    let mut output_rx = session.subscribe_output();
    loop {
        match timeout(Duration::from_millis(50), output_rx.recv()).await {
            Ok(Ok(chunk)) => {
                let text = String::from_utf8_lossy(&chunk).to_string();
                let mut msg = json!({"event": "output", "data": text});
                if let Some(hint) = detect_prompt_type(&text) {
                    msg["prompt_hint"] = json!(hint);
                }
                if send(&mut writer, msg).await.is_err() {
                    return;
                }
            }
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) => break,
            Err(_) => {
                if !session.is_running() {
                    break;
                }
            }
        }
    }

    drain_remaining(&session, &mut output_rx, &mut writer).await;
    let exit_code = session.get_exit_code();
    let _ = send(&mut writer, json!({"event": "done", "session_id": session.session_id, "exit_code": exit_code})).await;
}

async fn drain_remaining(_session: &Arc<PtySession>, output_rx: &mut broadcast::Receiver<Vec<u8>>, writer: &mut OwnedWriter) {
    for _ in 0..10 {
        match timeout(Duration::from_millis(10), output_rx.recv()).await {
            Ok(Ok(chunk)) => {
                let text = String::from_utf8_lossy(&chunk).to_string();
                let _ = send(writer, json!({"event": "output", "data": text})).await;
            }
            _ => break,
        }
    }
}

async fn pump_input(session: Arc<PtySession>, mut reader: OwnedReader) {
    while session.is_running() {
        let mut line = String::new();
        match timeout(Duration::from_millis(100), reader.read_line(&mut line)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(_)) => {
                let Ok(command) = serde_json::from_str::<StreamCommand>(line.trim_end()) else { continue };
                match command {
                    StreamCommand::Input { data } => {
                        session.write_input(&data);
                    }
                    StreamCommand::Signal { signal } => {
                        session.send_signal(&signal);
                    }
                    StreamCommand::Resize => {}
                }
            }
            Ok(Err(_)) => break,
            Err(_) => continue,
        }
    }
}

async fn send(writer: &mut (impl AsyncWriteExt + Unpin), message: Value) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(&message).unwrap_or_default();
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await
}

