//! Unix-socket IPC server.
//!
//! Each accepted connection is a client session. Commands are read one line
//! at a time and forwarded to the event loop; responses and signals for the
//! session share a single writer task so they never interleave mid-line.

use crate::DaemonEvent;
use anyhow::{Context, Result};
use notifyd_ipc::{decode_line, encode_line, IpcCommand, IpcMessage, IpcResponse, MAX_IPC_MESSAGE_SIZE};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Clients must send their first command within this period.
pub const IPC_READ_TIMEOUT: Duration = Duration::from_secs(5);

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

fn next_session_name() -> String {
    format!(":client-{}", NEXT_SESSION.fetch_add(1, Ordering::Relaxed))
}

/// Check if another daemon instance is already listening on `path`.
pub async fn check_already_running(path: &Path) -> bool {
    UnixStream::connect(path).await.is_ok()
}

/// Bind the daemon socket, replacing a stale socket file.
pub fn bind_socket(path: &Path) -> Result<UnixListener> {
    if path.exists() {
        debug!("Removing stale socket {}", path.display());
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove stale socket: {}", path.display()))?;
    }
    UnixListener::bind(path).with_context(|| format!("Failed to bind socket: {}", path.display()))
}

/// Accept clients forever, one task per connection.
pub async fn run_ipc_server(listener: UnixListener, event_tx: mpsc::Sender<DaemonEvent>) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let session = next_session_name();
                debug!("Client connected as {}", session);
                let event_tx = event_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, session, event_tx).await {
                        warn!("Client handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept client connection: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// Serve one client session until it disconnects.
pub async fn handle_client<S>(
    stream: S,
    session: String,
    event_tx: mpsc::Sender<DaemonEvent>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let (outbox, inbox) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_messages(writer, inbox));

    if event_tx
        .send(DaemonEvent::SessionOpened {
            session: session.clone(),
            outbox: outbox.clone(),
        })
        .await
        .is_err()
    {
        let _ = outbox.send(IpcMessage::Response(IpcResponse::error(
            "Daemon is shutting down",
        )));
        drop(outbox);
        let _ = writer_task.await;
        return Ok(());
    }

    let result = read_commands(reader, &session, &event_tx, &outbox).await;

    let _ = event_tx.send(DaemonEvent::SessionClosed { session }).await;
    drop(outbox);
    let _ = writer_task.await;
    result
}

async fn read_commands<R>(
    reader: R,
    session: &str,
    event_tx: &mpsc::Sender<DaemonEvent>,
    outbox: &mpsc::UnboundedSender<IpcMessage>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut first = true;

    loop {
        let mut buf = Vec::new();
        let mut limited = (&mut reader).take(MAX_IPC_MESSAGE_SIZE as u64 + 1);
        let read = limited.read_until(b'\n', &mut buf);
        let bytes_read = if first {
            match tokio::time::timeout(IPC_READ_TIMEOUT, read).await {
                Ok(result) => result?,
                Err(_) => {
                    // Client did not send in time, silently close
                    debug!("Session {} sent nothing, closing", session);
                    return Ok(());
                }
            }
        } else {
            read.await?
        };
        first = false;

        if bytes_read == 0 {
            return Ok(()); // Client disconnected
        }
        if buf.len() > MAX_IPC_MESSAGE_SIZE {
            let _ = outbox.send(IpcMessage::Response(IpcResponse::error(
                "IPC message exceeds the maximum size",
            )));
            return Ok(());
        }

        let line = String::from_utf8_lossy(&buf);
        if line.trim().is_empty() {
            continue;
        }
        debug!("Received command from {}: {}", session, line.trim());

        let cmd: IpcCommand = match decode_line(&line) {
            Ok(cmd) => cmd,
            Err(e) => {
                let _ = outbox.send(IpcMessage::Response(IpcResponse::error(format!(
                    "Invalid command: {}",
                    e
                ))));
                continue;
            }
        };

        let is_stop = matches!(cmd, IpcCommand::Stop);
        let (resp_tx, resp_rx) = oneshot::channel();
        if event_tx
            .send(DaemonEvent::IpcCommand {
                session: session.to_string(),
                cmd,
                responder: resp_tx,
            })
            .await
            .is_err()
        {
            let _ = outbox.send(IpcMessage::Response(IpcResponse::error(
                "Daemon is shutting down",
            )));
            return Ok(());
        }

        let response = match resp_rx.await {
            Ok(resp) => resp,
            Err(_) => IpcResponse::error("Failed to get response from daemon"),
        };
        if outbox.send(IpcMessage::Response(response)).is_err() {
            return Ok(());
        }

        if is_stop {
            info!("Stop requested by {}", session);
            let _ = event_tx.send(DaemonEvent::Shutdown).await;
            return Ok(());
        }
    }
}

async fn write_messages<W>(mut writer: W, mut inbox: mpsc::UnboundedReceiver<IpcMessage>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = inbox.recv().await {
        let line = match encode_line(&message) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize IPC message: {}", e);
                continue;
            }
        };
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            debug!("Client went away: {}", e);
            return;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use notifyd_core::CloseReason;
    use notifyd_ipc::IpcSignal;

    /// Stand-in event loop: answers every command with `Ok` after pushing
    /// one closed signal to every open session.
    fn spawn_fake_loop(
        mut rx: mpsc::Receiver<DaemonEvent>,
    ) -> tokio::task::JoinHandle<Vec<&'static str>> {
        tokio::spawn(async move {
            let mut seen = Vec::new();
            let mut outboxes = Vec::new();
            while let Some(event) = rx.recv().await {
                match event {
                    DaemonEvent::SessionOpened { outbox, .. } => {
                        seen.push("opened");
                        outboxes.push(outbox);
                    }
                    DaemonEvent::IpcCommand { responder, .. } => {
                        seen.push("command");
                        for outbox in &outboxes {
                            let _ = outbox.send(IpcMessage::Signal(IpcSignal::NotificationClosed {
                                id: 1,
                                reason: CloseReason::ClosedByCall,
                            }));
                        }
                        let _ = responder.send(IpcResponse::Ok);
                    }
                    DaemonEvent::Shutdown => seen.push("shutdown"),
                    DaemonEvent::SessionClosed { .. } => {
                        seen.push("closed");
                        break;
                    }
                    _ => {}
                }
            }
            seen
        })
    }

    #[test]
    fn test_ipc_read_timeout_is_reasonable() {
        assert!(IPC_READ_TIMEOUT.as_secs() >= 1);
        assert!(IPC_READ_TIMEOUT.as_secs() <= 30);
    }

    #[test]
    fn test_session_names_are_unique() {
        let a = next_session_name();
        let b = next_session_name();
        assert_ne!(a, b);
        assert!(a.starts_with(":client-"));
    }

    #[tokio::test]
    async fn test_signal_then_response_on_same_stream() {
        let (client, server) = UnixStream::pair().unwrap();
        let (tx, rx) = mpsc::channel(16);
        let fake_loop = spawn_fake_loop(rx);
        let handler = tokio::spawn(handle_client(server, ":client-test".to_string(), tx));

        let (read, mut write) = client.into_split();
        write
            .write_all(b"{\"type\":\"close_notification\",\"id\":1}\n")
            .await
            .unwrap();

        let mut lines = BufReader::new(read).lines();
        let first: IpcMessage = decode_line(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(
            first,
            IpcMessage::Signal(IpcSignal::NotificationClosed {
                id: 1,
                reason: CloseReason::ClosedByCall,
            })
        );
        let second: IpcMessage = decode_line(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(second, IpcMessage::Response(IpcResponse::Ok));

        drop(write);
        handler.await.unwrap().unwrap();
        assert_eq!(fake_loop.await.unwrap(), vec!["opened", "command", "closed"]);
    }

    #[tokio::test]
    async fn test_invalid_command_keeps_session_open() {
        let (client, server) = UnixStream::pair().unwrap();
        let (tx, rx) = mpsc::channel(16);
        let fake_loop = spawn_fake_loop(rx);
        let handler = tokio::spawn(handle_client(server, ":client-test".to_string(), tx));

        let (read, mut write) = client.into_split();
        write.write_all(b"not json\n").await.unwrap();
        let mut lines = BufReader::new(read).lines();
        let reply: IpcMessage = decode_line(&lines.next_line().await.unwrap().unwrap()).unwrap();
        match reply {
            IpcMessage::Response(IpcResponse::Error { message }) => {
                assert!(message.starts_with("Invalid command"));
            }
            other => panic!("Expected error response, got {:?}", other),
        }

        write.write_all(b"{\"type\":\"status\"}\n").await.unwrap();
        let _signal = lines.next_line().await.unwrap().unwrap();
        let reply: IpcMessage = decode_line(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply, IpcMessage::Response(IpcResponse::Ok));

        drop(write);
        handler.await.unwrap().unwrap();
        fake_loop.await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_requests_shutdown() {
        let (client, server) = UnixStream::pair().unwrap();
        let (tx, rx) = mpsc::channel(16);
        let fake_loop = spawn_fake_loop(rx);
        let handler = tokio::spawn(handle_client(server, ":client-test".to_string(), tx));

        let (read, mut write) = client.into_split();
        write.write_all(b"{\"type\":\"stop\"}\n").await.unwrap();
        let mut lines = BufReader::new(read).lines();
        let _signal = lines.next_line().await.unwrap();
        let reply: IpcMessage = decode_line(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply, IpcMessage::Response(IpcResponse::Ok));

        handler.await.unwrap().unwrap();
        assert_eq!(
            fake_loop.await.unwrap(),
            vec!["opened", "command", "shutdown", "closed"]
        );
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let path = std::env::temp_dir().join(format!("notifyd-test-{}.sock", std::process::id()));
        std::fs::write(&path, b"stale").unwrap();
        let listener = bind_socket(&path).unwrap();
        assert!(check_already_running(&path).await);
        drop(listener);
        std::fs::remove_file(&path).unwrap();
        assert!(!check_already_running(&path).await);
    }
}
