//! WebSocket connection handler
//!
//! Decodes client messages and hands commands to the daemon on the blocking
//! thread pool, so a long parse never stalls the async runtime.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};

use crate::daemon::{Daemon, RawCommand, Response};
use crate::error::IndexError;
use crate::parser::UnitParser;
use crate::socket_server::protocol::{ClientMessage, ServerMessage};

/// Handle a single WebSocket connection
pub async fn handle_connection<P: UnitParser>(stream: TcpStream, daemon: Arc<Daemon<P>>) {
    let addr = stream.peer_addr().ok();
    tracing::info!("New connection from {:?}", addr);

    // Accept WebSocket handshake
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::error!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    let mut conn = ConnectionState::new(ws_stream, daemon);
    conn.run().await;

    tracing::info!("Connection {} closed from {:?}", conn.client_id, addr);
}

/// State for a single connection
struct ConnectionState<P: UnitParser> {
    ws: WebSocketStream<TcpStream>,
    daemon: Arc<Daemon<P>>,
    client_id: String,
}

impl<P: UnitParser> ConnectionState<P> {
    fn new(ws: WebSocketStream<TcpStream>, daemon: Arc<Daemon<P>>) -> Self {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        let client_id = format!("cli_{}", &uuid[..8]);
        Self {
            ws,
            daemon,
            client_id,
        }
    }

    async fn run(&mut self) {
        let welcome = ServerMessage::Welcome {
            client_id: self.client_id.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        if let Err(e) = self.send(&welcome).await {
            tracing::error!("Failed to greet {}: {}", self.client_id, e);
            return;
        }

        while let Some(msg) = self.ws.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if let Err(e) = self.handle_message(&text).await {
                        tracing::error!("Error handling message: {}", e);
                        let _ = self.send_error(None, "internal_error", &e.to_string()).await;
                    }
                }
                Ok(Message::Close(_)) => {
                    tracing::info!("Client {} requested close", self.client_id);
                    break;
                }
                Ok(Message::Ping(data)) => {
                    let _ = self.ws.send(Message::Pong(data)).await;
                }
                Err(e) => {
                    tracing::error!("WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
    }

    async fn handle_message(&mut self, text: &str) -> anyhow::Result<()> {
        let msg: ClientMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                let err = IndexError::malformed(format!("invalid message: {}", e));
                return self.send_error(None, err.code(), &err.to_string()).await;
            }
        };

        match msg.into_command() {
            Some((id, raw)) => {
                tracing::debug!("{} -> {} (#{})", self.client_id, raw.name, id);
                let response = dispatch(Arc::clone(&self.daemon), raw).await?;
                self.send(&ServerMessage::Response { id, response }).await?;
            }
            None => {
                self.send(&ServerMessage::Pong).await?;
            }
        }

        Ok(())
    }

    async fn send(&mut self, msg: &ServerMessage) -> anyhow::Result<()> {
        let json = serde_json::to_string(msg)?;
        self.ws.send(Message::Text(json)).await?;
        Ok(())
    }

    async fn send_error(&mut self, id: Option<u64>, code: &str, message: &str) -> anyhow::Result<()> {
        self.send(&ServerMessage::Error {
            id,
            code: code.to_string(),
            message: message.to_string(),
        })
        .await
    }
}

/// Run a command on the blocking pool
async fn dispatch<P: UnitParser>(daemon: Arc<Daemon<P>>, raw: RawCommand) -> anyhow::Result<Response> {
    let response = tokio::task::spawn_blocking(move || daemon.handle(raw)).await?;
    Ok(response)
}
