//! Network seam for sessions
//!
//! A [`Connector`] opens a [`Transport`] carrying text frames. The session
//! task is written against these traits only; [`WebSocketConnector`] is the
//! production implementation.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};

#[async_trait]
pub trait Transport: Send + 'static {
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Next text frame. `None` once the remote side has closed cleanly.
    ///
    /// Must be cancel-safe: the session task races it against outbound frames.
    async fn next_message(&mut self) -> Option<Result<String>>;

    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    async fn connect(&self, config: &SessionConfig) -> Result<Self::Transport>;
}

/// Connects over `wss://` with rustls
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    type Transport = WebSocketTransport;

    async fn connect(&self, config: &SessionConfig) -> Result<WebSocketTransport> {
        info!("Connecting to {}", config.endpoint);

        let handshake = connect_async(config.url());
        let connected = match config.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, handshake)
                .await
                .map_err(|_| SessionError::Connect(format!("timed out after {:?}", limit)))?,
            None => handshake.await,
        };
        let (stream, response) = connected.map_err(|e| SessionError::Connect(e.to_string()))?;

        debug!("WebSocket handshake complete: HTTP {}", response.status());
        Ok(WebSocketTransport { stream })
    }
}

pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn next_message(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                // The Live API sends JSON in binary frames as well
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => warn!("Ignoring non-UTF-8 binary frame"),
                },
                Ok(Message::Close(frame)) => {
                    let Some(frame) = frame else {
                        return None;
                    };
                    info!("Remote closed session: {} {}", frame.code, frame.reason);
                    return match frame.code {
                        CloseCode::Normal | CloseCode::Away => None,
                        code => Some(Err(SessionError::Transport(format!(
                            "closed by remote ({}): {}",
                            code, frame.reason
                        )))),
                    };
                }
                Ok(_) => {}
                Err(tungstenite::Error::ConnectionClosed) => return None,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self.stream.close(None).await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
