//! WebSocket client for the Binance futures combined stream
//!
//! Handles connection, frame reception, and ping/pong. Reconnection policy
//! lives in the feed manager.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{FeedError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handshake deadline; once live, protocol pings carry liveness.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket client for a single combined-stream connection
pub struct WebSocketClient {
    stream: Option<WsStream>,
    url: String,
}

impl WebSocketClient {
    /// Build a client for `{symbol}@depth@100ms` + `{symbol}@aggTrade`.
    pub fn new(config: &Config) -> Self {
        Self {
            stream: None,
            url: config.ws_stream_url(),
        }
    }

    /// Connect with a bounded handshake deadline.
    pub async fn connect(&mut self) -> Result<()> {
        info!(url = %self.url, "Connecting to market data stream");

        let connect = connect_async(self.url.as_str());
        let (ws_stream, response) = tokio::time::timeout(CONNECT_TIMEOUT, connect)
            .await
            .map_err(|_| FeedError::ConnectionTimeout)?
            .map_err(|e| FeedError::WebSocketConnection(format!("failed to connect: {e}")))?;

        info!(status = ?response.status(), "WebSocket connected");
        self.stream = Some(ws_stream);
        Ok(())
    }

    /// Receive the next text frame. `Ok(None)` means a control frame was
    /// consumed (ping answered, pong ignored); errors mean the session is
    /// gone.
    pub async fn recv(&mut self) -> Result<Option<String>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| FeedError::WebSocketConnection("not connected".to_string()))?;

        match stream.next().await {
            Some(Ok(Message::Text(text))) => Ok(Some(text)),
            Some(Ok(Message::Binary(data))) => {
                Ok(Some(String::from_utf8_lossy(&data).into_owned()))
            }
            Some(Ok(Message::Ping(payload))) => {
                debug!("Ping received, answering");
                stream
                    .send(Message::Pong(payload))
                    .await
                    .map_err(|e| FeedError::WebSocketMessage(e.to_string()))?;
                Ok(None)
            }
            Some(Ok(Message::Pong(_))) => Ok(None),
            Some(Ok(Message::Close(frame))) => {
                warn!(frame = ?frame, "Close frame received");
                self.stream = None;
                Err(FeedError::WebSocketConnection(
                    "connection closed by server".to_string(),
                ))
            }
            Some(Ok(Message::Frame(_))) => Ok(None),
            Some(Err(e)) => {
                self.stream = None;
                Err(FeedError::WebSocketMessage(e.to_string()))
            }
            None => {
                self.stream = None;
                Err(FeedError::WebSocketConnection("stream ended".to_string()))
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Close the session, ignoring errors on an already-dead connection.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }
}
