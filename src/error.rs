//! Error types for the market data engine

use thiserror::Error;

/// Market data engine errors
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("WebSocket connection error: {0}")]
    WebSocketConnection(String),

    #[error("WebSocket message error: {0}")]
    WebSocketMessage(String),

    #[error("Failed to parse message: {0}")]
    ParseError(String),

    #[error("Snapshot fetch error: {0}")]
    SnapshotError(String),

    #[error("Broadcast server error: {0}")]
    BroadcastError(String),

    #[error("Connection timeout")]
    ConnectionTimeout,
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        FeedError::WebSocketConnection(err.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::ParseError(err.to_string())
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        FeedError::SnapshotError(err.to_string())
    }
}

impl From<std::io::Error> for FeedError {
    fn from(err: std::io::Error) -> Self {
        FeedError::BroadcastError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FeedError>;
