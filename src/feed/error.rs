//! Feed error types.
//!
//! These never leave the reconnect loop: connection failures drive
//! reconnection and per-event problems are logged and dropped.

use crate::gateway::GatewayError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    /// Token acquisition failed; the cycle cannot start.
    #[error("authentication failed: {0}")]
    Auth(#[from] GatewayError),

    /// Websocket connect failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// SignalR handshake was rejected or unreadable.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The transport errored mid-session.
    #[error("transport error: {0}")]
    Transport(String),
}

pub type FeedResult<T> = Result<T, FeedError>;

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        FeedError::Transport(err.to_string())
    }
}
