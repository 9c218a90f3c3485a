use std::{io, string::FromUtf8Error};

use thiserror::Error;

/// Failure reading from or writing to a client's framed channel.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket failure: {0}")]
    WebSocket(#[from] axum::Error),
    #[error("binary frame is not valid utf-8")]
    InvalidUtf8(#[from] FromUtf8Error),
    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("message could not be encoded: {0}")]
    Unencodable(#[source] serde_json::Error),
}

/// The hub's event loop has stopped and no longer accepts requests.
#[derive(Debug, Error)]
#[error("chat hub is no longer running")]
pub struct HubClosed;

/// Why a connection's inbound loop stopped.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    HubClosed(#[from] HubClosed),
}
