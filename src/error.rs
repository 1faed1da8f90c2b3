//! Error types for rapidnet
//!
//! Provides a unified error type for all operations. Errors are `Clone` so the
//! same value can be returned to a caller and carried inside an
//! `Exception` event.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;

use crate::network::Handle;

/// Result type alias using NetError
pub type Result<T> = std::result::Result<T, NetError>;

/// Unified error type for rapidnet operations
#[derive(Debug, Clone, Error)]
pub enum NetError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    // -------------------------------------------------------------------------
    // Client Errors
    // -------------------------------------------------------------------------
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: Arc<std::io::Error>,
    },

    #[error("Connecting to {addr} timed out after {timeout_ms}ms")]
    ConnectTimeout { addr: String, timeout_ms: u64 },

    #[error("Client is already connected")]
    AlreadyConnected,

    #[error("Not connected")]
    NotConnected,

    // -------------------------------------------------------------------------
    // Listener Errors
    // -------------------------------------------------------------------------
    #[error("Failed to listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        source: Arc<std::io::Error>,
    },

    #[error("Already listening on {0}")]
    AlreadyListening(SocketAddr),

    #[error("Accept failed: {0}")]
    Accept(Arc<std::io::Error>),

    #[error("Duplicate connection handle: {0}")]
    DuplicateHandle(Handle),

    // -------------------------------------------------------------------------
    // Transfer Errors
    // -------------------------------------------------------------------------
    #[error("Receive failed on connection {handle}: {source}")]
    Receive {
        handle: Handle,
        source: Arc<std::io::Error>,
    },

    #[error("Connection {handle} closed by peer")]
    ClosedByPeer { handle: Handle },

    #[error("Send failed on connection {handle}: {source}")]
    Send {
        handle: Handle,
        source: Arc<std::io::Error>,
    },

    #[error("Invalid UTF-8 received on connection {handle}: {detail}")]
    Decode { handle: Handle, detail: String },

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for NetError {
    fn from(err: std::io::Error) -> Self {
        NetError::Io(Arc::new(err))
    }
}

impl NetError {
    /// Returns true for faults that mean the remote end went away
    pub fn is_disconnect(&self) -> bool {
        match self {
            NetError::ClosedByPeer { .. } | NetError::NotConnected => true,
            NetError::Receive { source, .. } | NetError::Send { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}
