//! Transport socket abstraction for the message stream.
//!
//! Supports:
//! - TCP: length-prefixed protobuf frames (feature `tcp`, default)
//! - Mock: in-memory socket fed by the caller, for tests

use async_trait::async_trait;
use serde::Deserialize;

use crate::proto::MsgRecord;

pub mod mock;
#[cfg(feature = "tcp")]
pub mod tcp;

pub use mock::MockSocket;
#[cfg(feature = "tcp")]
pub use tcp::{encode_frame, TcpMsgSocket};

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors that can occur on the transport socket.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Socket is not connected")]
    NotConnected,

    #[error("Socket closed")]
    Closed,

    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("Frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Failed to decode record: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Duplex connection to the remote peer, as seen by the receiver.
///
/// `recv` blocks until a record arrives or the receive fails. Callers keep at
/// most one `recv` in flight. A failed `recv` does not by itself mean the
/// socket is unusable.
#[async_trait]
pub trait MsgSocket: Send + Sync {
    /// Establish the connection. Called once before the first `recv`.
    async fn open(&self) -> Result<()>;

    /// Wait for the next record.
    async fn recv(&self) -> Result<MsgRecord>;

    /// Release the connection.
    async fn close(&self) -> Result<()>;
}

/// Default peer address for the message stream.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:10087";

/// Default maximum frame size (10 MB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

/// Transport configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Peer address (`host:port`).
    pub address: String,
    /// Connection establishment timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Largest accepted frame body in bytes.
    pub max_frame_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            connect_timeout_ms: 5000,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}
