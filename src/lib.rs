//! msgrelay - message reception and fan-out dispatch
//!
//! Pulls message records from a remote peer over a duplex socket, decodes
//! embedded XML into JSON trees, and hands every payload to each registered
//! handler on its own task.

pub mod client;
pub mod config;
pub mod decode;
pub mod payload;
pub mod proto;
pub mod transport;
pub mod utils;

pub use client::{ClientError, MsgClient, MsgHandler, ReceiverConfig};
pub use payload::MsgPayload;
pub use proto::MsgRecord;
pub use transport::{MsgSocket, TransportError};
