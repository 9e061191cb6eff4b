//! Wire types received from the remote peer.
//!
//! Field tags match the peer's message definition, so frames produced by any
//! protobuf encoder of that definition decode here unchanged.

use serde::Serialize;

/// One raw inbound message record.
#[derive(Clone, PartialEq, prost::Message, Serialize)]
pub struct MsgRecord {
    /// Sent by the logged-in account itself.
    #[prost(bool, tag = "1")]
    pub is_self: bool,
    /// Received in a group conversation.
    #[prost(bool, tag = "2")]
    pub is_group: bool,
    /// Message id assigned by the peer.
    #[prost(uint64, tag = "3")]
    pub id: u64,
    /// Message type code.
    #[prost(uint32, tag = "4")]
    #[serde(rename = "type")]
    pub msg_type: u32,
    /// Unix timestamp (seconds).
    #[prost(uint32, tag = "5")]
    pub ts: u32,
    /// Conversation id when `is_group` is set.
    #[prost(string, tag = "6")]
    pub roomid: String,
    /// Free-text body. May carry embedded XML.
    #[prost(string, tag = "7")]
    pub content: String,
    #[prost(string, tag = "8")]
    pub sender: String,
    #[prost(string, tag = "9")]
    pub sign: String,
    #[prost(string, tag = "10")]
    pub thumb: String,
    #[prost(string, tag = "11")]
    pub extra: String,
    /// Envelope markup.
    #[prost(string, tag = "12")]
    pub xml: String,
}
