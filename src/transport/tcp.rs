//! TCP transport socket.
//!
//! Frames are a 4-byte big-endian length followed by a protobuf-encoded
//! [`MsgRecord`]. `close` wakes any `recv` blocked on the stream.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use super::{MsgSocket, Result, TransportConfig, TransportError};
use crate::proto::MsgRecord;

/// Encode a record as one length-prefixed frame.
pub fn encode_frame(record: &MsgRecord) -> Vec<u8> {
    let body = record.encode_to_vec();
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    frame
}

async fn read_frame<R>(reader: &mut R, max_frame_bytes: usize) -> Result<MsgRecord>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > max_frame_bytes {
        return Err(TransportError::FrameTooLarge {
            len,
            max: max_frame_bytes,
        });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(MsgRecord::decode(buf.as_slice())?)
}

struct Connection {
    reader: Arc<Mutex<BufReader<OwnedReadHalf>>>,
    // Held so the write side stays open for the peer.
    _writer: OwnedWriteHalf,
    shutdown: watch::Sender<bool>,
}

/// Message socket over a TCP stream.
pub struct TcpMsgSocket {
    config: TransportConfig,
    conn: Mutex<Option<Connection>>,
}

impl TcpMsgSocket {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            conn: Mutex::new(None),
        }
    }

    /// Create a socket for `address` with default limits.
    pub fn connect_to(address: impl Into<String>) -> Self {
        Self::new(TransportConfig {
            address: address.into(),
            ..Default::default()
        })
    }

    /// Drop the connection if it is still the one `reader` belongs to.
    async fn discard(&self, reader: &Arc<Mutex<BufReader<OwnedReadHalf>>>) {
        let mut slot = self.conn.lock().await;
        if slot
            .as_ref()
            .is_some_and(|conn| Arc::ptr_eq(&conn.reader, reader))
        {
            slot.take();
            warn!(address = %self.config.address, "Message stream connection dropped");
        }
    }
}

#[async_trait]
impl MsgSocket for TcpMsgSocket {
    async fn open(&self) -> Result<()> {
        let address = &self.config.address;
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);

        let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
            .await
            .map_err(|_| TransportError::Connect(format!("{}: timed out", address)))?
            .map_err(|e| TransportError::Connect(format!("{}: {}", address, e)))?;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let (shutdown, _) = watch::channel(false);
        let conn = Connection {
            reader: Arc::new(Mutex::new(BufReader::new(read_half))),
            _writer: write_half,
            shutdown,
        };

        if let Some(previous) = self.conn.lock().await.replace(conn) {
            let _ = previous.shutdown.send(true);
        }

        info!(address = %address, "Connected to message stream");
        Ok(())
    }

    async fn recv(&self) -> Result<MsgRecord> {
        let (reader, mut shutdown) = {
            let slot = self.conn.lock().await;
            let conn = slot.as_ref().ok_or(TransportError::NotConnected)?;
            (Arc::clone(&conn.reader), conn.shutdown.subscribe())
        };

        let result = {
            let mut stream = reader.lock().await;
            tokio::select! {
                frame = read_frame(&mut *stream, self.config.max_frame_bytes) => frame,
                _ = shutdown.wait_for(|closed| *closed) => return Err(TransportError::Closed),
            }
        };

        match result {
            Err(TransportError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.discard(&reader).await;
                Err(TransportError::Closed)
            }
            // The stream position is unknown after these; nothing after them is trustworthy.
            Err(e @ (TransportError::Io(_) | TransportError::FrameTooLarge { .. })) => {
                self.discard(&reader).await;
                Err(e)
            }
            other => other,
        }
    }

    async fn close(&self) -> Result<()> {
        if let Some(conn) = self.conn.lock().await.take() {
            let _ = conn.shutdown.send(true);
            debug!(address = %self.config.address, "Message stream closed");
        }
        Ok(())
    }
}
