//! Message client: receive loop lifecycle and handler registration.
//!
//! This module contains:
//! - `MsgHandler` trait: what registered consumers implement
//! - `MsgClient`: starts the receive loop on first registration and tears it
//!   down on `destroy`
//! - Receiver configuration
//!
//! All mutable client state (receiving flag, connection flag, session id and
//! handler set) sits behind one mutex. The lock is never held across a
//! receive or a handler call. At most one receive loop runs per client.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::payload::MsgPayload;
use crate::transport::{MsgSocket, TransportError};

mod dispatch;
mod listener;

pub use dispatch::dispatch;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur managing a message client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Connection failed: {0}")]
    Connection(#[source] TransportError),

    #[error("Client in use: {handlers} handler(s) still registered")]
    InUse { handlers: usize },

    #[error("Close failed: {0}")]
    Close(#[source] TransportError),
}

/// Consumer of received payloads.
///
/// Each payload is delivered on its own task; the returned future is not
/// awaited by the receive loop. The payload is shared with every other
/// handler.
pub trait MsgHandler: Send + Sync {
    fn handle(&self, payload: Arc<MsgPayload>) -> BoxFuture<'static, ()>;
}

impl<F, Fut> MsgHandler for F
where
    F: Fn(Arc<MsgPayload>) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn handle(&self, payload: Arc<MsgPayload>) -> BoxFuture<'static, ()> {
        Box::pin(self(payload))
    }
}

/// Receive loop and dispatch configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// First delay after a failed receive, in milliseconds.
    pub backoff_min_ms: u64,
    /// Delay cap while receives keep failing, in milliseconds.
    pub backoff_max_ms: u64,
    /// Maximum handler invocations running at once. `None` is unbounded.
    pub dispatch_limit: Option<usize>,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            backoff_min_ms: 10,
            backoff_max_ms: 5000,
            dispatch_limit: None,
        }
    }
}

impl ReceiverConfig {
    pub fn backoff_min(&self) -> Duration {
        Duration::from_millis(self.backoff_min_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms.max(self.backoff_min_ms))
    }
}

#[derive(Default)]
struct ClientState {
    receiving: bool,
    connected: bool,
    /// Incremented each time a receive loop is started.
    session: u64,
    handlers: Vec<Arc<dyn MsgHandler>>,
    /// Most recently spawned receive loop.
    listener: Option<JoinHandle<()>>,
}

struct Inner {
    socket: Arc<dyn MsgSocket>,
    config: ReceiverConfig,
    dispatch_limit: Option<Arc<Semaphore>>,
    state: Mutex<ClientState>,
}

impl Inner {
    /// Whether the loop for `session` should run another iteration.
    async fn is_current(&self, session: u64) -> bool {
        let state = self.state.lock().await;
        state.receiving && state.session == session
    }

    async fn current_handlers(&self) -> Vec<Arc<dyn MsgHandler>> {
        let state = self.state.lock().await;
        if state.receiving {
            state.handlers.clone()
        } else {
            Vec::new()
        }
    }

    /// Clear handlers and flags, closing the socket if it is open.
    async fn teardown(&self, state: &mut ClientState) -> Result<()> {
        state.handlers.clear();
        state.receiving = false;
        if std::mem::take(&mut state.connected) {
            self.socket.close().await.map_err(ClientError::Close)?;
        }
        Ok(())
    }

    /// Forced teardown run by a loop on exit. A loop from an older session
    /// leaves the current session alone.
    async fn finish(&self, session: u64) {
        let mut state = self.state.lock().await;
        if state.session != session {
            return;
        }
        if let Err(e) = self.teardown(&mut state).await {
            error!(error = %e, "Failed to close socket after listener exit");
        }
    }
}

/// Client for the inbound message stream.
///
/// Cloning is cheap; clones share the same socket, loop and handlers.
#[derive(Clone)]
pub struct MsgClient {
    inner: Arc<Inner>,
}

impl MsgClient {
    /// Create a client over `socket`. Nothing is opened until the first
    /// `register`.
    pub fn new(socket: Arc<dyn MsgSocket>, config: ReceiverConfig) -> Self {
        let dispatch_limit = config
            .dispatch_limit
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));
        Self {
            inner: Arc::new(Inner {
                socket,
                config,
                dispatch_limit,
                state: Mutex::new(ClientState::default()),
            }),
        }
    }

    /// Create a client over a TCP socket built from `config`.
    #[cfg(feature = "tcp")]
    pub fn tcp(config: &crate::config::Config) -> Self {
        let socket = crate::transport::TcpMsgSocket::new(config.transport.clone());
        Self::new(Arc::new(socket), config.receiver.clone())
    }

    /// Register handlers, starting the receive loop if it is not running.
    ///
    /// Only a call made while stopped opens the socket. If opening fails the
    /// error is returned and no handlers are added. Registration is additive;
    /// an empty list is allowed and still starts the loop.
    pub async fn register(&self, handlers: Vec<Box<dyn MsgHandler>>) -> Result<()> {
        let mut state = self.inner.state.lock().await;

        if !state.receiving {
            if let Err(e) = self.inner.socket.open().await {
                error!(error = %e, "Failed to start message receiver");
                return Err(ClientError::Connection(e));
            }
            // The previous session's loop may still be parked in recv.
            // Teardown already ran for it.
            if let Some(previous) = state.listener.take() {
                previous.abort();
                let _ = previous.await;
            }

            state.connected = true;
            state.receiving = true;
            state.session += 1;

            let session = state.session;
            state.listener = Some(tokio::spawn(listener::run(
                Arc::clone(&self.inner),
                session,
            )));
            info!(session, "Message listener started");
        }

        state.handlers.extend(handlers.into_iter().map(Arc::from));
        info!(handler_count = state.handlers.len(), "Handlers registered");
        Ok(())
    }

    /// Stop receiving and close the socket.
    ///
    /// Without `force`, fails with [`ClientError::InUse`] while handlers are
    /// registered and changes nothing. Does not wait for the receive loop to
    /// exit or for in-flight handlers to finish.
    pub async fn destroy(&self, force: bool) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if !force && !state.handlers.is_empty() {
            return Err(ClientError::InUse {
                handlers: state.handlers.len(),
            });
        }

        info!(force, handler_count = state.handlers.len(), "Destroying message client");
        self.inner.teardown(&mut state).await
    }

    pub async fn is_receiving(&self) -> bool {
        self.inner.state.lock().await.receiving
    }

    pub async fn handler_count(&self) -> usize {
        self.inner.state.lock().await.handlers.len()
    }
}

#[cfg(test)]
mod tests;
