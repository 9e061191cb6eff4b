//! Receive loop: one task per client session.

use std::sync::Arc;

use backon::BackoffBuilder;
use tracing::{debug, error, warn};

use super::{dispatch, Inner};
use crate::payload::MsgPayload;
use crate::utils::retry::{fallback_delay, receive_backoff};

/// Receive and dispatch until `session` is no longer the active one.
///
/// The stop check happens once per iteration, before each receive. Failed
/// receives are logged and followed by an exponential backoff; they never end
/// the loop on their own.
pub(super) async fn run(inner: Arc<Inner>, session: u64) {
    let backoff_builder = receive_backoff(&inner.config);
    let mut backoff = backoff_builder.build();

    while inner.is_current(session).await {
        match inner.socket.recv().await {
            Ok(record) => {
                backoff = backoff_builder.build();

                let payload = Arc::new(MsgPayload::assemble(record));
                let handlers = inner.current_handlers().await;
                debug!(
                    id = payload.record.id,
                    handlers = handlers.len(),
                    "Received message"
                );
                dispatch(&handlers, &payload, inner.dispatch_limit.as_ref());
            }
            Err(e) => {
                let delay = backoff
                    .next()
                    .unwrap_or_else(|| fallback_delay(&inner.config));
                error!(
                    error = %e,
                    backoff_ms = %delay.as_millis(),
                    "Message receive failed, retrying after backoff"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    inner.finish(session).await;
    warn!(session, "Message listener stopped");
}
