//! Handler dispatch.
//!
//! Every handler gets its own task per payload. Nothing here waits for a
//! handler, and a handler that panics only takes down its own task.

use std::sync::Arc;

use tokio::sync::Semaphore;

use super::MsgHandler;
use crate::payload::MsgPayload;

/// Spawn one task per handler for `payload`.
///
/// With `limit`, each task waits for a permit before calling its handler, so
/// at most that many handler calls run at once. Tasks are spawned in handler
/// order. Returns the number of tasks spawned.
pub fn dispatch(
    handlers: &[Arc<dyn MsgHandler>],
    payload: &Arc<MsgPayload>,
    limit: Option<&Arc<Semaphore>>,
) -> usize {
    for handler in handlers {
        let handler = Arc::clone(handler);
        let payload = Arc::clone(payload);
        let limit = limit.cloned();

        tokio::spawn(async move {
            let _permit = match limit {
                Some(semaphore) => match semaphore.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    // Closed semaphore: the client is gone.
                    Err(_) => return,
                },
                None => None,
            };
            handler.handle(payload).await;
        });
    }
    handlers.len()
}
