//! Backoff used between failed receives.
//!
//! Uses `backon` for exponential backoff with jitter. The receive loop never
//! gives up, so the builder has no attempt limit; the delay simply stays at
//! the cap while failures continue.

use std::time::Duration;

use backon::ExponentialBuilder;

use crate::client::ReceiverConfig;

/// Backoff for receive failures in the listener loop.
///
/// - Min delay: `backoff_min_ms`
/// - Max delay: `backoff_max_ms`
/// - Unlimited attempts
/// - Jitter enabled
pub fn receive_backoff(config: &ReceiverConfig) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(config.backoff_min())
        .with_max_delay(config.backoff_max())
        .without_max_times()
        .with_jitter()
}

/// Delay to use once a backoff iterator runs dry.
pub fn fallback_delay(config: &ReceiverConfig) -> Duration {
    config.backoff_max()
}
