//! Pure utility functions.
//!
//! These are stateless helpers shared by the receiver and its hosts.

pub mod bootstrap;
pub mod retry;
