//! Error types for the reqwest-proxy-rotator crate.

use thiserror::Error;

/// Error returned when the pool has been permanently stopped while a caller
/// was waiting for a proxy.
#[derive(Debug, Error)]
#[error("Proxy pool has been stopped")]
pub struct PoolStopped;
