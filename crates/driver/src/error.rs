//! Driver error types with recovery context.
//!
//! The pool's failure taxonomy is narrow by design:
//! - **Exhaustion** is recoverable backpressure, surfaced synchronously
//!   from `pop()`; the caller retries or fails its operation.
//! - **Connection failures** surface when a handle lazily dials.
//! - **Snapshot publication never fails**: a discovery round that goes
//!   wrong simply leaves the previous snapshot current.
//!
//! Errors include retryability classification.

use std::time::Duration;

use snafu::{Location, Snafu};
use vellum_types::ServerId;

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;

/// Driver error types with context-rich error messages.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DriverError {
    /// No pooled handle became available before the deadline.
    ///
    /// This is backpressure, not a fault: the pool is at capacity and
    /// every handle stayed checked out for the full wait. Counters are
    /// unchanged and nothing was allocated.
    #[snafu(display("no client handle available after waiting {}ms", waited.as_millis()))]
    PoolExhausted {
        /// How long the caller waited before giving up.
        waited: Duration,
    },

    /// The requested server id is not in the current topology.
    #[snafu(display("server {id} is not a member of the current topology"))]
    UnknownServer {
        /// The id that was requested.
        id: ServerId,
    },

    /// Failed to establish a connection to a server.
    #[snafu(display("failed to connect to {address} at {location}: {source}"))]
    Connect {
        /// Address that was dialed.
        address: String,
        /// Underlying I/O error.
        source: std::io::Error,
        /// Source location.
        #[snafu(implicit)]
        location: Location,
    },

    /// Configuration validation error.
    #[snafu(display("configuration error: {message}"))]
    Config {
        /// Error description.
        message: String,
    },

    /// A discovery round could not be completed.
    #[snafu(display("discovery failed: {message}"))]
    Discovery {
        /// Error description from the discovery source.
        message: String,
    },
}

impl DriverError {
    /// Returns true if the error is transient and the operation may
    /// succeed if retried.
    ///
    /// Retryable:
    /// - `PoolExhausted`: another thread will eventually push a handle back
    /// - `Connect`: network issues
    /// - `UnknownServer`: the topology may not have caught up yet
    /// - `Discovery`: the next round runs on its own schedule
    ///
    /// Non-retryable:
    /// - `Config`: the configuration itself is wrong
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::PoolExhausted { .. } => true,
            Self::Connect { .. } => true,
            Self::UnknownServer { .. } => true,
            Self::Discovery { .. } => true,
            Self::Config { .. } => false,
        }
    }
}
