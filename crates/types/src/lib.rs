//! Core types for the VellumDB driver.
//!
//! This crate provides the data model shared by the driver's topology
//! tracking and connection pooling layers:
//! - Type-safe identifier newtypes (`ServerId`, `Generation`)
//! - Cluster member descriptions (`ServerRecord`, `ServerRole`)
//! - Immutable, versioned membership views (`TopologySnapshot`)
//!
//! Everything here is plain data: no locks, no I/O. Concurrency-safe
//! publication of snapshots lives in the `vellum-driver` crate.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod ids;
pub mod server;
pub mod topology;

// Re-export commonly used types at crate root
pub use ids::{Generation, ServerId};
pub use server::{ServerRecord, ServerRole};
pub use topology::TopologySnapshot;
