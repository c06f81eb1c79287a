//! Cluster-membership tracking and connection pooling for VellumDB
//! clients.
//!
//! This crate is the driver layer that sits between operation
//! execution and the wire: any number of operation threads check
//! [`ClientHandle`]s out of a bounded [`ConnectionPool`] and read a
//! momentarily-stable [`TopologySnapshot`], while a background
//! [`TopologyMonitor`] rediscovers the cluster and publishes updates
//! that invalidate stale connections.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Operation threads                          │
//! │   pop() │ get_connection() │ push()                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                  ConnectionPool                             │
//! │   Admission control │ Idle queue │ Prune on push            │
//! ├─────────────────────────────────────────────────────────────┤
//! │                  SnapshotSlot                               │
//! │   take_ref / renew_ref │ begin / commit modification        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                  TopologyMonitor (background thread)        │
//! │   DiscoverySource rounds │ Id assignment │ Publication      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick start
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use vellum_driver::mock::{MockConnector, ScriptedDiscovery};
//! use vellum_driver::{
//!     ConnectionPool, DiscoveredServer, DiscoverySource, DriverConfig, TopologyMonitor,
//! };
//! use vellum_types::{Generation, ServerRole};
//!
//! # fn main() -> vellum_driver::Result<()> {
//! let config = DriverConfig::builder()
//!     .with_max_pool_size(8)
//!     .with_wait_timeout(Duration::from_millis(500))
//!     .build()?;
//!
//! let pool = ConnectionPool::with_connector(config.clone(), Arc::new(MockConnector::new()));
//!
//! // In production the source speaks the discovery protocol; here a
//! // scripted one announces a single server.
//! let source: Arc<dyn DiscoverySource> = Arc::new(ScriptedDiscovery::repeating(vec![
//!     DiscoveredServer {
//!         id: None,
//!         address: "db-0:27017".into(),
//!         role: ServerRole::Primary,
//!         generation: Generation::INITIAL,
//!     },
//! ]));
//! let monitor = TopologyMonitor::start(Arc::clone(pool.slot()), source, config.monitor().clone());
//!
//! let handle = pool.pop()?;
//! // ... run operations against handle.get_connection(id)? ...
//! pool.push(handle);
//!
//! monitor.stop();
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency model
//!
//! Only [`ConnectionPool::pop`] blocks, and only when the pool is at
//! capacity with nothing idle. The snapshot slot is the single piece
//! of state shared between operation threads and the monitor, and
//! its lock is scoped strictly to the pointer swap; neither it nor
//! the pool mutex is ever held across socket or discovery I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod error;
pub mod mock;
mod monitor;
mod pool;
mod slot;
mod transport;

// Public API exports
pub use client::{ClientHandle, ConnectionHandle};
pub use config::{DriverConfig, DriverConfigBuilder, MonitorConfig};
pub use error::{DriverError, Result};
pub use monitor::{DiscoveredServer, DiscoverySource, TopologyMonitor};
pub use pool::{ConnectionPool, PoolDiagnostics};
pub use slot::{SnapshotRef, SnapshotSlot, TopologyModification};
pub use transport::{Connector, TcpConnector, TcpTransport, Transport};

// Re-export commonly used types from vellum-types
pub use vellum_types::{Generation, ServerId, ServerRecord, ServerRole, TopologySnapshot};
