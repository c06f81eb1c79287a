//! Bounded, blocking pool of client handles.
//!
//! Admission control is structural: a handle is only constructed
//! after the size counter has been reserved under the pool mutex, so
//! `size <= max_size` can never be violated, not merely detected.
//! Waiters block on a condvar and are woken by `push`; an optional
//! deadline turns exhaustion into a synchronous, recoverable error.
//!
//! The pool mutex guards only the idle queue, the counters, and the
//! cached server-id set. It is never held across socket I/O: handle
//! construction allocates, and actual dialing happens lazily inside
//! [`ClientHandle::get_connection`] after checkout.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::debug;
use vellum_types::ServerId;

use crate::client::ClientHandle;
use crate::config::DriverConfig;
use crate::error::{PoolExhaustedSnafu, Result};
use crate::slot::SnapshotSlot;
use crate::transport::{Connector, TcpConnector};

/// State guarded by the pool mutex.
#[derive(Debug)]
struct PoolInner {
    /// Idle handles, FIFO.
    idle: VecDeque<ClientHandle>,

    /// Handles in existence: idle plus checked out.
    size: u32,

    /// Admission bound.
    max_size: u32,

    /// Sorted server-id set observed at the last push. Comparing
    /// against the current snapshot's id set bounds full-queue prune
    /// sweeps to pushes where membership actually changed.
    last_known_server_ids: Vec<ServerId>,
}

/// Bounded, blocking pool of [`ClientHandle`]s.
///
/// Any number of operation threads may call [`pop`](Self::pop),
/// [`try_pop`](Self::try_pop), and [`push`](Self::push) concurrently
/// while the background monitor publishes topology updates through
/// the shared [`SnapshotSlot`].
///
/// # Example
///
/// ```
/// use vellum_driver::{ConnectionPool, DriverConfig};
///
/// let config = DriverConfig::builder().with_max_pool_size(8).build()?;
/// let pool = ConnectionPool::new(config);
///
/// let handle = pool.pop()?;
/// // ... run operations with the handle ...
/// pool.push(handle);
/// # Ok::<(), vellum_driver::DriverError>(())
/// ```
#[derive(Debug)]
pub struct ConnectionPool {
    inner: Mutex<PoolInner>,
    available: Condvar,
    slot: Arc<SnapshotSlot>,
    connector: Arc<dyn Connector>,
    wait_timeout: Option<Duration>,
}

impl ConnectionPool {
    /// Creates a pool with the default TCP connector.
    #[must_use]
    pub fn new(config: DriverConfig) -> Self {
        let connector: Arc<dyn Connector> =
            Arc::new(TcpConnector::new(config.connect_timeout()));
        Self::with_connector(config, connector)
    }

    /// Creates a pool dialing through a caller-supplied connector.
    #[must_use]
    pub fn with_connector(config: DriverConfig, connector: Arc<dyn Connector>) -> Self {
        let slot = Arc::new(SnapshotSlot::new(vellum_types::TopologySnapshot::new(
            config.cluster_name.clone(),
        )));
        Self {
            inner: Mutex::new(PoolInner {
                idle: VecDeque::new(),
                size: 0,
                max_size: config.max_pool_size,
                last_known_server_ids: Vec::new(),
            }),
            available: Condvar::new(),
            slot,
            connector,
            wait_timeout: config.wait_timeout,
        }
    }

    /// Returns the snapshot slot shared with the background monitor.
    #[must_use]
    pub fn slot(&self) -> &Arc<SnapshotSlot> {
        &self.slot
    }

    /// Checks a handle out, waiting up to the configured
    /// `wait_timeout` if the pool is at capacity.
    ///
    /// With no timeout configured this blocks until another thread
    /// pushes a handle back: admission control takes precedence over
    /// liveness.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::PoolExhausted`](crate::DriverError::PoolExhausted)
    /// if the deadline elapses first. That is backpressure, not a
    /// fault; counters are unchanged and nothing was allocated.
    pub fn pop(&self) -> Result<ClientHandle> {
        self.pop_within(self.wait_timeout)
    }

    /// Checks a handle out with a per-call wait timeout, overriding
    /// the configured one. `None` blocks indefinitely.
    pub fn pop_within(&self, timeout: Option<Duration>) -> Result<ClientHandle> {
        // The deadline is absolute and computed once: spurious
        // wakeups re-check remaining time instead of resetting it.
        let started = Instant::now();
        let deadline = timeout.map(|t| started + t);

        let mut inner = self.inner.lock();
        loop {
            if let Some(handle) = inner.idle.pop_front() {
                return Ok(handle);
            }
            if inner.size < inner.max_size {
                inner.size += 1;
                return Ok(self.new_handle());
            }
            match deadline {
                Some(deadline) => {
                    if self.available.wait_until(&mut inner, deadline).timed_out() {
                        // One last check: a push, discard, or resize
                        // may have raced the wakeup.
                        if let Some(handle) = inner.idle.pop_front() {
                            return Ok(handle);
                        }
                        if inner.size < inner.max_size {
                            inner.size += 1;
                            return Ok(self.new_handle());
                        }
                        return PoolExhaustedSnafu { waited: started.elapsed() }.fail();
                    }
                }
                None => self.available.wait(&mut inner),
            }
        }
    }

    /// Checks a handle out if one is idle or capacity remains;
    /// never blocks.
    #[must_use]
    pub fn try_pop(&self) -> Option<ClientHandle> {
        let mut inner = self.inner.lock();
        if let Some(handle) = inner.idle.pop_front() {
            return Some(handle);
        }
        if inner.size < inner.max_size {
            inner.size += 1;
            return Some(self.new_handle());
        }
        None
    }

    /// Returns a handle to the pool, pruning its connections against
    /// the current topology, and wakes one waiter.
    ///
    /// If the server-id set changed since the last push, every idle
    /// handle is pruned too; the topology may have moved while those
    /// handles sat in the queue.
    pub fn push(&self, mut handle: ClientHandle) {
        let mut inner = self.inner.lock();

        let snapshot = self.slot.take_ref();
        let current_ids = snapshot.server_ids();
        if current_ids != inner.last_known_server_ids {
            debug!(
                previous = inner.last_known_server_ids.len(),
                current = current_ids.len(),
                "membership changed; pruning idle handles"
            );
            for idle in &mut inner.idle {
                idle.prune(&snapshot);
            }
            inner.last_known_server_ids = current_ids;
        }

        // Always prune the incoming handle: the topology may have
        // changed while it was checked out.
        handle.prune(&snapshot);
        drop(snapshot);

        inner.idle.push_back(handle);
        drop(inner);
        self.available.notify_one();
    }

    /// Discards a handle instead of returning it, releasing its
    /// admission slot. For callers that detected a broken handle.
    pub fn discard(&self, handle: ClientHandle) {
        drop(handle);
        let mut inner = self.inner.lock();
        inner.size = inner.size.saturating_sub(1);
        drop(inner);
        self.available.notify_one();
    }

    /// Sets the admission bound. Safe at any time; shrinking below
    /// the current size only affects future admissions.
    pub fn set_max_size(&self, max_size: u32) {
        let mut inner = self.inner.lock();
        inner.max_size = max_size;
        drop(inner);
        // Growing may unblock waiters.
        self.available.notify_all();
    }

    /// Returns a point-in-time view of pool state, for diagnostics
    /// only.
    #[must_use]
    pub fn diagnostics(&self) -> PoolDiagnostics {
        let inner = self.inner.lock();
        PoolDiagnostics {
            size: inner.size,
            idle: inner.idle.len(),
            max_size: inner.max_size,
            last_known_server_ids: inner.last_known_server_ids.clone(),
        }
    }

    fn new_handle(&self) -> ClientHandle {
        ClientHandle::new(Arc::clone(&self.slot), Arc::clone(&self.connector))
    }
}

/// Observable, non-persisted pool state.
#[derive(Debug, Clone, Serialize)]
pub struct PoolDiagnostics {
    /// Handles in existence: idle plus checked out.
    pub size: u32,

    /// Handles currently idle in the queue.
    pub idle: usize,

    /// Admission bound.
    pub max_size: u32,

    /// Server-id set cached at the last push.
    pub last_known_server_ids: Vec<ServerId>,
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use vellum_types::{ServerRecord, ServerRole};

    use super::*;
    use crate::mock::MockConnector;

    fn test_pool(max_size: u32) -> ConnectionPool {
        let config = DriverConfig::builder()
            .with_max_pool_size(max_size)
            .build()
            .expect("valid test config");
        ConnectionPool::with_connector(config, Arc::new(MockConnector::new()))
    }

    fn publish(pool: &ConnectionPool, ids: &[u32]) {
        let mut modification = pool.slot().begin_modification();
        let existing = modification.snapshot().server_ids();
        for id in existing {
            if !ids.contains(&id.value()) {
                modification.remove_server(id);
            }
        }
        for id in ids {
            let id = ServerId::new(*id);
            if modification.snapshot().server(id).is_none() {
                modification.upsert_server(ServerRecord::new(
                    id,
                    format!("10.0.0.{id}:27017", id = id.value()),
                    ServerRole::Replica,
                ));
            }
        }
        modification.commit();
    }

    #[test]
    fn pop_constructs_up_to_max_size() {
        let pool = test_pool(2);
        let first = pool.pop().expect("first");
        let second = pool.pop().expect("second");
        assert!(pool.try_pop().is_none());
        assert_eq!(pool.diagnostics().size, 2);
        pool.push(first);
        pool.push(second);
        assert_eq!(pool.diagnostics().idle, 2);
    }

    #[test]
    fn push_reuses_idle_handle_fifo() {
        let pool = test_pool(4);
        let handle = pool.pop().expect("pop");
        pool.push(handle);
        let _again = pool.pop().expect("reuse");
        assert_eq!(pool.diagnostics().size, 1);
    }

    #[test]
    fn pop_within_times_out_without_capacity() {
        let pool = test_pool(1);
        let _held = pool.pop().expect("pop");

        let started = Instant::now();
        let err = pool
            .pop_within(Some(Duration::from_millis(50)))
            .expect_err("should time out");
        assert!(err.is_retryable());
        assert!(started.elapsed() >= Duration::from_millis(50));
        // Backpressure, not allocation: counters unchanged.
        assert_eq!(pool.diagnostics().size, 1);
    }

    #[test]
    fn timed_waiter_uses_capacity_freed_by_discard() {
        let pool = Arc::new(test_pool(1));
        let held = pool.pop().expect("pop");

        let waiter = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || pool.pop_within(Some(Duration::from_secs(5))))
        };

        // Free the admission slot while the waiter is parked; it must
        // construct a fresh handle, not report exhaustion.
        std::thread::sleep(Duration::from_millis(30));
        pool.discard(held);

        let handle = waiter.join().expect("waiter thread").expect("freed capacity");
        assert_eq!(pool.diagnostics().size, 1);
        pool.push(handle);
    }

    #[test]
    fn discard_releases_admission_slot() {
        let pool = test_pool(1);
        let handle = pool.pop().expect("pop");
        pool.discard(handle);
        assert_eq!(pool.diagnostics().size, 0);
        assert!(pool.try_pop().is_some());
    }

    #[test]
    fn set_max_size_admits_more() {
        let pool = test_pool(1);
        let _held = pool.pop().expect("pop");
        assert!(pool.try_pop().is_none());
        pool.set_max_size(2);
        assert!(pool.try_pop().is_some());
    }

    #[test]
    fn push_updates_last_known_ids() {
        let pool = test_pool(2);
        publish(&pool, &[1, 2]);

        let handle = pool.pop().expect("pop");
        pool.push(handle);
        let ids = pool.diagnostics().last_known_server_ids;
        assert_eq!(ids, vec![ServerId::new(1), ServerId::new(2)]);
    }

    #[test]
    fn push_prunes_idle_handles_on_membership_change() {
        let pool = test_pool(2);
        publish(&pool, &[1, 2]);

        // Check both handles out, give the first connections to both
        // servers, and park it in the idle queue.
        let mut connected = pool.pop().expect("first");
        let outstanding = pool.pop().expect("second");
        connected.get_connection(ServerId::new(1)).expect("dial 1");
        connected.get_connection(ServerId::new(2)).expect("dial 2");
        pool.push(connected);

        // Server 1 leaves while the second handle is still out. Its
        // return trips the membership comparison and sweeps the
        // parked handle too.
        publish(&pool, &[2]);
        pool.push(outstanding);

        // FIFO: the first pop returns the previously parked handle.
        let reused = pool.pop().expect("reused");
        assert_eq!(reused.connected_servers(), vec![ServerId::new(2)]);
        pool.push(reused);
    }

    proptest! {
        // Size never exceeds max_size for arbitrary pop/try_pop/push
        // interleavings from a single thread.
        #[test]
        fn size_never_exceeds_max(ops in prop::collection::vec(0u8..3, 1..64), max_size in 1u32..8) {
            let pool = test_pool(max_size);
            let mut held: Vec<ClientHandle> = Vec::new();

            for op in ops {
                match op {
                    0 => {
                        if let Ok(handle) = pool.pop_within(Some(Duration::from_millis(1))) {
                            held.push(handle);
                        }
                    }
                    1 => {
                        if let Some(handle) = pool.try_pop() {
                            held.push(handle);
                        }
                    }
                    _ => {
                        if let Some(handle) = held.pop() {
                            pool.push(handle);
                        }
                    }
                }
                let diagnostics = pool.diagnostics();
                prop_assert!(diagnostics.size <= diagnostics.max_size);
                prop_assert_eq!(
                    diagnostics.size as usize,
                    held.len() + diagnostics.idle
                );
            }
        }
    }
}
