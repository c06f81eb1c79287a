//! Background topology monitoring.
//!
//! The monitor owns the writer side of the [`SnapshotSlot`]: it runs
//! discovery rounds on its own schedule and publishes the result
//! through `begin_modification`/`commit`. The discovery protocol
//! itself is a collaborator behind the [`DiscoverySource`] trait;
//! this module only decides how a round's findings map onto the
//! current topology.
//!
//! A failed round publishes nothing, leaving the previous snapshot
//! current. A round whose findings match the current snapshot is
//! also not published, so readers don't churn through identical
//! snapshots every heartbeat.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rand::Rng;
use tracing::{debug, info, warn};
use vellum_types::{Generation, ServerId, ServerRecord, ServerRole, TopologySnapshot};

use crate::config::MonitorConfig;
use crate::error::Result;
use crate::slot::SnapshotSlot;

/// One server as reported by a discovery round.
///
/// `id` is `None` for a server the discovery layer has not seen
/// before; the monitor assigns it a fresh, never-reused id. A
/// re-announced address without an id keeps the id it already had.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredServer {
    /// Known id, or `None` for a newly seen server.
    pub id: Option<ServerId>,

    /// Network address.
    pub address: String,

    /// Reported role.
    pub role: ServerRole,

    /// Reported invalidation counter.
    pub generation: Generation,
}

/// Collaborator performing the actual discovery/heartbeat protocol.
///
/// `discover` is called from the monitor thread and may block on
/// network I/O; no driver lock is held while it runs.
pub trait DiscoverySource: Send + Sync + fmt::Debug {
    /// Runs one discovery round, returning the full current member
    /// list.
    fn discover(&self) -> Result<Vec<DiscoveredServer>>;
}

/// Flags the monitor thread checks between rounds.
#[derive(Debug, Default)]
struct MonitorFlags {
    shutdown: bool,
    refresh: bool,
}

/// Shared state between the monitor handle and its thread.
#[derive(Debug)]
struct MonitorShared {
    /// Guarded control flags; the condvar wakes the sleeper early.
    flags: Mutex<MonitorFlags>,
    wake: Condvar,
    running: AtomicBool,
}

/// Handle to the background monitor thread.
///
/// Stop the monitor with [`stop`](Self::stop) before tearing the
/// driver down; dropping the handle stops it as a fallback. The
/// thread holds an `Arc` to the slot, so the slot outlives it either
/// way.
#[derive(Debug)]
pub struct TopologyMonitor {
    shared: Arc<MonitorShared>,
    thread: Option<JoinHandle<()>>,
}

impl TopologyMonitor {
    /// Spawns the monitor thread.
    ///
    /// The first discovery round runs immediately; subsequent rounds
    /// run every `heartbeat_interval`, jittered. A config with
    /// out-of-range settings is clamped back to defaults rather than
    /// trusted; `DriverConfigBuilder::build` is where such settings
    /// get rejected with an error.
    #[must_use]
    pub fn start(
        slot: Arc<SnapshotSlot>,
        source: Arc<dyn DiscoverySource>,
        config: MonitorConfig,
    ) -> Self {
        let config = config.normalized();
        let shared = Arc::new(MonitorShared {
            flags: Mutex::new(MonitorFlags::default()),
            wake: Condvar::new(),
            running: AtomicBool::new(true),
        });

        let thread = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("vellum-topology-monitor".to_owned())
                .spawn(move || {
                    monitor_loop(&slot, source.as_ref(), &config, &shared);
                    shared.running.store(false, Ordering::SeqCst);
                })
                .expect("failed to spawn topology monitor thread")
        };

        Self { shared, thread: Some(thread) }
    }

    /// Returns true while the monitor thread is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Asks the monitor to run a discovery round now instead of
    /// waiting out the heartbeat interval.
    pub fn request_refresh(&self) {
        self.shared.flags.lock().refresh = true;
        self.shared.wake.notify_all();
    }

    /// Signals shutdown and joins the monitor thread.
    ///
    /// Wakes the thread mid-sleep, so this returns promptly even
    /// with a long heartbeat interval.
    pub fn stop(mut self) {
        self.signal_and_join();
    }

    fn signal_and_join(&mut self) {
        self.shared.flags.lock().shutdown = true;
        self.shared.wake.notify_all();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("topology monitor thread panicked");
            }
        }
    }
}

impl Drop for TopologyMonitor {
    fn drop(&mut self) {
        self.signal_and_join();
    }
}

fn monitor_loop(
    slot: &SnapshotSlot,
    source: &dyn DiscoverySource,
    config: &MonitorConfig,
    shared: &MonitorShared,
) {
    debug!(interval = ?config.heartbeat_interval(), "topology monitor started");
    loop {
        match source.discover() {
            Ok(discovered) => apply_discovery(slot, discovered),
            Err(error) => {
                warn!(%error, "discovery round failed; keeping previous topology");
            }
        }

        let mut flags = shared.flags.lock();
        if flags.shutdown {
            break;
        }
        if !flags.refresh {
            let timeout = jittered(config.heartbeat_interval(), config.jitter());
            shared.wake.wait_for(&mut flags, timeout);
        }
        if flags.shutdown {
            break;
        }
        flags.refresh = false;
    }
    debug!("topology monitor stopped");
}

/// Folds one discovery round into the current topology and commits
/// if anything changed.
fn apply_discovery(slot: &SnapshotSlot, discovered: Vec<DiscoveredServer>) {
    let mut modification = slot.begin_modification();
    let before = TopologySnapshot::clone(modification.snapshot());

    // Addresses already in the topology, for matching announcements
    // that carry no id.
    let by_address: HashMap<String, ServerId> =
        before.servers().map(|record| (record.address.clone(), record.id)).collect();

    let mut seen = BTreeSet::new();
    for server in discovered {
        let id = server
            .id
            .or_else(|| by_address.get(&server.address).copied())
            .unwrap_or_else(|| modification.allocate_server_id());
        seen.insert(id);
        modification.upsert_server(ServerRecord {
            id,
            address: server.address,
            role: server.role,
            generation: server.generation,
        });
    }

    // Anything not announced this round is gone. Ids are never
    // reused, so removal is unambiguous and safe to act on.
    modification.retain_servers(|id, _| seen.contains(id));

    let after = modification.snapshot();
    if after.len() == before.len() && after.servers().eq(before.servers()) {
        debug!(version = before.version(), "discovery round found no changes");
        return; // Dropped without commit.
    }

    let membership_changed = !after.has_same_membership(&before);
    let members = after.len();
    modification.commit();

    if membership_changed {
        info!(version = slot.current_version(), members, "published new topology");
    } else {
        debug!(
            version = slot.current_version(),
            "published server metadata update; membership unchanged"
        );
    }
}

/// Applies `jitter` to `interval`, e.g. 10s ± 10%.
///
/// Total for any `jitter` value: out-of-range input is capped so the
/// scale factor stays strictly positive and `mul_f64` cannot panic on
/// a negative duration. NaN falls through the sign check and `min`
/// resolves it to the cap.
fn jittered(interval: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return interval;
    }
    let jitter = jitter.min(0.99);
    let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
    interval.mul_f64(factor)
}
