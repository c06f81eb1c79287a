//! Epoch-based publication of topology snapshots.
//!
//! The [`SnapshotSlot`] is the one piece of state shared between
//! operation threads and the background monitor. Readers take a
//! cheap reference to the current [`TopologySnapshot`]; the monitor
//! edits a private clone and atomically installs it. Readers never
//! observe a half-edited snapshot, and an old snapshot stays alive
//! exactly as long as someone still holds a reference to it.
//!
//! ```text
//! readers                    SnapshotSlot                   monitor
//! ───────                    ────────────                   ───────
//! take_ref() ──────────────► current: Arc<Snapshot>
//! renew_ref()                     ▲
//! (drop = drop_ref)               │ swap on commit
//!                                 │
//!                            begin_modification() ◄──────── discovery round
//!                            (clone, edit, commit)
//! ```
//!
//! Two locks, deliberately distinct:
//! - `current` is an `RwLock` scoped strictly to the pointer swap; it
//!   is never held across discovery I/O, so `take_ref` stays fast no
//!   matter how slow a discovery round is.
//! - `modify` serializes writers for the whole begin/commit span.

use std::ops::Deref;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use vellum_types::{ServerId, ServerRecord, TopologySnapshot};

/// Shared cell holding the current topology snapshot.
///
/// Created with the pool and destroyed once the owning pool is gone
/// and every outstanding [`SnapshotRef`] has dropped (the `Arc`s
/// enforce the latter).
#[derive(Debug)]
pub struct SnapshotSlot {
    /// The current snapshot. The lock guards only the pointer swap.
    current: RwLock<Arc<TopologySnapshot>>,

    /// Serializes writers across the whole begin/commit span.
    modify: Mutex<()>,
}

impl SnapshotSlot {
    /// Creates a slot holding `initial` as the current snapshot.
    #[must_use]
    pub fn new(initial: TopologySnapshot) -> Self {
        Self { current: RwLock::new(Arc::new(initial)), modify: Mutex::new(()) }
    }

    /// Returns a reference to the current snapshot.
    ///
    /// Never blocks beyond the swap-scoped lock and never copies the
    /// snapshot itself. Safe to call at any time, including while a
    /// writer is between `begin_modification` and `commit`.
    #[must_use]
    pub fn take_ref(&self) -> SnapshotRef {
        SnapshotRef { snapshot: Arc::clone(&self.current.read()) }
    }

    /// If a newer snapshot has been published, atomically swaps the
    /// held reference for the current one; otherwise leaves `r`
    /// untouched.
    pub fn renew_ref(&self, r: &mut SnapshotRef) {
        let current = self.current.read();
        if current.version() > r.snapshot.version() {
            r.snapshot = Arc::clone(&current);
        }
    }

    /// Returns the version of the current snapshot.
    #[must_use]
    pub fn current_version(&self) -> u64 {
        self.current.read().version()
    }

    /// Begins a topology modification, returning a private clone of
    /// the current snapshot for the writer to edit.
    ///
    /// Writers are serialized: a second `begin_modification` blocks
    /// until the first modification commits or is dropped. Readers
    /// are not disturbed; they keep seeing the pre-modification
    /// snapshot until [`TopologyModification::commit`] installs the
    /// clone.
    #[must_use]
    pub fn begin_modification(&self) -> TopologyModification<'_> {
        let writer = self.modify.lock();
        let snapshot = TopologySnapshot::clone(&self.current.read());
        TopologyModification { slot: self, snapshot, _writer: writer }
    }
}

impl Default for SnapshotSlot {
    fn default() -> Self {
        Self::new(TopologySnapshot::default())
    }
}

/// A counted reference to one published snapshot.
///
/// Dereferences to [`TopologySnapshot`]. Dropping the ref releases
/// it; once a snapshot is both non-current and unreferenced it is
/// freed.
#[derive(Debug, Clone)]
pub struct SnapshotRef {
    snapshot: Arc<TopologySnapshot>,
}

impl SnapshotRef {
    /// Returns the version of the referenced snapshot.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.snapshot.version()
    }
}

impl Deref for SnapshotRef {
    type Target = TopologySnapshot;

    fn deref(&self) -> &Self::Target {
        &self.snapshot
    }
}

/// An in-progress topology edit.
///
/// Holds a private copy-on-write clone of the snapshot that was
/// current at `begin_modification` time, plus the writer lock.
/// [`commit`](Self::commit) publishes the clone; dropping the
/// modification without committing abandons the edit, which is how a
/// failed discovery round leaves the previous snapshot current.
#[derive(Debug)]
pub struct TopologyModification<'a> {
    slot: &'a SnapshotSlot,
    snapshot: TopologySnapshot,
    _writer: MutexGuard<'a, ()>,
}

impl TopologyModification<'_> {
    /// Returns a view of the snapshot being edited.
    #[must_use]
    pub fn snapshot(&self) -> &TopologySnapshot {
        &self.snapshot
    }

    /// Allocates a fresh, never-reused server id.
    pub fn allocate_server_id(&mut self) -> ServerId {
        self.snapshot.allocate_server_id()
    }

    /// Inserts or replaces a member record.
    pub fn upsert_server(&mut self, record: ServerRecord) {
        self.snapshot.upsert_server(record);
    }

    /// Removes a member record.
    pub fn remove_server(&mut self, id: ServerId) -> Option<ServerRecord> {
        self.snapshot.remove_server(id)
    }

    /// Retains only members for which `keep` returns true.
    pub fn retain_servers(&mut self, keep: impl FnMut(&ServerId, &mut ServerRecord) -> bool) {
        self.snapshot.retain_servers(keep);
    }

    /// Sets the cluster name.
    pub fn set_cluster_name(&mut self, name: Option<String>) {
        self.snapshot.set_cluster_name(name);
    }

    /// Publishes the edited snapshot as current.
    ///
    /// Bumps the version past the snapshot it was cloned from and
    /// swaps the shared pointer. Infallible: the previous snapshot's
    /// lifetime is now governed solely by outstanding refs.
    pub fn commit(mut self) {
        self.snapshot.bump_version();
        *self.slot.current.write() = Arc::new(self.snapshot);
        // `_writer` drops here, admitting the next writer.
    }
}
