//! Versioned cluster membership views.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::ServerId;
use crate::server::ServerRecord;

/// A versioned description of cluster membership at one point in time.
///
/// Snapshots are immutable once published: the driver shares them as
/// `Arc<TopologySnapshot>` and any number of readers may hold one
/// while the background monitor builds and installs a successor. The
/// mutating methods on this type exist for the pre-publication phase
/// only; the driver's `TopologyModification` edits a private clone
/// and the publication machinery guarantees readers never observe a
/// half-edited snapshot.
///
/// `version` is monotonic across publications. `max_server_id` is the
/// high-water mark of assigned server ids and is carried through
/// every clone, so ids retired by membership changes are never handed
/// out again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologySnapshot {
    /// Monotonic publication counter.
    version: u64,

    /// Cluster-level name reported by discovery, if any.
    cluster_name: Option<String>,

    /// When the discovery round behind this snapshot completed.
    discovered_at: DateTime<Utc>,

    /// High-water mark of assigned server ids.
    max_server_id: u32,

    /// Members keyed by id. BTreeMap keeps id iteration sorted.
    servers: BTreeMap<ServerId, ServerRecord>,
}

impl TopologySnapshot {
    /// Creates an empty snapshot at version 0.
    #[must_use]
    pub fn new(cluster_name: Option<String>) -> Self {
        Self {
            version: 0,
            cluster_name,
            discovered_at: Utc::now(),
            max_server_id: 0,
            servers: BTreeMap::new(),
        }
    }

    /// Returns the publication version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the cluster name, if discovery reported one.
    #[must_use]
    pub fn cluster_name(&self) -> Option<&str> {
        self.cluster_name.as_deref()
    }

    /// Returns when the discovery round behind this snapshot completed.
    #[must_use]
    pub fn discovered_at(&self) -> DateTime<Utc> {
        self.discovered_at
    }

    /// Returns the record for `id`, if the server is a current member.
    #[must_use]
    pub fn server(&self, id: ServerId) -> Option<&ServerRecord> {
        self.servers.get(&id)
    }

    /// Returns true if `id` is a current member.
    #[must_use]
    pub fn contains(&self, id: ServerId) -> bool {
        self.servers.contains_key(&id)
    }

    /// Iterates current members in id order.
    pub fn servers(&self) -> impl Iterator<Item = &ServerRecord> {
        self.servers.values()
    }

    /// Returns the sorted list of current member ids.
    #[must_use]
    pub fn server_ids(&self) -> Vec<ServerId> {
        self.servers.keys().copied().collect()
    }

    /// Returns the number of current members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Returns true if the snapshot has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Returns true if `other` describes the same membership,
    /// comparing `(id, generation)` pairs only.
    ///
    /// Used to skip publishing a new snapshot when a discovery round
    /// found nothing that would invalidate any connection.
    #[must_use]
    pub fn has_same_membership(&self, other: &TopologySnapshot) -> bool {
        self.servers.len() == other.servers.len()
            && self
                .servers
                .values()
                .zip(other.servers.values())
                .all(|(a, b)| a.same_identity(b))
    }

    // ------------------------------------------------------------------
    // Pre-publication mutators
    // ------------------------------------------------------------------

    /// Allocates a fresh server id, bumping the high-water mark.
    ///
    /// Ids start at 1 and are never reused within a topology.
    pub fn allocate_server_id(&mut self) -> ServerId {
        self.max_server_id += 1;
        ServerId::new(self.max_server_id)
    }

    /// Inserts or replaces the record for `record.id`.
    ///
    /// Raises the id high-water mark if `record.id` is above it, so
    /// explicitly assigned ids can never collide with later
    /// [`allocate_server_id`](Self::allocate_server_id) calls.
    pub fn upsert_server(&mut self, record: ServerRecord) {
        self.max_server_id = self.max_server_id.max(record.id.value());
        self.servers.insert(record.id, record);
    }

    /// Removes the record for `id`, returning it if present.
    pub fn remove_server(&mut self, id: ServerId) -> Option<ServerRecord> {
        self.servers.remove(&id)
    }

    /// Retains only members for which `keep` returns true.
    pub fn retain_servers(&mut self, keep: impl FnMut(&ServerId, &mut ServerRecord) -> bool) {
        self.servers.retain(keep);
    }

    /// Sets the cluster name.
    pub fn set_cluster_name(&mut self, name: Option<String>) {
        self.cluster_name = name;
    }

    /// Advances the version by one and refreshes the discovery
    /// timestamp. Called exactly once per publication, by the
    /// driver's commit path.
    pub fn bump_version(&mut self) {
        self.version += 1;
        self.discovered_at = Utc::now();
    }
}

impl Default for TopologySnapshot {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ServerRole;

    fn snapshot_with(ids: &[u32]) -> TopologySnapshot {
        let mut snapshot = TopologySnapshot::new(Some("test".to_owned()));
        for id in ids {
            snapshot.upsert_server(ServerRecord::new(
                ServerId::new(*id),
                format!("10.0.0.{id}:27017"),
                ServerRole::Replica,
            ));
        }
        snapshot
    }

    #[test]
    fn server_ids_are_sorted() {
        let snapshot = snapshot_with(&[4, 1, 3]);
        assert_eq!(
            snapshot.server_ids(),
            vec![ServerId::new(1), ServerId::new(3), ServerId::new(4)]
        );
    }

    #[test]
    fn allocate_never_reuses_after_removal() {
        let mut snapshot = TopologySnapshot::default();
        let first = snapshot.allocate_server_id();
        snapshot.upsert_server(ServerRecord::new(first, "a:1", ServerRole::Unknown));
        snapshot.remove_server(first);
        let second = snapshot.allocate_server_id();
        assert_ne!(first, second);
        assert!(second > first);
    }

    #[test]
    fn upsert_raises_high_water_mark() {
        let mut snapshot = TopologySnapshot::default();
        snapshot.upsert_server(ServerRecord::new(ServerId::new(7), "a:1", ServerRole::Unknown));
        assert_eq!(snapshot.allocate_server_id(), ServerId::new(8));
    }

    #[test]
    fn same_membership_ignores_address() {
        let a = snapshot_with(&[1, 2]);
        let mut b = a.clone();
        if let Some(mut record) = b.remove_server(ServerId::new(2)) {
            record.address = "renamed:27017".to_owned();
            b.upsert_server(record);
        }
        assert!(a.has_same_membership(&b));
    }

    #[test]
    fn same_membership_detects_generation_bump() {
        let a = snapshot_with(&[1, 2]);
        let mut b = a.clone();
        if let Some(mut record) = b.remove_server(ServerId::new(2)) {
            record.generation = record.generation.next();
            b.upsert_server(record);
        }
        assert!(!a.has_same_membership(&b));
    }

    #[test]
    fn same_membership_detects_removal() {
        let a = snapshot_with(&[1, 2]);
        let mut b = a.clone();
        b.remove_server(ServerId::new(1));
        assert!(!a.has_same_membership(&b));
    }

    #[test]
    fn bump_version_is_monotonic() {
        let mut snapshot = TopologySnapshot::default();
        assert_eq!(snapshot.version(), 0);
        snapshot.bump_version();
        snapshot.bump_version();
        assert_eq!(snapshot.version(), 2);
    }

    #[test]
    fn snapshot_serializes() {
        let snapshot = snapshot_with(&[1]);
        let json = serde_json::to_string(&snapshot).expect("serialize");
        let back: TopologySnapshot = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.server_ids(), snapshot.server_ids());
        assert_eq!(back.version(), snapshot.version());
    }

    proptest::proptest! {
        // Interleaved allocations, upserts with explicit ids, and
        // removals never produce a duplicate id from the allocator.
        #[test]
        fn allocator_never_reissues_an_id(ops in proptest::collection::vec(0u8..3, 1..64)) {
            let mut snapshot = TopologySnapshot::default();
            let mut issued = std::collections::BTreeSet::new();
            let mut explicit = 0u32;

            for op in ops {
                match op {
                    0 => {
                        let id = snapshot.allocate_server_id();
                        proptest::prop_assert!(issued.insert(id), "allocator reissued {id}");
                        snapshot.upsert_server(ServerRecord::new(
                            id,
                            format!("10.0.0.{}:27017", id.value()),
                            ServerRole::Replica,
                        ));
                    }
                    1 => {
                        explicit += 7;
                        let id = ServerId::new(explicit);
                        issued.insert(id);
                        snapshot.upsert_server(ServerRecord::new(
                            id,
                            format!("10.1.0.{explicit}:27017"),
                            ServerRole::Replica,
                        ));
                    }
                    _ => {
                        let first = snapshot.server_ids().first().copied();
                        if let Some(id) = first {
                            snapshot.remove_server(id);
                        }
                    }
                }
            }
        }
    }
}
