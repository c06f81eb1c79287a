//! Cluster member descriptions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{Generation, ServerId};

/// Role a server plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerRole {
    /// Accepts writes; at most one per replica group.
    Primary,
    /// Serves reads, replicates from the primary.
    Replica,
    /// Votes in elections, holds no data.
    Arbiter,
    /// Role not yet determined by discovery.
    Unknown,
}

impl fmt::Display for ServerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Replica => write!(f, "replica"),
            Self::Arbiter => write!(f, "arbiter"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// One cluster member as recorded in a topology snapshot.
///
/// The `(id, generation)` pair is the record's identity for
/// connection-validity purposes: a pooled connection is usable
/// against a snapshot exactly when the snapshot contains a record
/// with the same id and the same generation. Other fields (address
/// casing, role changes that kept the generation) do not invalidate
/// connections on their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Stable identifier, unique for the topology's lifetime.
    pub id: ServerId,

    /// Network address, e.g. `10.0.0.1:27017`.
    pub address: String,

    /// Current role.
    pub role: ServerRole,

    /// Invalidation counter; see [`Generation`].
    pub generation: Generation,
}

impl ServerRecord {
    /// Creates a record at the initial generation.
    #[must_use]
    pub fn new(id: ServerId, address: impl Into<String>, role: ServerRole) -> Self {
        Self { id, address: address.into(), role, generation: Generation::INITIAL }
    }

    /// Returns true if `other` names the same server identity,
    /// comparing only `(id, generation)`.
    #[must_use]
    pub fn same_identity(&self, other: &ServerRecord) -> bool {
        self.id == other.id && self.generation == other.generation
    }
}

impl fmt::Display for ServerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({}, {})", self.id, self.address, self.role, self.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_identity_ignores_address_and_role() {
        let a = ServerRecord::new(ServerId::new(1), "10.0.0.1:27017", ServerRole::Primary);
        let mut b = a.clone();
        b.address = "10.0.0.1.internal:27017".to_owned();
        b.role = ServerRole::Replica;
        assert!(a.same_identity(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn generation_bump_breaks_identity() {
        let a = ServerRecord::new(ServerId::new(1), "10.0.0.1:27017", ServerRole::Replica);
        let mut b = a.clone();
        b.generation = b.generation.next();
        assert!(!a.same_identity(&b));
    }

    #[test]
    fn role_serde_lowercase() {
        assert_eq!(serde_json::to_string(&ServerRole::Primary).expect("serialize"), "\"primary\"");
    }

    #[test]
    fn record_display() {
        let r = ServerRecord::new(ServerId::new(2), "db-2:27017", ServerRole::Replica);
        assert_eq!(r.to_string(), "srv:2 db-2:27017 (replica, gen:0)");
    }
}
