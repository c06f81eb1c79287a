//! Client handles and the per-server connections they carry.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use snafu::OptionExt;
use tracing::{debug, warn};
use vellum_types::{Generation, ServerId, TopologySnapshot};

use crate::error::{Result, UnknownServerSnafu};
use crate::slot::SnapshotSlot;
use crate::transport::{Connector, Transport};

/// One physical connection, tagged with the server identity observed
/// when it was dialed.
///
/// The `(server_id, generation)` stamp is what pruning compares
/// against the current snapshot: if the id is gone, or present with a
/// different generation, the connection is stale and gets closed.
#[derive(Debug)]
pub struct ConnectionHandle {
    server_id: ServerId,
    generation: Generation,
    transport: Box<dyn Transport>,
}

impl ConnectionHandle {
    fn new(server_id: ServerId, generation: Generation, transport: Box<dyn Transport>) -> Self {
        Self { server_id, generation, transport }
    }

    /// Returns the id of the server this connection was dialed to.
    #[must_use]
    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    /// Returns the generation observed at creation.
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Returns the underlying transport.
    #[must_use]
    pub fn transport(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    /// Closes the transport, logging rather than propagating errors.
    /// A close failure on an already-dead socket is not actionable.
    fn close_quietly(&mut self) {
        if let Err(error) = self.transport.close() {
            warn!(server = %self.server_id, %error, "error closing pruned connection");
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.close_quietly();
    }
}

/// A bundle of connections, at most one per server, borrowed from the
/// pool by a single caller at a time.
///
/// Connections are dialed lazily: checking a handle out of the pool
/// performs no I/O, and a connection to a given server is only
/// established on the first [`get_connection`](Self::get_connection)
/// for that id.
#[derive(Debug)]
pub struct ClientHandle {
    connections: HashMap<ServerId, ConnectionHandle>,
    slot: Arc<SnapshotSlot>,
    connector: Arc<dyn Connector>,
}

impl ClientHandle {
    pub(crate) fn new(slot: Arc<SnapshotSlot>, connector: Arc<dyn Connector>) -> Self {
        Self { connections: HashMap::new(), slot, connector }
    }

    /// Returns a live connection to `server_id`, dialing if needed.
    ///
    /// The returned connection is stamped with the server's current
    /// generation. An already-held connection whose generation no
    /// longer matches the current record is closed and re-dialed
    /// here rather than handed out stale.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::UnknownServer`](crate::DriverError::UnknownServer)
    /// if `server_id` is not in the current topology, or a connect
    /// error if dialing fails.
    pub fn get_connection(&mut self, server_id: ServerId) -> Result<&mut ConnectionHandle> {
        let snapshot = self.slot.take_ref();
        let record = snapshot.server(server_id).context(UnknownServerSnafu { id: server_id })?;

        match self.connections.entry(server_id) {
            Entry::Occupied(entry) if entry.get().generation == record.generation => {
                Ok(entry.into_mut())
            }
            Entry::Occupied(mut entry) => {
                debug!(
                    server = %server_id,
                    held = %entry.get().generation,
                    current = %record.generation,
                    "re-dialing stale connection"
                );
                entry.get_mut().close_quietly();
                let transport = self.connector.connect(record)?;
                *entry.get_mut() = ConnectionHandle::new(server_id, record.generation, transport);
                Ok(entry.into_mut())
            }
            Entry::Vacant(entry) => {
                let transport = self.connector.connect(record)?;
                Ok(entry.insert(ConnectionHandle::new(server_id, record.generation, transport)))
            }
        }
    }

    /// Closes and discards every connection whose server is absent
    /// from `snapshot` or present with a different generation.
    ///
    /// The handle itself is kept; it is cheap and will re-dial
    /// lazily. Connections matching by `(id, generation)` are left
    /// untouched no matter what else changed in the record.
    pub(crate) fn prune(&mut self, snapshot: &TopologySnapshot) {
        self.connections.retain(|id, connection| {
            let keep = snapshot
                .server(*id)
                .is_some_and(|record| record.generation == connection.generation);
            if !keep {
                debug!(server = %id, "pruning connection to removed or invalidated server");
                connection.close_quietly();
            }
            keep
        });
    }

    /// Returns how many connections this handle currently holds.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Returns the ids this handle holds connections to, sorted.
    #[must_use]
    pub fn connected_servers(&self) -> Vec<ServerId> {
        let mut ids: Vec<ServerId> = self.connections.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
