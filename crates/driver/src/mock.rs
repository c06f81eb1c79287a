//! In-memory test doubles for the transport and discovery seams.
//!
//! Used by this crate's own tests and available to downstream crates
//! that want to exercise pool behaviour without a live cluster:
//! [`MockConnector`] hands out no-op transports and counts dials and
//! closes, [`ScriptedDiscovery`] plays back canned discovery rounds.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use snafu::ResultExt;
use vellum_types::ServerRecord;

use crate::error::{ConnectSnafu, DiscoverySnafu, Result};
use crate::monitor::{DiscoveredServer, DiscoverySource};
use crate::transport::{Connector, Transport};

/// Connector that fabricates transports without any networking.
#[derive(Debug, Default)]
pub struct MockConnector {
    connects: AtomicUsize,
    closes: Arc<AtomicUsize>,
    fail_next: AtomicBool,
}

impl MockConnector {
    /// Creates a connector with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many transports have been dialed.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Returns how many transports have been closed.
    #[must_use]
    pub fn closed_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Makes the next `connect` call fail with a refused-connection
    /// error.
    pub fn fail_next_connect(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

impl Connector for MockConnector {
    fn connect(&self, record: &ServerRecord) -> Result<Box<dyn Transport>> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "scripted failure"))
                .context(ConnectSnafu { address: record.address.as_str() });
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockTransport {
            peer: record.address.clone(),
            closed: false,
            closes: Arc::clone(&self.closes),
        }))
    }
}

/// Transport produced by [`MockConnector`]; closing it bumps the
/// connector's shared close counter once.
#[derive(Debug)]
pub struct MockTransport {
    peer: String,
    closed: bool,
    closes: Arc<AtomicUsize>,
}

impl Transport for MockTransport {
    fn peer_address(&self) -> &str {
        &self.peer
    }

    fn close(&mut self) -> io::Result<()> {
        if !self.closed {
            self.closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// One canned discovery outcome.
#[derive(Debug, Clone)]
enum DiscoveryRound {
    Announce(Vec<DiscoveredServer>),
    Fail(String),
}

/// Discovery source that plays back scripted rounds.
///
/// Scripted rounds are consumed in order; once exhausted, the
/// fallback round repeats forever.
#[derive(Debug)]
pub struct ScriptedDiscovery {
    rounds: Mutex<VecDeque<DiscoveryRound>>,
    fallback: DiscoveryRound,
    calls: AtomicUsize,
}

impl ScriptedDiscovery {
    /// Announces the same member list on every round.
    #[must_use]
    pub fn repeating(servers: Vec<DiscoveredServer>) -> Self {
        Self {
            rounds: Mutex::new(VecDeque::new()),
            fallback: DiscoveryRound::Announce(servers),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fails every round with the given message.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            rounds: Mutex::new(VecDeque::new()),
            fallback: DiscoveryRound::Fail(message.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Plays `rounds` in order, then repeats the last one.
    ///
    /// # Panics
    ///
    /// Panics if `rounds` is empty.
    #[must_use]
    pub fn sequence(mut rounds: Vec<Vec<DiscoveredServer>>) -> Self {
        let last = rounds.pop().expect("sequence needs at least one round");
        Self {
            rounds: Mutex::new(rounds.into_iter().map(DiscoveryRound::Announce).collect()),
            fallback: DiscoveryRound::Announce(last),
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns how many rounds have been requested.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DiscoverySource for ScriptedDiscovery {
    fn discover(&self) -> Result<Vec<DiscoveredServer>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let round = self.rounds.lock().pop_front().unwrap_or_else(|| self.fallback.clone());
        match round {
            DiscoveryRound::Announce(servers) => Ok(servers),
            DiscoveryRound::Fail(message) => DiscoverySnafu { message }.fail(),
        }
    }
}

#[cfg(test)]
mod tests {
    use vellum_types::{ServerId, ServerRole};

    use super::*;

    #[test]
    fn mock_connector_counts_and_fails_on_request() {
        let connector = MockConnector::new();
        let record = ServerRecord::new(ServerId::new(1), "a:27017", ServerRole::Primary);

        let mut transport = connector.connect(&record).expect("dial");
        assert_eq!(connector.connect_count(), 1);

        transport.close().expect("close");
        transport.close().expect("close again");
        assert_eq!(connector.closed_count(), 1);

        connector.fail_next_connect();
        assert!(connector.connect(&record).is_err());
        // The failure consumed the flag.
        assert!(connector.connect(&record).is_ok());
    }

    #[test]
    fn scripted_discovery_plays_rounds_then_repeats() {
        let server = DiscoveredServer {
            id: None,
            address: "a:27017".to_owned(),
            role: ServerRole::Primary,
            generation: vellum_types::Generation::INITIAL,
        };
        let source = ScriptedDiscovery::sequence(vec![vec![], vec![server.clone()]]);

        assert_eq!(source.discover().expect("round 1"), vec![]);
        assert_eq!(source.discover().expect("round 2"), vec![server.clone()]);
        assert_eq!(source.discover().expect("repeat"), vec![server]);
        assert_eq!(source.call_count(), 3);
    }
}
