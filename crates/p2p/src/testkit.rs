//! In-memory fakes for every p2p capability.
//!
//! These back the engine's unit and integration tests: a DHT that models
//! records landing on a pool of peers, a transport that records what was
//! sent, a clock that only moves when told to, and a selector with a fixed
//! peer list.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};

use common::digest::Digest;
use common::node_id::NodeId;

use crate::balancer::PeerSelector;
use crate::clock::Clock;
use crate::dht::{record_key, Dht, DhtError};
use crate::gossip::GossipTransport;
use crate::replicator::PendingDeletions;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(p) => p.into_inner(),
    }
}

#[derive(Debug, Default)]
struct DhtState {
    providers: HashMap<String, BTreeSet<NodeId>>,
    values: HashMap<String, Vec<u8>>,
}

/// In-memory DHT.
///
/// `put_value` models a quorum-1 record write landing on one peer from the
/// configured pool: the first pool peer not yet providing the key becomes a
/// provider. `provide` announces the local node.
#[derive(Debug)]
pub struct MemoryDht {
    local: NodeId,
    peers: Vec<NodeId>,
    state: Mutex<DhtState>,
}

impl MemoryDht {
    pub fn new(local: NodeId) -> Self {
        Self {
            local,
            peers: Vec::new(),
            state: Mutex::new(DhtState::default()),
        }
    }

    /// Configure the pool of peers that record writes can land on.
    pub fn with_peers(mut self, peers: impl IntoIterator<Item = NodeId>) -> Self {
        self.peers = peers.into_iter().collect();
        self
    }

    /// Mark `node` as a provider of `digest`.
    pub fn add_provider(&self, digest: &Digest, node: NodeId) {
        lock(&self.state)
            .providers
            .entry(record_key(digest))
            .or_default()
            .insert(node);
    }

    /// Number of peers providing `digest`.
    pub fn provider_count(&self, digest: &Digest) -> usize {
        lock(&self.state)
            .providers
            .get(&record_key(digest))
            .map(|s| s.len())
            .unwrap_or(0)
    }

    /// The record stored under `key`, if any.
    pub fn stored_value(&self, key: &str) -> Option<Vec<u8>> {
        lock(&self.state).values.get(key).cloned()
    }
}

#[async_trait]
impl Dht for MemoryDht {
    async fn provide(&self, digest: &Digest) -> Result<(), DhtError> {
        lock(&self.state)
            .providers
            .entry(record_key(digest))
            .or_default()
            .insert(self.local.clone());
        Ok(())
    }

    async fn find_providers(&self, digest: &Digest) -> Result<Vec<NodeId>, DhtError> {
        Ok(lock(&self.state)
            .providers
            .get(&record_key(digest))
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn put_value(&self, key: &str, value: &[u8], _quorum: usize) -> Result<(), DhtError> {
        let mut state = lock(&self.state);
        state.values.insert(key.to_string(), value.to_vec());
        let providers = state.providers.entry(key.to_string()).or_default();
        if let Some(peer) = self.peers.iter().find(|p| !providers.contains(*p)) {
            providers.insert(peer.clone());
        }
        Ok(())
    }

    async fn get_value(&self, key: &str) -> Result<Vec<u8>, DhtError> {
        lock(&self.state)
            .values
            .get(key)
            .cloned()
            .ok_or(DhtError::NotFound)
    }
}

/// Gossip transport that records every send.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    neighbors: Vec<NodeId>,
    sent: Mutex<Vec<(NodeId, String, Vec<u8>)>>,
}

impl MemoryTransport {
    pub fn with_neighbors<'a>(neighbors: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            neighbors: neighbors.into_iter().map(NodeId::from).collect(),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Everything sent so far, in order.
    pub fn sent(&self) -> Vec<(NodeId, String, Vec<u8>)> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl GossipTransport for MemoryTransport {
    fn neighbors(&self) -> Vec<NodeId> {
        self.neighbors.clone()
    }

    async fn send(&self, peer: &NodeId, protocol: &str, payload: &[u8]) -> Result<(), DhtError> {
        lock(&self.sent).push((peer.clone(), protocol.to_string(), payload.to_vec()));
        Ok(())
    }
}

/// Clock that moves only when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        *lock(&self.now) += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *lock(&self.now)
    }
}

/// Selector with a fixed, ordered peer list.
#[derive(Debug, Default)]
pub struct StaticSelector {
    peers: Vec<NodeId>,
}

impl StaticSelector {
    pub fn new(peers: Vec<NodeId>) -> Self {
        Self { peers }
    }
}

impl PeerSelector for StaticSelector {
    fn select(&self, n: usize, exclude: &[NodeId]) -> Vec<NodeId> {
        self.peers
            .iter()
            .filter(|p| !exclude.contains(p))
            .take(n)
            .cloned()
            .collect()
    }
}

/// Pending-deletion set that is always empty.
#[derive(Debug, Default)]
pub struct NoPending;

impl PendingDeletions for NoPending {
    fn is_pending(&self, _digest: &Digest) -> bool {
        false
    }
}

/// Pending-deletion set backed by an explicit list.
#[derive(Debug, Default)]
pub struct StaticPending {
    digests: BTreeMap<Digest, ()>,
}

impl StaticPending {
    pub fn of(digests: impl IntoIterator<Item = Digest>) -> Self {
        Self {
            digests: digests.into_iter().map(|d| (d, ())).collect(),
        }
    }
}

impl PendingDeletions for StaticPending {
    fn is_pending(&self, digest: &Digest) -> bool {
        self.digests.contains_key(digest)
    }
}
