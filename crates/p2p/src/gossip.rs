//! Advisory replica gossip.
//!
//! Nodes tell each other which blocks they hold via one-shot streams on
//! `/store/gossip/1.0`. Inbound alerts only ever bump the replica hints on
//! local metadata; the healer always re-queries the DHT before acting, so
//! gossip can be lossy, late, or wrong without breaking anything.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use block_catalog::{read_meta, write_meta, Catalog, CatalogError};
use common::digest::Digest;
use common::node_id::NodeId;

use crate::clock::Clock;
use crate::dht::DhtError;

/// Protocol id for gossip streams
pub const GOSSIP_PROTOCOL: &str = "/store/gossip/1.0";
/// Alert type announcing that the sender holds a block
pub const REPLICA_ALERT: &str = "ReplicaAlert";
/// How often the neighbor list is refreshed
pub const PEER_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// One gossip message, UTF-8 JSON on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockAlert {
    /// Hex digest of the block the alert is about
    pub hash: String,
    /// Alert type; only `ReplicaAlert` is understood today
    #[serde(rename = "type")]
    pub kind: String,
    /// Unix-seconds timestamp at the sender
    pub ts: i64,
}

impl BlockAlert {
    pub fn replica(digest: &Digest, ts: i64) -> Self {
        Self {
            hash: digest.to_hex(),
            kind: REPLICA_ALERT.to_string(),
            ts,
        }
    }
}

/// What the gossip layer needs from the p2p host.
#[async_trait::async_trait]
pub trait GossipTransport: Send + Sync + 'static {
    /// Currently connected peers.
    fn neighbors(&self) -> Vec<NodeId>;

    /// Open a one-shot stream to `peer` on `protocol`, write `payload`, close.
    async fn send(&self, peer: &NodeId, protocol: &str, payload: &[u8]) -> Result<(), DhtError>;
}

/// Cheaply cloneable handle for enqueueing outbound alerts.
///
/// Can be handed to foreground code (the content store fires one after
/// every PUT) without dragging the alerter's generics along.
#[derive(Debug, Clone)]
pub struct AlertDispatcher {
    tx: flume::Sender<BlockAlert>,
}

impl AlertDispatcher {
    /// Queue an alert for broadcast.
    ///
    /// Non-blocking; fails only when the alerter has shut down.
    pub fn dispatch(&self, alert: BlockAlert) -> Result<(), DhtError> {
        self.tx
            .send(alert)
            .map_err(|_| DhtError::Transport("gossip alerter has shut down".to_string()))
    }
}

/// Settings for the gossip alerter.
#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// Neighbor list refresh cadence
    pub peer_refresh_interval: Duration,
    /// Bound on replica hints kept per block
    pub replica_hint_cap: usize,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            peer_refresh_interval: PEER_REFRESH_INTERVAL,
            replica_hint_cap: crate::replicator::MIN_REPLICAS * 2,
        }
    }
}

/// Broadcasts replica alerts and folds inbound ones into local metadata.
pub struct GossipAlerter<C, T> {
    catalog: Arc<C>,
    transport: Arc<T>,
    clock: Arc<dyn Clock>,
    config: GossipConfig,
    peers: Mutex<HashMap<NodeId, time::OffsetDateTime>>,
    tx: flume::Sender<BlockAlert>,
    rx: flume::Receiver<BlockAlert>,
}

impl<C, T> GossipAlerter<C, T>
where
    C: Catalog,
    T: GossipTransport,
{
    pub fn new(
        catalog: Arc<C>,
        transport: Arc<T>,
        clock: Arc<dyn Clock>,
        config: GossipConfig,
    ) -> Self {
        let (tx, rx) = flume::bounded(100);
        Self {
            catalog,
            transport,
            clock,
            config,
            peers: Mutex::new(HashMap::new()),
            tx,
            rx,
        }
    }

    /// Handle for enqueueing outbound alerts.
    pub fn dispatcher(&self) -> AlertDispatcher {
        AlertDispatcher {
            tx: self.tx.clone(),
        }
    }

    fn lock_peers(&self) -> std::sync::MutexGuard<'_, HashMap<NodeId, time::OffsetDateTime>> {
        match self.peers.lock() {
            Ok(guard) => guard,
            Err(p) => p.into_inner(),
        }
    }

    /// Pull the current neighbor list from the transport.
    pub fn refresh_peers(&self) {
        let now = self.clock.now();
        let mut peers = self.lock_peers();
        for peer in self.transport.neighbors() {
            peers.insert(peer, now);
        }
    }

    /// Peers currently known to the alerter.
    pub fn known_peers(&self) -> Vec<NodeId> {
        self.lock_peers().keys().cloned().collect()
    }

    /// Send one alert to every known peer.
    pub async fn broadcast(&self, alert: &BlockAlert) {
        let payload = match serde_json::to_vec(alert) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("could not encode gossip alert: {e}");
                return;
            }
        };
        for peer in self.known_peers() {
            if let Err(e) = self
                .transport
                .send(&peer, GOSSIP_PROTOCOL, &payload)
                .await
            {
                tracing::debug!(%peer, "gossip send failed: {e}");
            }
        }
    }

    /// Handle an inbound gossip payload from `from`.
    ///
    /// Unparseable or unknown alerts are dropped; a replica alert for a
    /// locally-held block bumps that block's replica hints with the sender.
    pub fn handle_message(&self, from: &NodeId, payload: &[u8]) {
        let Ok(alert) = serde_json::from_slice::<BlockAlert>(payload) else {
            tracing::debug!(%from, "dropping malformed gossip payload");
            return;
        };
        if alert.kind != REPLICA_ALERT {
            tracing::debug!(%from, kind = %alert.kind, "dropping unknown alert type");
            return;
        }
        let Ok(digest) = Digest::from_hex(&alert.hash) else {
            tracing::debug!(%from, "dropping alert with malformed digest");
            return;
        };

        let now = self.clock.now();
        let cap = self.config.replica_hint_cap;
        let result = self.catalog.update::<_, CatalogError, _>(|txn| {
            let Some(mut meta) = read_meta(txn, &digest)? else {
                // not our block; gossip about it is none of our business
                return Ok(());
            };
            meta.touch_replica(from, now, cap);
            write_meta(txn, &digest, &meta)
        });
        if let Err(e) = result {
            tracing::error!(%digest, "could not apply replica alert: {e}");
        }
    }

    /// Spawn the gossip loop: periodic peer refresh plus broadcast drain.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.peer_refresh_interval);
            tracing::info!("gossip alerter started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.refresh_peers();
                    }
                    alert = self.rx.recv_async() => {
                        match alert {
                            Ok(alert) => self.broadcast(&alert).await,
                            Err(_) => break,
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::debug!("gossip alerter shutting down");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testkit::{ManualClock, MemoryTransport};
    use block_catalog::keys::data_key;
    use block_catalog::MemoryCatalog;
    use common::meta::BlockMeta;
    use time::macros::datetime;

    fn alerter(
        catalog: Arc<MemoryCatalog>,
        transport: Arc<MemoryTransport>,
    ) -> GossipAlerter<MemoryCatalog, MemoryTransport> {
        GossipAlerter::new(
            catalog,
            transport,
            Arc::new(ManualClock::new(datetime!(2024-01-01 00:00 UTC))),
            GossipConfig::default(),
        )
    }

    fn seed_block(catalog: &MemoryCatalog, data: &[u8]) -> Digest {
        let digest = Digest::hash(data);
        let meta = BlockMeta::new("alice", data.len() as u64, datetime!(2024-01-01 00:00 UTC));
        catalog
            .update::<_, CatalogError, _>(|txn| {
                txn.put(&data_key(&digest), data)?;
                write_meta(txn, &digest, &meta)
            })
            .unwrap();
        digest
    }

    #[test]
    fn test_wire_format_field_names() {
        let alert = BlockAlert::replica(&Digest::hash(b"x"), 1700000000);
        let json: serde_json::Value =
            serde_json::from_slice(&serde_json::to_vec(&alert).unwrap()).unwrap();
        assert!(json["hash"].is_string());
        assert_eq!(json["type"], "ReplicaAlert");
        assert_eq!(json["ts"], 1700000000);
    }

    #[test]
    fn test_replica_alert_bumps_local_hint() {
        let catalog = Arc::new(MemoryCatalog::new());
        let digest = seed_block(&catalog, b"gossiped block");
        let alerter = alerter(catalog.clone(), Arc::new(MemoryTransport::default()));

        let payload =
            serde_json::to_vec(&BlockAlert::replica(&digest, 1700000000)).unwrap();
        alerter.handle_message(&NodeId::from("peer-7"), &payload);

        let meta = catalog
            .view::<_, CatalogError, _>(|txn| read_meta(txn, &digest))
            .unwrap()
            .unwrap();
        assert!(meta.replicas.contains_key(&NodeId::from("peer-7")));
    }

    #[test]
    fn test_alert_for_unknown_block_is_ignored() {
        let catalog = Arc::new(MemoryCatalog::new());
        let alerter = alerter(catalog.clone(), Arc::new(MemoryTransport::default()));

        let payload =
            serde_json::to_vec(&BlockAlert::replica(&Digest::hash(b"elsewhere"), 0)).unwrap();
        alerter.handle_message(&NodeId::from("peer-7"), &payload);
        // nothing to assert beyond "no record appeared"
        let mut count = 0;
        catalog
            .iterate(b"meta/", &mut |_, _| {
                count += 1;
                std::ops::ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_malformed_and_foreign_alerts_are_dropped() {
        let catalog = Arc::new(MemoryCatalog::new());
        let digest = seed_block(&catalog, b"block");
        let alerter = alerter(catalog.clone(), Arc::new(MemoryTransport::default()));

        alerter.handle_message(&NodeId::from("p"), b"not json");
        let foreign = serde_json::json!({"hash": digest.to_hex(), "type": "Eviction", "ts": 0});
        alerter.handle_message(&NodeId::from("p"), foreign.to_string().as_bytes());

        let meta = catalog
            .view::<_, CatalogError, _>(|txn| read_meta(txn, &digest))
            .unwrap()
            .unwrap();
        assert!(meta.replicas.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_known_peer() {
        let catalog = Arc::new(MemoryCatalog::new());
        let transport = Arc::new(MemoryTransport::with_neighbors(["n1", "n2"]));
        let alerter = alerter(catalog, transport.clone());

        alerter.refresh_peers();
        let alert = BlockAlert::replica(&Digest::hash(b"announce me"), 1);
        alerter.broadcast(&alert).await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(_, proto, _)| proto == GOSSIP_PROTOCOL));
    }
}
