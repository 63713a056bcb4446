//! Self-healing replication.
//!
//! A background pass walks the local metadata partition, asks the DHT who
//! else is providing each block, and pushes raw ciphertext to additional
//! peers until every block is seen by the target replica factor. Healing
//! never decrypts: peers do not hold the recipient private key, so they
//! only ever see what the DHT already carries.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use block_catalog::keys::{data_key, META_PREFIX};
use block_catalog::{decode_meta_entry, read_meta, write_meta, Catalog, CatalogError};
use common::digest::Digest;
use common::meta::BlockMeta;
use common::node_id::NodeId;

use crate::balancer::PeerSelector;
use crate::clock::Clock;
use crate::dht::{record_key, Dht, DhtError, DHT_GET_TIMEOUT, DHT_PUT_TIMEOUT};

/// Target replica factor the healer converges toward
pub const MIN_REPLICAS: usize = 3;

/// Lets the healer skip blocks that are scheduled for deletion.
pub trait PendingDeletions: Send + Sync + 'static {
    fn is_pending(&self, digest: &Digest) -> bool;
}

/// Settings for the healing loop.
#[derive(Debug, Clone)]
pub struct ReplicatorConfig {
    /// How often a full healing pass runs
    pub interval: Duration,
    /// Replica factor to converge toward
    pub min_replicas: usize,
    /// Deadline for each provider query; a timeout counts as zero providers
    pub provider_query_timeout: Duration,
    /// Deadline for each per-peer push
    pub per_peer_timeout: Duration,
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            min_replicas: MIN_REPLICAS,
            provider_query_timeout: DHT_GET_TIMEOUT,
            per_peer_timeout: DHT_PUT_TIMEOUT,
        }
    }
}

impl ReplicatorConfig {
    /// Replica hints kept per block: twice the target factor.
    pub fn replica_hint_cap(&self) -> usize {
        self.min_replicas * 2
    }
}

/// The self-healer.
pub struct Replicator<C, D, S, P> {
    catalog: Arc<C>,
    dht: Arc<D>,
    selector: Arc<S>,
    pending: Arc<P>,
    clock: Arc<dyn Clock>,
    config: ReplicatorConfig,
}

impl<C, D, S, P> Replicator<C, D, S, P>
where
    C: Catalog,
    D: Dht,
    S: PeerSelector,
    P: PendingDeletions,
{
    pub fn new(
        catalog: Arc<C>,
        dht: Arc<D>,
        selector: Arc<S>,
        pending: Arc<P>,
        clock: Arc<dyn Clock>,
        config: ReplicatorConfig,
    ) -> Self {
        Self {
            catalog,
            dht,
            selector,
            pending,
            clock,
            config,
        }
    }

    /// Spawn the healing loop; it runs one pass per interval until the
    /// shutdown signal fires.
    pub fn spawn(self, mut shutdown: watch::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.tick().await;
            tracing::info!(
                interval_secs = self.config.interval.as_secs(),
                min_replicas = self.config.min_replicas,
                "self-healing replicator started"
            );
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.heal_pass().await;
                    }
                    _ = shutdown.changed() => {
                        tracing::debug!("replicator shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// One full healing pass over the metadata partition.
    ///
    /// Errors never escape: a block that cannot be healed this cycle is
    /// retried on the next one.
    pub async fn heal_pass(&self) {
        let blocks = match self.snapshot_blocks() {
            Ok(blocks) => blocks,
            Err(e) => {
                tracing::error!("healing pass could not scan catalog: {e}");
                return;
            }
        };

        let healed = join_all(blocks.into_iter().map(|(digest, _meta)| async move {
            self.heal_block(digest).await
        }))
        .await;

        let repaired = healed.iter().filter(|h| **h).count();
        if repaired > 0 {
            tracing::info!(repaired, "healing pass pushed new replicas");
        }
    }

    fn snapshot_blocks(&self) -> Result<Vec<(Digest, BlockMeta)>, CatalogError> {
        let mut blocks = Vec::new();
        self.catalog.iterate(META_PREFIX.as_bytes(), &mut |key, value| {
            if let Some((digest, meta)) = decode_meta_entry(key, value) {
                if !self.pending.is_pending(&digest) {
                    blocks.push((digest, meta));
                }
            }
            std::ops::ControlFlow::Continue(())
        })?;
        Ok(blocks)
    }

    /// Restore one block to the target factor. Returns whether any replica
    /// was pushed.
    async fn heal_block(&self, digest: Digest) -> bool {
        let providers = match tokio::time::timeout(
            self.config.provider_query_timeout,
            self.dht.find_providers(&digest),
        )
        .await
        {
            Ok(Ok(providers)) => providers,
            // conservative: an unreachable DHT reads as zero providers
            Ok(Err(e)) => {
                tracing::warn!(%digest, "provider query failed: {e}");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(%digest, "provider query timed out");
                Vec::new()
            }
        };

        if providers.len() >= self.config.min_replicas {
            return false;
        }

        // raw ciphertext only; the sealed key never leaves this node
        let ciphertext = match self
            .catalog
            .view::<_, CatalogError, _>(|txn| txn.get(&data_key(&digest)))
        {
            Ok(Some(ciphertext)) => ciphertext,
            Ok(None) => return false,
            Err(e) => {
                tracing::error!(%digest, "could not read ciphertext for healing: {e}");
                return false;
            }
        };

        let needed = self.config.min_replicas - providers.len();
        let peers = self.selector.select(needed, &providers);
        if peers.is_empty() {
            tracing::warn!(%digest, needed, "no eligible peers for healing");
            return false;
        }

        let key = record_key(&digest);
        let mut pushed = Vec::new();
        for peer in peers {
            match tokio::time::timeout(
                self.config.per_peer_timeout,
                self.dht.put_value(&key, &ciphertext, 1),
            )
            .await
            {
                Ok(Ok(())) => pushed.push(peer),
                Ok(Err(e)) => tracing::warn!(%digest, %peer, "replica push failed: {e}"),
                Err(_) => tracing::warn!(%digest, %peer, "replica push timed out"),
            }
        }

        if pushed.is_empty() {
            return false;
        }

        if let Err(e) = self.record_replicas(&digest, providers.iter().chain(pushed.iter())) {
            tracing::error!(%digest, "could not update replica hints: {e}");
        }
        true
    }

    fn record_replicas<'a>(
        &self,
        digest: &Digest,
        nodes: impl Iterator<Item = &'a NodeId>,
    ) -> Result<(), CatalogError> {
        let now = self.clock.now();
        let cap = self.config.replica_hint_cap();
        let nodes: Vec<&NodeId> = nodes.collect();
        self.catalog.update::<_, CatalogError, _>(|txn| {
            let Some(mut meta) = read_meta(txn, digest)? else {
                return Ok(());
            };
            for node in nodes.iter().copied() {
                meta.touch_replica(node, now, cap);
            }
            write_meta(txn, digest, &meta)
        })
    }
}
