use std::time::Duration;

use common::crypto::DEFAULT_ROTATION_INTERVAL;
use p2p::MIN_REPLICAS;

/// Tunables for a store instance.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Quota applied to principals with no explicit `quota/` record
    pub default_quota_bytes: u64,
    /// Grace period between `delete` and physical purge
    pub deletion_timeout: Duration,
    /// How often the recipient keypair rotates
    pub rotation_interval: Duration,
    /// Replica factor the healer converges toward
    pub min_replicas: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_quota_bytes: crate::quota::DEFAULT_QUOTA_BYTES,
            deletion_timeout: Duration::from_secs(60 * 60),
            rotation_interval: DEFAULT_ROTATION_INTERVAL,
            min_replicas: MIN_REPLICAS,
        }
    }
}

impl StoreConfig {
    /// Replica hints kept per block: twice the target factor.
    pub fn replica_hint_cap(&self) -> usize {
        self.min_replicas * 2
    }
}
