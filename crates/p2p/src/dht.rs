//! The distributed hash table capability.

use std::time::Duration;

use async_trait::async_trait;

use common::digest::Digest;
use common::node_id::NodeId;

/// Deadline for DHT record writes
pub const DHT_PUT_TIMEOUT: Duration = Duration::from_secs(10);
/// Deadline for DHT record reads and provider queries
pub const DHT_GET_TIMEOUT: Duration = Duration::from_secs(15);

/// Errors surfaced by a DHT implementation.
#[derive(Debug, thiserror::Error)]
pub enum DhtError {
    /// The operation did not complete before its deadline
    #[error("dht operation timed out")]
    Timeout,
    /// No record exists under the requested key
    #[error("dht record not found")]
    NotFound,
    /// The underlying transport failed
    #[error("dht transport error: {0}")]
    Transport(String),
}

/// The record key a digest's ciphertext is published under.
pub fn record_key(digest: &Digest) -> String {
    format!("/store/{digest}")
}

/// What the engine needs from a Kademlia-style DHT.
///
/// Provider announcements carry only the digest; record values are raw
/// ciphertext (peers never hold the private key, so shipping ciphertext is
/// safe). Implementations wrap a real host; tests use
/// [`crate::testkit::MemoryDht`].
#[async_trait]
pub trait Dht: Send + Sync + 'static {
    /// Announce that this node holds the block.
    async fn provide(&self, digest: &Digest) -> Result<(), DhtError>;

    /// Enumerate peers currently providing the block.
    async fn find_providers(&self, digest: &Digest) -> Result<Vec<NodeId>, DhtError>;

    /// Store a record, waiting for `quorum` confirmations.
    async fn put_value(&self, key: &str, value: &[u8], quorum: usize) -> Result<(), DhtError>;

    /// Fetch a record.
    async fn get_value(&self, key: &str) -> Result<Vec<u8>, DhtError>;
}
