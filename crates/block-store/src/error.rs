//! Error types for the block store.

use block_catalog::CatalogError;
use common::crypto::CryptoError;
use common::digest::Digest;
use p2p::DhtError;

/// Errors that can occur when using the block store.
///
/// Foreground calls return these unchanged; background loops log them and
/// move on. The enum stays closed so callers can match on kinds instead of
/// parsing strings.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Catalog lookup miss
    #[error("block not found: {0}")]
    NotFound(Digest),

    /// A deletion is already scheduled for this digest
    #[error("deletion already pending for block: {0}")]
    AlreadyPending(Digest),

    /// The principal's reservation was refused
    #[error("quota exceeded for principal '{0}'")]
    QuotaExceeded(String),

    /// Stored bytes failed an integrity check on read
    #[error("block data corrupted: {0}")]
    Corrupted(Digest),

    /// Merkle verification failed
    #[error("invalid dag: {0}")]
    InvalidDag(String),

    /// DAG node encoding failed
    #[error("dag node encoding: {0}")]
    Codec(#[from] bincode::Error),

    /// Crypto-layer failure
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Catalog I/O or transaction failure
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Network/DHT failure on an explicit DHT operation
    #[error(transparent)]
    Dht(#[from] DhtError),
}
