/**
 * Cryptographic types and operations.
 *  - Symmetric per-block encryption keys
 *  - Asymmetric recipient keys and key sealing
 *  - The rotating key manager
 */
pub mod crypto;
/**
 * Content addresses.
 * A block is named by the 32-byte BLAKE3 hash of
 *  its plaintext, so the address survives key rotation.
 */
pub mod digest;
/**
 * Per-block metadata records as they are stored in
 *  the catalog under `meta/<digest>`.
 */
pub mod meta;
/**
 * Opaque peer identifiers, ordered lexically so peer
 *  selection is deterministic under test.
 */
pub mod node_id;

pub mod prelude {
    pub use crate::crypto::{CryptoError, KeyManager, PublicKey, SealedKey, Secret, SecretKey};
    pub use crate::digest::{Digest, DigestError};
    pub use crate::meta::BlockMeta;
    pub use crate::node_id::NodeId;
}
