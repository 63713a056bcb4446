//! Catalog key layout.
//!
//! Single-writer-per-key namespace with byte-prefix partitions. Digests
//! appear in keys as lowercase hex, which keeps the layout greppable and
//! matches the DHT record namespace.

use common::digest::Digest;

/// Ciphertext bytes: `nonce(12) || aead_ciphertext_and_tag`
pub const DATA_PREFIX: &str = "data/";
/// Sealed per-block symmetric key
pub const KEY_PREFIX: &str = "key/";
/// JSON metadata record
pub const META_PREFIX: &str = "meta/";
/// Per-principal quota limit, 8-byte big-endian
pub const QUOTA_PREFIX: &str = "quota/";
/// Per-principal used bytes, 8-byte big-endian
pub const USAGE_PREFIX: &str = "usage/";
/// Merkle digest -> content address of the stored DAG node block
pub const DAG_PREFIX: &str = "dag/";

pub fn data_key(digest: &Digest) -> Vec<u8> {
    format!("{DATA_PREFIX}{digest}").into_bytes()
}

pub fn key_key(digest: &Digest) -> Vec<u8> {
    format!("{KEY_PREFIX}{digest}").into_bytes()
}

pub fn meta_key(digest: &Digest) -> Vec<u8> {
    format!("{META_PREFIX}{digest}").into_bytes()
}

pub fn quota_key(principal: &str) -> Vec<u8> {
    format!("{QUOTA_PREFIX}{principal}").into_bytes()
}

pub fn usage_key(principal: &str) -> Vec<u8> {
    format!("{USAGE_PREFIX}{principal}").into_bytes()
}

pub fn dag_key(digest: &Digest) -> Vec<u8> {
    format!("{DAG_PREFIX}{digest}").into_bytes()
}

/// Recover the digest from a prefixed catalog key.
///
/// Returns `None` for keys that don't carry a well-formed hex digest after
/// the prefix.
pub fn digest_from_key(prefix: &str, key: &[u8]) -> Option<Digest> {
    let key = std::str::from_utf8(key).ok()?;
    let hex = key.strip_prefix(prefix)?;
    Digest::from_hex(hex).ok()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_key_roundtrip() {
        let digest = Digest::hash(b"some block");
        let key = meta_key(&digest);
        assert_eq!(digest_from_key(META_PREFIX, &key), Some(digest));
    }

    #[test]
    fn test_foreign_prefix_is_rejected() {
        let digest = Digest::hash(b"some block");
        let key = data_key(&digest);
        assert_eq!(digest_from_key(META_PREFIX, &key), None);
    }
}
