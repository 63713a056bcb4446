//! Typed accessors for catalog records.
//!
//! Metadata records are JSON; quota counters are 8-byte big-endian
//! integers. Counters that are missing or malformed read as absent, the
//! same way the store has always treated them.

use common::digest::Digest;
use common::meta::BlockMeta;

use crate::error::CatalogError;
use crate::keys::{meta_key, META_PREFIX};
use crate::store::{ReadTxn, WriteTxn};

/// Read and decode the metadata record for a digest.
pub fn read_meta(txn: &dyn ReadTxn, digest: &Digest) -> Result<Option<BlockMeta>, CatalogError> {
    match txn.get(&meta_key(digest))? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Encode and write the metadata record for a digest.
pub fn write_meta(
    txn: &mut dyn WriteTxn,
    digest: &Digest,
    meta: &BlockMeta,
) -> Result<(), CatalogError> {
    let bytes = serde_json::to_vec(meta)?;
    txn.put(&meta_key(digest), &bytes)
}

/// Decode a metadata record from a raw `meta/*` entry seen during iteration.
pub fn decode_meta_entry(key: &[u8], value: &[u8]) -> Option<(Digest, BlockMeta)> {
    let digest = crate::keys::digest_from_key(META_PREFIX, key)?;
    let meta = serde_json::from_slice(value).ok()?;
    Some((digest, meta))
}

/// Read an 8-byte big-endian counter; absent or malformed reads as `None`.
pub fn read_u64(txn: &dyn ReadTxn, key: &[u8]) -> Result<Option<u64>, CatalogError> {
    let Some(bytes) = txn.get(key)? else {
        return Ok(None);
    };
    if bytes.len() != 8 {
        return Ok(None);
    }
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&bytes);
    Ok(Some(u64::from_be_bytes(arr)))
}

/// Write an 8-byte big-endian counter.
pub fn write_u64(txn: &mut dyn WriteTxn, key: &[u8], value: u64) -> Result<(), CatalogError> {
    txn.put(key, &value.to_be_bytes())
}
