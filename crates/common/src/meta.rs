use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::node_id::NodeId;

/// Metadata record stored in the catalog under `meta/<digest>`
///
/// Encoded as JSON with stable field names; the record is the only part of
/// a block that background loops may rewrite. Ciphertext and sealed keys
/// change only through the key manager's rotation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    /// Number of logical pointers to this block. A block whose references
    /// drop to zero is eligible for physical removal.
    pub refs: u32,
    /// Unix-seconds timestamp of the first successful write. Never touched
    /// again once set.
    pub created: i64,
    /// Plaintext size in bytes, the unit of quota accounting.
    pub size: u64,
    /// Opaque user metadata (e.g. S3 headers). Never interpreted here.
    #[serde(default)]
    pub s3_meta: BTreeMap<String, String>,
    /// Last observed replica set, node id -> last-seen unix seconds.
    /// Advisory only; healing decisions always re-query the DHT.
    #[serde(default)]
    pub replicas: BTreeMap<NodeId, i64>,
    /// Principal charged for this block's bytes. Set on first write so a
    /// physical purge can release the reservation.
    #[serde(default)]
    pub owner: String,
    /// BLAKE3 hex digest of the ciphertext, verified before decryption.
    #[serde(default)]
    pub checksum: String,
}

impl BlockMeta {
    /// Create a fresh record for a block's first write
    pub fn new(owner: &str, size: u64, created_at: OffsetDateTime) -> Self {
        Self {
            refs: 0,
            created: created_at.unix_timestamp(),
            size,
            s3_meta: BTreeMap::new(),
            replicas: BTreeMap::new(),
            owner: owner.to_string(),
            checksum: String::new(),
        }
    }

    /// Merge user metadata, newest writer wins per key
    pub fn merge_user_meta(&mut self, user_meta: &BTreeMap<String, String>) {
        for (k, v) in user_meta {
            self.s3_meta.insert(k.clone(), v.clone());
        }
    }

    /// Record that `node` was seen holding this block
    ///
    /// The hint set is bounded: when it grows past `cap` entries the
    /// least-recently-seen hints are evicted.
    pub fn touch_replica(&mut self, node: &NodeId, seen_at: OffsetDateTime, cap: usize) {
        self.replicas
            .insert(node.clone(), seen_at.unix_timestamp());
        while self.replicas.len() > cap {
            let oldest = self
                .replicas
                .iter()
                .min_by_key(|(id, seen)| (**seen, (*id).clone()))
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => self.replicas.remove(&id),
                None => break,
            };
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_json_field_names_are_stable() {
        let mut meta = BlockMeta::new("alice", 5, datetime!(2024-01-01 00:00 UTC));
        meta.refs = 1;
        meta.checksum = "ab".repeat(32);
        meta.touch_replica(&NodeId::from("node-a"), datetime!(2024-01-02 00:00 UTC), 6);

        let json = serde_json::to_value(&meta).unwrap();
        for field in ["refs", "created", "size", "s3_meta", "replicas", "owner", "checksum"] {
            assert!(json.get(field).is_some(), "missing field {field}");
        }
        assert_eq!(json["refs"], 1);
        assert_eq!(json["size"], 5);
        assert_eq!(json["owner"], "alice");
    }

    #[test]
    fn test_replica_hints_evict_oldest() {
        let mut meta = BlockMeta::new("alice", 1, datetime!(2024-01-01 00:00 UTC));
        for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
            meta.touch_replica(
                &NodeId::from(*name),
                datetime!(2024-01-01 00:00 UTC) + time::Duration::seconds(i as i64),
                3,
            );
        }

        assert_eq!(meta.replicas.len(), 3);
        assert!(!meta.replicas.contains_key(&NodeId::from("a")));
        assert!(meta.replicas.contains_key(&NodeId::from("d")));
    }

    #[test]
    fn test_touching_a_known_replica_refreshes_it() {
        let mut meta = BlockMeta::new("alice", 1, datetime!(2024-01-01 00:00 UTC));
        let t0 = datetime!(2024-01-01 00:00 UTC);
        meta.touch_replica(&NodeId::from("a"), t0, 3);
        meta.touch_replica(&NodeId::from("b"), t0 + time::Duration::seconds(1), 3);
        meta.touch_replica(&NodeId::from("c"), t0 + time::Duration::seconds(2), 3);
        // refresh the oldest, then overflow: "b" is now the eviction victim
        meta.touch_replica(&NodeId::from("a"), t0 + time::Duration::seconds(3), 3);
        meta.touch_replica(&NodeId::from("d"), t0 + time::Duration::seconds(4), 3);

        assert!(meta.replicas.contains_key(&NodeId::from("a")));
        assert!(!meta.replicas.contains_key(&NodeId::from("b")));
    }

    #[test]
    fn test_merge_user_meta_overwrites() {
        let mut meta = BlockMeta::new("alice", 1, datetime!(2024-01-01 00:00 UTC));
        meta.merge_user_meta(&BTreeMap::from([("k".to_string(), "v1".to_string())]));
        meta.merge_user_meta(&BTreeMap::from([("k".to_string(), "v2".to_string())]));
        assert_eq!(meta.s3_meta["k"], "v2");
    }
}
