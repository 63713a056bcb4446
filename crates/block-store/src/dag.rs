//! Merkle DAG over stored blocks.
//!
//! Leaves are content addresses; parents hash the concatenation of their
//! children, pairwise, with a lone trailing node promoted unchanged to the
//! next level. Internal nodes are bincode-encoded and stored as ordinary
//! blocks, so they inherit encryption, replication, and reference
//! counting. A `dag/<merkle-digest>` index entry maps each internal digest
//! to the content address of the block holding its encoding.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use block_catalog::keys::{dag_key, data_key};
use block_catalog::{read_meta, write_meta, Catalog};
use common::digest::Digest;
use p2p::Dht;

use crate::content::ContentStore;
use crate::error::StoreError;

/// One internal node of the Merkle tree.
///
/// `digest` is the hash of the children's digests concatenated in order;
/// `links` are those children, each either a leaf (a content address) or
/// another internal node's merkle digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagNode {
    pub digest: Digest,
    pub links: Vec<Digest>,
}

impl DagNode {
    fn parent(left: Digest, right: Digest) -> Self {
        Self {
            digest: Digest::combine([&left, &right]),
            links: vec![left, right],
        }
    }
}

impl<C, D> ContentStore<C, D>
where
    C: Catalog,
    D: Dht,
{
    /// Build a Merkle tree over an ordered list of block digests.
    ///
    /// The whole tree is constructed into a flat arena first and persisted
    /// only afterwards, so an interrupted build never leaves orphaned
    /// index entries behind. Node blocks are charged to `principal` like
    /// any other write; every child that has a local metadata record gains
    /// one reference for its DAG link.
    ///
    /// Returns the merkle digest of the root.
    pub async fn build_dag(
        &self,
        principal: &str,
        leaves: &[Digest],
    ) -> Result<Digest, StoreError> {
        if leaves.is_empty() {
            return Err(StoreError::InvalidDag("empty leaf list".to_string()));
        }

        // level-order arena of internal nodes
        let mut arena: Vec<DagNode> = Vec::new();
        let mut current: Vec<Digest> = leaves.to_vec();
        while current.len() > 1 {
            let mut next = Vec::with_capacity(current.len().div_ceil(2));
            for pair in current.chunks(2) {
                match pair {
                    [left, right] => {
                        let node = DagNode::parent(*left, *right);
                        next.push(node.digest);
                        arena.push(node);
                    }
                    // odd node out is promoted unchanged
                    [lone] => next.push(*lone),
                    _ => unreachable!("chunks(2) yields one or two items"),
                }
            }
            current = next;
        }
        let root = current[0];

        // persist: node blocks first, then the index and link references
        let mut addresses: HashMap<Digest, Digest> = HashMap::new();
        for node in &arena {
            let bytes = bincode::serialize(node)?;
            let address = self.put(principal, &bytes, BTreeMap::new()).await?;
            addresses.insert(node.digest, address);
        }

        self.catalog.update::<_, StoreError, _>(|txn| {
            for (merkle, address) in &addresses {
                txn.put(&dag_key(merkle), address.as_bytes())?;
            }
            for node in &arena {
                for child in &node.links {
                    // a link to an internal child references its node block
                    let target = addresses.get(child).unwrap_or(child);
                    if let Some(mut meta) = read_meta(txn, target)? {
                        meta.refs += 1;
                        write_meta(txn, target, &meta)?;
                    }
                }
            }
            Ok(())
        })?;

        tracing::debug!(%root, nodes = arena.len(), leaves = leaves.len(), "dag stored");
        Ok(root)
    }

    /// Verify a stored DAG from its root digest.
    ///
    /// Walks the tree, recomputing every internal digest from its links.
    /// Leaves that are present locally are re-read, which re-checks both
    /// the AEAD tag and the content address. Work is O(n) in the number of
    /// nodes.
    pub async fn verify_dag(&self, root: &Digest) -> Result<(), StoreError> {
        let mut stack = vec![*root];
        while let Some(digest) = stack.pop() {
            let address = self.catalog.view::<_, StoreError, _>(|txn| {
                Ok(txn.get(&dag_key(&digest))?)
            })?;

            match address {
                Some(address_bytes) => {
                    let address = Digest::try_from(address_bytes.as_slice()).map_err(|_| {
                        StoreError::InvalidDag(format!("malformed index entry for {digest}"))
                    })?;
                    let bytes = self.get(&address).await?;
                    let node: DagNode = bincode::deserialize(&bytes).map_err(|_| {
                        StoreError::InvalidDag(format!("undecodable node block for {digest}"))
                    })?;
                    if node.digest != digest {
                        return Err(StoreError::InvalidDag(format!(
                            "node block for {digest} carries digest {}",
                            node.digest
                        )));
                    }
                    if node.links.is_empty() {
                        return Err(StoreError::InvalidDag(format!(
                            "internal node {digest} has no links"
                        )));
                    }
                    let computed = Digest::combine(node.links.iter());
                    if computed != digest {
                        return Err(StoreError::InvalidDag(format!(
                            "digest mismatch at {digest}: children hash to {computed}"
                        )));
                    }
                    stack.extend(node.links);
                }
                None => {
                    // a leaf; check its content when we hold it
                    let held = self.catalog.view::<_, StoreError, _>(|txn| {
                        Ok(txn.get(&data_key(&digest))?.is_some())
                    })?;
                    if held {
                        let plaintext = self.get(&digest).await?;
                        if Digest::hash(&plaintext) != digest {
                            return Err(StoreError::Corrupted(digest));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
