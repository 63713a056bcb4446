//! Shared test utilities for block store integration tests
#![allow(dead_code)]

use std::sync::Arc;

use tokio::sync::watch;

use block_catalog::MemoryCatalog;
use block_store::{ContentStore, DeletionManager, StoreConfig};
use common::crypto::KeyManager;
use common::node_id::NodeId;
use p2p::testkit::{ManualClock, MemoryDht};
use time::macros::datetime;

pub struct TestStore {
    pub store: ContentStore<MemoryCatalog, MemoryDht>,
    pub catalog: Arc<MemoryCatalog>,
    pub dht: Arc<MemoryDht>,
    pub clock: Arc<ManualClock>,
    pub keys: Arc<KeyManager>,
    // keep the parent shutdown channel alive for the test's duration
    _shutdown: watch::Sender<()>,
}

/// Set up a store over in-memory everything.
pub fn setup() -> TestStore {
    let catalog = Arc::new(MemoryCatalog::new());
    let dht = Arc::new(MemoryDht::new(NodeId::from("local")));
    let clock = Arc::new(ManualClock::new(datetime!(2024-06-01 00:00 UTC)));
    let keys = Arc::new(KeyManager::new());

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let deletions = DeletionManager::new(shutdown_rx);

    let store = ContentStore::new(
        catalog.clone(),
        keys.clone(),
        dht.clone(),
        clock.clone(),
        deletions,
        StoreConfig::default(),
    );

    TestStore {
        store,
        catalog,
        dht,
        clock,
        keys,
        _shutdown: shutdown_tx,
    }
}

/// Flip one byte of a raw catalog entry.
pub fn corrupt_entry(catalog: &MemoryCatalog, key: &[u8], offset: usize) {
    use block_catalog::{Catalog, CatalogError};
    catalog
        .update::<_, CatalogError, _>(|txn| {
            let mut value = txn.get(key)?.expect("entry to corrupt");
            value[offset] ^= 0xFF;
            txn.put(key, &value)
        })
        .unwrap();
}
