//! Key rotation transparency, including the partially-rotated catalog.

mod support;

use std::collections::BTreeMap;
use std::ops::ControlFlow;

use block_catalog::keys::KEY_PREFIX;
use block_catalog::{Catalog, CatalogError};
use common::crypto::SealedKey;
use support::setup;

#[tokio::test]
async fn test_reads_survive_repeated_rotation() {
    let env = setup();
    let digest = env
        .store
        .put("alice", b"pre", BTreeMap::new())
        .await
        .unwrap();

    env.store.rotate().unwrap();
    env.store.rotate().unwrap();

    assert_eq!(env.keys.epoch().unwrap(), 2);
    assert!(!env.keys.holds_previous_key());
    assert_eq!(env.store.get(&digest).await.unwrap(), b"pre".to_vec());
}

#[tokio::test]
async fn test_new_writes_after_rotation_read_back() {
    let env = setup();
    let before = env
        .store
        .put("alice", b"old epoch", BTreeMap::new())
        .await
        .unwrap();

    env.store.rotate().unwrap();

    let after = env
        .store
        .put("alice", b"new epoch", BTreeMap::new())
        .await
        .unwrap();

    assert_eq!(env.store.get(&before).await.unwrap(), b"old epoch".to_vec());
    assert_eq!(env.store.get(&after).await.unwrap(), b"new epoch".to_vec());
}

#[tokio::test]
async fn test_partial_rotation_leaves_every_block_readable() {
    let env = setup();

    let payloads: Vec<Vec<u8>> = (0..4).map(|i| format!("block #{i}").into_bytes()).collect();
    let mut digests = Vec::new();
    for payload in &payloads {
        digests.push(env.store.put("alice", payload, BTreeMap::new()).await.unwrap());
    }

    // a re-encryption callback that reseals two entries, then aborts
    let catalog = env.catalog.clone();
    let result = env.keys.rotate(|old, next| {
        let mut entries: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        catalog
            .iterate(KEY_PREFIX.as_bytes(), &mut |key, value| {
                entries.push((key.to_vec(), value.to_vec()));
                ControlFlow::Continue(())
            })
            .unwrap();

        for (key, value) in entries.iter().take(2) {
            let sealed = SealedKey::try_from(value.as_slice()).unwrap();
            let secret = sealed.unseal(old).unwrap();
            let replacement = SealedKey::seal(&secret, next).unwrap();
            catalog
                .update::<_, CatalogError, _>(|txn| txn.put(key, replacement.bytes()))
                .unwrap();
        }
        Err("re-encryption aborted midway")
    });

    assert!(result.is_err());
    assert!(env.keys.holds_previous_key());

    // the catalog is mixed: some entries sealed to the new epoch, some to
    // the old one. Every block must still decrypt.
    for (digest, payload) in digests.iter().zip(&payloads) {
        assert_eq!(&env.store.get(digest).await.unwrap(), payload);
    }

    // the next clean pass erases the retained key and reads still work
    env.store.rotate().unwrap();
    assert!(!env.keys.holds_previous_key());
    for (digest, payload) in digests.iter().zip(&payloads) {
        assert_eq!(&env.store.get(digest).await.unwrap(), payload);
    }
}
