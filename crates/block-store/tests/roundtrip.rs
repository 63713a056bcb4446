//! End-to-end put/get behavior over an in-memory catalog.

mod support;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use block_catalog::keys::data_key;
use block_store::StoreError;
use common::digest::Digest;
use p2p::testkit::{ManualClock, MemoryTransport};
use p2p::{GossipAlerter, GossipConfig, GOSSIP_PROTOCOL};
use support::{corrupt_entry, setup};
use time::macros::datetime;
use tokio::sync::watch;

#[tokio::test]
async fn test_put_get_roundtrip() {
    let env = setup();

    let digest = env
        .store
        .put("alice", b"hello", BTreeMap::new())
        .await
        .unwrap();

    assert_eq!(digest.to_hex().len(), 64);
    assert_eq!(env.store.get(&digest).await.unwrap(), b"hello".to_vec());

    let meta = env.store.meta(&digest).await.unwrap();
    assert_eq!(meta.size, 5);
    assert_eq!(meta.refs, 1);
    assert_eq!(meta.owner, "alice");
}

#[tokio::test]
async fn test_address_is_plaintext_hash() {
    let env = setup();
    let digest = env
        .store
        .put("alice", b"addressable", BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(digest, Digest::hash(b"addressable"));
}

#[tokio::test]
async fn test_duplicate_put_is_idempotent() {
    let env = setup();

    let first = env.store.put("alice", b"x", BTreeMap::new()).await.unwrap();
    let second = env.store.put("alice", b"x", BTreeMap::new()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(env.store.meta(&first).await.unwrap().refs, 2);
    // the duplicate write consumed no additional quota
    assert_eq!(env.store.quota().usage("alice").unwrap(), 1);
}

#[tokio::test]
async fn test_user_metadata_is_merged_opaquely() {
    let env = setup();

    let meta_a = BTreeMap::from([("content-type".to_string(), "text/plain".to_string())]);
    let meta_b = BTreeMap::from([("x-owner-tag".to_string(), "7".to_string())]);

    let digest = env.store.put("alice", b"tagged", meta_a).await.unwrap();
    env.store.put("alice", b"tagged", meta_b).await.unwrap();

    let meta = env.store.meta(&digest).await.unwrap();
    assert_eq!(meta.s3_meta["content-type"], "text/plain");
    assert_eq!(meta.s3_meta["x-owner-tag"], "7");
}

#[tokio::test]
async fn test_get_missing_block_is_not_found() {
    let env = setup();
    let absent = Digest::hash(b"never stored");

    assert!(matches!(
        env.store.get(&absent).await,
        Err(StoreError::NotFound(d)) if d == absent
    ));
}

#[tokio::test]
async fn test_tampered_ciphertext_reads_as_corrupted() {
    let env = setup();
    let digest = env
        .store
        .put("alice", b"integrity matters", BTreeMap::new())
        .await
        .unwrap();

    corrupt_entry(&env.catalog, &data_key(&digest), 20);

    assert!(matches!(
        env.store.get(&digest).await,
        Err(StoreError::Corrupted(d)) if d == digest
    ));
}

#[tokio::test(start_paused = true)]
async fn test_put_fires_gossip_alert() {
    let env = setup();

    let transport = Arc::new(MemoryTransport::with_neighbors(["n1"]));
    let alerter = Arc::new(GossipAlerter::new(
        env.catalog.clone(),
        transport.clone(),
        Arc::new(ManualClock::new(datetime!(2024-06-01 00:00 UTC))),
        GossipConfig::default(),
    ));
    let store = env.store.clone().with_alerts(alerter.dispatcher());
    alerter.refresh_peers();

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let handle = alerter.clone().spawn(shutdown_rx);

    store
        .put("alice", b"announced over gossip", BTreeMap::new())
        .await
        .unwrap();

    // the alert travels provide -> dispatcher -> broadcast loop
    for _ in 0..100 {
        if !transport.sent().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let sent = transport.sent();
    assert!(!sent.is_empty());
    assert_eq!(sent[0].1, GOSSIP_PROTOCOL);

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_put_announces_to_dht() {
    let env = setup();
    let digest = env
        .store
        .put("alice", b"announced", BTreeMap::new())
        .await
        .unwrap();

    // the provide is fire-and-forget on a spawned task
    tokio::task::yield_now().await;
    assert_eq!(env.dht.provider_count(&digest), 1);
}
