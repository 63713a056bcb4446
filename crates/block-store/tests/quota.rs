//! Quota enforcement through the full put path.

mod support;

use std::collections::BTreeMap;

use block_store::StoreError;
use support::setup;

#[tokio::test]
async fn test_put_over_quota_is_refused_without_mutation() {
    let env = setup();
    env.store.quota().set_quota("u", 10).unwrap();

    let result = env
        .store
        .put("u", b"twelve bytes", BTreeMap::new())
        .await;

    assert!(matches!(result, Err(StoreError::QuotaExceeded(p)) if p == "u"));
    assert_eq!(env.store.quota().usage("u").unwrap(), 0);

    // nothing landed in the catalog either
    let digest = common::digest::Digest::hash(b"twelve bytes");
    assert!(matches!(
        env.store.get(&digest).await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_usage_tracks_stored_bytes() {
    let env = setup();
    env.store.quota().set_quota("u", 100).unwrap();

    env.store.put("u", b"0123456789", BTreeMap::new()).await.unwrap();
    assert_eq!(env.store.quota().usage("u").unwrap(), 10);

    env.store.put("u", b"abcde", BTreeMap::new()).await.unwrap();
    assert_eq!(env.store.quota().usage("u").unwrap(), 15);
}

#[tokio::test]
async fn test_writes_resume_after_usage_drops() {
    let env = setup();
    env.store.quota().set_quota("u", 10).unwrap();

    let digest = env
        .store
        .put("u", b"0123456789", BTreeMap::new())
        .await
        .unwrap();
    assert!(env.store.put("u", b"x", BTreeMap::new()).await.is_err());

    // purging the block returns its bytes
    env.store.purge(&digest).await.unwrap();
    env.store.put("u", b"x", BTreeMap::new()).await.unwrap();
    assert_eq!(env.store.quota().usage("u").unwrap(), 1);
}

#[tokio::test]
async fn test_principals_are_isolated() {
    let env = setup();
    env.store.quota().set_quota("small", 4).unwrap();

    env.store
        .put("big", b"a large enough payload", BTreeMap::new())
        .await
        .unwrap();
    assert!(env
        .store
        .put("small", b"overrun", BTreeMap::new())
        .await
        .is_err());
    assert_eq!(env.store.quota().usage("small").unwrap(), 0);
}
