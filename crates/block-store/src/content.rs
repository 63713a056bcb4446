//! The content store: put/get/delete of encrypted blocks by digest.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use block_catalog::keys::{data_key, key_key, meta_key, KEY_PREFIX};
use block_catalog::{read_meta, write_meta, Catalog, CatalogError};
use common::crypto::{CryptoError, KeyManager, PublicKey, SealedKey, SecretKey};
use common::digest::Digest;
use common::meta::BlockMeta;
use p2p::{AlertDispatcher, BlockAlert, Clock, Dht, DHT_PUT_TIMEOUT};

use crate::config::StoreConfig;
use crate::deletion::DeletionManager;
use crate::error::StoreError;
use crate::quota::QuotaAccountant;

/// How long a crypto op waits before retrying when it catches the key
/// manager mid-swap
const ROTATION_RETRY_DELAY: Duration = Duration::from_millis(10);

/// The content-addressed block store.
///
/// A block is stored as three catalog entries written in one transaction:
/// ciphertext under `data/`, the sealed per-block key under `key/`, and a
/// metadata record under `meta/`. The digest handed back to the caller is
/// the BLAKE3 hash of the plaintext, so writing the same bytes twice
/// always yields the same address no matter how often keys have rotated
/// in between.
pub struct ContentStore<C, D> {
    pub(crate) catalog: Arc<C>,
    keys: Arc<KeyManager>,
    dht: Arc<D>,
    clock: Arc<dyn Clock>,
    quota: QuotaAccountant<C>,
    deletions: DeletionManager,
    alerts: Option<AlertDispatcher>,
    config: StoreConfig,
}

impl<C, D> Clone for ContentStore<C, D> {
    fn clone(&self) -> Self {
        Self {
            catalog: self.catalog.clone(),
            keys: self.keys.clone(),
            dht: self.dht.clone(),
            clock: self.clock.clone(),
            quota: self.quota.clone(),
            deletions: self.deletions.clone(),
            alerts: self.alerts.clone(),
            config: self.config.clone(),
        }
    }
}

impl<C, D> std::fmt::Debug for ContentStore<C, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStore").finish()
    }
}

impl<C, D> ContentStore<C, D>
where
    C: Catalog,
    D: Dht,
{
    pub fn new(
        catalog: Arc<C>,
        keys: Arc<KeyManager>,
        dht: Arc<D>,
        clock: Arc<dyn Clock>,
        deletions: DeletionManager,
        config: StoreConfig,
    ) -> Self {
        let quota = QuotaAccountant::new(catalog.clone(), config.default_quota_bytes);
        Self {
            catalog,
            keys,
            dht,
            clock,
            quota,
            deletions,
            alerts: None,
            config,
        }
    }

    /// Wire up a gossip dispatcher so successful writes announce themselves.
    pub fn with_alerts(mut self, alerts: AlertDispatcher) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// The quota accountant sharing this store's catalog.
    pub fn quota(&self) -> &QuotaAccountant<C> {
        &self.quota
    }

    /// The deletion manager backing `delete`/`cancel_delete`.
    pub fn deletions(&self) -> &DeletionManager {
        &self.deletions
    }

    /// The key manager sealing this store's blocks.
    pub fn key_manager(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// Store a block and return its content address.
    ///
    /// Writing bytes that are already stored bumps the reference count and
    /// merges `user_meta` without re-encrypting or consuming quota; the
    /// caller cannot tell the difference from the result.
    pub async fn put(
        &self,
        principal: &str,
        plaintext: &[u8],
        user_meta: BTreeMap<String, String>,
    ) -> Result<Digest, StoreError> {
        let digest = Digest::hash(plaintext);
        let size = plaintext.len() as u64;
        let now = self.clock.now();

        // dedup short-circuit: the block exists, so only metadata moves
        let deduped = self.catalog.update::<_, StoreError, _>(|txn| {
            match read_meta(txn, &digest)? {
                Some(mut meta) => {
                    meta.refs += 1;
                    meta.merge_user_meta(&user_meta);
                    write_meta(txn, &digest, &meta)?;
                    Ok(true)
                }
                None => Ok(false),
            }
        })?;
        if deduped {
            tracing::debug!(%digest, "put deduplicated");
            self.announce(digest);
            return Ok(digest);
        }

        self.quota.check_and_reserve(principal, size)?;

        let (ciphertext, sealed) = self.encrypt_retrying(plaintext).await?;
        let checksum = Digest::hash(&ciphertext).to_hex();

        let write = self.catalog.update::<_, StoreError, _>(|txn| {
            txn.put(&data_key(&digest), &ciphertext)?;
            txn.put(&key_key(&digest), sealed.bytes())?;

            // a racing put may have landed the block since the dedup check
            let (mut meta, raced) = match read_meta(txn, &digest)? {
                Some(meta) => (meta, true),
                None => (BlockMeta::new(principal, size, now), false),
            };
            meta.refs += 1;
            meta.size = size;
            meta.checksum = checksum.clone();
            meta.merge_user_meta(&user_meta);
            write_meta(txn, &digest, &meta)?;
            Ok(raced)
        });

        match write {
            Ok(raced) => {
                if raced {
                    // the racing writer already paid for these bytes
                    self.quota.release(principal, size)?;
                }
            }
            Err(e) => {
                self.quota.release(principal, size)?;
                return Err(e);
            }
        }

        tracing::debug!(%digest, size, "stored block");
        self.announce(digest);
        Ok(digest)
    }

    /// Fetch and decrypt a block.
    ///
    /// Never mutates state. Reads taken mid-rotation still succeed: the
    /// sealed key snapshot unwraps under whichever private key the manager
    /// holds for its epoch.
    pub async fn get(&self, digest: &Digest) -> Result<Vec<u8>, StoreError> {
        let (ciphertext, sealed_bytes, meta) = self.catalog.view::<_, StoreError, _>(|txn| {
            Ok((
                txn.get(&data_key(digest))?,
                txn.get(&key_key(digest))?,
                read_meta(txn, digest)?,
            ))
        })?;

        let ciphertext = ciphertext.ok_or(StoreError::NotFound(*digest))?;
        let sealed_bytes = sealed_bytes.ok_or(StoreError::NotFound(*digest))?;

        if let Some(meta) = &meta {
            if !meta.checksum.is_empty() && Digest::hash(&ciphertext).to_hex() != meta.checksum {
                return Err(StoreError::Corrupted(*digest));
            }
        }

        let sealed =
            SealedKey::try_from(sealed_bytes.as_slice()).map_err(|_| StoreError::Corrupted(*digest))?;

        match self.decrypt_retrying(&ciphertext, &sealed).await {
            Ok(plaintext) => Ok(plaintext),
            Err(CryptoError::Integrity) => Err(StoreError::Corrupted(*digest)),
            Err(e) => Err(e.into()),
        }
    }

    /// Metadata record for a block.
    pub async fn meta(&self, digest: &Digest) -> Result<BlockMeta, StoreError> {
        self.catalog
            .view::<_, StoreError, _>(|txn| Ok(read_meta(txn, digest)?))?
            .ok_or(StoreError::NotFound(*digest))
    }

    /// Schedule this block's deletion after `timeout`.
    ///
    /// Until the timer fires the block stays readable and the deletion can
    /// be cancelled. The timer retires one reference; the block is
    /// physically removed when none remain.
    pub fn delete(&self, digest: Digest, timeout: Duration) -> Result<(), StoreError> {
        let store = self.clone();
        self.deletions
            .schedule(digest, timeout, move || async move {
                store.purge(&digest).await
            })
    }

    /// Schedule deletion with the configured default grace period.
    pub fn delete_default(&self, digest: Digest) -> Result<(), StoreError> {
        self.delete(digest, self.config.deletion_timeout)
    }

    /// Cancel a pending deletion; no-op when nothing is pending.
    pub fn cancel_delete(&self, digest: &Digest) {
        self.deletions.cancel(digest)
    }

    /// Physically retire one reference, removing the block at zero.
    ///
    /// Invoked by the deletion timer. Idempotent for absent digests. When
    /// the last reference goes, all three catalog entries are removed in
    /// one transaction and the owner's quota is credited.
    pub async fn purge(&self, digest: &Digest) -> Result<(), StoreError> {
        let released = self.catalog.update::<_, StoreError, _>(|txn| {
            let Some(mut meta) = read_meta(txn, digest)? else {
                return Ok(None);
            };
            meta.refs = meta.refs.saturating_sub(1);
            if meta.refs == 0 {
                txn.remove(&data_key(digest))?;
                txn.remove(&key_key(digest))?;
                txn.remove(&meta_key(digest))?;
                Ok(Some((meta.owner.clone(), meta.size)))
            } else {
                write_meta(txn, digest, &meta)?;
                Ok(None)
            }
        })?;

        if let Some((owner, size)) = released {
            if !owner.is_empty() {
                self.quota.release(&owner, size)?;
            }
            tracing::info!(%digest, "block purged");
        }
        Ok(())
    }

    /// Re-seal every `key/*` entry from `old` to `next`.
    ///
    /// This is the re-encryption callback rotation runs with. Entries that
    /// don't unwrap under `old` are left alone: they were sealed after the
    /// swap and already belong to the new epoch. Each entry is rewritten in
    /// its own transaction, so an abort mid-pass leaves a mixed catalog
    /// that reads still handle via the manager's retained previous key.
    pub fn reseal_all(&self, old: &SecretKey, next: &PublicKey) -> Result<(), StoreError> {
        let mut entries: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        self.catalog
            .iterate(KEY_PREFIX.as_bytes(), &mut |key, value| {
                entries.push((key.to_vec(), value.to_vec()));
                std::ops::ControlFlow::Continue(())
            })?;

        let mut resealed = 0usize;
        for (key, value) in entries {
            let Ok(sealed) = SealedKey::try_from(value.as_slice()) else {
                tracing::warn!("skipping malformed sealed key during rotation");
                continue;
            };
            let secret = match sealed.unseal(old) {
                Ok(secret) => secret,
                // not sealed under the retiring key: either it already
                // belongs to the new epoch (skip), or it is a straggler
                // from an earlier failed pass still covered by the
                // manager's retained key (re-seal it too)
                Err(_) => match self.keys.unseal(&sealed) {
                    Ok((_, true)) => continue,
                    Ok((secret, false)) => secret,
                    Err(e) => {
                        tracing::error!("sealed key unreadable during rotation: {e}");
                        continue;
                    }
                },
            };
            let replacement =
                SealedKey::seal(&secret, next).map_err(|_| CryptoError::BadKey)?;
            self.catalog.update::<_, CatalogError, _>(|txn| {
                txn.put(&key, replacement.bytes())
            })?;
            resealed += 1;
        }

        tracing::info!(resealed, "rotation re-seal pass complete");
        Ok(())
    }

    /// Rotate the recipient keypair and re-seal the catalog.
    pub fn rotate(&self) -> Result<(), StoreError> {
        self.keys.rotate(|old, next| self.reseal_all(old, next))
    }

    async fn encrypt_retrying(&self, plaintext: &[u8]) -> Result<(Vec<u8>, SealedKey), StoreError> {
        match self.keys.encrypt(plaintext) {
            Err(CryptoError::Rotating) => {
                tokio::time::sleep(ROTATION_RETRY_DELAY).await;
                Ok(self.keys.encrypt(plaintext)?)
            }
            other => Ok(other?),
        }
    }

    async fn decrypt_retrying(
        &self,
        ciphertext: &[u8],
        sealed: &SealedKey,
    ) -> Result<Vec<u8>, CryptoError> {
        match self.keys.decrypt(ciphertext, sealed) {
            Err(CryptoError::Rotating) => {
                tokio::time::sleep(ROTATION_RETRY_DELAY).await;
                self.keys.decrypt(ciphertext, sealed)
            }
            other => other,
        }
    }

    /// Fire-and-forget: tell the DHT (and gossip, if wired) about a block.
    /// Announcement failures never fail the write that triggered them.
    fn announce(&self, digest: Digest) {
        let dht = self.dht.clone();
        let alerts = self.alerts.clone();
        let ts = self.clock.now().unix_timestamp();
        tokio::spawn(async move {
            match tokio::time::timeout(DHT_PUT_TIMEOUT, dht.provide(&digest)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(%digest, "dht provide failed: {e}"),
                Err(_) => tracing::warn!(%digest, "dht provide timed out"),
            }
            if let Some(alerts) = alerts {
                if let Err(e) = alerts.dispatch(BlockAlert::replica(&digest, ts)) {
                    tracing::debug!(%digest, "gossip alert dropped: {e}");
                }
            }
        });
    }
}
