//! The rotating key manager
//!
//! Owns the active recipient keypair and drives periodic rotation. Every
//! sealed key in the catalog must unwrap under the private key held here;
//! rotation generates a fresh keypair and re-seals the catalog through a
//! caller-supplied callback.

use std::sync::{Arc, RwLock, TryLockError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::keys::{PublicKey, SecretKey};
use super::sealed::SealedKey;
use super::secret::{Secret, SecretError};

/// How often keys rotate if no interval is configured (30 days)
pub const DEFAULT_ROTATION_INTERVAL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Failures of the crypto layer
///
/// A closed sum; lower-level causes (AEAD tags, AES-KW unwraps) are folded
/// into these kinds rather than leaking their own types upward.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// AEAD authentication failed: the ciphertext was tampered with or does
    /// not match its key.
    #[error("ciphertext failed integrity check")]
    Integrity,
    /// The sealed key does not unwrap under any private key the manager
    /// currently holds.
    #[error("sealed key does not match an active private key")]
    BadKey,
    /// A rotation holds the keypair guard; retry the operation.
    #[error("key rotation in progress")]
    Rotating,
}

struct Keys {
    current: SecretKey,
    public: PublicKey,
    /// Retained after a partial rotation, until the next clean full pass.
    /// This is the only reason more than one private key may be live.
    previous: Option<SecretKey>,
    epoch: u64,
}

/// Holds the active recipient keypair behind a read-write guard
///
/// Readers (encrypt/decrypt) snapshot the keys they need for one operation
/// and do the actual cryptography outside the guard. Rotation takes the
/// write guard only for the swap itself, so the `Rotating` failure window
/// is a few instructions wide and callers simply retry.
pub struct KeyManager {
    keys: RwLock<Keys>,
}

impl Default for KeyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager").finish()
    }
}

impl KeyManager {
    /// Create a manager with a freshly generated keypair
    pub fn new() -> Self {
        Self::from_secret(SecretKey::generate())
    }

    /// Create a manager from a persisted secret key
    pub fn from_secret(secret: SecretKey) -> Self {
        let public = secret.public();
        Self {
            keys: RwLock::new(Keys {
                current: secret,
                public,
                previous: None,
                epoch: 0,
            }),
        }
    }

    fn snapshot(&self) -> Result<(SecretKey, PublicKey, Option<SecretKey>), CryptoError> {
        match self.keys.try_read() {
            Ok(guard) => Ok((guard.current.clone(), guard.public, guard.previous.clone())),
            Err(TryLockError::WouldBlock) => Err(CryptoError::Rotating),
            // a poisoned guard means a rotation panicked mid-swap
            Err(TryLockError::Poisoned(p)) => {
                let guard = p.into_inner();
                Ok((guard.current.clone(), guard.public, guard.previous.clone()))
            }
        }
    }

    fn write_guard(&self) -> std::sync::RwLockWriteGuard<'_, Keys> {
        match self.keys.write() {
            Ok(guard) => guard,
            Err(p) => p.into_inner(),
        }
    }

    /// The public key new blocks are currently sealed under
    pub fn public_key(&self) -> Result<PublicKey, CryptoError> {
        self.snapshot().map(|(_, public, _)| public)
    }

    /// The current key epoch, bumped once per rotation
    pub fn epoch(&self) -> Result<u64, CryptoError> {
        match self.keys.try_read() {
            Ok(guard) => Ok(guard.epoch),
            Err(TryLockError::WouldBlock) => Err(CryptoError::Rotating),
            Err(TryLockError::Poisoned(p)) => Ok(p.into_inner().epoch),
        }
    }

    /// Encrypt a block under a fresh symmetric key sealed to the current epoch
    ///
    /// Returns the AEAD output (`nonce || ciphertext || tag`) and the sealed
    /// per-block key.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(Vec<u8>, SealedKey), CryptoError> {
        let public = self.public_key()?;
        let secret = Secret::generate();
        let ciphertext = match secret.encrypt(plaintext) {
            Ok(ct) => ct,
            Err(_) => return Err(CryptoError::Integrity),
        };
        let sealed = SealedKey::seal(&secret, &public).map_err(|_| CryptoError::BadKey)?;
        Ok((ciphertext, sealed))
    }

    /// Unwrap a sealed key under the keys the manager holds
    ///
    /// Tries the current private key first, then the retained previous key.
    /// The boolean reports whether the *current* key did the unwrapping,
    /// which is how the rotation pass tells fresh envelopes from stale ones.
    pub fn unseal(&self, sealed: &SealedKey) -> Result<(Secret, bool), CryptoError> {
        let (current, _, previous) = self.snapshot()?;

        if let Ok(secret) = sealed.unseal(&current) {
            return Ok((secret, true));
        }
        if let Some(old) = previous {
            if let Ok(secret) = sealed.unseal(&old) {
                return Ok((secret, false));
            }
        }
        Err(CryptoError::BadKey)
    }

    /// Decrypt a block given its ciphertext and sealed key
    ///
    /// The previous-key fallback in [`KeyManager::unseal`] is what keeps
    /// reads working while the catalog is in the mixed state left by a
    /// failed rotation pass.
    pub fn decrypt(&self, ciphertext: &[u8], sealed: &SealedKey) -> Result<Vec<u8>, CryptoError> {
        let (secret, _) = self.unseal(sealed)?;
        secret
            .decrypt(ciphertext)
            .map_err(|_: SecretError| CryptoError::Integrity)
    }

    /// Rotate the recipient keypair
    ///
    /// Generates a fresh keypair, swaps it in under the write guard, then
    /// invokes `reencrypt` with the *old* private key and the *new* public
    /// key. The callback must re-seal every `key/*` entry in the catalog.
    ///
    /// On callback failure the manager keeps the new keypair AND retains an
    /// old private key, so blocks still sealed to an old epoch remain
    /// readable via the decrypt fallback. The retained key is erased on the
    /// next rotation whose callback completes cleanly — which is also why a
    /// recovery pass must re-seal stragglers it finds under the retained
    /// key, not just entries under the key being retired.
    pub fn rotate<E>(
        &self,
        reencrypt: impl FnOnce(&SecretKey, &PublicKey) -> Result<(), E>,
    ) -> Result<(), E> {
        let next = SecretKey::generate();
        let next_public = next.public();

        let old = {
            let mut guard = self.write_guard();
            let old = std::mem::replace(&mut guard.current, next);
            guard.public = next_public;
            // a key already retained from a failed pass stays retained: the
            // callback can still reach those entries through `unseal`
            if guard.previous.is_none() {
                guard.previous = Some(old.clone());
            }
            guard.epoch += 1;
            old
        };

        match reencrypt(&old, &next_public) {
            Ok(()) => {
                self.write_guard().previous = None;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Whether a previous private key is retained from a partial rotation
    pub fn holds_previous_key(&self) -> bool {
        match self.keys.try_read() {
            Ok(guard) => guard.previous.is_some(),
            Err(TryLockError::WouldBlock) => false,
            Err(TryLockError::Poisoned(p)) => p.into_inner().previous.is_some(),
        }
    }

    /// Spawn a background task that rotates keys every `interval`
    ///
    /// Re-encryption failures are logged and retried on the next tick; the
    /// task exits when the shutdown signal fires.
    pub fn start_rotation<F, E>(
        self: &Arc<Self>,
        interval: Duration,
        reencrypt: F,
        mut shutdown: watch::Receiver<()>,
    ) -> JoinHandle<()>
    where
        F: Fn(&SecretKey, &PublicKey) -> Result<(), E> + Send + Sync + 'static,
        E: std::fmt::Display,
    {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick fires immediately; skip it so the initial epoch lives a full interval
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match manager.rotate(&reencrypt) {
                            Ok(()) => tracing::info!("key rotation completed"),
                            Err(e) => tracing::error!("key rotation re-encryption failed: {e}"),
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::debug!("key rotation task shutting down");
                        break;
                    }
                }
            }
        })
    }
}
