//! Sealed per-block keys.
//!
//! A [`SealedKey`] is the envelope stored under `key/<digest>`: the block's
//! symmetric secret, wrapped so that only the holder of the recipient
//! private key can recover it. Wrapping runs an X25519 agreement between a
//! throwaway keypair and the recipient key, then feeds the agreed secret
//! into AES Key Wrap (RFC 3394). The throwaway secret is dropped as soon as
//! the envelope is built, so not even the writer can reopen it later; the
//! envelope carries the throwaway *public* key, which is all the recipient
//! needs to rerun the agreement from their side. AES-KW authenticates what
//! it wraps, so opening with the wrong key fails loudly instead of handing
//! back garbage.

use std::convert::TryFrom;

use aes_kw::KekAes256 as Kek;
use serde::{Deserialize, Serialize};

use super::keys::{KeyError, PublicKey, SecretKey, PUBLIC_KEY_SIZE};
use super::secret::{Secret, SECRET_SIZE};

/// Bytes AES-KW adds on top of the wrapped secret
pub const KW_OVERHEAD: usize = 8;
/// Total envelope size: throwaway pubkey (32) then wrapped secret (40)
pub const SEALED_KEY_SIZE: usize = PUBLIC_KEY_SIZE + SECRET_SIZE + KW_OVERHEAD;

/// Errors that can occur while sealing or unsealing
#[derive(Debug, thiserror::Error)]
pub enum SealedKeyError {
    #[error("invalid sealed key size, expected {SEALED_KEY_SIZE}, got {0}")]
    InvalidLength(usize),
    #[error("key error: {0}")]
    Key(#[from] KeyError),
    #[error("sealed key does not unwrap under this private key")]
    BadKey,
}

/// A block secret wrapped for the recipient keypair.
///
/// Fixed 72 bytes on disk and on the wire. Rotation rewrites these
/// envelopes in place; the ciphertext they guard never moves.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct SealedKey(pub(crate) [u8; SEALED_KEY_SIZE]);

impl Serialize for SealedKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for SealedKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // round-trips through Vec so both binary codecs and JSON number
        // arrays decode; the length check happens in TryFrom
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        SealedKey::try_from(bytes.as_slice()).map_err(|_| {
            serde::de::Error::invalid_length(bytes.len(), &"a 72-byte sealed key")
        })
    }
}

impl From<[u8; SEALED_KEY_SIZE]> for SealedKey {
    fn from(bytes: [u8; SEALED_KEY_SIZE]) -> Self {
        SealedKey(bytes)
    }
}

impl TryFrom<&[u8]> for SealedKey {
    type Error = SealedKeyError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let buff: [u8; SEALED_KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| SealedKeyError::InvalidLength(bytes.len()))?;
        Ok(SealedKey(buff))
    }
}

impl SealedKey {
    /// Wrap `secret` so only `recipient` can recover it.
    ///
    /// # Errors
    ///
    /// Fails if the recipient key is not a usable curve point or the wrap
    /// itself rejects the input.
    pub fn seal(secret: &Secret, recipient: &PublicKey) -> Result<Self, SealedKeyError> {
        let throwaway = SecretKey::generate();

        let agreed = throwaway
            .to_x25519()
            .diffie_hellman(&recipient.to_x25519()?);
        let kek = Kek::from(*agreed.as_bytes());
        let wrapped = kek
            .wrap_vec(secret.bytes())
            .map_err(|_| SealedKeyError::BadKey)?;
        if wrapped.len() != SECRET_SIZE + KW_OVERHEAD {
            return Err(SealedKeyError::InvalidLength(wrapped.len()));
        }

        let mut envelope = [0u8; SEALED_KEY_SIZE];
        envelope[..PUBLIC_KEY_SIZE].copy_from_slice(&throwaway.public().to_bytes());
        envelope[PUBLIC_KEY_SIZE..].copy_from_slice(&wrapped);
        Ok(SealedKey(envelope))
    }

    /// Recover the wrapped secret with the recipient's private key.
    ///
    /// Reruns the X25519 agreement against the envelope's embedded public
    /// key and unwraps. Any mismatch — wrong recipient, bit flips, a
    /// truncated wrap — surfaces as [`SealedKeyError::BadKey`].
    pub fn unseal(&self, recipient_secret: &SecretKey) -> Result<Secret, SealedKeyError> {
        let embedded = PublicKey::try_from(&self.0[..PUBLIC_KEY_SIZE])
            .map_err(|_| SealedKeyError::BadKey)?;

        let agreed = recipient_secret
            .to_x25519()
            .diffie_hellman(&embedded.to_x25519().map_err(|_| SealedKeyError::BadKey)?);
        let kek = Kek::from(*agreed.as_bytes());
        let unwrapped = kek
            .unwrap_vec(&self.0[PUBLIC_KEY_SIZE..])
            .map_err(|_| SealedKeyError::BadKey)?;

        Secret::from_slice(&unwrapped).map_err(|_| SealedKeyError::BadKey)
    }

    /// Get a reference to the raw envelope bytes
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}
