use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

/// Size of a content address in bytes
pub const DIGEST_SIZE: usize = 32;

/// Errors that can occur when parsing a digest
#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    #[error("invalid digest size, expected {DIGEST_SIZE}, got {0}")]
    InvalidLength(usize),
    #[error("digest hex decode error")]
    InvalidHex,
}

/// Content address of a stored block
///
/// A `Digest` is the BLAKE3 hash of a block's plaintext. Hashing the
/// plaintext rather than the ciphertext keeps the address stable across
/// key epochs, which is what makes repeated writes of the same content
/// idempotent. The hash of the ciphertext still exists, but only as an
/// integrity checksum inside the block's metadata record.
///
/// # Examples
///
/// ```ignore
/// let digest = Digest::hash(b"hello");
/// assert_eq!(digest.to_hex().len(), 64);
/// let parsed = Digest::from_hex(&digest.to_hex())?;
/// assert_eq!(digest, parsed);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Digest([u8; DIGEST_SIZE]);

impl Deref for Digest {
    type Target = [u8; DIGEST_SIZE];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<[u8; DIGEST_SIZE]> for Digest {
    fn from(bytes: [u8; DIGEST_SIZE]) -> Self {
        Digest(bytes)
    }
}

impl TryFrom<&[u8]> for Digest {
    type Error = DigestError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != DIGEST_SIZE {
            return Err(DigestError::InvalidLength(bytes.len()));
        }
        let mut buff = [0; DIGEST_SIZE];
        buff.copy_from_slice(bytes);
        Ok(Digest(buff))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl Digest {
    /// Compute the content address of a byte string
    pub fn hash(data: &[u8]) -> Self {
        Digest(*blake3::hash(data).as_bytes())
    }

    /// Combine child digests into a parent digest
    ///
    /// The parent is the hash of the children's raw bytes concatenated in
    /// order. This is the node-combining rule of the Merkle DAG.
    pub fn combine<'a>(children: impl IntoIterator<Item = &'a Digest>) -> Self {
        let mut hasher = blake3::Hasher::new();
        for child in children {
            hasher.update(child.as_bytes());
        }
        Digest(*hasher.finalize().as_bytes())
    }

    /// Parse a digest from a hexadecimal string
    pub fn from_hex(hex: &str) -> Result<Self, DigestError> {
        let mut buff = [0; DIGEST_SIZE];
        hex::decode_to_slice(hex, &mut buff).map_err(|_| DigestError::InvalidHex)?;
        Ok(Digest(buff))
    }

    /// Convert digest to a hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Get a reference to the raw digest bytes
    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }
}
