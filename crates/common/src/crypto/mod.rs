//! Cryptography for the block store.
//!
//! Three layers stack on top of each other, smallest scope first:
//!
//! - [`Secret`] — a fresh 256-bit ChaCha20-Poly1305 key encrypts each
//!   block. No two blocks share key material, so leaking one block key
//!   exposes one block, and rotating the recipient key never has to touch
//!   ciphertext.
//! - [`SealedKey`] — every block secret is stored next to its ciphertext,
//!   wrapped for the recipient keypair: a throwaway X25519 agreement feeds
//!   AES Key Wrap. One private key opens the whole catalog; losing a
//!   single envelope loses a single block.
//! - [`KeyManager`] — owns the recipient keypair. On a timer it swaps in a
//!   fresh pair and drives the pass that rewrites every stored envelope to
//!   the new epoch; while a failed pass is being recovered, reads fall back
//!   to the retained previous key.
//!
//! [`SecretKey`]/[`PublicKey`] are plain Ed25519, persisted as PEM, with
//! the Edwards-to-Montgomery conversion the sealing layer needs.

mod keys;
mod manager;
mod sealed;
mod secret;

pub use keys::{KeyError, PublicKey, SecretKey, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE};
pub use manager::{CryptoError, KeyManager, DEFAULT_ROTATION_INTERVAL};
pub use sealed::{SealedKey, SealedKeyError, SEALED_KEY_SIZE};
pub use secret::{Secret, SecretError, NONCE_SIZE, SECRET_SIZE};
