//! The catalog abstraction: snapshot reads, atomic writes, prefix scans.

use std::ops::ControlFlow;

use crate::error::CatalogError;

/// A read-only snapshot transaction.
pub trait ReadTxn {
    /// Look up a single key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, CatalogError>;
}

/// A read-write transaction. Writes become visible atomically on commit.
pub trait WriteTxn: ReadTxn {
    /// Insert or overwrite a key.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), CatalogError>;
    /// Remove a key. Removing an absent key is a no-op.
    fn remove(&mut self, key: &[u8]) -> Result<(), CatalogError>;
}

/// A transactional, prefix-partitioned key-value catalog.
///
/// All writes that must be consistent (ciphertext + sealed key + metadata)
/// go through a single [`Catalog::update`]; any failure aborts the whole
/// transaction, so partial block records never hit disk.
pub trait Catalog: Send + Sync + 'static {
    /// Run `f` against a read-only snapshot.
    fn view<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&dyn ReadTxn) -> Result<R, E>,
        E: From<CatalogError>;

    /// Run `f` inside a read-write transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back when it returns `Err`.
    /// Closures should be side-effect-free so a conflict-retrying backend
    /// could re-run them.
    fn update<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut dyn WriteTxn) -> Result<R, E>,
        E: From<CatalogError>;

    /// Ordered scan of every key starting with `prefix` under a read
    /// snapshot. The callback may stop the scan early with
    /// [`ControlFlow::Break`]; resources are released on every exit path.
    fn iterate(
        &self,
        prefix: &[u8],
        f: &mut dyn FnMut(&[u8], &[u8]) -> ControlFlow<()>,
    ) -> Result<(), CatalogError>;
}
