//! In-memory catalog backend.
//!
//! Useful for unit testing and for embedding the engine without touching
//! disk. All data is lost when the catalog is dropped.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::Mutex;

use crate::error::CatalogError;
use crate::store::{Catalog, ReadTxn, WriteTxn};

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

/// Catalog backed by an ordered map behind a mutex.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    map: Mutex<Map>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Map> {
        match self.map.lock() {
            Ok(guard) => guard,
            Err(p) => p.into_inner(),
        }
    }
}

struct MemoryReadTxn<'a> {
    map: &'a Map,
}

impl ReadTxn for MemoryReadTxn<'_> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, CatalogError> {
        Ok(self.map.get(key).cloned())
    }
}

struct MemoryWriteTxn {
    map: Map,
}

impl ReadTxn for MemoryWriteTxn {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, CatalogError> {
        Ok(self.map.get(key).cloned())
    }
}

impl WriteTxn for MemoryWriteTxn {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), CatalogError> {
        self.map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn remove(&mut self, key: &[u8]) -> Result<(), CatalogError> {
        self.map.remove(key);
        Ok(())
    }
}

impl Catalog for MemoryCatalog {
    fn view<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&dyn ReadTxn) -> Result<R, E>,
        E: From<CatalogError>,
    {
        let guard = self.lock();
        let read = MemoryReadTxn { map: &guard };
        f(&read)
    }

    fn update<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut dyn WriteTxn) -> Result<R, E>,
        E: From<CatalogError>,
    {
        // work on a copy so an Err from the closure rolls back cleanly
        let mut guard = self.lock();
        let mut write = MemoryWriteTxn { map: guard.clone() };
        let value = f(&mut write)?;
        *guard = write.map;
        Ok(value)
    }

    fn iterate(
        &self,
        prefix: &[u8],
        f: &mut dyn FnMut(&[u8], &[u8]) -> ControlFlow<()>,
    ) -> Result<(), CatalogError> {
        let guard = self.lock();
        for (key, value) in guard.range(prefix.to_vec()..) {
            if !key.starts_with(prefix) {
                break;
            }
            if let ControlFlow::Break(()) = f(key, value) {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_rollback_on_error() {
        let catalog = MemoryCatalog::new();

        catalog
            .update::<_, CatalogError, _>(|txn| txn.put(b"meta/x", b"keep"))
            .unwrap();

        let result = catalog.update::<(), CatalogError, _>(|txn| {
            txn.put(b"meta/x", b"discard")?;
            txn.put(b"meta/y", b"discard")?;
            Err(CatalogError::Record(serde_json::Error::io(
                std::io::Error::other("boom"),
            )))
        });
        assert!(result.is_err());

        catalog
            .view::<_, CatalogError, _>(|txn| {
                assert_eq!(txn.get(b"meta/x")?.as_deref(), Some(b"keep".as_slice()));
                assert_eq!(txn.get(b"meta/y")?, None);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_iterate_is_ordered() {
        let catalog = MemoryCatalog::new();
        catalog
            .update::<_, CatalogError, _>(|txn| {
                txn.put(b"meta/c", b"")?;
                txn.put(b"meta/a", b"")?;
                txn.put(b"meta/b", b"")?;
                Ok(())
            })
            .unwrap();

        let mut keys = Vec::new();
        catalog
            .iterate(b"meta/", &mut |key, _| {
                keys.push(key.to_vec());
                ControlFlow::Continue(())
            })
            .unwrap();

        assert_eq!(keys, vec![b"meta/a".to_vec(), b"meta/b".to_vec(), b"meta/c".to_vec()]);
    }
}
