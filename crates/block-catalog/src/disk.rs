//! Durable catalog backend on redb.

use std::ops::ControlFlow;
use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};

use crate::error::CatalogError;
use crate::store::{Catalog, ReadTxn, WriteTxn};

const TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("blocks");

/// File-backed catalog.
///
/// A single ordered byte-keyed table holds every prefix partition. Commits
/// are durable: when [`Catalog::update`] returns `Ok` the entries have been
/// fsynced, which is what lets a successful PUT promise durability.
pub struct DiskCatalog {
    db: Database,
}

impl std::fmt::Debug for DiskCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCatalog").finish()
    }
}

impl DiskCatalog {
    /// Open or create a catalog at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Database::create(path)?;

        // make sure the table exists so read transactions never miss it
        let txn = db.begin_write()?;
        txn.open_table(TABLE)?;
        txn.commit()?;

        tracing::debug!(path = %path.display(), "opened block catalog");
        Ok(Self { db })
    }
}

struct DiskReadTxn {
    table: redb::ReadOnlyTable<&'static [u8], &'static [u8]>,
}

impl ReadTxn for DiskReadTxn {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, CatalogError> {
        Ok(self.table.get(key)?.map(|guard| guard.value().to_vec()))
    }
}

struct DiskWriteTxn<'a> {
    table: redb::Table<'a, &'static [u8], &'static [u8]>,
}

impl ReadTxn for DiskWriteTxn<'_> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, CatalogError> {
        Ok(self.table.get(key)?.map(|guard| guard.value().to_vec()))
    }
}

impl WriteTxn for DiskWriteTxn<'_> {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), CatalogError> {
        self.table.insert(key, value)?;
        Ok(())
    }

    fn remove(&mut self, key: &[u8]) -> Result<(), CatalogError> {
        self.table.remove(key)?;
        Ok(())
    }
}

impl Catalog for DiskCatalog {
    fn view<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&dyn ReadTxn) -> Result<R, E>,
        E: From<CatalogError>,
    {
        let txn = self.db.begin_read().map_err(CatalogError::from)?;
        let table = txn.open_table(TABLE).map_err(CatalogError::from)?;
        let read = DiskReadTxn { table };
        f(&read)
    }

    fn update<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut dyn WriteTxn) -> Result<R, E>,
        E: From<CatalogError>,
    {
        let txn = self.db.begin_write().map_err(CatalogError::from)?;
        let result = {
            let table = txn.open_table(TABLE).map_err(CatalogError::from)?;
            let mut write = DiskWriteTxn { table };
            f(&mut write)
        };
        match result {
            Ok(value) => {
                txn.commit().map_err(CatalogError::from)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort) = txn.abort() {
                    tracing::error!("failed to abort catalog transaction: {abort}");
                }
                Err(e)
            }
        }
    }

    fn iterate(
        &self,
        prefix: &[u8],
        f: &mut dyn FnMut(&[u8], &[u8]) -> ControlFlow<()>,
    ) -> Result<(), CatalogError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(TABLE)?;
        for entry in table.range(prefix..)? {
            let (key, value) = entry?;
            if !key.value().starts_with(prefix) {
                break;
            }
            if let ControlFlow::Break(()) = f(key.value(), value.value()) {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::TempDir;

    fn open_temp() -> (DiskCatalog, TempDir) {
        let dir = TempDir::new().unwrap();
        let catalog = DiskCatalog::open(dir.path().join("catalog.redb")).unwrap();
        (catalog, dir)
    }

    #[test]
    fn test_update_then_view() {
        let (catalog, _dir) = open_temp();

        catalog
            .update::<_, CatalogError, _>(|txn| {
                txn.put(b"data/abc", b"ciphertext")?;
                txn.put(b"key/abc", b"sealed")?;
                Ok(())
            })
            .unwrap();

        let value = catalog
            .view::<_, CatalogError, _>(|txn| txn.get(b"data/abc"))
            .unwrap();
        assert_eq!(value.as_deref(), Some(b"ciphertext".as_slice()));
    }

    #[test]
    fn test_failed_update_rolls_back() {
        let (catalog, _dir) = open_temp();

        let result = catalog.update::<(), CatalogError, _>(|txn| {
            txn.put(b"data/abc", b"ciphertext")?;
            Err(CatalogError::Record(serde_json::Error::io(
                std::io::Error::other("boom"),
            )))
        });
        assert!(result.is_err());

        let value = catalog
            .view::<_, CatalogError, _>(|txn| txn.get(b"data/abc"))
            .unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_iterate_respects_prefix_and_break() {
        let (catalog, _dir) = open_temp();

        catalog
            .update::<_, CatalogError, _>(|txn| {
                txn.put(b"meta/a", b"1")?;
                txn.put(b"meta/b", b"2")?;
                txn.put(b"meta/c", b"3")?;
                txn.put(b"quota/a", b"4")?;
                Ok(())
            })
            .unwrap();

        let mut seen = Vec::new();
        catalog
            .iterate(b"meta/", &mut |key, _| {
                seen.push(key.to_vec());
                if seen.len() == 2 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap();

        assert_eq!(seen, vec![b"meta/a".to_vec(), b"meta/b".to_vec()]);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.redb");

        {
            let catalog = DiskCatalog::open(&path).unwrap();
            catalog
                .update::<_, CatalogError, _>(|txn| txn.put(b"data/persist", b"bytes"))
                .unwrap();
        }

        let catalog = DiskCatalog::open(&path).unwrap();
        let value = catalog
            .view::<_, CatalogError, _>(|txn| txn.get(b"data/persist"))
            .unwrap();
        assert_eq!(value.as_deref(), Some(b"bytes".as_slice()));
    }
}
