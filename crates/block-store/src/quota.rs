//! Per-principal quota accounting.
//!
//! Two 8-byte big-endian counters per principal: `quota/<principal>` is the
//! limit, `usage/<principal>` the bytes reserved so far. The check and the
//! reservation happen inside one catalog transaction, so two concurrent
//! writers cannot both squeeze through the same remaining headroom.

use std::sync::Arc;

use block_catalog::keys::{quota_key, usage_key};
use block_catalog::{read_u64, write_u64, Catalog, CatalogError};

use crate::error::StoreError;

/// Historic default limit for principals without an explicit quota: 1 GiB
pub const DEFAULT_QUOTA_BYTES: u64 = 1024 * 1024 * 1024;

/// The quota accountant.
pub struct QuotaAccountant<C> {
    catalog: Arc<C>,
    default_quota: u64,
}

impl<C> Clone for QuotaAccountant<C> {
    fn clone(&self) -> Self {
        Self {
            catalog: self.catalog.clone(),
            default_quota: self.default_quota,
        }
    }
}

impl<C: Catalog> QuotaAccountant<C> {
    pub fn new(catalog: Arc<C>, default_quota: u64) -> Self {
        Self {
            catalog,
            default_quota,
        }
    }

    /// Atomically reserve `n` bytes for `principal`.
    ///
    /// Refuses with [`StoreError::QuotaExceeded`] when the reservation
    /// would push usage past the limit; nothing is written in that case.
    pub fn check_and_reserve(&self, principal: &str, n: u64) -> Result<(), StoreError> {
        let default_quota = self.default_quota;
        self.catalog.update::<_, StoreError, _>(|txn| {
            let quota = read_u64(txn, &quota_key(principal))?.unwrap_or(default_quota);
            let usage = read_u64(txn, &usage_key(principal))?.unwrap_or(0);

            let projected = usage
                .checked_add(n)
                .ok_or_else(|| StoreError::QuotaExceeded(principal.to_string()))?;
            if projected > quota {
                return Err(StoreError::QuotaExceeded(principal.to_string()));
            }

            write_u64(txn, &usage_key(principal), projected)?;
            Ok(())
        })
    }

    /// Return `n` previously reserved bytes, saturating at zero.
    ///
    /// Called when a write fails after reserving, and when a block is
    /// physically purged.
    pub fn release(&self, principal: &str, n: u64) -> Result<(), StoreError> {
        self.catalog.update::<_, CatalogError, _>(|txn| {
            let usage = read_u64(txn, &usage_key(principal))?.unwrap_or(0);
            write_u64(txn, &usage_key(principal), usage.saturating_sub(n))
        })?;
        Ok(())
    }

    /// Bytes currently reserved by `principal`.
    pub fn usage(&self, principal: &str) -> Result<u64, StoreError> {
        let usage = self
            .catalog
            .view::<_, CatalogError, _>(|txn| read_u64(txn, &usage_key(principal)))?;
        Ok(usage.unwrap_or(0))
    }

    /// The principal's limit in bytes.
    pub fn get_quota(&self, principal: &str) -> Result<u64, StoreError> {
        let quota = self
            .catalog
            .view::<_, CatalogError, _>(|txn| read_u64(txn, &quota_key(principal)))?;
        Ok(quota.unwrap_or(self.default_quota))
    }

    /// Set the principal's limit.
    ///
    /// Lowering it below current usage is allowed: existing data stays, but
    /// further reservations fail until usage drops.
    pub fn set_quota(&self, principal: &str, n: u64) -> Result<(), StoreError> {
        self.catalog
            .update::<_, CatalogError, _>(|txn| write_u64(txn, &quota_key(principal), n))?;
        Ok(())
    }
}
