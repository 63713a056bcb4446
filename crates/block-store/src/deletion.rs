//! Deferred deletion with cancellation.
//!
//! A scheduled deletion sits in the pending set until its timer fires or
//! someone cancels it. Per digest the states are:
//! `Absent -> Pending (schedule) -> Purged (timer) | Absent (cancel)`,
//! and a second `schedule` while pending is rejected.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{oneshot, watch};

use common::digest::Digest;
use p2p::PendingDeletions;

use crate::error::StoreError;

type PendingMap = HashMap<Digest, oneshot::Sender<()>>;

/// Tracks pending deletions and arms their timers.
#[derive(Debug, Clone)]
pub struct DeletionManager {
    pending: Arc<Mutex<PendingMap>>,
    shutdown: watch::Receiver<()>,
}

impl DeletionManager {
    pub fn new(shutdown: watch::Receiver<()>) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            shutdown,
        }
    }

    fn lock(pending: &Mutex<PendingMap>) -> std::sync::MutexGuard<'_, PendingMap> {
        match pending.lock() {
            Ok(guard) => guard,
            Err(p) => p.into_inner(),
        }
    }

    /// Schedule `digest` for purging after `timeout`.
    ///
    /// `purge` runs on the timer task if the deletion is still pending when
    /// the timer fires. Returns [`StoreError::AlreadyPending`] if a
    /// deletion is already scheduled for this digest.
    pub fn schedule<F, Fut>(
        &self,
        digest: Digest,
        timeout: Duration,
        purge: F,
    ) -> Result<(), StoreError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), StoreError>> + Send,
    {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        {
            let mut pending = Self::lock(&self.pending);
            if pending.contains_key(&digest) {
                return Err(StoreError::AlreadyPending(digest));
            }
            pending.insert(digest, cancel_tx);
        }

        let pending = self.pending.clone();
        let mut shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    // cancel may have raced the timer: only purge if the
                    // digest is still ours to remove
                    let fire = Self::lock(&pending).remove(&digest).is_some();
                    if fire {
                        tracing::debug!(%digest, "deletion timer fired");
                        if let Err(e) = purge().await {
                            tracing::error!(%digest, "purge failed: {e}");
                        }
                    }
                }
                _ = cancel_rx => {
                    tracing::debug!(%digest, "deletion cancelled");
                }
                _ = shutdown.changed() => {
                    tracing::debug!(%digest, "deletion timer shutting down");
                }
            }
        });

        Ok(())
    }

    /// Cancel a pending deletion; no-op if none is pending.
    pub fn cancel(&self, digest: &Digest) {
        if let Some(cancel) = Self::lock(&self.pending).remove(digest) {
            let _ = cancel.send(());
        }
    }

    /// Synonym for [`DeletionManager::cancel`], used when another path has
    /// already completed the deletion.
    pub fn confirm(&self, digest: &Digest) {
        self.cancel(digest)
    }

    /// Whether a deletion is currently pending for `digest`.
    pub fn is_pending(&self, digest: &Digest) -> bool {
        Self::lock(&self.pending).contains_key(digest)
    }
}

impl PendingDeletions for DeletionManager {
    fn is_pending(&self, digest: &Digest) -> bool {
        DeletionManager::is_pending(self, digest)
    }
}
