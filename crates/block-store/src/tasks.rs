//! Handle for the engine's background tasks.

use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const FINAL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Owns the shutdown signal and join handles for every background loop
/// (rotation, healing, deletion timers, gossip).
///
/// All tasks share one parent `watch` channel; [`BackgroundTasks::stop`]
/// fires it and waits, bounded, for the loops to drain.
pub struct BackgroundTasks {
    shutdown_tx: watch::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundTasks {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(());
        Self {
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    /// A shutdown receiver for a new background task.
    pub fn subscribe(&self) -> watch::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Track a spawned task so shutdown waits for it.
    pub fn push(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    /// Signal shutdown and wait for every tracked task.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        if timeout(FINAL_SHUTDOWN_TIMEOUT, join_all(self.handles))
            .await
            .is_err()
        {
            tracing::error!(
                "background tasks failed to shut down within {} seconds",
                FINAL_SHUTDOWN_TIMEOUT.as_secs()
            );
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_stop_drains_tasks() {
        let mut tasks = BackgroundTasks::new();
        let mut shutdown = tasks.subscribe();
        tasks.push(tokio::spawn(async move {
            let _ = shutdown.changed().await;
        }));
        tasks.stop().await;
    }
}
