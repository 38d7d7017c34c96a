use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::sessions::SessionStore;

/// Handle to control and join the sweep task.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Request graceful shutdown and wait for the task to stop.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(j) = self.join.take() {
            let _ = j.await;
        }
    }
}

/// Periodically hard-deletes terminal and expired sessions.
///
/// Sweeping only removes rows that are already dead, so running it
/// concurrently with live traffic (or twice) is harmless. Failures are logged
/// and the next tick tries again.
#[derive(Debug)]
pub struct SessionSweeper;

impl SessionSweeper {
    /// Spawn the sweep loop on the current tokio runtime.
    ///
    /// The first sweep runs immediately, then once per `interval`.
    pub fn spawn(store: Arc<dyn SessionStore>, interval: Duration) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval_secs = interval.as_secs(), "session sweeper started");

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        match store.sweep().await {
                            Ok(0) => {}
                            Ok(count) => debug!(count, "session sweep removed records"),
                            Err(err) => warn!(error = %err, "session sweep failed; will retry"),
                        }
                    }
                }
            }

            info!("session sweeper stopped");
        });

        SweeperHandle {
            shutdown: Some(shutdown_tx),
            join: Some(join),
        }
    }
}
