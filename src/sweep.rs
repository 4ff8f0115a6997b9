use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::auto_executor::AutoExecutor;
use crate::config::SettingsHandle;
use crate::market_data::SnapshotProvider;
use crate::persistence::store::PersistenceStore;
use crate::selection::SelectionEngine;

/// Fixed-cadence sweep scheduler: periodic, non-overlapping sweeps, not
/// reactive streaming. Each cycle runs the pending-plan sweep, then one
/// selection sweep per tracked symbol; per-symbol sweeps run concurrently
/// (no shared mutable state across symbols beyond the internally
/// synchronized cache and ledger).
///
/// Shutdown is cooperative at the sweep boundary: a sweep in progress runs
/// to completion, no new sweep starts after the signal.
pub struct SweepScheduler {
    selection: Arc<SelectionEngine>,
    executor: Arc<AutoExecutor>,
    snapshots: Arc<dyn SnapshotProvider>,
    store: Arc<PersistenceStore>,
    settings: Arc<SettingsHandle>,
}

impl SweepScheduler {
    pub fn new(
        selection: Arc<SelectionEngine>,
        executor: Arc<AutoExecutor>,
        snapshots: Arc<dyn SnapshotProvider>,
        store: Arc<PersistenceStore>,
        settings: Arc<SettingsHandle>,
    ) -> Self {
        Self {
            selection,
            executor,
            snapshots,
            store,
            settings,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("🔁 Sweep scheduler started");
        loop {
            // Interval re-read each cycle so a settings reload takes effect
            // without restart.
            let interval =
                Duration::from_secs(self.settings.current().engine.poll_interval_secs.max(1));
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.sweep_once().await;
                }
                changed = shutdown.changed() => {
                    match changed {
                        Ok(()) if *shutdown.borrow() => {
                            info!("Shutdown signal received, no further sweeps");
                            break;
                        }
                        Ok(()) => {}
                        // Sender dropped: treat as shutdown rather than
                        // re-polling a closed channel every iteration.
                        Err(_) => {
                            warn!("Shutdown channel closed, stopping sweeps");
                            break;
                        }
                    }
                }
            }
        }
        info!("Sweep scheduler stopped");
    }

    /// One full cycle. Within one symbol, detection strictly precedes
    /// selection and selection precedes persistence.
    pub async fn sweep_once(&self) {
        self.executor.sweep().await;

        let symbols = self.settings.current().engine.symbols;
        if symbols.is_empty() {
            debug!("No symbols configured, selection sweep skipped");
            return;
        }

        let tasks = symbols.into_iter().map(|symbol| {
            let selection = self.selection.clone();
            let snapshots = self.snapshots.clone();
            let store = self.store.clone();
            tokio::spawn(async move {
                let Some(snapshot) = snapshots.snapshot(&symbol).await else {
                    debug!(symbol, "No snapshot this cycle, symbol skipped");
                    return;
                };
                if let Some(plan) = selection.select(&snapshot).await {
                    if let Err(e) = store.save_plan(&plan) {
                        warn!(symbol, plan_id = %plan.plan_id, error = %e,
                              "Failed to persist drafted plan");
                    }
                }
            })
        });
        join_all(tasks).await;
    }
}
