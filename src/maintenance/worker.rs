use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

use crate::clock::SharedClock;
use crate::storage::{DayPartitionedStore, PartitionedAppendStore, StorageError};

/// Tables touched by one maintenance pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub created: Vec<String>,
    pub rotated: usize,
}

/// Periodically ensures upcoming partitions and rotates old ones
pub struct PartitionWorker {
    store: Arc<DayPartitionedStore>,
    clock: SharedClock,
    interval: Duration,
    running: Arc<AtomicBool>,
}

impl PartitionWorker {
    pub fn new(store: Arc<DayPartitionedStore>, clock: SharedClock, interval: Duration) -> Self {
        Self {
            store,
            clock,
            interval,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the background worker
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            tracing::info!("Partition worker started with interval {:?}", self.interval);

            let mut interval = time::interval(self.interval);

            while self.running.load(Ordering::SeqCst) {
                interval.tick().await;

                match run_maintenance(&self.store, &self.clock) {
                    Ok(report) => {
                        if !report.created.is_empty() || report.rotated > 0 {
                            tracing::info!(
                                created = ?report.created,
                                rotated = report.rotated,
                                "Partition maintenance"
                            );
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "Partition maintenance failed"),
                }
            }

            tracing::info!("Partition worker stopped");
        })
    }

    /// Stop the worker
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Run one maintenance pass
pub fn run_maintenance(
    store: &DayPartitionedStore,
    clock: &SharedClock,
) -> Result<MaintenanceReport, StorageError> {
    let created = store.ensure_for(clock.now())?;
    let rotated = store.rotate_older_than(store.config().retention)?;
    Ok(MaintenanceReport { created, rotated })
}
