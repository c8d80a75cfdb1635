//! Background loop that triggers checks for due alarms

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

use super::orchestrator::{CheckError, CheckOrchestrator};
use crate::clock::SharedClock;

/// Counts for one scheduler pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub due: usize,
    pub checked: usize,
    /// Lost the claim to another trigger
    pub skipped: usize,
    pub errors: usize,
}

/// Periodically selects due alarms and runs their checks concurrently
pub struct CheckScheduler {
    orchestrator: CheckOrchestrator,
    clock: SharedClock,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl CheckScheduler {
    pub fn new(orchestrator: CheckOrchestrator, clock: SharedClock) -> Self {
        Self {
            orchestrator,
            clock,
            shutdown_tx: None,
        }
    }

    /// Start the background loop
    pub fn start(&mut self, tick: Duration) -> tokio::task::JoinHandle<()> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let orchestrator = self.orchestrator.clone();
        let clock = self.clock.clone();

        tokio::spawn(async move {
            tracing::info!("Check scheduler started with tick {:?}", tick);
            let mut ticker = interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let summary = Self::run_due(&orchestrator, &clock).await;
                        if summary.due > 0 {
                            tracing::info!(
                                due = summary.due,
                                checked = summary.checked,
                                skipped = summary.skipped,
                                errors = summary.errors,
                                "Scheduler pass finished"
                            );
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Check scheduler shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Stop the background loop
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
    }

    /// One pass over the due alarms
    pub async fn run_once(&self) -> TickSummary {
        Self::run_due(&self.orchestrator, &self.clock).await
    }

    async fn run_due(orchestrator: &CheckOrchestrator, clock: &SharedClock) -> TickSummary {
        let due = orchestrator.alarms().alarms_due_for_check(clock.now());
        let mut summary = TickSummary {
            due: due.len(),
            ..TickSummary::default()
        };

        let checks = due.into_iter().map(|alarm| {
            let orchestrator = orchestrator.clone();
            async move {
                let result = orchestrator.check_alarm(alarm.id, alarm.watermark).await;
                (alarm.id, result)
            }
        });

        for (alarm_id, result) in futures::future::join_all(checks).await {
            match result {
                Ok(_) => summary.checked += 1,
                Err(CheckError::AlreadyTriggered { .. }) => summary.skipped += 1,
                Err(e) => {
                    tracing::error!(alarm_id, error = %e, "Check failed to complete");
                    summary.errors += 1;
                }
            }
        }
        summary
    }
}
