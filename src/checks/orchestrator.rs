//! One idempotent check cycle: claim, probe, record, notify

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use super::prober::{HttpProber, ProbeOutcome};
use crate::clock::SharedClock;
use crate::data::{Alarm, AlarmId, CheckResult, IncidentType};
use crate::incidents::IncidentLedger;
use crate::notify::{IncidentEvent, NotificationDispatcher};
use crate::storage::{AlarmRepository, Claim, Database, DayPartitionedStore, StorageError};

/// What a completed check found
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckOutcome {
    Healthy {
        latency_ns: i64,
        /// Incidents closed by this check
        resolved: usize,
    },
    Failing {
        kind: IncidentType,
        /// False when an open incident already tracked this failure
        new_incident: bool,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("Alarm not found: {0}")]
    NotFound(AlarmId),

    #[error("Check already triggered for alarm {alarm_id}")]
    AlreadyTriggered {
        alarm_id: AlarmId,
        watermark: Option<DateTime<Utc>>,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Check task aborted: {0}")]
    Aborted(String),
}

/// Runs check cycles for alarms. Cheap to clone.
#[derive(Clone)]
pub struct CheckOrchestrator {
    db: Arc<Database>,
    alarms: AlarmRepository,
    ledger: IncidentLedger,
    results: Arc<DayPartitionedStore>,
    prober: HttpProber,
    dispatcher: NotificationDispatcher,
    clock: SharedClock,
}

impl CheckOrchestrator {
    pub fn new(
        db: Arc<Database>,
        results: Arc<DayPartitionedStore>,
        prober: HttpProber,
        dispatcher: NotificationDispatcher,
        clock: SharedClock,
    ) -> Self {
        Self {
            alarms: AlarmRepository::new(Arc::clone(&db)),
            ledger: IncidentLedger::new(Arc::clone(&db), Arc::clone(&clock)),
            db,
            results,
            prober,
            dispatcher,
            clock,
        }
    }

    pub fn alarms(&self) -> &AlarmRepository {
        &self.alarms
    }

    /// Run one check cycle for `alarm_id`.
    ///
    /// `expected_watermark` is the watermark the caller last saw. If the
    /// stored one is later, another caller already started this cycle and
    /// nothing happens. Once the claim commits the cycle runs on its own
    /// task, so it completes even if the caller goes away.
    pub async fn check_alarm(
        &self,
        alarm_id: AlarmId,
        expected_watermark: Option<DateTime<Utc>>,
    ) -> Result<CheckOutcome, CheckError> {
        let alarm = match self
            .alarms
            .claim_check(alarm_id, expected_watermark, self.clock.now())
        {
            Ok(Claim::Claimed(alarm)) => alarm,
            Ok(Claim::AlreadyTriggered { watermark }) => {
                tracing::debug!(alarm_id, "Check already triggered");
                return Err(CheckError::AlreadyTriggered {
                    alarm_id,
                    watermark,
                });
            }
            Err(StorageError::AlarmNotFound(id)) => return Err(CheckError::NotFound(id)),
            Err(e) => return Err(e.into()),
        };

        let this = self.clone();
        tokio::spawn(async move { this.run_claimed(alarm).await })
            .await
            .map_err(|e| CheckError::Aborted(e.to_string()))?
    }

    async fn run_claimed(&self, mut alarm: Alarm) -> Result<CheckOutcome, CheckError> {
        match self
            .prober
            .probe(&alarm.endpoint_url, alarm.expected_status)
            .await
        {
            ProbeOutcome::Failure(failure) => {
                tracing::warn!(
                    alarm_id = alarm.id,
                    url = %alarm.endpoint_url,
                    kind = %failure.kind,
                    http_code = ?failure.http_code,
                    error = ?failure.error,
                    "Check failed"
                );

                let created = self.ledger.open_incident(&mut alarm, &failure)?;
                let new_incident = created.is_some();
                if let Some(incident) = created {
                    self.dispatcher
                        .dispatch(&alarm, &IncidentEvent::Opened(incident))
                        .await;
                }

                Ok(CheckOutcome::Failing {
                    kind: failure.kind,
                    new_incident,
                })
            }
            ProbeOutcome::Success { status, latency } => {
                let finished = self.clock.now();
                let latency_ns = i64::try_from(latency.as_nanos()).unwrap_or(i64::MAX);
                let row = CheckResult {
                    timestamp: finished,
                    alarm_id: alarm.id,
                    latency_ns,
                };

                let results = &self.results;
                let resolved = self.db.transaction(|tx| {
                    let resolved = IncidentLedger::resolve_in(tx, row.alarm_id, finished)?;
                    results.append_in(tx, row)?;
                    Ok(resolved)
                })?;
                IncidentLedger::apply_resolution(&mut alarm, &resolved);

                tracing::debug!(alarm_id = alarm.id, status, latency_ns, "Check passed");

                if !resolved.is_empty() {
                    tracing::info!(
                        alarm_id = alarm.id,
                        resolved = resolved.len(),
                        "Alarm recovered"
                    );
                    self.dispatcher
                        .dispatch(&alarm, &IncidentEvent::Resolved(resolved.clone()))
                        .await;
                }

                Ok(CheckOutcome::Healthy {
                    latency_ns,
                    resolved: resolved.len(),
                })
            }
        }
    }
}
