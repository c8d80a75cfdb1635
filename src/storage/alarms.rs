//! Alarm rows: due-for-check selection, watermark claims and incident listings

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;

use super::engine::{Database, StorageError, Tables};
use crate::data::{Alarm, AlarmId, HistoryFilter, Incident, Page};

/// Which incidents to load alongside an alarm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentScope {
    /// Alarm row only
    #[default]
    None,
    /// Only incidents without `resolved_at`
    Unresolved,
    /// Every incident ever recorded for the alarm
    All,
}

/// Outcome of trying to start a check cycle
#[derive(Debug, Clone)]
pub enum Claim {
    /// Watermark stamped; the alarm is returned with unresolved incidents loaded
    Claimed(Alarm),
    /// Someone else already started this cycle
    AlreadyTriggered { watermark: Option<DateTime<Utc>> },
}

#[derive(Debug, Clone)]
pub struct AlarmRepository {
    db: Arc<Database>,
}

impl AlarmRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or replace an alarm row. Alarm CRUD proper lives outside this
    /// crate; this is how rows get here.
    pub fn upsert(&self, mut alarm: Alarm) -> Result<(), StorageError> {
        alarm.incidents.clear();
        self.db.transaction(|tx| {
            tx.put_alarm(alarm);
            Ok(())
        })
    }

    pub fn find_alarm_by_id(
        &self,
        id: AlarmId,
        scope: IncidentScope,
    ) -> Result<Alarm, StorageError> {
        self.db.read(|tables| {
            tables
                .alarm(id)
                .map(|alarm| with_incidents(tables, alarm, scope))
                .ok_or(StorageError::AlarmNotFound(id))
        })
    }

    /// Active alarms never checked or whose interval has elapsed, ordered by id
    pub fn alarms_due_for_check(&self, now: DateTime<Utc>) -> Vec<Alarm> {
        self.db.read(|tables| {
            tables
                .alarms()
                .filter(|alarm| alarm.is_due(now))
                .cloned()
                .collect()
        })
    }

    /// Idempotency guard plus watermark stamp, as one atomic step.
    ///
    /// Fails the claim if the stored watermark is strictly after `expected`.
    /// Otherwise the watermark moves to `now`. If the stored one is already at
    /// or past `now` it moves one nanosecond forward instead, so the next
    /// caller holding the same `expected` is always rejected.
    pub fn claim_check(
        &self,
        id: AlarmId,
        expected: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Claim, StorageError> {
        self.db.transaction(|tx| {
            let mut alarm = tx.alarm(id).cloned().ok_or(StorageError::AlarmNotFound(id))?;

            if alarm.watermark > expected {
                return Ok(Claim::AlreadyTriggered {
                    watermark: alarm.watermark,
                });
            }

            alarm.watermark = Some(next_watermark(alarm.watermark, now));
            tx.put_alarm(alarm.clone());

            Ok(Claim::Claimed(with_incidents(
                &**tx,
                &alarm,
                IncidentScope::Unresolved,
            )))
        })
    }

    /// Incidents matching the filter, newest first
    pub fn incidents(&self, filter: &HistoryFilter) -> Page<Incident> {
        let mut matched: Vec<Incident> = self.db.read(|tables| {
            tables
                .incidents()
                .filter(|i| filter.alarm_id.map_or(true, |id| i.alarm_id == id))
                .filter(|i| {
                    filter.user_id.map_or(true, |user_id| {
                        tables
                            .alarm(i.alarm_id)
                            .is_some_and(|alarm| alarm.user_id == user_id)
                    })
                })
                .filter(|i| filter.in_range(i.created_at))
                .cloned()
                .collect()
        });

        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Page::slice(matched, filter)
    }
}

fn next_watermark(stored: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match stored {
        Some(stored) if stored >= now => stored
            .checked_add_signed(Duration::nanoseconds(1))
            .unwrap_or(stored),
        _ => now,
    }
}

fn with_incidents(tables: &Tables, alarm: &Alarm, scope: IncidentScope) -> Alarm {
    let mut loaded = alarm.clone();
    loaded.incidents = match scope {
        IncidentScope::None => Vec::new(),
        IncidentScope::Unresolved => tables
            .incidents_for(alarm.id)
            .filter(|i| i.is_open())
            .cloned()
            .collect(),
        IncidentScope::All => tables.incidents_for(alarm.id).cloned().collect(),
    };
    loaded
}
