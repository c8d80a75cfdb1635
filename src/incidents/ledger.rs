//! Per-alarm health state and open/resolved incident rows

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::clock::SharedClock;
use crate::data::{Alarm, AlarmId, AlarmState, Failure, Incident};
use crate::storage::{Database, StorageError, Transaction};

/// Records failures as incidents and resolves them on recovery.
///
/// The `*_in` functions run inside a caller's transaction and touch storage
/// only. The methods taking `&mut Alarm` run their own transaction and update
/// the in-memory alarm once it has committed.
#[derive(Clone)]
pub struct IncidentLedger {
    db: Arc<Database>,
    clock: SharedClock,
}

impl IncidentLedger {
    pub fn new(db: Arc<Database>, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    /// Move the alarm to ALARM and record `failure` unless an open incident
    /// already tracks it. Returns the incident if one was created.
    pub fn open_incident(
        &self,
        alarm: &mut Alarm,
        failure: &Failure,
    ) -> Result<Option<Incident>, StorageError> {
        let now = self.clock.now();
        let created = self
            .db
            .transaction(|tx| Self::open_in(tx, alarm.id, failure, now))?;

        alarm.state = AlarmState::Alarm;
        if let Some(incident) = &created {
            alarm.incidents.push(incident.clone());
        }
        Ok(created)
    }

    /// Move the alarm to OK and resolve everything open. Returns the
    /// incidents that were resolved.
    pub fn resolve_open_incidents(&self, alarm: &mut Alarm) -> Result<Vec<Incident>, StorageError> {
        let now = self.clock.now();
        let resolved = self
            .db
            .transaction(|tx| Self::resolve_in(tx, alarm.id, now))?;

        Self::apply_resolution(alarm, &resolved);
        Ok(resolved)
    }

    pub fn open_in(
        tx: &mut Transaction<'_>,
        alarm_id: AlarmId,
        failure: &Failure,
        now: DateTime<Utc>,
    ) -> Result<Option<Incident>, StorageError> {
        let mut row = tx
            .alarm(alarm_id)
            .cloned()
            .ok_or(StorageError::AlarmNotFound(alarm_id))?;

        if row.state != AlarmState::Alarm {
            row.state = AlarmState::Alarm;
            tx.put_alarm(row);
        }

        if tx.incidents_for(alarm_id).any(|i| i.tracks(failure)) {
            return Ok(None);
        }

        let id = tx.next_incident_id();
        let incident = Incident::from_failure(id, alarm_id, failure, now);
        tx.put_incident(incident.clone());
        Ok(Some(incident))
    }

    pub fn resolve_in(
        tx: &mut Transaction<'_>,
        alarm_id: AlarmId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Incident>, StorageError> {
        let mut row = tx
            .alarm(alarm_id)
            .cloned()
            .ok_or(StorageError::AlarmNotFound(alarm_id))?;

        if row.state != AlarmState::Ok {
            row.state = AlarmState::Ok;
            tx.put_alarm(row);
        }

        let open: Vec<Incident> = tx
            .incidents_for(alarm_id)
            .filter(|i| i.is_open())
            .cloned()
            .collect();

        let mut resolved = Vec::with_capacity(open.len());
        for mut incident in open {
            incident.resolved_at = Some(now);
            tx.put_incident(incident.clone());
            resolved.push(incident);
        }
        Ok(resolved)
    }

    /// Reflect a committed resolution on the in-memory alarm
    pub fn apply_resolution(alarm: &mut Alarm, resolved: &[Incident]) {
        alarm.state = AlarmState::Ok;
        for incident in alarm.incidents.iter_mut() {
            if let Some(done) = resolved.iter().find(|r| r.id == incident.id) {
                incident.resolved_at = done.resolved_at;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::data::IncidentType;
    use crate::storage::{AlarmRepository, IncidentScope};
    use chrono::{Duration, TimeZone};

    fn setup() -> (AlarmRepository, ManualClock, IncidentLedger, Alarm) {
        let db = Arc::new(Database::new());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 4, 2, 9, 0, 0).unwrap());
        let repo = AlarmRepository::new(Arc::clone(&db));
        repo.upsert(Alarm::new(1, 1, "http://a.test")).unwrap();
        let alarm = repo.find_alarm_by_id(1, IncidentScope::Unresolved).unwrap();
        let ledger = IncidentLedger::new(db, Arc::new(clock.clone()));
        (repo, clock, ledger, alarm)
    }

    #[test]
    fn test_open_moves_to_alarm() {
        let (repo, _, ledger, mut alarm) = setup();
        assert_eq!(alarm.state, AlarmState::InsufficientData);

        let created = ledger
            .open_incident(&mut alarm, &Failure::timeout("timed out"))
            .unwrap();
        assert!(created.is_some());
        assert_eq!(alarm.state, AlarmState::Alarm);
        assert_eq!(alarm.incidents.len(), 1);

        let stored = repo.find_alarm_by_id(1, IncidentScope::All).unwrap();
        assert_eq!(stored.state, AlarmState::Alarm);
        assert_eq!(stored.incidents[0].kind, IncidentType::Timeout);
    }

    #[test]
    fn test_dedup_by_type_and_discriminator() {
        let (repo, _, ledger, mut alarm) = setup();

        let first = ledger
            .open_incident(&mut alarm, &Failure::bad_code(500, None))
            .unwrap()
            .unwrap();
        assert!(ledger
            .open_incident(&mut alarm, &Failure::bad_code(500, None))
            .unwrap()
            .is_none());

        let open = repo.find_alarm_by_id(1, IncidentScope::Unresolved).unwrap();
        assert_eq!(open.incidents.len(), 1);
        assert_eq!(open.incidents[0].id, first.id);

        let second = ledger
            .open_incident(&mut alarm, &Failure::bad_code(404, None))
            .unwrap()
            .unwrap();
        assert_ne!(second.id, first.id);

        let open = repo.find_alarm_by_id(1, IncidentScope::Unresolved).unwrap();
        assert_eq!(open.incidents.len(), 2);
    }

    #[test]
    fn test_resolve_all_open() {
        let (repo, clock, ledger, mut alarm) = setup();
        ledger.open_incident(&mut alarm, &Failure::bad_code(500, None)).unwrap();
        ledger.open_incident(&mut alarm, &Failure::other("refused")).unwrap();
        ledger.open_incident(&mut alarm, &Failure::timeout("timed out")).unwrap();

        clock.advance(Duration::minutes(5));
        let resolved = ledger.resolve_open_incidents(&mut alarm).unwrap();
        assert_eq!(resolved.len(), 3);
        assert_eq!(alarm.state, AlarmState::Ok);
        assert!(alarm.incidents.iter().all(|i| i.resolved_at == Some(clock.now())));

        let stored = repo.find_alarm_by_id(1, IncidentScope::All).unwrap();
        assert_eq!(stored.state, AlarmState::Ok);
        assert!(stored.incidents.iter().all(|i| !i.is_open()));
    }

    #[test]
    fn test_failure_after_resolution_opens_new_incident() {
        let (repo, _, ledger, mut alarm) = setup();
        ledger.open_incident(&mut alarm, &Failure::bad_code(500, None)).unwrap();
        ledger.resolve_open_incidents(&mut alarm).unwrap();

        let again = ledger
            .open_incident(&mut alarm, &Failure::bad_code(500, None))
            .unwrap();
        assert!(again.is_some());

        let all = repo.find_alarm_by_id(1, IncidentScope::All).unwrap();
        assert_eq!(all.incidents.len(), 2);
    }

    #[test]
    fn test_storage_error_leaves_memory_untouched() {
        let (_, _, ledger, _) = setup();
        let mut ghost = Alarm::new(99, 1, "http://ghost.test");

        let result = ledger.open_incident(&mut ghost, &Failure::timeout("timed out"));
        assert!(matches!(result, Err(StorageError::AlarmNotFound(99))));
        assert_eq!(ghost.state, AlarmState::InsufficientData);
        assert!(ghost.incidents.is_empty());
    }
}
