//! Day-partitioned, append-only result storage
//!
//! Each UTC day gets its own physical sub-table, range-checked to that day and
//! attached to a logical parent. Writers go straight to the day's table;
//! readers go through the parent and see every day at once. Retention drops
//! whole sub-tables instead of deleting rows.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use std::sync::Arc;

use super::engine::{CatalogEntry, Database, StorageError, Transaction};
use crate::clock::SharedClock;
use crate::data::{CheckResult, HistoryFilter, Page};

/// Storage that grows by appending into time partitions and shrinks by
/// dropping whole partitions
pub trait PartitionedAppendStore: Send + Sync {
    type Row;

    /// Make sure the partition for `day` exists. Returns `true` if it was created.
    fn ensure_partition(&self, day: NaiveDate) -> Result<bool, StorageError>;

    fn insert(&self, row: Self::Row) -> Result<(), StorageError>;

    /// Read across every partition
    fn query(&self, filter: &HistoryFilter) -> Result<Page<Self::Row>, StorageError>;

    /// Drop partitions created longer ago than `retention`. Returns how many went.
    fn rotate_older_than(&self, retention: Duration) -> Result<usize, StorageError>;
}

/// Partitioning settings
#[derive(Debug, Clone)]
pub struct PartitionConfig {
    /// Logical parent table name
    pub parent_table: String,
    /// How long before midnight tomorrow's sub-table is created
    pub lead_time: Duration,
    /// Age after which a sub-table is dropped
    pub retention: Duration,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            parent_table: "check_results".to_string(),
            lead_time: Duration::hours(1),
            retention: Duration::days(30),
        }
    }
}

impl PartitionConfig {
    pub fn new(parent_table: impl Into<String>) -> Self {
        Self {
            parent_table: parent_table.into(),
            ..Default::default()
        }
    }

    pub fn with_lead_time(mut self, lead_time: Duration) -> Self {
        self.lead_time = lead_time;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }
}

/// `{parent}_{YYYY}_{MM}_{DD}`
pub fn sub_table_name(parent: &str, day: NaiveDate) -> String {
    format!("{}_{}", parent, day.format("%Y_%m_%d"))
}

/// `[00:00, next 00:00)` of `day` in UTC
pub fn day_bounds(day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN));
    (start, start + Duration::days(1))
}

/// Result store backed by one physical table per UTC day
pub struct DayPartitionedStore {
    db: Arc<Database>,
    clock: SharedClock,
    config: PartitionConfig,
}

impl DayPartitionedStore {
    pub fn new(db: Arc<Database>, clock: SharedClock, config: PartitionConfig) -> Self {
        Self { db, clock, config }
    }

    pub fn config(&self) -> &PartitionConfig {
        &self.config
    }

    pub fn parent_table(&self) -> &str {
        &self.config.parent_table
    }

    /// Ensure today's sub-table and, inside the lead time before midnight,
    /// tomorrow's. Returns the names of tables created by this call.
    pub fn ensure_for(&self, now: DateTime<Utc>) -> Result<Vec<String>, StorageError> {
        let today = now.date_naive();
        let mut days = vec![today];

        let (_, midnight) = day_bounds(today);
        if midnight - now <= self.config.lead_time {
            if let Some(tomorrow) = today.succ_opt() {
                days.push(tomorrow);
            }
        }

        let mut created = Vec::new();
        for day in days {
            if self.ensure_partition(day)? {
                created.push(sub_table_name(&self.config.parent_table, day));
            }
        }
        Ok(created)
    }

    /// Append inside a caller's transaction, targeting the day's table directly
    pub fn append_in(&self, tx: &mut Transaction<'_>, row: CheckResult) -> Result<(), StorageError> {
        let table = sub_table_name(&self.config.parent_table, row.timestamp.date_naive());
        tx.append(&table, row)
    }

    /// Catalog rows for this parent, oldest first
    pub fn sub_tables(&self) -> Vec<CatalogEntry> {
        let parent = self.config.parent_table.as_str();
        let mut entries: Vec<CatalogEntry> = self.db.read(|tables| {
            tables
                .catalog()
                .filter(|e| e.parent == parent)
                .cloned()
                .collect()
        });
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        entries
    }

    fn create_sub_table(
        tx: &mut Transaction<'_>,
        parent: &str,
        name: &str,
        day: NaiveDate,
        created_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let (start, end) = day_bounds(day);
        tx.create_table(name)?;
        tx.add_range_check(name, start, end)?;
        tx.inherit(name, parent)?;
        tx.put_catalog_entry(CatalogEntry {
            parent: parent.to_string(),
            name: name.to_string(),
            created_at,
        });
        Ok(())
    }
}

impl PartitionedAppendStore for DayPartitionedStore {
    type Row = CheckResult;

    fn ensure_partition(&self, day: NaiveDate) -> Result<bool, StorageError> {
        let parent = self.config.parent_table.as_str();
        let name = sub_table_name(parent, day);
        let now = self.clock.now();

        let created = self.db.transaction(|tx| {
            if tx.sub_table(&name).is_some() {
                return Ok(false);
            }
            Self::create_sub_table(tx, parent, &name, day, now)?;
            Ok(true)
        })?;

        if created {
            tracing::info!(table = %name, parent = %parent, "Created result sub-table");
        }
        Ok(created)
    }

    fn insert(&self, row: CheckResult) -> Result<(), StorageError> {
        self.db.transaction(|tx| self.append_in(tx, row))
    }

    fn query(&self, filter: &HistoryFilter) -> Result<Page<CheckResult>, StorageError> {
        let parent = self.config.parent_table.as_str();
        let mut rows: Vec<CheckResult> = self.db.read(|tables| {
            tables
                .children_of(parent)
                .filter(|t| t.overlaps(filter.from, filter.to))
                .flat_map(|t| t.rows().iter())
                .filter(|r| filter.alarm_id.map_or(true, |id| r.alarm_id == id))
                .filter(|r| {
                    filter.user_id.map_or(true, |user_id| {
                        tables
                            .alarm(r.alarm_id)
                            .is_some_and(|alarm| alarm.user_id == user_id)
                    })
                })
                .filter(|r| filter.in_range(r.timestamp))
                .cloned()
                .collect()
        });

        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(a.alarm_id.cmp(&b.alarm_id)));
        Ok(Page::slice(rows, filter))
    }

    fn rotate_older_than(&self, retention: Duration) -> Result<usize, StorageError> {
        let cutoff = self.clock.now() - retention;
        let expired: Vec<CatalogEntry> = self
            .sub_tables()
            .into_iter()
            .filter(|e| e.created_at < cutoff)
            .collect();

        let mut dropped = 0;
        for entry in expired {
            self.db.transaction(|tx| {
                if tx.sub_table(&entry.name).is_some() {
                    tx.drop_table(&entry.name)?;
                }
                tx.remove_catalog_entry(&entry.name);
                Ok(())
            })?;

            tracing::info!(
                table = %entry.name,
                created_at = %entry.created_at,
                "Rotated result sub-table"
            );
            dropped += 1;
        }

        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::data::Alarm;
    use crate::storage::AlarmRepository;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn setup(start: DateTime<Utc>) -> (Arc<Database>, ManualClock, DayPartitionedStore) {
        let db = Arc::new(Database::new());
        let clock = ManualClock::new(start);
        let store = DayPartitionedStore::new(
            Arc::clone(&db),
            Arc::new(clock.clone()),
            PartitionConfig::new("results"),
        );
        (db, clock, store)
    }

    fn result(alarm_id: i64, timestamp: DateTime<Utc>) -> CheckResult {
        CheckResult {
            timestamp,
            alarm_id,
            latency_ns: 42_000,
        }
    }

    #[test]
    fn test_sub_table_name() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(sub_table_name("results", day), "results_2024_03_07");
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let now = at(2024, 3, 7, 10, 0);
        let (db, _, store) = setup(now);

        assert_eq!(store.ensure_for(now).unwrap(), vec!["results_2024_03_07".to_string()]);
        assert!(store.ensure_for(now).unwrap().is_empty());

        assert_eq!(store.sub_tables().len(), 1);
        db.read(|t| {
            let table = t.sub_table("results_2024_03_07").unwrap();
            assert_eq!(table.inherits.as_deref(), Some("results"));
            assert_eq!(table.range, Some(day_bounds(now.date_naive())));
        });
    }

    #[test]
    fn test_ensure_creates_tomorrow_within_lead_time() {
        let now = at(2024, 3, 7, 22, 59);
        let (_, _, store) = setup(now);
        assert_eq!(store.ensure_for(now).unwrap().len(), 1);

        let now = at(2024, 3, 7, 23, 0);
        let created = store.ensure_for(now).unwrap();
        assert_eq!(created, vec!["results_2024_03_08".to_string()]);
    }

    #[test]
    fn test_insert_lands_in_day_table() {
        let now = at(2024, 3, 7, 10, 0);
        let (db, _, store) = setup(now);
        store.ensure_for(now).unwrap();

        store.insert(result(1, now)).unwrap();
        assert_eq!(db.read(|t| t.sub_table("results_2024_03_07").unwrap().row_count()), 1);
    }

    #[test]
    fn test_insert_without_partition_fails() {
        let now = at(2024, 3, 7, 10, 0);
        let (_, _, store) = setup(now);
        assert!(matches!(
            store.insert(result(1, now)),
            Err(StorageError::TableNotFound(name)) if name == "results_2024_03_07"
        ));
    }

    #[test]
    fn test_range_check_rejects_foreign_day() {
        let now = at(2024, 3, 7, 10, 0);
        let (db, _, store) = setup(now);
        store.ensure_for(now).unwrap();

        let err = db
            .transaction(|tx| tx.append("results_2024_03_07", result(1, at(2024, 3, 8, 0, 0))))
            .unwrap_err();
        assert!(matches!(err, StorageError::ConstraintViolation { .. }));
    }

    #[test]
    fn test_query_spans_sub_tables() {
        let day1 = at(2024, 3, 7, 10, 0);
        let day2 = at(2024, 3, 8, 10, 0);
        let (db, clock, store) = setup(day1);
        store.ensure_for(day1).unwrap();
        clock.set(day2);
        store.ensure_for(day2).unwrap();

        let repo = AlarmRepository::new(Arc::clone(&db));
        repo.upsert(Alarm::new(1, 100, "http://a.test")).unwrap();
        repo.upsert(Alarm::new(2, 200, "http://b.test")).unwrap();

        store.insert(result(1, day1)).unwrap();
        store.insert(result(2, day1)).unwrap();
        store.insert(result(1, day2)).unwrap();

        let page = store.query(&HistoryFilter::default()).unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items[0].timestamp, day2);

        let page = store.query(&HistoryFilter::for_alarm(1)).unwrap();
        assert_eq!(page.total, 2);

        let page = store.query(&HistoryFilter::for_user(200)).unwrap();
        assert_eq!(page.total, 1);

        let (start, end) = day_bounds(day2.date_naive());
        let page = store
            .query(&HistoryFilter::default().between(start, end))
            .unwrap();
        assert_eq!(page.items, vec![result(1, day2)]);
    }

    #[test]
    fn test_rotation_respects_window() {
        let old_day = at(2024, 1, 1, 10, 0);
        let (db, clock, store) = setup(old_day);
        store.ensure_for(old_day).unwrap();
        store.insert(result(1, old_day)).unwrap();

        let recent = at(2024, 3, 1, 10, 0);
        clock.set(recent);
        store.ensure_for(recent).unwrap();

        clock.set(at(2024, 3, 5, 10, 0));
        let dropped = store.rotate_older_than(Duration::days(30)).unwrap();
        assert_eq!(dropped, 1);

        let names: Vec<String> = store.sub_tables().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["results_2024_03_01".to_string()]);
        db.read(|t| {
            assert!(t.sub_table("results_2024_01_01").is_none());
            assert!(t.catalog_entry("results_2024_01_01").is_none());
            assert!(t.sub_table("results_2024_03_01").is_some());
        });

        assert_eq!(store.rotate_older_than(Duration::days(30)).unwrap(), 0);
    }
}
