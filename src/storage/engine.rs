use crate::data::{
    Alarm, AlarmId, CheckResult, CounterKey, Incident, IncidentId, NotificationCounter,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::ops::Deref;

/// Physical table holding one day of check results
#[derive(Debug, Clone)]
pub struct SubTable {
    pub name: String,
    /// Logical parent this table is attached to
    pub inherits: Option<String>,
    /// Range check on `timestamp`: start inclusive, end exclusive
    pub range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    rows: Vec<CheckResult>,
}

impl SubTable {
    fn new(name: String) -> Self {
        Self {
            name,
            inherits: None,
            range: None,
            rows: Vec::new(),
        }
    }

    pub fn rows(&self) -> &[CheckResult] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Whether the range check could admit anything in `[from, to)`
    pub fn overlaps(&self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> bool {
        let Some((start, end)) = self.range else {
            return true;
        };
        from.map_or(true, |from| from < end) && to.map_or(true, |to| to > start)
    }
}

/// Catalog row recording one physical sub-table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogEntry {
    pub parent: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Every persisted row, behind the database lock
#[derive(Debug, Default)]
pub struct Tables {
    alarms: BTreeMap<AlarmId, Alarm>,
    incidents: BTreeMap<IncidentId, Incident>,
    last_incident_id: IncidentId,
    sub_tables: BTreeMap<String, SubTable>,
    catalog: BTreeMap<String, CatalogEntry>,
    counters: HashMap<CounterKey, NotificationCounter>,
}

impl Tables {
    pub fn alarm(&self, id: AlarmId) -> Option<&Alarm> {
        self.alarms.get(&id)
    }

    /// Alarms ordered by id
    pub fn alarms(&self) -> impl Iterator<Item = &Alarm> {
        self.alarms.values()
    }

    pub fn incidents(&self) -> impl Iterator<Item = &Incident> {
        self.incidents.values()
    }

    pub fn incidents_for(&self, alarm_id: AlarmId) -> impl Iterator<Item = &Incident> {
        self.incidents.values().filter(move |i| i.alarm_id == alarm_id)
    }

    pub fn sub_table(&self, name: &str) -> Option<&SubTable> {
        self.sub_tables.get(name)
    }

    /// Tables attached to `parent`; reading these together is reading the parent
    pub fn children_of<'a>(&'a self, parent: &'a str) -> impl Iterator<Item = &'a SubTable> {
        self.sub_tables
            .values()
            .filter(move |t| t.inherits.as_deref() == Some(parent))
    }

    pub fn catalog(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.catalog.values()
    }

    pub fn catalog_entry(&self, name: &str) -> Option<&CatalogEntry> {
        self.catalog.get(name)
    }

    pub fn counter(&self, key: &CounterKey) -> Option<&NotificationCounter> {
        self.counters.get(key)
    }
}

enum Undo {
    Alarm(AlarmId, Option<Alarm>),
    Incident(IncidentId, Option<Incident>),
    LastIncidentId(IncidentId),
    SubTable(String, Option<SubTable>),
    RangeCheck(String, Option<(DateTime<Utc>, DateTime<Utc>)>),
    Inherit(String, Option<String>),
    Append(String),
    Catalog(String, Option<CatalogEntry>),
    Counter(CounterKey, Option<NotificationCounter>),
}

/// Write access to the tables. Holds the database lock until dropped;
/// every change is undone unless the enclosing closure returns `Ok`.
pub struct Transaction<'a> {
    tables: &'a mut Tables,
    undo: Vec<Undo>,
}

impl Deref for Transaction<'_> {
    type Target = Tables;

    fn deref(&self) -> &Tables {
        &*self.tables
    }
}

impl Transaction<'_> {
    pub fn put_alarm(&mut self, alarm: Alarm) {
        let id = alarm.id;
        let previous = self.tables.alarms.insert(id, alarm);
        self.undo.push(Undo::Alarm(id, previous));
    }

    /// Reserve the next incident id
    pub fn next_incident_id(&mut self) -> IncidentId {
        self.undo.push(Undo::LastIncidentId(self.tables.last_incident_id));
        self.tables.last_incident_id += 1;
        self.tables.last_incident_id
    }

    pub fn put_incident(&mut self, incident: Incident) {
        let id = incident.id;
        let previous = self.tables.incidents.insert(id, incident);
        self.undo.push(Undo::Incident(id, previous));
    }

    pub fn create_table(&mut self, name: &str) -> Result<(), StorageError> {
        if self.tables.sub_tables.contains_key(name) {
            return Err(StorageError::TableExists(name.to_string()));
        }
        self.tables
            .sub_tables
            .insert(name.to_string(), SubTable::new(name.to_string()));
        self.undo.push(Undo::SubTable(name.to_string(), None));
        Ok(())
    }

    /// Bound `timestamp` to `[start, end)`; existing rows must already comply
    pub fn add_range_check(
        &mut self,
        name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let table = self
            .tables
            .sub_tables
            .get_mut(name)
            .ok_or_else(|| StorageError::TableNotFound(name.to_string()))?;

        if let Some(row) = table
            .rows
            .iter()
            .find(|r| r.timestamp < start || r.timestamp >= end)
        {
            return Err(StorageError::ConstraintViolation {
                table: name.to_string(),
                timestamp: row.timestamp,
            });
        }

        let previous = table.range.replace((start, end));
        self.undo.push(Undo::RangeCheck(name.to_string(), previous));
        Ok(())
    }

    pub fn inherit(&mut self, name: &str, parent: &str) -> Result<(), StorageError> {
        let table = self
            .tables
            .sub_tables
            .get_mut(name)
            .ok_or_else(|| StorageError::TableNotFound(name.to_string()))?;
        let previous = table.inherits.replace(parent.to_string());
        self.undo.push(Undo::Inherit(name.to_string(), previous));
        Ok(())
    }

    pub fn drop_table(&mut self, name: &str) -> Result<(), StorageError> {
        let table = self
            .tables
            .sub_tables
            .remove(name)
            .ok_or_else(|| StorageError::TableNotFound(name.to_string()))?;
        self.undo.push(Undo::SubTable(name.to_string(), Some(table)));
        Ok(())
    }

    /// Append a row to a physical table, enforcing its range check
    pub fn append(&mut self, name: &str, row: CheckResult) -> Result<(), StorageError> {
        let table = self
            .tables
            .sub_tables
            .get_mut(name)
            .ok_or_else(|| StorageError::TableNotFound(name.to_string()))?;

        if let Some((start, end)) = table.range {
            if row.timestamp < start || row.timestamp >= end {
                return Err(StorageError::ConstraintViolation {
                    table: name.to_string(),
                    timestamp: row.timestamp,
                });
            }
        }

        table.rows.push(row);
        self.undo.push(Undo::Append(name.to_string()));
        Ok(())
    }

    pub fn put_catalog_entry(&mut self, entry: CatalogEntry) {
        let name = entry.name.clone();
        let previous = self.tables.catalog.insert(name.clone(), entry);
        self.undo.push(Undo::Catalog(name, previous));
    }

    pub fn remove_catalog_entry(&mut self, name: &str) -> Option<CatalogEntry> {
        let previous = self.tables.catalog.remove(name);
        if previous.is_some() {
            self.undo
                .push(Undo::Catalog(name.to_string(), previous.clone()));
        }
        previous
    }

    pub fn put_counter(&mut self, counter: NotificationCounter) {
        let key = counter.key;
        let previous = self.tables.counters.insert(key, counter);
        self.undo.push(Undo::Counter(key, previous));
    }

    fn rollback(&mut self) {
        while let Some(undo) = self.undo.pop() {
            let tables = &mut *self.tables;
            match undo {
                Undo::Alarm(id, previous) => restore(&mut tables.alarms, id, previous),
                Undo::Incident(id, previous) => restore(&mut tables.incidents, id, previous),
                Undo::LastIncidentId(id) => tables.last_incident_id = id,
                Undo::SubTable(name, previous) => restore(&mut tables.sub_tables, name, previous),
                Undo::RangeCheck(name, previous) => {
                    if let Some(table) = tables.sub_tables.get_mut(&name) {
                        table.range = previous;
                    }
                }
                Undo::Inherit(name, previous) => {
                    if let Some(table) = tables.sub_tables.get_mut(&name) {
                        table.inherits = previous;
                    }
                }
                Undo::Append(name) => {
                    if let Some(table) = tables.sub_tables.get_mut(&name) {
                        table.rows.pop();
                    }
                }
                Undo::Catalog(name, previous) => restore(&mut tables.catalog, name, previous),
                Undo::Counter(key, previous) => match previous {
                    Some(counter) => {
                        tables.counters.insert(key, counter);
                    }
                    None => {
                        tables.counters.remove(&key);
                    }
                },
            }
        }
    }
}

fn restore<K: Ord, V>(map: &mut BTreeMap<K, V>, key: K, previous: Option<V>) {
    match previous {
        Some(value) => {
            map.insert(key, value);
        }
        None => {
            map.remove(&key);
        }
    }
}

/// In-memory transactional store.
///
/// Transactions are serialized by a single lock, which also gives row-level
/// write serialization for alarm records.
#[derive(Debug, Default)]
pub struct Database {
    tables: Mutex<Tables>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` atomically: on `Err` every change it made is rolled back
    pub fn transaction<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, StorageError>,
    {
        let mut tables = self.tables.lock();
        let mut tx = Transaction {
            tables: &mut *tables,
            undo: Vec::new(),
        };

        match f(&mut tx) {
            Ok(value) => Ok(value),
            Err(e) => {
                tx.rollback();
                Err(e)
            }
        }
    }

    /// Consistent read-only view
    pub fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        let tables = self.tables.lock();
        f(&*tables)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Row at {timestamp} violates range check on '{table}'")]
    ConstraintViolation {
        table: String,
        timestamp: DateTime<Utc>,
    },

    #[error("Alarm {0} not found")]
    AlarmNotFound(AlarmId),
}
