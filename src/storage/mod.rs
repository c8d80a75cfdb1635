pub mod alarms;
pub mod counters;
pub mod engine;
pub mod partition;

pub use alarms::{AlarmRepository, Claim, IncidentScope};
pub use counters::CounterRepository;
pub use engine::{CatalogEntry, Database, StorageError, SubTable, Tables, Transaction};
pub use partition::{
    day_bounds, sub_table_name, DayPartitionedStore, PartitionConfig, PartitionedAppendStore,
};
