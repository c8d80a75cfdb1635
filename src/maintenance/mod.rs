//! Partition upkeep: create upcoming day tables, drop expired ones

mod worker;

pub use worker::{run_maintenance, MaintenanceReport, PartitionWorker};
