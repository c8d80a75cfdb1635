//! upcheck: HTTP endpoint monitoring core
//!
//! Periodically probes tenant endpoints, keeps an incident ledger per alarm,
//! records latencies into day-partitioned storage and notifies tenants within
//! the limits of their subscription plan.
//!
//! # Features
//!
//! - **Idempotent checks**: a watermark claim makes concurrent triggers for the
//!   same cycle collapse into one
//! - **Incident ledger**: failures deduplicated per kind and code/message
//! - **Day partitions**: one result sub-table per UTC day, created ahead of
//!   midnight and rotated after the retention period
//! - **Metered notifications**: email, push and Slack, counted per tenant per
//!   month against the effective plan
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use upcheck::clock::{SharedClock, SystemClock};
//! use upcheck::storage::{Database, DayPartitionedStore, PartitionConfig, PartitionedAppendStore};
//!
//! let clock: SharedClock = Arc::new(SystemClock);
//! let db = Arc::new(Database::new());
//! let results = DayPartitionedStore::new(db, Arc::clone(&clock), PartitionConfig::default());
//!
//! results.ensure_for(clock.now()).unwrap();
//! let page = results.query(&Default::default()).unwrap();
//! println!("{} results", page.total);
//! ```

pub mod api;
pub mod checks;
pub mod clock;
pub mod config;
pub mod data;
pub mod incidents;
pub mod maintenance;
pub mod notify;
pub mod storage;

// Re-export commonly used types
pub use checks::{CheckError, CheckOrchestrator, CheckOutcome};
pub use config::ServiceConfig;
pub use data::{Alarm, AlarmState, CheckResult, Incident, IncidentType};
pub use storage::{Database, StorageError};
