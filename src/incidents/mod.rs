//! Incident lifecycle for monitored alarms

pub mod ledger;

pub use ledger::IncidentLedger;
