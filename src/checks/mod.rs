//! Endpoint checks and the loop that schedules them

pub mod orchestrator;
pub mod prober;
pub mod scheduler;

pub use orchestrator::{CheckError, CheckOrchestrator, CheckOutcome};
pub use prober::{HttpProber, ProbeConfig, ProbeError, ProbeOutcome};
pub use scheduler::{CheckScheduler, TickSummary};
