pub mod alarm;
pub mod incident;
pub mod plan;
pub mod result;

pub use alarm::{Alarm, AlarmId, AlarmState, UserId};
pub use incident::{Discriminator, Failure, Incident, IncidentId, IncidentType};
pub use plan::{Channel, CounterKey, NotificationCounter, Plan};
pub use result::{CheckResult, HistoryFilter, Page};
