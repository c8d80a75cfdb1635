//! Incident notifications and the plan limits that meter them

pub mod directory;
pub mod dispatcher;
pub mod plans;
pub mod transports;

#[cfg(test)]
pub(crate) mod testing;

pub use directory::{
    ContactDirectory, Contacts, DirectoryError, InMemoryDirectory, SlackTarget,
    SubscriptionDirectory, Team, TeamDirectory,
};
pub use dispatcher::{
    Delivery, DispatchReport, IncidentEvent, NotificationDispatcher, NotifyConfig, Transports,
};
pub use plans::{validate_alarm_limits, LimitError, PlanResolver, PlanSource};
pub use transports::{
    EmailSender, LogEmailSender, LogPushPublisher, NotifierError, PushPublisher, SlackMessage,
    SlackPoster, SlackWebhookPoster,
};
