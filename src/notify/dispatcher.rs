//! Rate-limited incident notifications over email, push and Slack

use std::sync::Arc;

use super::directory::{ContactDirectory, Contacts};
use super::plans::PlanResolver;
use super::transports::{EmailSender, PushPublisher, SlackMessage, SlackPoster};
use crate::clock::SharedClock;
use crate::data::{Alarm, Channel, CounterKey, Incident, Plan};
use crate::storage::CounterRepository;

/// Sender identity used on outgoing notifications
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub email_from: String,
    pub slack_username: String,
    pub slack_emoji: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            email_from: "alerts@upcheck.local".to_string(),
            slack_username: "upcheck".to_string(),
            slack_emoji: ":rotating_light:".to_string(),
        }
    }
}

/// Incident transition worth telling the tenant about
#[derive(Debug, Clone)]
pub enum IncidentEvent {
    Opened(Incident),
    Resolved(Vec<Incident>),
}

/// What happened on one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    Sent,
    QuotaExceeded,
    /// Plan does not include this channel
    Disabled,
    #[default]
    NoRecipient,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchReport {
    pub email: Delivery,
    pub push: Delivery,
    pub slack: Delivery,
}

/// Transport set used by the dispatcher
#[derive(Clone)]
pub struct Transports {
    pub email: Arc<dyn EmailSender>,
    pub push: Arc<dyn PushPublisher>,
    pub slack: Arc<dyn SlackPoster>,
}

/// Sends notifications for incident transitions.
///
/// Everything here is best effort: failures are logged and reported in the
/// `DispatchReport`, never returned as errors.
#[derive(Clone)]
pub struct NotificationDispatcher {
    plans: PlanResolver,
    contacts: Arc<dyn ContactDirectory>,
    counters: CounterRepository,
    transports: Transports,
    clock: SharedClock,
    config: NotifyConfig,
}

impl NotificationDispatcher {
    pub fn new(
        plans: PlanResolver,
        contacts: Arc<dyn ContactDirectory>,
        counters: CounterRepository,
        transports: Transports,
        clock: SharedClock,
        config: NotifyConfig,
    ) -> Self {
        Self {
            plans,
            contacts,
            counters,
            transports,
            clock,
            config,
        }
    }

    pub async fn dispatch(&self, alarm: &Alarm, event: &IncidentEvent) -> DispatchReport {
        let plan = self.plans.effective_plan(alarm.user_id).await;
        let contacts = match self.contacts.contacts_for(alarm.user_id).await {
            Ok(contacts) => contacts,
            Err(e) => {
                tracing::warn!(
                    alarm_id = alarm.id,
                    user_id = alarm.user_id,
                    error = %e,
                    "Contact lookup failed"
                );
                Contacts::default()
            }
        };

        let key = CounterKey::for_month(alarm.user_id, self.clock.now());
        let (subject, body) = render(alarm, event);

        let report = DispatchReport {
            email: self.send_email(alarm, &plan, &contacts, key, &subject, &body).await,
            push: self.send_push(alarm, &plan, &contacts, key, &subject).await,
            slack: self.send_slack(alarm, &plan, &contacts, key, &body).await,
        };

        tracing::debug!(alarm_id = alarm.id, report = ?report, "Notifications dispatched");
        report
    }

    async fn send_email(
        &self,
        alarm: &Alarm,
        plan: &Plan,
        contacts: &Contacts,
        key: CounterKey,
        subject: &str,
        body: &str,
    ) -> Delivery {
        let Some(address) = contacts.email.clone() else {
            return Delivery::NoRecipient;
        };
        if let Some(gate) = self.quota_gate(alarm, plan, key, Channel::Email) {
            return gate;
        }

        let recipients = vec![address];
        match self
            .transports
            .email
            .send(subject, &recipients, &self.config.email_from, body)
            .await
        {
            Ok(()) => self.record(alarm, key, Channel::Email),
            Err(e) => {
                tracing::error!(alarm_id = alarm.id, error = %e, "Failed to send email notification");
                Delivery::Failed
            }
        }
    }

    async fn send_push(
        &self,
        alarm: &Alarm,
        plan: &Plan,
        contacts: &Contacts,
        key: CounterKey,
        message: &str,
    ) -> Delivery {
        if contacts.push_endpoints.is_empty() {
            return Delivery::NoRecipient;
        }
        if let Some(gate) = self.quota_gate(alarm, plan, key, Channel::Push) {
            return gate;
        }

        let mut delivered = false;
        for endpoint in &contacts.push_endpoints {
            match self.transports.push.publish(endpoint, message).await {
                Ok(()) => delivered = true,
                Err(e) => tracing::error!(
                    alarm_id = alarm.id,
                    endpoint = %endpoint,
                    error = %e,
                    "Failed to publish push notification"
                ),
            }
        }

        if delivered {
            self.record(alarm, key, Channel::Push)
        } else {
            Delivery::Failed
        }
    }

    async fn send_slack(
        &self,
        alarm: &Alarm,
        plan: &Plan,
        contacts: &Contacts,
        key: CounterKey,
        text: &str,
    ) -> Delivery {
        if !plan.slack_alerts {
            return Delivery::Disabled;
        }
        let Some(target) = &contacts.slack else {
            return Delivery::NoRecipient;
        };

        let message = SlackMessage {
            webhook_url: target.webhook_url.clone(),
            channel: target.channel.clone(),
            username: self.config.slack_username.clone(),
            emoji: self.config.slack_emoji.clone(),
            text: text.to_string(),
        };

        match self.transports.slack.post(&message).await {
            Ok(()) => self.record(alarm, key, Channel::Slack),
            Err(e) => {
                tracing::error!(alarm_id = alarm.id, error = %e, "Failed to post Slack notification");
                Delivery::Failed
            }
        }
    }

    /// `Some(outcome)` if the channel must not be used this time.
    ///
    /// The comparison is strictly greater-than, so one send past the nominal
    /// allowance still goes out before suppression starts.
    fn quota_gate(&self, alarm: &Alarm, plan: &Plan, key: CounterKey, channel: Channel) -> Option<Delivery> {
        let counter = match self.counters.fetch_or_create(key) {
            Ok(counter) => counter,
            Err(e) => {
                tracing::error!(alarm_id = alarm.id, error = %e, "Failed to load notification counter");
                return Some(Delivery::Failed);
            }
        };

        if !plan.unlimited_emails && counter.get(channel) > plan.max_emails_per_interval {
            tracing::info!(
                alarm_id = alarm.id,
                user_id = alarm.user_id,
                channel = ?channel,
                sent = counter.get(channel),
                limit = plan.max_emails_per_interval,
                "Notification quota exceeded, skipping"
            );
            return Some(Delivery::QuotaExceeded);
        }
        None
    }

    fn record(&self, alarm: &Alarm, key: CounterKey, channel: Channel) -> Delivery {
        if let Err(e) = self.counters.increment(key, channel) {
            tracing::error!(
                alarm_id = alarm.id,
                channel = ?channel,
                error = %e,
                "Failed to increment notification counter"
            );
        }
        Delivery::Sent
    }
}

fn render(alarm: &Alarm, event: &IncidentEvent) -> (String, String) {
    match event {
        IncidentEvent::Opened(incident) => {
            let detail = describe(incident);
            (
                format!("[upcheck] {} is down ({})", alarm.endpoint_url, detail),
                format!(
                    "Alarm {} for {} opened a {} incident at {}: {}",
                    alarm.id,
                    alarm.endpoint_url,
                    incident.kind,
                    incident.created_at.to_rfc3339(),
                    detail
                ),
            )
        }
        IncidentEvent::Resolved(incidents) => (
            format!("[upcheck] {} is back up", alarm.endpoint_url),
            format!(
                "Alarm {} for {} recovered; {} incident(s) resolved",
                alarm.id,
                alarm.endpoint_url,
                incidents.len()
            ),
        ),
    }
}

fn describe(incident: &Incident) -> String {
    match (incident.http_code, incident.error.as_deref()) {
        (Some(code), _) => format!("{} {}", incident.kind, code),
        (None, Some(error)) => format!("{}: {}", incident.kind, error),
        (None, None) => incident.kind.to_string(),
    }
}
