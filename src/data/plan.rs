//! Subscription plan limits and monthly notification counters

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use super::alarm::UserId;

/// Limits granted by a subscription plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub name: String,
    pub max_alarms: usize,
    /// Shortest check interval allowed, in seconds
    pub min_alarm_interval: i64,
    pub unlimited_emails: bool,
    /// Monthly email/push allowance when `unlimited_emails` is off
    pub max_emails_per_interval: i64,
    pub slack_alerts: bool,
}

impl Plan {
    /// Limits applied when no subscription is found
    pub fn free_tier() -> Self {
        Self {
            name: "free".to_string(),
            max_alarms: 5,
            min_alarm_interval: 300,
            unlimited_emails: false,
            max_emails_per_interval: 100,
            slack_alerts: false,
        }
    }
}

impl Default for Plan {
    fn default() -> Self {
        Self::free_tier()
    }
}

/// Notification channel metered by the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Push,
    Slack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CounterKey {
    pub user_id: UserId,
    pub year: i32,
    pub month: u32,
}

impl CounterKey {
    pub fn new(user_id: UserId, year: i32, month: u32) -> Self {
        Self {
            user_id,
            year,
            month,
        }
    }

    /// Key for the calendar month (UTC) containing `at`
    pub fn for_month(user_id: UserId, at: DateTime<Utc>) -> Self {
        Self::new(user_id, at.year(), at.month())
    }
}

/// Per-user, per-month tally of notifications sent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationCounter {
    pub key: CounterKey,
    pub email: i64,
    pub push: i64,
    pub slack: i64,
}

impl NotificationCounter {
    pub fn new(key: CounterKey) -> Self {
        Self {
            key,
            email: 0,
            push: 0,
            slack: 0,
        }
    }

    pub fn get(&self, channel: Channel) -> i64 {
        match channel {
            Channel::Email => self.email,
            Channel::Push => self.push,
            Channel::Slack => self.slack,
        }
    }

    pub fn increment(&mut self, channel: Channel) {
        match channel {
            Channel::Email => self.email += 1,
            Channel::Push => self.push += 1,
            Channel::Slack => self.slack += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_counter_key_month() {
        let at = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(CounterKey::for_month(9, at), CounterKey::new(9, 2024, 12));
    }

    #[test]
    fn test_counter_channels_independent() {
        let mut counter = NotificationCounter::new(CounterKey::new(1, 2024, 1));
        counter.increment(Channel::Email);
        counter.increment(Channel::Email);
        counter.increment(Channel::Slack);

        assert_eq!(counter.get(Channel::Email), 2);
        assert_eq!(counter.get(Channel::Push), 0);
        assert_eq!(counter.get(Channel::Slack), 1);
    }
}
