//! Alarm: one monitored endpoint owned by a tenant

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::incident::Incident;

pub type AlarmId = i64;
pub type UserId = i64;

/// Health of an alarm as seen by the incident ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmState {
    Ok,
    Alarm,
    #[default]
    InsufficientData,
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlarmState::Ok => write!(f, "OK"),
            AlarmState::Alarm => write!(f, "ALARM"),
            AlarmState::InsufficientData => write!(f, "INSUFFICIENT_DATA"),
        }
    }
}

/// A monitored endpoint.
///
/// `incidents` is never persisted with the alarm row; it holds whatever the
/// loading call asked for (see `IncidentScope`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    pub id: AlarmId,
    pub user_id: UserId,
    pub endpoint_url: String,
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
    pub interval_secs: i64,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Time of the last check cycle; only ever moves forward
    #[serde(default)]
    pub watermark: Option<DateTime<Utc>>,
    #[serde(default)]
    pub state: AlarmState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub incidents: Vec<Incident>,
}

fn default_expected_status() -> u16 {
    200
}

fn default_active() -> bool {
    true
}

impl Alarm {
    pub fn new(id: AlarmId, user_id: UserId, endpoint_url: impl Into<String>) -> Self {
        Self {
            id,
            user_id,
            endpoint_url: endpoint_url.into(),
            expected_status: default_expected_status(),
            interval_secs: 60,
            active: true,
            watermark: None,
            state: AlarmState::default(),
            incidents: Vec::new(),
        }
    }

    pub fn with_interval_secs(mut self, secs: i64) -> Self {
        self.interval_secs = secs;
        self
    }

    pub fn with_expected_status(mut self, status: u16) -> Self {
        self.expected_status = status;
        self
    }

    pub fn with_watermark(mut self, watermark: DateTime<Utc>) -> Self {
        self.watermark = Some(watermark);
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// `None` when `interval_secs` is too large to represent
    pub fn interval(&self) -> Option<Duration> {
        Duration::try_seconds(self.interval_secs)
    }

    /// Whether a check is due at `now`. An interval that overflows the
    /// calendar is never due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }
        match self.watermark {
            None => true,
            Some(watermark) => self
                .interval()
                .and_then(|interval| watermark.checked_add_signed(interval))
                .is_some_and(|next| next <= now),
        }
    }

    /// Incidents still open among those loaded
    pub fn open_incidents(&self) -> impl Iterator<Item = &Incident> {
        self.incidents.iter().filter(|i| i.is_open())
    }
}
