//! Incident records and the failure descriptions that open them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::alarm::AlarmId;

pub type IncidentId = i64;

/// Kind of failure an incident tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    Timeout,
    BadCode,
    Other,
    Slow,
}

impl fmt::Display for IncidentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IncidentType::Timeout => "timeout",
            IncidentType::BadCode => "bad_code",
            IncidentType::Other => "other",
            IncidentType::Slow => "slow",
        };
        f.write_str(name)
    }
}

/// Value separating "the same failure, still going" from "a different failure"
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Discriminator {
    Code(Option<u16>),
    Message(Option<String>),
}

/// A classified probe failure, ready to be recorded
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub kind: IncidentType,
    pub http_code: Option<u16>,
    pub response: Option<String>,
    pub error: Option<String>,
}

impl Failure {
    pub fn timeout(error: impl Into<String>) -> Self {
        Self {
            kind: IncidentType::Timeout,
            http_code: None,
            response: None,
            error: Some(error.into()),
        }
    }

    pub fn bad_code(code: u16, response: Option<String>) -> Self {
        Self {
            kind: IncidentType::BadCode,
            http_code: Some(code),
            response,
            error: None,
        }
    }

    pub fn other(error: impl Into<String>) -> Self {
        Self {
            kind: IncidentType::Other,
            http_code: None,
            response: None,
            error: Some(error.into()),
        }
    }

    pub fn discriminator(&self) -> Discriminator {
        discriminator_for(self.kind, self.http_code, self.error.as_deref())
    }
}

fn discriminator_for(kind: IncidentType, code: Option<u16>, error: Option<&str>) -> Discriminator {
    match kind {
        IncidentType::BadCode => Discriminator::Code(code),
        _ => Discriminator::Message(error.map(str::to_string)),
    }
}

/// One ongoing or past failure of a particular kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub alarm_id: AlarmId,
    #[serde(rename = "type")]
    pub kind: IncidentType,
    pub http_code: Option<u16>,
    pub response: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Incident {
    pub fn from_failure(
        id: IncidentId,
        alarm_id: AlarmId,
        failure: &Failure,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            alarm_id,
            kind: failure.kind,
            http_code: failure.http_code,
            response: failure.response.clone(),
            error: failure.error.clone(),
            created_at,
            resolved_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }

    pub fn discriminator(&self) -> Discriminator {
        discriminator_for(self.kind, self.http_code, self.error.as_deref())
    }

    /// Whether this is an open incident for the same kind of failure
    pub fn tracks(&self, failure: &Failure) -> bool {
        self.is_open() && self.kind == failure.kind && self.discriminator() == failure.discriminator()
    }
}
