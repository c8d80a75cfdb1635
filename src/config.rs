//! Service configuration from `UPCHECK_*` environment variables

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::checks::ProbeConfig;
use crate::data::{Alarm, Plan, UserId};
use crate::notify::{Contacts, InMemoryDirectory, NotifyConfig, Team};
use crate::storage::{AlarmRepository, PartitionConfig, StorageError};

/// Everything the server needs to start
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub probe: ProbeConfig,
    pub scheduler_tick: Duration,
    pub partition_interval: Duration,
    pub partition: PartitionConfig,
    pub notify: NotifyConfig,
    pub seed_file: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            probe: ProbeConfig::default(),
            scheduler_tick: Duration::from_secs(5),
            partition_interval: Duration::from_secs(300),
            partition: PartitionConfig::default(),
            notify: NotifyConfig::default(),
            seed_file: None,
        }
    }
}

impl ServiceConfig {
    /// Read the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparsable values keep their default
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let mut config = Self::default();

        if let Some(host) = lookup("UPCHECK_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("UPCHECK_PORT").and_then(|p| p.trim().parse().ok()) {
            config.port = port;
        }
        if let Some(secs) = number("UPCHECK_PROBE_TIMEOUT_SECS") {
            config.probe = config.probe.with_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = number("UPCHECK_SCHEDULER_TICK_SECS") {
            config.scheduler_tick = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = number("UPCHECK_PARTITION_INTERVAL_SECS") {
            config.partition_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(table) = lookup("UPCHECK_RESULTS_TABLE") {
            config.partition.parent_table = table;
        }
        // Out-of-range spans keep the default like any other bad value
        let span = |key: &str, make: fn(i64) -> Option<chrono::Duration>| {
            number(key)
                .and_then(|n| i64::try_from(n).ok())
                .and_then(make)
        };
        if let Some(lead) = span("UPCHECK_PARTITION_LEAD_MINUTES", chrono::Duration::try_minutes) {
            config.partition = config.partition.with_lead_time(lead);
        }
        if let Some(retention) = span("UPCHECK_RETENTION_DAYS", chrono::Duration::try_days) {
            config.partition = config.partition.with_retention(retention);
        }
        if let Some(from) = lookup("UPCHECK_EMAIL_FROM") {
            config.notify.email_from = from;
        }
        if let Some(username) = lookup("UPCHECK_SLACK_USERNAME") {
            config.notify.slack_username = username;
        }
        if let Some(emoji) = lookup("UPCHECK_SLACK_EMOJI") {
            config.notify.slack_emoji = emoji;
        }
        config.seed_file = lookup("UPCHECK_SEED_FILE")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        config
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedSubscription {
    pub user_id: UserId,
    pub plan: Plan,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedMembership {
    pub user_id: UserId,
    pub team: Team,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedContacts {
    pub user_id: UserId,
    #[serde(flatten)]
    pub contacts: Contacts,
}

/// Startup data for a standalone deployment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub alarms: Vec<Alarm>,
    #[serde(default)]
    pub subscriptions: Vec<SeedSubscription>,
    #[serde(default)]
    pub teams: Vec<SeedMembership>,
    #[serde(default)]
    pub contacts: Vec<SeedContacts>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SeedDocument {
    Alarms(Vec<Alarm>),
    Full(Seed),
}

impl Seed {
    /// Parse either a bare alarm list or a full seed object
    pub fn parse(json: &str) -> Result<Self, ConfigError> {
        let document: SeedDocument =
            serde_json::from_str(json).map_err(|e| ConfigError::InvalidSeed(e.to_string()))?;
        Ok(match document {
            SeedDocument::Alarms(alarms) => Seed {
                alarms,
                ..Seed::default()
            },
            SeedDocument::Full(seed) => seed,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::parse(&json)
    }

    /// Load alarms into storage and directory data into the in-memory directory
    pub fn apply(
        self,
        alarms: &AlarmRepository,
        directory: &InMemoryDirectory,
    ) -> Result<usize, ConfigError> {
        let count = self.alarms.len();
        for alarm in self.alarms {
            alarms.upsert(alarm)?;
        }
        for entry in self.subscriptions {
            directory.set_subscription(entry.user_id, entry.plan);
        }
        for entry in self.teams {
            directory.add_member(entry.user_id, entry.team);
        }
        for entry in self.contacts {
            directory.set_contacts(entry.user_id, entry.contacts);
        }
        Ok(count)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {message}")]
    Io { path: String, message: String },

    #[error("Invalid seed file: {0}")]
    InvalidSeed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
