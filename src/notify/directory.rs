//! Lookups served by the surrounding account, team and subscription services

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::data::{Plan, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: i64,
    pub owner_id: UserId,
}

/// Where a user wants to be told about incidents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contacts {
    pub email: Option<String>,
    #[serde(default)]
    pub push_endpoints: Vec<String>,
    pub slack: Option<SlackTarget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlackTarget {
    pub webhook_url: String,
    pub channel: String,
}

#[async_trait]
pub trait SubscriptionDirectory: Send + Sync {
    /// Plan of the user's active subscription, or `NoActiveSubscription`
    async fn find_active_subscription_by_user_id(&self, user_id: UserId) -> Result<Plan, DirectoryError>;
}

#[async_trait]
pub trait TeamDirectory: Send + Sync {
    /// Team the user is a member of, or `NotFound`
    async fn find_team_by_member_id(&self, user_id: UserId) -> Result<Team, DirectoryError>;
}

#[async_trait]
pub trait ContactDirectory: Send + Sync {
    async fn contacts_for(&self, user_id: UserId) -> Result<Contacts, DirectoryError>;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DirectoryError {
    #[error("No active subscription")]
    NoActiveSubscription,

    #[error("Not found")]
    NotFound,

    #[error("Directory unavailable: {0}")]
    Unavailable(String),
}

/// Directory kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    subscriptions: DashMap<UserId, Plan>,
    memberships: DashMap<UserId, Team>,
    contacts: DashMap<UserId, Contacts>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_subscription(&self, user_id: UserId, plan: Plan) {
        self.subscriptions.insert(user_id, plan);
    }

    pub fn cancel_subscription(&self, user_id: UserId) {
        self.subscriptions.remove(&user_id);
    }

    pub fn add_member(&self, user_id: UserId, team: Team) {
        self.memberships.insert(user_id, team);
    }

    pub fn set_contacts(&self, user_id: UserId, contacts: Contacts) {
        self.contacts.insert(user_id, contacts);
    }
}

#[async_trait]
impl SubscriptionDirectory for InMemoryDirectory {
    async fn find_active_subscription_by_user_id(&self, user_id: UserId) -> Result<Plan, DirectoryError> {
        self.subscriptions
            .get(&user_id)
            .map(|plan| plan.clone())
            .ok_or(DirectoryError::NoActiveSubscription)
    }
}

#[async_trait]
impl TeamDirectory for InMemoryDirectory {
    async fn find_team_by_member_id(&self, user_id: UserId) -> Result<Team, DirectoryError> {
        self.memberships
            .get(&user_id)
            .map(|team| team.clone())
            .ok_or(DirectoryError::NotFound)
    }
}

#[async_trait]
impl ContactDirectory for InMemoryDirectory {
    async fn contacts_for(&self, user_id: UserId) -> Result<Contacts, DirectoryError> {
        Ok(self
            .contacts
            .get(&user_id)
            .map(|contacts| contacts.clone())
            .unwrap_or_default())
    }
}
