//! Effective plan resolution and plan-limit checks

use std::sync::Arc;

use super::directory::{DirectoryError, SubscriptionDirectory, TeamDirectory};
use crate::data::{Plan, UserId};

/// Where the effective plan came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanSource {
    TeamOwner(UserId),
    Own,
    FreeTier,
}

/// Resolves the plan that governs a user's limits.
///
/// Precedence: the team owner's active plan if the user is on a team, then
/// the user's own active plan, then the free tier. First match wins.
#[derive(Clone)]
pub struct PlanResolver {
    subscriptions: Arc<dyn SubscriptionDirectory>,
    teams: Arc<dyn TeamDirectory>,
}

impl PlanResolver {
    pub fn new(subscriptions: Arc<dyn SubscriptionDirectory>, teams: Arc<dyn TeamDirectory>) -> Self {
        Self {
            subscriptions,
            teams,
        }
    }

    pub async fn resolve(&self, user_id: UserId) -> Result<(Plan, PlanSource), DirectoryError> {
        match self.teams.find_team_by_member_id(user_id).await {
            Ok(team) => match self
                .subscriptions
                .find_active_subscription_by_user_id(team.owner_id)
                .await
            {
                Ok(plan) => return Ok((plan, PlanSource::TeamOwner(team.owner_id))),
                Err(DirectoryError::NoActiveSubscription) => {}
                Err(e) => return Err(e),
            },
            Err(DirectoryError::NotFound) => {}
            Err(e) => return Err(e),
        }

        match self
            .subscriptions
            .find_active_subscription_by_user_id(user_id)
            .await
        {
            Ok(plan) => Ok((plan, PlanSource::Own)),
            Err(DirectoryError::NoActiveSubscription) => Ok((Plan::free_tier(), PlanSource::FreeTier)),
            Err(e) => Err(e),
        }
    }

    /// Like `resolve`, but a failing lookup degrades to the free tier
    pub async fn effective_plan(&self, user_id: UserId) -> Plan {
        match self.resolve(user_id).await {
            Ok((plan, source)) => {
                tracing::debug!(user_id, plan = %plan.name, source = ?source, "Resolved plan");
                plan
            }
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Plan lookup failed, using free tier");
                Plan::free_tier()
            }
        }
    }
}

/// Reject an alarm that would break the plan's alarm count or interval floor
pub fn validate_alarm_limits(
    plan: &Plan,
    existing_alarms: usize,
    interval_secs: i64,
) -> Result<(), LimitError> {
    if existing_alarms >= plan.max_alarms {
        return Err(LimitError::TooManyAlarms {
            max: plan.max_alarms,
        });
    }
    if interval_secs < plan.min_alarm_interval {
        return Err(LimitError::IntervalTooShort {
            requested: interval_secs,
            min: plan.min_alarm_interval,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LimitError {
    #[error("Plan allows at most {max} alarms")]
    TooManyAlarms { max: usize },

    #[error("Interval {requested}s is below the plan minimum of {min}s")]
    IntervalTooShort { requested: i64, min: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::directory::{InMemoryDirectory, Team};
    use async_trait::async_trait;

    fn plan(name: &str) -> Plan {
        Plan {
            name: name.to_string(),
            ..Plan::free_tier()
        }
    }

    fn resolver(directory: Arc<InMemoryDirectory>) -> PlanResolver {
        PlanResolver::new(directory.clone(), directory)
    }

    #[tokio::test]
    async fn test_team_owner_plan_wins() {
        let directory = Arc::new(InMemoryDirectory::new());
        directory.set_subscription(1, plan("owner"));
        directory.set_subscription(2, plan("member"));
        directory.add_member(2, Team { id: 9, owner_id: 1 });

        let (plan, source) = resolver(directory).resolve(2).await.unwrap();
        assert_eq!(plan.name, "owner");
        assert_eq!(source, PlanSource::TeamOwner(1));
    }

    #[tokio::test]
    async fn test_own_plan_when_owner_has_none() {
        let directory = Arc::new(InMemoryDirectory::new());
        directory.set_subscription(2, plan("member"));
        directory.add_member(2, Team { id: 9, owner_id: 1 });

        let (plan, source) = resolver(directory).resolve(2).await.unwrap();
        assert_eq!(plan.name, "member");
        assert_eq!(source, PlanSource::Own);
    }

    #[tokio::test]
    async fn test_free_tier_default() {
        let directory = Arc::new(InMemoryDirectory::new());
        let (plan, source) = resolver(directory).resolve(5).await.unwrap();
        assert_eq!(plan, Plan::free_tier());
        assert_eq!(source, PlanSource::FreeTier);
    }

    #[tokio::test]
    async fn test_cancelled_subscription_falls_back() {
        let directory = Arc::new(InMemoryDirectory::new());
        directory.set_subscription(1, plan("owner"));
        directory.set_subscription(2, plan("member"));
        directory.add_member(2, Team { id: 9, owner_id: 1 });
        let resolver = resolver(directory.clone());

        directory.cancel_subscription(1);
        let (plan, source) = resolver.resolve(2).await.unwrap();
        assert_eq!(plan.name, "member");
        assert_eq!(source, PlanSource::Own);

        directory.cancel_subscription(2);
        let (plan, source) = resolver.resolve(2).await.unwrap();
        assert_eq!(plan, Plan::free_tier());
        assert_eq!(source, PlanSource::FreeTier);
    }

    struct BrokenTeams;

    #[async_trait]
    impl TeamDirectory for BrokenTeams {
        async fn find_team_by_member_id(&self, _user_id: UserId) -> Result<Team, DirectoryError> {
            Err(DirectoryError::Unavailable("connection reset".into()))
        }
    }

    #[tokio::test]
    async fn test_lookup_failure_propagates_or_degrades() {
        let directory = Arc::new(InMemoryDirectory::new());
        directory.set_subscription(2, plan("member"));
        let resolver = PlanResolver::new(directory, Arc::new(BrokenTeams));

        assert!(matches!(
            resolver.resolve(2).await,
            Err(DirectoryError::Unavailable(_))
        ));
        assert_eq!(resolver.effective_plan(2).await, Plan::free_tier());
    }

    #[test]
    fn test_alarm_limits() {
        let plan = Plan {
            max_alarms: 2,
            min_alarm_interval: 60,
            ..Plan::free_tier()
        };

        assert!(validate_alarm_limits(&plan, 1, 60).is_ok());
        assert_eq!(
            validate_alarm_limits(&plan, 2, 60),
            Err(LimitError::TooManyAlarms { max: 2 })
        );
        assert_eq!(
            validate_alarm_limits(&plan, 0, 30),
            Err(LimitError::IntervalTooShort {
                requested: 30,
                min: 60
            })
        );
    }
}
