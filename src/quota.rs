//! Search-credit collaborator
//!
//! The quota subsystem owns identities and reset schedules; the engine only
//! asks one question: does this requester still have credit. Checks come in
//! a read-only flavor and a consuming flavor, mirroring how a lookup spends
//! credit while a status probe does not.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use thiserror::Error;

/// Failures from the quota collaborator. Mapped to a service-unavailable
/// response; quota trouble must never be mistaken for an exhausted quota.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QuotaError {
    #[error("quota backend unavailable: {0}")]
    Unavailable(String),
}

/// Credit questions the engine can ask about a requester.
#[async_trait]
pub trait QuotaService: Send + Sync {
    /// Whether `identity` has search credit. With `consume`, one unit is
    /// spent as a side effect when credit is available.
    async fn has_credit(&self, identity: &str, consume: bool) -> Result<bool, QuotaError>;
}

/// Daily per-identity credit counter kept in process memory. Counts reset
/// implicitly when the UTC date changes.
#[derive(Debug)]
pub struct DailyQuota {
    usage: DashMap<String, (NaiveDate, u32)>,
    daily_limit: u32,
}

impl DailyQuota {
    pub fn new(daily_limit: u32) -> Self {
        Self {
            usage: DashMap::new(),
            daily_limit,
        }
    }

    /// Credit remaining today for `identity`.
    pub fn remaining(&self, identity: &str) -> u32 {
        let today = Utc::now().date_naive();
        match self.usage.get(identity) {
            Some(entry) if entry.0 == today => self.daily_limit.saturating_sub(entry.1),
            _ => self.daily_limit,
        }
    }
}

#[async_trait]
impl QuotaService for DailyQuota {
    async fn has_credit(&self, identity: &str, consume: bool) -> Result<bool, QuotaError> {
        let today = Utc::now().date_naive();
        let mut entry = self.usage.entry(identity.to_string()).or_insert((today, 0));
        if entry.0 != today {
            *entry = (today, 0);
        }
        if entry.1 >= self.daily_limit {
            return Ok(false);
        }
        if consume {
            entry.1 += 1;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn consuming_checks_spend_credit() {
        let quota = DailyQuota::new(2);
        assert!(quota.has_credit("alice", true).await.expect("backend up"));
        assert!(quota.has_credit("alice", true).await.expect("backend up"));
        assert!(!quota.has_credit("alice", true).await.expect("backend up"));
        assert_eq!(quota.remaining("alice"), 0);
    }

    #[tokio::test]
    async fn read_only_checks_do_not_spend() {
        let quota = DailyQuota::new(1);
        for _ in 0..5 {
            assert!(quota.has_credit("bob", false).await.expect("backend up"));
        }
        assert_eq!(quota.remaining("bob"), 1);
    }

    #[tokio::test]
    async fn identities_are_isolated() {
        let quota = DailyQuota::new(1);
        assert!(quota.has_credit("alice", true).await.expect("backend up"));
        assert!(!quota.has_credit("alice", true).await.expect("backend up"));
        assert!(quota.has_credit("bob", true).await.expect("backend up"));
    }
}
