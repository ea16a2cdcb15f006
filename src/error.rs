//! Search error taxonomy
//!
//! Every failure in the lookup path is converted to one of these variants at
//! the orchestrator boundary; no store or collaborator error type crosses
//! into the HTTP layer.

use std::time::Duration;
use thiserror::Error;

/// Terminal outcomes of a lookup request that are not a result set.
///
/// Each variant carries a stable machine-readable code (`code()`) and
/// human-readable guidance (`guidance()`); the HTTP layer maps variants to
/// status codes without inspecting anything else.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SearchError {
    /// Query failed shape validation (length or character set). Not
    /// retryable as-is.
    #[error("invalid query: {0}")]
    InvalidInput(String),

    /// The requester has no search credit left. Resets on the quota
    /// collaborator's schedule.
    #[error("daily search limit reached")]
    QuotaExceeded,

    /// This exact query string failed too many times recently. Query-scoped,
    /// not requester-scoped.
    #[error("query temporarily blocked after repeated failures")]
    RateLimited {
        /// Time until the failed-query window resets.
        retry_after: Duration,
    },

    /// All concurrent search slots are in use. Pool-scoped, retry shortly.
    #[error("search capacity exceeded")]
    CapacityExceeded,

    /// The record store did not answer within the configured execution
    /// budget. Counted against the failed-query limiter.
    #[error("search timed out")]
    Timeout,

    /// The record store is unreachable. Not counted against the limiter.
    #[error("record store unavailable")]
    Unavailable,

    /// The client went away before a response was produced. Never surfaced
    /// to a user.
    #[error("request cancelled by client")]
    Cancelled,
}

impl SearchError {
    /// Stable error code for response bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::QuotaExceeded => "quota_exceeded",
            Self::RateLimited { .. } => "rate_limited",
            Self::CapacityExceeded => "capacity_exceeded",
            Self::Timeout => "search_timeout",
            Self::Unavailable => "service_unavailable",
            Self::Cancelled => "request_cancelled",
        }
    }

    /// What the caller should do about it.
    pub fn guidance(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => {
                "Use 3-100 characters: letters, digits, spaces, commas, periods, hyphens, apostrophes or slashes."
            }
            Self::QuotaExceeded => "You have reached your daily search limit. Try again tomorrow.",
            Self::RateLimited { .. } => {
                "This query keeps failing. Wait a moment before retrying it."
            }
            Self::CapacityExceeded => "The service is busy. Retry in a few seconds.",
            Self::Timeout => {
                "The search took too long. Try a more specific query, such as a full postcode."
            }
            Self::Unavailable => "Search is temporarily unavailable. Retry shortly.",
            Self::Cancelled => "",
        }
    }

    /// Whether a retry of the same request can succeed without the caller
    /// changing anything.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::CapacityExceeded | Self::Timeout | Self::Unavailable
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(SearchError::QuotaExceeded.code(), "quota_exceeded");
        assert_eq!(
            SearchError::RateLimited { retry_after: Duration::from_secs(30) }.code(),
            "rate_limited"
        );
        assert_eq!(SearchError::Timeout.code(), "search_timeout");
    }

    #[test]
    fn timeout_guidance_suggests_narrowing() {
        assert!(SearchError::Timeout.guidance().contains("more specific"));
    }

    #[test]
    fn retryability() {
        assert!(SearchError::CapacityExceeded.is_retryable());
        assert!(!SearchError::InvalidInput("bad".into()).is_retryable());
        assert!(!SearchError::QuotaExceeded.is_retryable());
    }
}
