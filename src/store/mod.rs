//! Record store collaborator
//!
//! The lease store is external to this service; the engine only knows the
//! trait below. Every call carries a result cap, an execution budget the
//! store must enforce as its hard backstop, and the request's cancellation
//! token. The classified query selects which of the store's call shapes is
//! used; query construction is the store's concern.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::classifier::ClassifiedQuery;

pub use memory::MemoryLeaseStore;

/// One lease row as returned to clients. Field names on the wire follow the
/// source dataset's column headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseSummary {
    /// Stable identifier grouping all revisions of one lease.
    #[serde(rename = "Unique Identifier")]
    pub unique_id: String,

    /// Primary address description from the register.
    #[serde(rename = "Register Property Description")]
    pub register_description: String,

    /// Secondary address description.
    #[serde(rename = "Associated Property Description")]
    pub associated_description: String,

    /// Normalized postcode, outward and inward separated by one space.
    #[serde(rename = "Postcode")]
    pub postcode: String,
}

/// Failures a store implementation may report. The orchestrator maps these
/// onto the response taxonomy; nothing here reaches a client directly.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store's own execution-time ceiling fired.
    #[error("store query exceeded its execution budget")]
    TimedOut,

    /// The store cannot be reached or answered with a transport error.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The request's cancellation token was signalled.
    #[error("store call cancelled")]
    Cancelled,
}

/// Search capability of the backing record store.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Run the call shape selected by `query.strategy`, returning at most
    /// `limit` rows within `max_time`, aborting promptly if `cancel` is
    /// already signalled.
    async fn search(
        &self,
        query: &ClassifiedQuery,
        limit: usize,
        max_time: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<LeaseSummary>, StoreError>;
}
