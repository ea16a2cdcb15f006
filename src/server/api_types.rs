//! HTTP API type definitions
//!
//! Request/response DTOs for the lookup, status and health endpoints.
//! Result rows serialize with the source dataset's column headers; see
//! [`crate::store::LeaseSummary`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::load::LoadStatus;

/// Query-string parameters of the lookup endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct LookupParams {
    /// Free-text or postcode query.
    pub query: Option<String>,
}

/// Body of the unauthenticated status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    /// Current load snapshot.
    #[serde(flatten)]
    pub load: LoadStatus,
    /// Searches per classification branch since process start.
    pub search_types: HashMap<&'static str, u64>,
    /// Snapshot time, RFC 3339.
    pub timestamp: String,
}

/// Liveness probe body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// "ok" whenever the process can answer.
    pub status: String,
    /// Probe time, RFC 3339.
    pub timestamp: String,
    /// Seconds since the server started.
    pub uptime_seconds: u64,
}

/// JSON body attached to every error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    /// Stable machine-readable code.
    pub error: String,
    /// Human-readable guidance.
    pub message: String,
    /// Seconds until a blocked query unblocks, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
    /// Response time, RFC 3339.
    pub timestamp: String,
    /// Correlation id for logs.
    pub trace_id: String,
}
