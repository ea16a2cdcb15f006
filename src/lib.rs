//! # Leasefinder Core - Property-Lease Lookup Service
//!
//! A lease lookup service built around a search admission-control engine:
//! - Six-way query classification (postcode shapes, autocomplete, fallback)
//! - Fixed-capacity admission gate with non-blocking load shedding
//! - Rolling p95 latency window driving an overload flag
//! - Per-query-string circuit breaker against repeatedly slow searches
//! - Cooperative cancellation tied to client-connection lifetime
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────────┐   ┌──────────────────┐
//! │  HTTP API    │───│ Search          │───│  Lease Store     │
//! │  (axum)      │   │ Orchestrator    │   │  (trait seam)    │
//! └──────────────┘   └─────────────────┘   └──────────────────┘
//!                       │       │       │
//!            ┌──────────┘       │       └───────────┐
//!   ┌─────────────────┐ ┌──────────────┐ ┌─────────────────────┐
//!   │ Admission Gate  │ │ Load Tracker │ │ Failed-Query Limiter│
//!   └─────────────────┘ └──────────────┘ └─────────────────────┘
//! ```
//!
//! Every piece of shared admission state lives in [`search::SearchService`];
//! instantiate it once per process and inject it into request handlers.

pub mod admission;
pub mod classifier;
pub mod config;
pub mod error;
pub mod limiter;
pub mod load;
pub mod quota;
pub mod search;
pub mod server;
pub mod store;

pub use config::AppConfig;

/// Initialize logging for the binary. Filter via `RUST_LOG`, defaulting to
/// info-level output for this crate.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "leasefinder_core=info,tower_http=warn".into()),
        )
        .init();
}
