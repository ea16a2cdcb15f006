//! Search orchestration
//!
//! The request state machine tying admission control together:
//! validate, consult the failed-query limiter and the quota collaborator,
//! take an admission slot, classify, dispatch to the store under a time
//! budget and the request's cancellation token, then settle bookkeeping.
//! Slot release rides on permit drop, so every terminal path (success,
//! error, cancellation, panic unwind) returns its slot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::admission::AdmissionGate;
use crate::classifier::{self, ClassifiedQuery, QueryClassifier, QueryStrategy, MIN_QUERY_LEN};
use crate::config::SearchSettings;
use crate::error::SearchError;
use crate::limiter::FailedQueryLimiter;
use crate::load::{LoadStatus, LoadTracker, OverloadThresholds};
use crate::quota::QuotaService;
use crate::store::{LeaseStore, LeaseSummary, StoreError};

/// Autocomplete keeps at most this many rows once results pass the
/// containment check.
const AUTOCOMPLETE_KEEP: usize = 5;

/// One inbound lookup, immutable once built.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Query exactly as received; also the failed-query limiter key.
    pub raw_query: String,
    /// Opaque requester identity for quota accounting.
    pub requester: String,
    /// Arrival timestamp.
    pub received_at: DateTime<Utc>,
}

impl SearchRequest {
    pub fn new(raw_query: impl Into<String>, requester: impl Into<String>) -> Self {
        Self {
            raw_query: raw_query.into(),
            requester: requester.into(),
            received_at: Utc::now(),
        }
    }
}

/// A completed lookup.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub results: Vec<LeaseSummary>,
    /// Strategy that produced the results; `None` when the query was too
    /// short to classify.
    pub strategy: Option<QueryStrategy>,
    /// Store-call latency for this request (zero when no call was made).
    pub latency: Duration,
}

impl SearchOutcome {
    fn empty() -> Self {
        Self {
            results: Vec::new(),
            strategy: None,
            latency: Duration::ZERO,
        }
    }
}

/// Process-wide search engine front door. Owns all shared admission state;
/// instantiate once and share behind an `Arc`.
pub struct SearchService {
    classifier: QueryClassifier,
    gate: AdmissionGate,
    load: LoadTracker,
    limiter: FailedQueryLimiter,
    store: Arc<dyn LeaseStore>,
    quota: Arc<dyn QuotaService>,
    settings: SearchSettings,
}

impl SearchService {
    pub fn new(
        settings: SearchSettings,
        store: Arc<dyn LeaseStore>,
        quota: Arc<dyn QuotaService>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            classifier: QueryClassifier::new()?,
            gate: AdmissionGate::new(settings.max_concurrent_searches),
            load: LoadTracker::new(
                settings.latency_window_size,
                settings.latency_window(),
                OverloadThresholds {
                    active_searches: settings.overload_active_searches,
                    p95_latency_ms: settings.overload_p95_latency_ms,
                },
            ),
            limiter: FailedQueryLimiter::new(
                settings.max_failed_attempts,
                settings.failed_query_reset(),
            ),
            store,
            quota,
            settings,
        })
    }

    /// Current load snapshot, consistent with the sample window at call
    /// time. Safe to expose unauthenticated.
    pub fn load_status(&self) -> LoadStatus {
        self.load
            .status(self.gate.active(), self.gate.pending(), self.gate.available())
    }

    /// Per-strategy search counts since process start.
    pub fn strategy_counts(&self) -> HashMap<&'static str, u64> {
        self.load.strategy_counts()
    }

    /// Run one lookup end to end. `cancel` is signalled by the transport
    /// when the client goes away; a cancelled request terminates with
    /// [`SearchError::Cancelled`] and touches neither the load tracker nor
    /// the failure limiter.
    pub async fn lookup(
        &self,
        request: SearchRequest,
        cancel: CancellationToken,
    ) -> Result<SearchOutcome, SearchError> {
        let trimmed = request.raw_query.trim().to_string();

        // Too short to search: empty result set, classifier never runs.
        if trimmed.chars().count() < MIN_QUERY_LEN {
            return Ok(SearchOutcome::empty());
        }
        classifier::validate(&trimmed)?;

        if let Some(retry_after) = self.limiter.should_block(&request.raw_query) {
            debug!(query = %request.raw_query, ?retry_after, "query blocked by failure limiter");
            return Err(SearchError::RateLimited { retry_after });
        }

        let has_credit = self
            .quota
            .has_credit(&request.requester, true)
            .await
            .map_err(|err| {
                warn!(%err, requester = %request.requester, "quota check failed");
                SearchError::Unavailable
            })?;
        if !has_credit {
            return Err(SearchError::QuotaExceeded);
        }

        let pending = self.gate.begin_pending();
        let _permit = match self.gate.try_acquire() {
            Some(permit) => permit,
            None => {
                debug!(active = self.gate.active(), "search slots exhausted, shedding request");
                return Err(SearchError::CapacityExceeded);
            }
        };
        drop(pending);

        let classified = self.classifier.classify(&trimmed);
        self.load.record_strategy(classified.strategy);
        debug!(strategy = %classified.strategy, term = %classified.term, "query classified");

        let started = Instant::now();
        let dispatched = self.dispatch(&trimmed, classified, &cancel).await;
        let latency = started.elapsed();

        match dispatched {
            Ok((results, strategy)) => {
                self.load.record(latency);
                info!(
                    strategy = %strategy,
                    hits = results.len(),
                    latency_ms = latency.as_millis() as u64,
                    "search completed"
                );
                Ok(SearchOutcome {
                    results,
                    strategy: Some(strategy),
                    latency,
                })
            }
            Err(SearchError::Timeout) => {
                self.limiter.record_failure(&request.raw_query);
                warn!(query = %request.raw_query, "store call timed out");
                Err(SearchError::Timeout)
            }
            Err(err) => Err(err),
        }
        // _permit drops here: the slot returns on every terminal path.
    }

    /// Issue the store call for a classified query, escalating autocomplete
    /// to the weighted text strategy when its results miss the raw query.
    async fn dispatch(
        &self,
        raw: &str,
        classified: ClassifiedQuery,
        cancel: &CancellationToken,
    ) -> Result<(Vec<LeaseSummary>, QueryStrategy), SearchError> {
        let results = self.store_call(&classified, cancel).await?;
        if classified.strategy != QueryStrategy::Autocomplete {
            return Ok((results, classified.strategy));
        }

        if autocomplete_matches(raw, &results) {
            let mut results = results;
            results.truncate(AUTOCOMPLETE_KEEP);
            return Ok((results, QueryStrategy::Autocomplete));
        }

        debug!(query = %raw, "autocomplete missed, escalating to weighted text search");
        let fallback = ClassifiedQuery {
            strategy: QueryStrategy::FallbackText,
            outward: None,
            inward: None,
            term: classified.term,
        };
        self.load.record_strategy(QueryStrategy::FallbackText);
        let results = self.store_call(&fallback, cancel).await?;
        Ok((results, QueryStrategy::FallbackText))
    }

    /// One cancellable, time-bounded store call. The budget is enforced
    /// here as well as passed down, so a store that ignores it still cannot
    /// hold the slot past the ceiling.
    async fn store_call(
        &self,
        query: &ClassifiedQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<LeaseSummary>, SearchError> {
        if cancel.is_cancelled() {
            return Err(SearchError::Cancelled);
        }
        let max_time = self.settings.max_time();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SearchError::Cancelled),
            outcome = tokio::time::timeout(
                max_time,
                self.store.search(query, query.strategy.result_cap(), max_time, cancel),
            ) => match outcome {
                Err(_) => Err(SearchError::Timeout),
                Ok(Ok(rows)) => Ok(rows),
                Ok(Err(StoreError::TimedOut)) => Err(SearchError::Timeout),
                Ok(Err(StoreError::Cancelled)) => Err(SearchError::Cancelled),
                Ok(Err(StoreError::Unavailable(reason))) => {
                    warn!(%reason, "record store unavailable");
                    Err(SearchError::Unavailable)
                }
            },
        }
    }
}

/// Autocomplete results count as a hit only when some row substring-matches
/// the raw query, case-insensitively, in either description field.
fn autocomplete_matches(raw: &str, results: &[LeaseSummary]) -> bool {
    if results.is_empty() {
        return false;
    }
    let needle = raw.to_lowercase();
    results.iter().any(|r| {
        r.register_description.to_lowercase().contains(&needle)
            || r.associated_description.to_lowercase().contains(&needle)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::DailyQuota;
    use crate::store::MemoryLeaseStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store that answers instantly and counts calls.
    struct CountingStore {
        calls: AtomicUsize,
        rows: Vec<LeaseSummary>,
    }

    impl CountingStore {
        fn new(rows: Vec<LeaseSummary>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                rows,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LeaseStore for CountingStore {
        async fn search(
            &self,
            _query: &ClassifiedQuery,
            limit: usize,
            _max_time: Duration,
            _cancel: &CancellationToken,
        ) -> Result<Vec<LeaseSummary>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.rows.iter().take(limit).cloned().collect())
        }
    }

    /// Store that sleeps through any budget.
    struct SlowStore {
        delay: Duration,
        calls: AtomicUsize,
    }

    impl SlowStore {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LeaseStore for SlowStore {
        async fn search(
            &self,
            _query: &ClassifiedQuery,
            _limit: usize,
            _max_time: Duration,
            _cancel: &CancellationToken,
        ) -> Result<Vec<LeaseSummary>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(Vec::new())
        }
    }

    fn summary(uid: &str, rpd: &str, apd: &str, pc: &str) -> LeaseSummary {
        LeaseSummary {
            unique_id: uid.to_string(),
            register_description: rpd.to_string(),
            associated_description: apd.to_string(),
            postcode: pc.to_string(),
        }
    }

    fn settings() -> SearchSettings {
        SearchSettings {
            max_time_ms: 50,
            ..SearchSettings::default()
        }
    }

    fn service(store: Arc<dyn LeaseStore>, settings: SearchSettings) -> SearchService {
        SearchService::new(settings, store, Arc::new(DailyQuota::new(1000)))
            .expect("classifier patterns compile")
    }

    #[tokio::test]
    async fn short_queries_return_empty_without_store_call() {
        let store = CountingStore::new(vec![]);
        let svc = service(store.clone(), settings());
        for raw in ["", "ab", "  a  "] {
            let outcome = svc
                .lookup(SearchRequest::new(raw, "u1"), CancellationToken::new())
                .await
                .expect("empty outcome");
            assert!(outcome.results.is_empty());
            assert!(outcome.strategy.is_none());
        }
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn invalid_queries_never_touch_the_gate() {
        let store = CountingStore::new(vec![]);
        let svc = service(store.clone(), settings());

        let oversize = "a".repeat(101);
        for raw in [oversize.as_str(), "derby @ road"] {
            let err = svc
                .lookup(SearchRequest::new(raw, "u1"), CancellationToken::new())
                .await
                .expect_err("rejected");
            assert!(matches!(err, SearchError::InvalidInput(_)));
        }

        let status = svc.load_status();
        assert_eq!(status.active_count, 0);
        assert_eq!(status.available_slots, 50);
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn successful_lookup_records_latency_and_strategy() {
        let rows = vec![summary("L1", "1 Buckingham Gate", "Victoria", "SW1A 1AA")];
        let store = CountingStore::new(rows);
        let svc = service(store.clone(), settings());

        let outcome = svc
            .lookup(SearchRequest::new("SW1A 1AA", "u1"), CancellationToken::new())
            .await
            .expect("lookup succeeds");

        assert_eq!(outcome.strategy, Some(QueryStrategy::FullPostcode));
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(store.calls(), 1);
        assert_eq!(svc.load.sample_count(), 1);
        assert_eq!(svc.strategy_counts().get("full_postcode"), Some(&1));
        // Slot returned.
        assert_eq!(svc.load_status().active_count, 0);
    }

    #[tokio::test]
    async fn quota_exhaustion_short_circuits_before_admission() {
        let store = CountingStore::new(vec![]);
        let svc = SearchService::new(settings(), store.clone(), Arc::new(DailyQuota::new(0)))
            .expect("classifier patterns compile");

        let err = svc
            .lookup(SearchRequest::new("SW1A 1AA", "u1"), CancellationToken::new())
            .await
            .expect_err("no credit");
        assert_eq!(err, SearchError::QuotaExceeded);
        assert_eq!(store.calls(), 0);
        assert_eq!(svc.load_status().active_count, 0);
    }

    #[tokio::test]
    async fn timeouts_count_until_the_query_is_rate_limited() {
        let store = SlowStore::new(Duration::from_millis(200));
        let mut cfg = settings();
        cfg.max_failed_attempts = 3;
        let svc = service(store.clone(), cfg);

        for _ in 0..3 {
            let err = svc
                .lookup(SearchRequest::new("old mill lane", "u1"), CancellationToken::new())
                .await
                .expect_err("times out");
            assert_eq!(err, SearchError::Timeout);
        }
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);

        // Fourth attempt for the same string never reaches the store.
        let err = svc
            .lookup(SearchRequest::new("old mill lane", "u1"), CancellationToken::new())
            .await
            .expect_err("blocked");
        assert!(matches!(err, SearchError::RateLimited { .. }));
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);

        // A different query string is unaffected.
        let err = svc
            .lookup(SearchRequest::new("mill lane", "u1"), CancellationToken::new())
            .await
            .expect_err("times out");
        assert_eq!(err, SearchError::Timeout);

        // No latency samples from failed dispatches.
        assert_eq!(svc.load.sample_count(), 0);
        assert_eq!(svc.load_status().active_count, 0);
    }

    #[tokio::test]
    async fn capacity_exhaustion_sheds_then_readmits() {
        let store = SlowStore::new(Duration::from_millis(200));
        let mut cfg = settings();
        cfg.max_concurrent_searches = 1;
        cfg.max_time_ms = 1000;
        let svc = Arc::new(service(store, cfg));

        let first = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move {
                svc.lookup(SearchRequest::new("SW1A 1AA", "u1"), CancellationToken::new())
                    .await
            })
        };
        // Let the first request take the only slot.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(svc.load_status().active_count, 1);

        let err = svc
            .lookup(SearchRequest::new("SW1A 1AB", "u2"), CancellationToken::new())
            .await
            .expect_err("pool exhausted");
        assert_eq!(err, SearchError::CapacityExceeded);

        first.await.expect("task completes").expect("first lookup succeeds");

        // Slot came back; the next attempt is admitted.
        let outcome = svc
            .lookup(SearchRequest::new("SW1A 1AB", "u2"), CancellationToken::new())
            .await
            .expect("admitted after release");
        assert!(outcome.results.is_empty());
    }

    #[tokio::test]
    async fn cancellation_has_no_side_effects() {
        let store = SlowStore::new(Duration::from_millis(500));
        let mut cfg = settings();
        cfg.max_time_ms = 1000;
        cfg.max_failed_attempts = 1;
        let svc = Arc::new(service(store.clone(), cfg));

        // Signalled before dispatch: the store is never called.
        let token = CancellationToken::new();
        token.cancel();
        let err = svc
            .lookup(SearchRequest::new("SW1A 1AA", "u1"), token)
            .await
            .expect_err("cancelled");
        assert_eq!(err, SearchError::Cancelled);
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);

        // Signalled mid-flight: store call aborts, nothing is recorded.
        let token = CancellationToken::new();
        let lookup = {
            let svc = Arc::clone(&svc);
            let token = token.clone();
            tokio::spawn(async move {
                svc.lookup(SearchRequest::new("SW1A 1AA", "u1"), token).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        let err = lookup.await.expect("task completes").expect_err("cancelled");
        assert_eq!(err, SearchError::Cancelled);

        // Not a failure for rate-limiting purposes, no latency sample, and
        // the slot is back.
        assert!(svc
            .limiter
            .should_block("SW1A 1AA")
            .is_none());
        assert_eq!(svc.load.sample_count(), 0);
        assert_eq!(svc.load_status().active_count, 0);
    }

    #[tokio::test]
    async fn autocomplete_hit_is_trimmed_to_five() {
        let rows: Vec<LeaseSummary> = (0..8)
            .map(|i| summary(&format!("L{i}"), "Mill Lane Cottages", "Millfield", "B11 2NL"))
            .collect();
        let store = CountingStore::new(rows);
        let svc = service(store.clone(), settings());

        let outcome = svc
            .lookup(SearchRequest::new("mill lane", "u1"), CancellationToken::new())
            .await
            .expect("lookup succeeds");
        assert_eq!(outcome.strategy, Some(QueryStrategy::Autocomplete));
        assert_eq!(outcome.results.len(), AUTOCOMPLETE_KEEP);
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn autocomplete_miss_escalates_to_fallback() {
        // Results never contain the query text, so the containment check
        // fails and the orchestrator issues a second, fallback call.
        let rows = vec![summary("L1", "Rose Cottage", "Church Street", "B11 2NL")];
        let store = CountingStore::new(rows);
        let svc = service(store.clone(), settings());

        let outcome = svc
            .lookup(SearchRequest::new("harbour view", "u1"), CancellationToken::new())
            .await
            .expect("lookup succeeds");
        assert_eq!(outcome.strategy, Some(QueryStrategy::FallbackText));
        assert_eq!(store.calls(), 2);

        let counts = svc.strategy_counts();
        assert_eq!(counts.get("autocomplete"), Some(&1));
        assert_eq!(counts.get("fallback"), Some(&1));
    }

    #[tokio::test]
    async fn end_to_end_against_memory_store() {
        let svc = service(Arc::new(MemoryLeaseStore::with_sample_data()), settings());
        let outcome = svc
            .lookup(SearchRequest::new("SW1A 1AA", "u1"), CancellationToken::new())
            .await
            .expect("lookup succeeds");
        assert_eq!(outcome.strategy, Some(QueryStrategy::FullPostcode));
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].unique_id, "L001");
    }
}
