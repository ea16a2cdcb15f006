//! In-memory lease store
//!
//! Reference implementation of [`LeaseStore`] over an owned row set. Used by
//! the binary for demo data and by tests; a deployment would swap in a
//! document-store adapter behind the same trait.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::classifier::{ClassifiedQuery, QueryStrategy};

use super::{LeaseStore, LeaseSummary, StoreError};

/// One stored lease revision.
#[derive(Debug, Clone)]
pub struct LeaseRecord {
    pub unique_id: String,
    /// Revision counter; higher is newer.
    pub reg_order: u32,
    pub register_description: String,
    pub associated_description: String,
    pub postcode: String,
}

impl LeaseRecord {
    fn summary(&self) -> LeaseSummary {
        LeaseSummary {
            unique_id: self.unique_id.clone(),
            register_description: self.register_description.clone(),
            associated_description: self.associated_description.clone(),
            postcode: self.postcode.clone(),
        }
    }
}

/// Lease store backed by an in-memory row set.
#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    rows: Vec<LeaseRecord>,
}

impl MemoryLeaseStore {
    pub fn new(rows: Vec<LeaseRecord>) -> Self {
        Self { rows }
    }

    /// A small demo dataset so `serve` answers real queries out of the box.
    pub fn with_sample_data() -> Self {
        let rows = [
            ("L001", 1, "1 Buckingham Gate", "Flat 1, Victoria", "SW1A 1AA"),
            ("L001", 2, "1 Buckingham Gate", "Flat 1, Victoria", "SW1A 1AA"),
            ("L002", 1, "Apartment 12, Palace Court", "Westminster", "SW1A 1AB"),
            ("L003", 1, "The Old Mill, Mill Lane", "Riverside Estate", "SW1A 2AA"),
            ("L004", 1, "24 Whitehall Road", "Government Quarter", "SW1A 2BX"),
            ("L005", 1, "Rose Cottage, Church Street", "St. Mary's Parish", "B11 2NL"),
            ("L006", 1, "Unit 3, Mill Works", "Old Mill Business Park", "B11 3QT"),
            ("L007", 1, "Flat 7, Harbour View", "Marina District", "EC1A 1BB"),
            ("L008", 1, "92 Victoria Avenue", "Northfield", "M1 4BT"),
            ("L009", 1, "The Granary, Farm Close", "Lower Bramble", "YO10 5DD"),
        ];
        Self::new(
            rows.into_iter()
                .map(|(uid, reg_order, rpd, apd, pc)| LeaseRecord {
                    unique_id: uid.to_string(),
                    reg_order,
                    register_description: rpd.to_string(),
                    associated_description: apd.to_string(),
                    postcode: pc.to_string(),
                })
                .collect(),
        )
    }

    /// Exact postcode match, one row per lease id keeping the highest
    /// revision.
    fn exact_grouped(&self, postcode: &str, limit: usize) -> Vec<LeaseSummary> {
        let mut latest: HashMap<&str, &LeaseRecord> = HashMap::new();
        for row in self.rows.iter().filter(|r| r.postcode == postcode) {
            match latest.get(row.unique_id.as_str()) {
                Some(existing) if existing.reg_order >= row.reg_order => {}
                _ => {
                    latest.insert(&row.unique_id, row);
                }
            }
        }
        let mut results: Vec<&LeaseRecord> = latest.into_values().collect();
        results.sort_by(|a, b| a.unique_id.cmp(&b.unique_id));
        results.into_iter().take(limit).map(LeaseRecord::summary).collect()
    }

    /// Postcode prefix match.
    fn postcode_prefix(&self, prefix: &str, limit: usize) -> Vec<LeaseSummary> {
        self.rows
            .iter()
            .filter(|r| r.postcode.starts_with(prefix))
            .take(limit)
            .map(LeaseRecord::summary)
            .collect()
    }

    /// Compound shape for partial postcodes: the outward code must match
    /// exactly, the inward code by prefix.
    fn compound_partial(&self, outward: &str, inward_prefix: &str, limit: usize) -> Vec<LeaseSummary> {
        self.rows
            .iter()
            .filter(|r| match r.postcode.split_once(' ') {
                Some((out, inw)) => out == outward && inw.starts_with(inward_prefix),
                None => r.postcode.starts_with(outward),
            })
            .take(limit)
            .map(LeaseRecord::summary)
            .collect()
    }

    /// Autocomplete: every query token must prefix some token of either
    /// description field.
    fn autocomplete(&self, term: &str, limit: usize) -> Vec<LeaseSummary> {
        let needles: Vec<String> = term.split_whitespace().map(str::to_lowercase).collect();
        if needles.is_empty() {
            return Vec::new();
        }
        self.rows
            .iter()
            .filter(|r| {
                let haystack: Vec<String> = r
                    .register_description
                    .split_whitespace()
                    .chain(r.associated_description.split_whitespace())
                    .map(str::to_lowercase)
                    .collect();
                needles
                    .iter()
                    .all(|n| haystack.iter().any(|h| h.starts_with(n.as_str())))
            })
            .take(limit)
            .map(LeaseRecord::summary)
            .collect()
    }

    /// Weighted multi-field text search: register description counts double
    /// against the associated description.
    fn weighted_text(&self, term: &str, limit: usize) -> Vec<LeaseSummary> {
        let needles: Vec<String> = term.split_whitespace().map(str::to_lowercase).collect();
        let mut scored: Vec<(u32, &LeaseRecord)> = self
            .rows
            .iter()
            .filter_map(|r| {
                let rpd = r.register_description.to_lowercase();
                let apd = r.associated_description.to_lowercase();
                let score: u32 = needles
                    .iter()
                    .map(|n| {
                        2 * u32::from(rpd.contains(n.as_str())) + u32::from(apd.contains(n.as_str()))
                    })
                    .sum();
                (score > 0).then_some((score, r))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.unique_id.cmp(&b.1.unique_id)));
        scored.into_iter().take(limit).map(|(_, r)| r.summary()).collect()
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn search(
        &self,
        query: &ClassifiedQuery,
        limit: usize,
        _max_time: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<LeaseSummary>, StoreError> {
        // An already-cancelled request never starts a scan. In-memory scans
        // finish well inside any execution budget, so the budget backstop
        // never fires here.
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        let results = match query.strategy {
            QueryStrategy::FullPostcode => self.exact_grouped(&query.term, limit),
            QueryStrategy::PartialPostcode => {
                let outward = query.outward.as_deref().unwrap_or("");
                let inward_prefix = query
                    .term
                    .strip_prefix(outward)
                    .unwrap_or(&query.term)
                    .trim_start();
                self.compound_partial(outward, inward_prefix, limit)
            }
            QueryStrategy::OuterPostcodeInvalidInward | QueryStrategy::OuterPostcodeOnly => {
                self.postcode_prefix(&query.term, limit)
            }
            QueryStrategy::Autocomplete => self.autocomplete(&query.term, limit),
            QueryStrategy::FallbackText => self.weighted_text(&query.term, limit),
        };
        Ok(results)
    }
}
