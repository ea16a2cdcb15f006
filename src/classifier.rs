//! Query classification
//!
//! Pure, deterministic mapping from a validated query string to one of six
//! search strategies. Postcode detection drives the first four; anything
//! else starts as autocomplete, and the orchestrator alone decides whether
//! an autocomplete round-trip escalates to the fallback text strategy.

use regex::Regex;

use crate::error::SearchError;

/// Minimum query length; shorter queries return an empty result set without
/// ever reaching the classifier.
pub const MIN_QUERY_LEN: usize = 3;

/// Maximum accepted query length.
pub const MAX_QUERY_LEN: usize = 100;

/// The search strategy a query resolves to. Each variant maps to a distinct
/// store call shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryStrategy {
    /// Outward + inward code present: exact postcode match, grouped by
    /// record id keeping the latest revision.
    FullPostcode,
    /// Outward code plus a 1-2 character alphanumeric fragment that could
    /// still grow into an inward code: postcode prefix match.
    PartialPostcode,
    /// Outward code followed by a fragment that can never form an inward
    /// code: searched as outward-only.
    OuterPostcodeInvalidInward,
    /// Outward code alone: postcode prefix match on the outward.
    OuterPostcodeOnly,
    /// Free text, tried against the autocomplete index first.
    Autocomplete,
    /// Weighted multi-field text search; chosen by the orchestrator when
    /// autocomplete results miss, never by the classifier.
    FallbackText,
}

impl QueryStrategy {
    /// Analytics key, one per classification branch. The two outward-only
    /// branches stay distinct here even though they issue the same store
    /// call.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullPostcode => "full_postcode",
            Self::PartialPostcode => "partial_postcode",
            Self::OuterPostcodeInvalidInward => "outer_invalid_inward",
            Self::OuterPostcodeOnly => "outer_postcode",
            Self::Autocomplete => "autocomplete",
            Self::FallbackText => "fallback",
        }
    }

    /// Result cap passed to the store for this call shape.
    pub fn result_cap(&self) -> usize {
        match self {
            Self::FullPostcode => 50,
            _ => 20,
        }
    }
}

impl std::fmt::Display for QueryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified query, ready to parameterize a store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedQuery {
    /// Selected strategy.
    pub strategy: QueryStrategy,
    /// Uppercased outward code, when one was found.
    pub outward: Option<String>,
    /// Uppercased inward code, for full postcodes.
    pub inward: Option<String>,
    /// Normalized search term the store call is built from.
    pub term: String,
}

/// Validate query shape: length and allow-listed characters. Callers handle
/// the under-`MIN_QUERY_LEN` case before validation.
pub fn validate(query: &str) -> Result<(), SearchError> {
    if query.chars().count() > MAX_QUERY_LEN {
        return Err(SearchError::InvalidInput("query too long".to_string()));
    }
    if !query.chars().all(is_allowed_char) {
        return Err(SearchError::InvalidInput(
            "query contains invalid characters".to_string(),
        ));
    }
    Ok(())
}

fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, ' ' | ',' | '.' | '-' | '\'' | '/')
}

/// Postcode-aware query classifier. Patterns compile once at construction;
/// `classify` itself is pure.
pub struct QueryClassifier {
    full_postcode: Regex,
    outward_code: Regex,
}

impl QueryClassifier {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            // Outward: 1-2 letters, 1-2 digits, optional letter.
            // Inward: digit + 2 letters. Both may appear anywhere in the
            // query, word-bounded, in any case.
            full_postcode: Regex::new(
                r"(?i)\b([A-Z]{1,2}[0-9]{1,2}[A-Z]?)\s*([0-9][A-Z]{2})\b",
            )?,
            outward_code: Regex::new(r"(?i)\b[A-Z]{1,2}[0-9]{1,2}[A-Z]?")?,
        })
    }

    /// Map a trimmed, validated query to exactly one strategy. First match
    /// wins: full postcode, then outward-code analysis, then autocomplete.
    pub fn classify(&self, query: &str) -> ClassifiedQuery {
        if let Some(caps) = self.full_postcode.captures(query) {
            let outward = caps[1].to_uppercase();
            let inward = caps[2].to_uppercase();
            let term = format!("{outward} {inward}");
            return ClassifiedQuery {
                strategy: QueryStrategy::FullPostcode,
                outward: Some(outward),
                inward: Some(inward),
                term,
            };
        }

        if let Some(mat) = self.outward_code.find(query) {
            let outward = mat.as_str().to_uppercase();
            let fragment = trailing_fragment(&query[mat.end()..]);
            return match fragment {
                None => ClassifiedQuery {
                    strategy: QueryStrategy::OuterPostcodeOnly,
                    term: outward.clone(),
                    outward: Some(outward),
                    inward: None,
                },
                Some(frag) if is_inward_prefix(&frag) => {
                    let frag = frag.to_uppercase();
                    ClassifiedQuery {
                        strategy: QueryStrategy::PartialPostcode,
                        term: format!("{outward} {frag}"),
                        outward: Some(outward),
                        inward: None,
                    }
                }
                // Fragment can never grow into an inward code; search the
                // outward alone but keep the branch visible to analytics.
                Some(_) => ClassifiedQuery {
                    strategy: QueryStrategy::OuterPostcodeInvalidInward,
                    term: outward.clone(),
                    outward: Some(outward),
                    inward: None,
                },
            };
        }

        ClassifiedQuery {
            strategy: QueryStrategy::Autocomplete,
            outward: None,
            inward: None,
            term: query.to_string(),
        }
    }
}

/// The text following an outward code: characters glued to it, or failing
/// that the next whitespace-delimited token. `None` when nothing follows.
fn trailing_fragment(rest: &str) -> Option<String> {
    let attached: String = rest.chars().take_while(|c| !c.is_whitespace()).collect();
    if !attached.is_empty() {
        return Some(attached);
    }
    rest.split_whitespace().next().map(str::to_string)
}

/// A fragment that could still be completed into a valid inward code:
/// at most two characters, all alphanumeric.
fn is_inward_prefix(fragment: &str) -> bool {
    fragment.chars().count() <= 2 && fragment.chars().all(|c| c.is_ascii_alphanumeric())
}
