//! Canonical download report and the per-provider pieces it is merged from

pub mod merge;
pub mod normalize;

pub use normalize::{canonical_path, country_code, normalize};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Canonical path or country code to a count
pub type Tally = BTreeMap<String, u64>;

/// Add `value` under `key`, saturating at `u64::MAX`
fn tally_add(tally: &mut Tally, key: String, value: u64) {
    let slot = tally.entry(key).or_insert(0);
    *slot = slot.saturating_add(value);
}

/// One provider's contribution after normalization
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialReport {
    pub by_requests: Tally,
    /// `None` when the provider was not asked for distinct clients
    pub by_requests_unique: Option<Tally>,
    pub by_bytes: Tally,
    pub by_country: Tally,
    /// Buckets dropped as malformed, zero-valued or unresolvable
    pub discarded: usize,
}

impl PartialReport {
    pub fn new(count_unique: bool) -> Self {
        Self {
            by_requests_unique: count_unique.then(Tally::new),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_requests.is_empty()
            && self.by_requests_unique.as_ref().map_or(true, Tally::is_empty)
            && self.by_bytes.is_empty()
            && self.by_country.is_empty()
    }
}

/// The merged answer returned to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// The resolved duration, echoed back
    pub timespan: String,
    pub by_requests: Tally,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by_requests_unique: Option<Tally>,
    pub by_bytes: Tally,
    pub by_country: Tally,
}

impl Report {
    /// An empty report; `count_unique` decides whether `by_requests_unique` is present
    pub fn new(timespan: impl Into<String>, count_unique: bool) -> Self {
        Self {
            timespan: timespan.into(),
            by_requests: Tally::new(),
            by_requests_unique: count_unique.then(Tally::new),
            by_bytes: Tally::new(),
            by_country: Tally::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_requests.is_empty()
            && self.by_requests_unique.as_ref().map_or(true, Tally::is_empty)
            && self.by_bytes.is_empty()
            && self.by_country.is_empty()
    }
}
