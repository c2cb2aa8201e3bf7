//! Search backend boundary
//!
//! The federation core hands a [`ProviderQuery`] to a [`BackendExecutor`] and
//! gets raw buckets back. Everything about the backend's storage and query
//! language lives behind this trait.

pub mod elasticsearch;

pub use elasticsearch::ElasticsearchExecutor;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::query::{AggregationKind, ProviderQuery};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend did not answer within {0:?}")]
    Timeout(Duration),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("malformed backend response: {0}")]
    MalformedResponse(String),
}

/// One aggregation bucket as the backend returned it
#[derive(Debug, Clone, PartialEq)]
pub struct RawBucket {
    /// Usually a string; anything else is treated as malformed downstream
    pub key: serde_json::Value,
    pub doc_count: u64,
    /// Metric name to value; `None` when the backend sent a null
    pub metrics: HashMap<String, Option<f64>>,
}

impl RawBucket {
    pub fn new(key: impl Into<serde_json::Value>, doc_count: u64) -> Self {
        Self {
            key: key.into(),
            doc_count,
            metrics: HashMap::new(),
        }
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), Some(value));
        self
    }

    pub fn key_str(&self) -> Option<&str> {
        self.key.as_str()
    }

    /// Metric value, if present and non-null
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied().flatten()
    }
}

/// Bucket lists keyed by aggregation name; not canonical until normalized
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawProviderResult {
    aggregations: HashMap<String, Vec<RawBucket>>,
}

impl RawProviderResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buckets(mut self, kind: AggregationKind, buckets: Vec<RawBucket>) -> Self {
        self.insert(kind.name(), buckets);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, buckets: Vec<RawBucket>) {
        self.aggregations.insert(name.into(), buckets);
    }

    /// Buckets for one dimension; an aggregation the backend left out has none
    pub fn buckets(&self, kind: AggregationKind) -> &[RawBucket] {
        self.aggregations
            .get(kind.name())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[async_trait]
pub trait BackendExecutor: Send + Sync {
    /// Run one provider's query against its index namespace
    async fn execute(
        &self,
        index_pattern: &str,
        query: &ProviderQuery,
        result_cap: usize,
        timeout: Duration,
    ) -> Result<RawProviderResult, BackendError>;
}
