//! Fan-out over every configured provider and merge of what comes back
//!
//! Each provider runs its own build -> execute -> normalize pipeline with no
//! shared state. Once all of them have finished (or hit the deadline) the
//! contributions are folded into one report in registry order. A provider
//! that fails contributes nothing; the request itself only fails when the
//! filter is invalid, which is checked before any backend is contacted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, BackendExecutor, ElasticsearchExecutor};
use crate::config::Config;
use crate::query::{build_query, CanonicalFilter, FilterDefaults, FilterError};
use crate::report::merge::merge_all;
use crate::report::{normalize, PartialReport, Report};
use crate::schema::{Provider, SchemaRegistry};

/// Raw document hits requested alongside the aggregations
pub const HIT_DOCUMENTS: usize = 0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatsError {
    #[error("invalid filter: {0}")]
    InvalidFilter(#[from] FilterError),
}

/// A provider that did not contribute to a report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    pub provider: String,
    pub error: BackendError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederationOutcome {
    pub report: Report,
    /// Providers whose results were merged, in registry order
    pub contributors: Vec<String>,
    pub failures: Vec<ProviderFailure>,
}

impl FederationOutcome {
    /// True when at least one provider failed to answer
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }
}

pub struct Federation {
    registry: SchemaRegistry,
    executor: Arc<dyn BackendExecutor>,
    timeout: Duration,
}

impl Federation {
    pub fn new(registry: SchemaRegistry, executor: Arc<dyn BackendExecutor>, timeout: Duration) -> Self {
        Self {
            registry,
            executor,
            timeout,
        }
    }

    /// Wire up the configured providers against the configured search backend
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let registry = SchemaRegistry::builtin()
            .select(config.federation.providers.as_slice())
            .context("invalid DLSTATS_PROVIDERS")?;
        let executor = ElasticsearchExecutor::from_config(&config.backend)?;

        Ok(Self::new(
            registry,
            Arc::new(executor),
            Duration::from_secs(config.backend.timeout_secs),
        ))
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Validate request fields against the defaults, then federate
    pub async fn report_for(
        &self,
        duration: Option<&str>,
        project: Option<&str>,
        defaults: &FilterDefaults,
    ) -> Result<FederationOutcome, StatsError> {
        let filter = CanonicalFilter::from_params(duration, project, defaults)?;
        Ok(self.report(&filter).await)
    }

    /// Query every provider concurrently and merge whatever answers in time
    pub async fn report(&self, filter: &CanonicalFilter) -> FederationOutcome {
        let started = Instant::now();
        let count_unique = filter.profile().counts_unique_clients();

        let pipelines = self
            .registry
            .providers()
            .iter()
            .map(|provider| self.run_provider(provider, filter));
        let results = join_all(pipelines).await;

        let mut partials = Vec::new();
        let mut contributors = Vec::new();
        let mut failures = Vec::new();

        for (provider, result) in self.registry.providers().iter().zip(results) {
            match result {
                Ok(partial) => {
                    partials.push(partial);
                    contributors.push(provider.name().to_string());
                }
                Err(error) => {
                    warn!(
                        provider = provider.name(),
                        error = %error,
                        "Provider excluded from report"
                    );
                    failures.push(ProviderFailure {
                        provider: provider.name().to_string(),
                        error,
                    });
                }
            }
        }

        let report = merge_all(filter.duration(), count_unique, partials);

        info!(
            project = filter.project(),
            timespan = filter.duration(),
            providers = self.registry.len(),
            failed = failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Federated download report built"
        );

        FederationOutcome {
            report,
            contributors,
            failures,
        }
    }

    async fn run_provider(
        &self,
        provider: &Provider,
        filter: &CanonicalFilter,
    ) -> Result<PartialReport, BackendError> {
        let query = build_query(filter, provider);

        let raw = tokio::time::timeout(
            self.timeout,
            self.executor
                .execute(provider.index_pattern(), &query, HIT_DOCUMENTS, self.timeout),
        )
        .await
        .map_err(|_| BackendError::Timeout(self.timeout))??;

        let partial = normalize(&raw, filter.project(), query.requests_unique_clients());
        if partial.is_empty() {
            debug!(provider = provider.name(), "Provider had nothing countable");
        }
        debug!(
            provider = provider.name(),
            paths = partial.by_requests.len(),
            countries = partial.by_country.len(),
            discarded = partial.discarded,
            "Provider results normalized"
        );
        Ok(partial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{RawBucket, RawProviderResult};
    use crate::query::{AggregationKind, ProviderQuery, QueryProfile};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every call and answers with a single path bucket
    #[derive(Default)]
    struct RecordingExecutor {
        calls: Mutex<Vec<(String, ProviderQuery)>>,
    }

    #[async_trait]
    impl BackendExecutor for RecordingExecutor {
        async fn execute(
            &self,
            index_pattern: &str,
            query: &ProviderQuery,
            result_cap: usize,
            _timeout: Duration,
        ) -> Result<RawProviderResult, BackendError> {
            assert_eq!(result_cap, HIT_DOCUMENTS);
            self.calls
                .lock()
                .unwrap()
                .push((index_pattern.to_string(), query.clone()));
            Ok(RawProviderResult::new().with_buckets(
                AggregationKind::ByPath,
                vec![RawBucket::new("/netbeans/a.zip", 1)],
            ))
        }
    }

    #[tokio::test]
    async fn every_provider_gets_its_own_query() {
        let executor = Arc::new(RecordingExecutor::default());
        let federation = Federation::new(
            SchemaRegistry::builtin(),
            executor.clone(),
            Duration::from_secs(5),
        );
        let filter = CanonicalFilter::new("7d", "netbeans", 5000, QueryProfile::Lean).unwrap();

        let outcome = federation.report(&filter).await;

        let calls = executor.calls.lock().unwrap();
        let mut patterns: Vec<_> = calls.iter().map(|(p, _)| p.as_str()).collect();
        patterns.sort();
        assert_eq!(patterns, vec!["fastly-*", "loggy-*"]);
        assert!(calls.iter().all(|(p, q)| *p == q.index_pattern));

        assert_eq!(outcome.contributors, vec!["fastly", "loggy"]);
        assert_eq!(outcome.report.timespan, "7d");
        assert_eq!(outcome.report.by_requests["a.zip"], 2);
        assert!(outcome.report.by_requests_unique.is_none());
        assert!(!outcome.is_degraded());
    }

    #[tokio::test]
    async fn invalid_filter_fails_before_fan_out() {
        let executor = Arc::new(RecordingExecutor::default());
        let federation = Federation::new(
            SchemaRegistry::builtin(),
            executor.clone(),
            Duration::from_secs(5),
        );

        let result = federation
            .report_for(Some("forever"), None, &FilterDefaults::default())
            .await;

        assert!(matches!(
            result,
            Err(StatsError::InvalidFilter(FilterError::InvalidDuration(_)))
        ));
        assert!(executor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn no_providers_yields_empty_report() {
        let federation = Federation::new(
            SchemaRegistry::default(),
            Arc::new(RecordingExecutor::default()),
            Duration::from_secs(5),
        );
        let outcome = federation
            .report_for(None, None, &FilterDefaults::default())
            .await
            .unwrap();
        assert!(outcome.report.is_empty());
        assert_eq!(outcome.report.timespan, "30d");
        assert!(outcome.report.by_requests_unique.is_some());
    }
}
