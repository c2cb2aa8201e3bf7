use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

use crate::federation::{Federation, FederationOutcome, StatsError};
use crate::query::{CanonicalFilter, FilterDefaults, QueryProfile};
use crate::report::Report;

type CacheKey = (String, String, u64, QueryProfile);

/// Result of a cached report lookup
#[derive(Debug, Clone)]
pub struct ReportLookup {
    pub report: Arc<Report>,
    pub metadata: LookupMetadata,
}

#[derive(Debug, Clone)]
pub struct LookupMetadata {
    pub cache_hit: bool,
    /// Providers that failed while building this report; empty on a cache hit
    pub failed_providers: Vec<String>,
}

/// Federation wrapper that keeps recent complete reports in memory
pub struct ReportCache {
    /// Underlying federation
    inner: Arc<Federation>,
    /// Complete reports by filter (Moka cache); `None` when caching is off
    reports: Option<Cache<CacheKey, Arc<Report>>>,
}

impl ReportCache {
    pub fn new(inner: Arc<Federation>, max_entries: u64, ttl_secs: u64) -> Self {
        let reports = (ttl_secs > 0 && max_entries > 0).then(|| {
            Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(Duration::from_secs(ttl_secs))
                .build()
        });

        Self { inner, reports }
    }

    /// Pass-through wrapper with caching disabled
    pub fn uncached(inner: Arc<Federation>) -> Self {
        Self::new(inner, 0, 0)
    }

    /// Validate request fields, then serve from cache or federate
    pub async fn report_for(
        &self,
        duration: Option<&str>,
        project: Option<&str>,
        defaults: &FilterDefaults,
    ) -> Result<ReportLookup, StatsError> {
        let filter = CanonicalFilter::from_params(duration, project, defaults)?;
        Ok(self.report(&filter).await)
    }

    pub async fn report(&self, filter: &CanonicalFilter) -> ReportLookup {
        let key = cache_key(filter);

        if let Some(cache) = &self.reports {
            if let Some(report) = cache.get(&key).await {
                return ReportLookup {
                    report,
                    metadata: LookupMetadata {
                        cache_hit: true,
                        failed_providers: Vec::new(),
                    },
                };
            }
        }

        let outcome = self.inner.report(filter).await;
        let degraded = outcome.is_degraded();
        let FederationOutcome {
            report, failures, ..
        } = outcome;
        let report = Arc::new(report);

        // Degraded reports are recomputed next time instead of pinning the gap
        if let (Some(cache), false) = (&self.reports, degraded) {
            cache.insert(key, Arc::clone(&report)).await;
        }

        ReportLookup {
            report,
            metadata: LookupMetadata {
                cache_hit: false,
                failed_providers: failures.into_iter().map(|f| f.provider).collect(),
            },
        }
    }
}

fn cache_key(filter: &CanonicalFilter) -> CacheKey {
    (
        filter.duration().to_string(),
        filter.project().to_string(),
        filter.min_bytes(),
        filter.profile(),
    )
}
