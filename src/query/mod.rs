//! Canonical filters and the provider-scoped queries built from them

pub mod filter;

pub use filter::{
    CanonicalFilter, FilterDefaults, FilterError, QueryProfile, DEFAULT_DURATION, DEFAULT_MIN_BYTES,
    DEFAULT_PROJECT,
};

use serde::Serialize;

use crate::schema::{CanonicalField, Provider};

/// Bucket cap shared by all three aggregations
pub const MAX_HITS: usize = 50;

/// Name of the distinct-client metric attached to path and country buckets
pub const UNIQUE_CLIENTS_METRIC: &str = "unique_ips";

/// Name of the byte-sum metric attached to traffic buckets
pub const BYTES_SUM_METRIC: &str = "bytes_sum";

/// Matches paths that end in a file extension
pub const EXTENSION_PATTERN: &str = r".*\.[a-z0-9]+";

/// The three report dimensions every provider is asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AggregationKind {
    ByPath,
    ByCountry,
    ByTraffic,
}

impl AggregationKind {
    pub const ALL: [AggregationKind; 3] = [
        AggregationKind::ByPath,
        AggregationKind::ByCountry,
        AggregationKind::ByTraffic,
    ];

    /// Aggregation name as sent to and returned by the backend
    pub fn name(self) -> &'static str {
        match self {
            AggregationKind::ByPath => "request_per_url",
            AggregationKind::ByCountry => "by_country",
            AggregationKind::ByTraffic => "requests_by_traffic",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Clause {
    /// Field is at or after a relative time expression such as `now-30d`
    Since { field: String, expr: String },
    /// Numeric field strictly greater than a bound
    GreaterThan { field: String, bound: u64 },
    /// Full-text match
    Match { field: String, value: String },
    /// Regular expression over a keyword sub-field
    Regexp { field: String, pattern: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Metric {
    Cardinality { name: String, field: String },
    Sum { name: String, field: String },
}

impl Metric {
    pub fn name(&self) -> &str {
        match self {
            Metric::Cardinality { name, .. } | Metric::Sum { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BucketOrder {
    /// Backend default (document count descending)
    DocCount,
    /// Terms ordered by a metric at collection time
    MetricDesc { metric: String },
    /// Collected buckets re-sorted by a metric in a pipeline step
    PipelineSortDesc { metric: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TermsAggregation {
    pub kind: AggregationKind,
    pub field: String,
    pub size: usize,
    pub metric: Option<Metric>,
    pub order: BucketOrder,
}

impl TermsAggregation {
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

/// Backend-agnostic description of one provider's search
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderQuery {
    pub provider: String,
    pub index_pattern: String,
    pub clauses: Vec<Clause>,
    pub aggregations: Vec<TermsAggregation>,
}

impl ProviderQuery {
    pub fn aggregation(&self, kind: AggregationKind) -> Option<&TermsAggregation> {
        self.aggregations.iter().find(|a| a.kind == kind)
    }

    /// Whether path buckets carry a distinct-client count
    pub fn requests_unique_clients(&self) -> bool {
        self.aggregation(AggregationKind::ByPath)
            .is_some_and(|a| a.metric.is_some())
    }
}

/// Translate a canonical filter into one provider's field names
pub fn build_query(filter: &CanonicalFilter, provider: &Provider) -> ProviderQuery {
    let path = provider.field(CanonicalField::RequestPath);
    let path_keyword = provider.keyword_field(CanonicalField::RequestPath);
    let client_keyword = provider.keyword_field(CanonicalField::ClientAddress);
    let unique_clients = || Metric::Cardinality {
        name: UNIQUE_CLIENTS_METRIC.to_string(),
        field: client_keyword.clone(),
    };

    let mut clauses = vec![Clause::Since {
        field: provider.field(CanonicalField::Timestamp).to_string(),
        expr: format!("now-{}", filter.duration()),
    }];
    if filter.profile().filters_get() {
        clauses.push(Clause::Match {
            field: provider.field(CanonicalField::RequestMethod).to_string(),
            value: "GET".to_string(),
        });
    }
    clauses.push(Clause::GreaterThan {
        field: provider.field(CanonicalField::Bytes).to_string(),
        bound: filter.min_bytes(),
    });
    clauses.push(Clause::Match {
        field: path.to_string(),
        value: filter.project().to_string(),
    });
    clauses.push(Clause::Regexp {
        field: path_keyword.clone(),
        pattern: filter.extension_pattern().to_string(),
    });
    clauses.push(Clause::Match {
        field: provider.field(CanonicalField::VirtualHost).to_string(),
        value: provider.host_filter_value().to_string(),
    });

    let by_path = if filter.profile().counts_unique_clients() {
        TermsAggregation {
            kind: AggregationKind::ByPath,
            field: path_keyword.clone(),
            size: MAX_HITS,
            metric: Some(unique_clients()),
            order: BucketOrder::PipelineSortDesc {
                metric: UNIQUE_CLIENTS_METRIC.to_string(),
            },
        }
    } else {
        TermsAggregation {
            kind: AggregationKind::ByPath,
            field: path_keyword.clone(),
            size: MAX_HITS,
            metric: None,
            order: BucketOrder::DocCount,
        }
    };

    let by_country = TermsAggregation {
        kind: AggregationKind::ByCountry,
        field: provider.keyword_field(CanonicalField::GeoCountry),
        size: MAX_HITS,
        metric: Some(unique_clients()),
        order: BucketOrder::PipelineSortDesc {
            metric: UNIQUE_CLIENTS_METRIC.to_string(),
        },
    };

    let by_traffic = TermsAggregation {
        kind: AggregationKind::ByTraffic,
        field: path_keyword,
        size: MAX_HITS,
        metric: Some(Metric::Sum {
            name: BYTES_SUM_METRIC.to_string(),
            field: provider.field(CanonicalField::Bytes).to_string(),
        }),
        order: BucketOrder::MetricDesc {
            metric: BYTES_SUM_METRIC.to_string(),
        },
    };

    ProviderQuery {
        provider: provider.name().to_string(),
        index_pattern: provider.index_pattern().to_string(),
        clauses,
        aggregations: vec![by_path, by_country, by_traffic],
    }
}
