//! Elasticsearch-compatible executor over HTTP

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::{BackendError, BackendExecutor, RawBucket, RawProviderResult};
use crate::config::BackendConfig;
use crate::query::{BucketOrder, Clause, Metric, ProviderQuery, TermsAggregation};

/// Name of the pipeline step that re-sorts buckets by a metric
const BUCKET_SORT_STEP: &str = "product_by_unique";

/// Executes provider queries as `_search` requests against one cluster
#[derive(Clone)]
pub struct ElasticsearchExecutor {
    client: Client,
    base_url: String,
    search_timeout: String,
}

impl ElasticsearchExecutor {
    pub fn new(base_url: &str, search_timeout: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent("dlstats/0.1.0")
            .build()
            .context("failed to build HTTP client for the search backend")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            search_timeout: search_timeout.to_string(),
        })
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        Self::new(&config.url, &config.search_timeout)
    }

    fn search_url(&self, index_pattern: &str) -> String {
        format!("{}/{}/_search", self.base_url, index_pattern)
    }
}

#[async_trait]
impl BackendExecutor for ElasticsearchExecutor {
    async fn execute(
        &self,
        index_pattern: &str,
        query: &ProviderQuery,
        result_cap: usize,
        timeout: Duration,
    ) -> Result<RawProviderResult, BackendError> {
        let mut body = search_body(query, result_cap);
        body["timeout"] = Value::String(self.search_timeout.clone());

        let url = self.search_url(index_pattern);
        debug!(provider = %query.provider, %url, "Sending search request");

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(BackendError::Unavailable(format!(
                "{} returned HTTP {}: {}",
                index_pattern,
                status,
                detail.chars().take(200).collect::<String>()
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| map_transport_error(e, timeout))?;

        if payload.get("timed_out").and_then(Value::as_bool) == Some(true) {
            warn!(provider = %query.provider, "Search backend reported a timed out search");
            return Err(BackendError::Timeout(timeout));
        }

        parse_response(&payload, query)
    }
}

fn map_transport_error(error: reqwest::Error, timeout: Duration) -> BackendError {
    if error.is_timeout() {
        BackendError::Timeout(timeout)
    } else if error.is_decode() {
        BackendError::MalformedResponse(error.to_string())
    } else {
        BackendError::Unavailable(error.to_string())
    }
}

/// Render a provider query as an Elasticsearch search body
pub fn search_body(query: &ProviderQuery, result_cap: usize) -> Value {
    let filters: Vec<Value> = query.clauses.iter().map(render_clause).collect();

    let mut aggs = Map::new();
    for aggregation in &query.aggregations {
        aggs.insert(aggregation.name().to_string(), render_aggregation(aggregation));
    }

    json!({
        "size": result_cap,
        "query": { "bool": { "filter": filters } },
        "aggs": aggs,
    })
}

fn render_clause(clause: &Clause) -> Value {
    match clause {
        Clause::Since { field, expr } => json!({ "range": { field: { "gte": expr } } }),
        Clause::GreaterThan { field, bound } => json!({ "range": { field: { "gt": bound } } }),
        Clause::Match { field, value } => json!({ "match": { field: value } }),
        Clause::Regexp { field, pattern } => json!({ "regexp": { field: pattern } }),
    }
}

fn render_aggregation(aggregation: &TermsAggregation) -> Value {
    let mut terms = json!({
        "field": aggregation.field,
        "size": aggregation.size,
    });
    if let BucketOrder::MetricDesc { metric } = &aggregation.order {
        terms["order"] = json!({ metric.as_str(): "desc" });
    }

    let mut sub_aggs = Map::new();
    match &aggregation.metric {
        Some(Metric::Cardinality { name, field }) => {
            sub_aggs.insert(name.clone(), json!({ "cardinality": { "field": field } }));
        }
        Some(Metric::Sum { name, field }) => {
            sub_aggs.insert(name.clone(), json!({ "sum": { "field": field } }));
        }
        None => {}
    }
    if let BucketOrder::PipelineSortDesc { metric } = &aggregation.order {
        sub_aggs.insert(
            BUCKET_SORT_STEP.to_string(),
            json!({ "bucket_sort": { "sort": [ { metric.as_str(): { "order": "desc" } } ] } }),
        );
    }

    let mut rendered = json!({ "terms": terms });
    if !sub_aggs.is_empty() {
        rendered["aggs"] = Value::Object(sub_aggs);
    }
    rendered
}

/// Pull the requested aggregations' buckets out of a search response
pub fn parse_response(
    payload: &Value,
    query: &ProviderQuery,
) -> Result<RawProviderResult, BackendError> {
    let aggregations = payload
        .get("aggregations")
        .and_then(Value::as_object)
        .ok_or_else(|| BackendError::MalformedResponse("missing 'aggregations'".to_string()))?;

    let mut result = RawProviderResult::new();
    for aggregation in &query.aggregations {
        let name = aggregation.name();
        let buckets = aggregations
            .get(name)
            .and_then(|a| a.get("buckets"))
            .and_then(Value::as_array)
            .ok_or_else(|| {
                BackendError::MalformedResponse(format!("missing buckets for '{name}'"))
            })?;

        let metric = aggregation.metric.as_ref().map(Metric::name);
        let parsed = buckets
            .iter()
            .map(|bucket| parse_bucket(bucket, metric))
            .collect::<Result<Vec<_>, _>>()?;
        result.insert(name, parsed);
    }

    Ok(result)
}

fn parse_bucket(bucket: &Value, metric: Option<&str>) -> Result<RawBucket, BackendError> {
    let key = bucket
        .get("key")
        .cloned()
        .ok_or_else(|| BackendError::MalformedResponse("bucket without 'key'".to_string()))?;
    let doc_count = bucket
        .get("doc_count")
        .and_then(Value::as_u64)
        .ok_or_else(|| BackendError::MalformedResponse("bucket without 'doc_count'".to_string()))?;

    let mut metrics = HashMap::new();
    if let Some(name) = metric {
        // Absent sub-aggregation stays absent; a null value is kept as None
        if let Some(metric_value) = bucket.get(name) {
            metrics.insert(
                name.to_string(),
                metric_value.get("value").and_then(Value::as_f64),
            );
        }
    }

    Ok(RawBucket {
        key,
        doc_count,
        metrics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{build_query, CanonicalFilter, QueryProfile, DEFAULT_MIN_BYTES};
    use crate::schema::SchemaRegistry;

    fn loggy_query(profile: QueryProfile) -> ProviderQuery {
        let registry = SchemaRegistry::builtin();
        let filter = CanonicalFilter::new("30d", "netbeans", DEFAULT_MIN_BYTES, profile).unwrap();
        build_query(&filter, registry.get("loggy").unwrap())
    }

    #[test]
    fn renders_bool_filter() {
        let body = search_body(&loggy_query(QueryProfile::Full), 0);
        assert_eq!(body["size"], 0);

        let filters = body["query"]["bool"]["filter"].as_array().unwrap();
        assert_eq!(filters.len(), 6);
        assert_eq!(filters[0], json!({ "range": { "@timestamp": { "gte": "now-30d" } } }));
        assert_eq!(filters[1], json!({ "match": { "request_method": "GET" } }));
        assert_eq!(filters[2], json!({ "range": { "bytes": { "gt": 5000 } } }));
        assert_eq!(filters[3], json!({ "match": { "uri": "netbeans" } }));
        assert_eq!(filters[4], json!({ "regexp": { "uri.keyword": r".*\.[a-z0-9]+" } }));
        assert_eq!(filters[5], json!({ "match": { "vhost": "downloads.apache.org" } }));
    }

    #[test]
    fn renders_aggregations() {
        let body = search_body(&loggy_query(QueryProfile::Full), 0);
        let aggs = &body["aggs"];

        assert_eq!(
            aggs["request_per_url"],
            json!({
                "terms": { "field": "uri.keyword", "size": 50 },
                "aggs": {
                    "unique_ips": { "cardinality": { "field": "client_ip.keyword" } },
                    "product_by_unique": {
                        "bucket_sort": { "sort": [ { "unique_ips": { "order": "desc" } } ] }
                    }
                }
            })
        );
        assert_eq!(
            aggs["requests_by_traffic"],
            json!({
                "terms": { "field": "uri.keyword", "size": 50, "order": { "bytes_sum": "desc" } },
                "aggs": { "bytes_sum": { "sum": { "field": "bytes" } } }
            })
        );
        assert_eq!(aggs["by_country"]["terms"]["field"], "geo_country.keyword");
    }

    #[test]
    fn lean_path_aggregation_has_no_sub_aggregations() {
        let body = search_body(&loggy_query(QueryProfile::Lean), 0);
        assert_eq!(
            body["aggs"]["request_per_url"],
            json!({ "terms": { "field": "uri.keyword", "size": 50 } })
        );
    }

    #[test]
    fn parses_buckets_and_metrics() {
        let query = loggy_query(QueryProfile::Full);
        let payload = json!({
            "timed_out": false,
            "aggregations": {
                "request_per_url": { "buckets": [
                    { "key": "/netbeans/a.zip", "doc_count": 7, "unique_ips": { "value": 4 } }
                ]},
                "by_country": { "buckets": [
                    { "key": "DE", "doc_count": 9, "unique_ips": { "value": 5 } }
                ]},
                "requests_by_traffic": { "buckets": [
                    { "key": "/netbeans/a.zip", "doc_count": 7, "bytes_sum": { "value": null } }
                ]}
            }
        });

        let result = parse_response(&payload, &query).unwrap();
        let by_path = result.buckets(crate::query::AggregationKind::ByPath);
        assert_eq!(by_path[0].key_str(), Some("/netbeans/a.zip"));
        assert_eq!(by_path[0].doc_count, 7);
        assert_eq!(by_path[0].metric("unique_ips"), Some(4.0));

        let by_traffic = result.buckets(crate::query::AggregationKind::ByTraffic);
        assert_eq!(by_traffic[0].metric("bytes_sum"), None);
    }

    #[test]
    fn missing_aggregation_is_malformed() {
        let query = loggy_query(QueryProfile::Full);
        let payload = json!({ "aggregations": { "by_country": { "buckets": [] } } });
        assert!(matches!(
            parse_response(&payload, &query),
            Err(BackendError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_response(&json!({ "hits": {} }), &query),
            Err(BackendError::MalformedResponse(_))
        ));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let executor = ElasticsearchExecutor::new("http://localhost:9200/", "60s").unwrap();
        assert_eq!(
            executor.search_url("fastly-*"),
            "http://localhost:9200/fastly-*/_search"
        );
    }
}
