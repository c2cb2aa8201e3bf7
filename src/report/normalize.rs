//! Per-provider normalization of raw buckets
//!
//! Backends disagree on path spelling (doubled separators, a leading
//! project directory) and on what an unknown country looks like. This pass
//! turns one provider's raw buckets into canonical keys and drops anything
//! that cannot be counted.

use tracing::debug;

use super::{tally_add, PartialReport};
use crate::backend::{RawBucket, RawProviderResult};
use crate::query::{AggregationKind, BYTES_SUM_METRIC, UNIQUE_CLIENTS_METRIC};

/// Canonical form of a request path
///
/// Runs of `/` collapse to one. An absolute path loses its leading `/` and,
/// at most once, a leading `<project>/` segment (ASCII case-insensitive).
/// The result never starts with `/`, so feeding it back in returns it
/// unchanged.
pub fn canonical_path(raw: &str, project: &str) -> String {
    let mut collapsed = String::with_capacity(raw.len());
    let mut previous_slash = false;
    for c in raw.chars() {
        if c == '/' {
            if previous_slash {
                continue;
            }
            previous_slash = true;
        } else {
            previous_slash = false;
        }
        collapsed.push(c);
    }

    if !collapsed.starts_with('/') {
        return collapsed;
    }
    let relative = &collapsed[1..];

    match relative.split_once('/') {
        Some((first, rest)) if !project.is_empty() && first.eq_ignore_ascii_case(project) => {
            rest.to_string()
        }
        _ => relative.to_string(),
    }
}

/// Upper-cased ISO 3166 alpha-2 code, or `None` for placeholders and junk
pub fn country_code(raw: &str) -> Option<String> {
    let code = raw.trim();
    if code.len() != 2 || !code.bytes().all(|b| b.is_ascii_alphabetic()) {
        return None;
    }
    Some(code.to_ascii_uppercase())
}

/// Normalize one provider's raw result into canonical tallies
pub fn normalize(result: &RawProviderResult, project: &str, count_unique: bool) -> PartialReport {
    let mut partial = PartialReport::new(count_unique);

    for bucket in result.buckets(AggregationKind::ByTraffic) {
        match traffic_entry(bucket, project) {
            Some((path, bytes)) => tally_add(&mut partial.by_bytes, path, bytes),
            None => partial.discarded += 1,
        }
    }

    for bucket in result.buckets(AggregationKind::ByPath) {
        match request_entry(bucket, project, count_unique) {
            Some((path, hits, unique)) => {
                if let (Some(tally), Some(unique)) = (partial.by_requests_unique.as_mut(), unique)
                {
                    tally_add(tally, path.clone(), unique);
                }
                tally_add(&mut partial.by_requests, path, hits);
            }
            None => partial.discarded += 1,
        }
    }

    for bucket in result.buckets(AggregationKind::ByCountry) {
        match country_entry(bucket) {
            Some((code, clients)) => tally_add(&mut partial.by_country, code, clients),
            None => partial.discarded += 1,
        }
    }

    if partial.discarded > 0 {
        debug!(discarded = partial.discarded, "Dropped unusable buckets");
    }

    partial
}

fn traffic_entry(bucket: &RawBucket, project: &str) -> Option<(String, u64)> {
    let path = canonical_path(bucket.key_str()?, project);
    let bytes = count(bucket.metric(BYTES_SUM_METRIC)?)?;
    if path.is_empty() {
        return None;
    }
    Some((path, bytes))
}

fn request_entry(
    bucket: &RawBucket,
    project: &str,
    count_unique: bool,
) -> Option<(String, u64, Option<u64>)> {
    let path = canonical_path(bucket.key_str()?, project);
    // Backend regexp dialects differ, so the extension rule is checked again here
    if !path.contains('.') || path.ends_with('/') {
        return None;
    }
    if bucket.doc_count == 0 {
        return None;
    }

    let unique = if count_unique {
        Some(bucket.metric(UNIQUE_CLIENTS_METRIC).and_then(count_or_zero)?)
    } else {
        None
    };

    Some((path, bucket.doc_count, unique))
}

fn country_entry(bucket: &RawBucket) -> Option<(String, u64)> {
    let code = country_code(bucket.key_str()?)?;
    let clients = count(bucket.metric(UNIQUE_CLIENTS_METRIC)?)?;
    Some((code, clients))
}

/// Positive whole count from a metric value
fn count(value: f64) -> Option<u64> {
    count_or_zero(value).filter(|v| *v > 0)
}

fn count_or_zero(value: f64) -> Option<u64> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(value.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn traffic(key: &str, bytes: f64) -> RawBucket {
        RawBucket::new(key, 1).with_metric(BYTES_SUM_METRIC, bytes)
    }

    fn hits(key: &str, doc_count: u64, unique: f64) -> RawBucket {
        RawBucket::new(key, doc_count).with_metric(UNIQUE_CLIENTS_METRIC, unique)
    }

    #[test]
    fn strips_one_project_prefix() {
        assert_eq!(
            canonical_path("/netbeans/netbeans/installer.exe", "netbeans"),
            "netbeans/installer.exe"
        );
        assert_eq!(canonical_path("/NetBeans/x.zip", "netbeans"), "x.zip");
        assert_eq!(canonical_path("//netbeans//x.zip", "netbeans"), "x.zip");
        assert_eq!(canonical_path("/netbeansx/y.zip", "netbeans"), "netbeansx/y.zip");
    }

    #[test]
    fn relative_keys_keep_their_project_segment() {
        // Only absolute keys carry the project directory to strip
        assert_eq!(canonical_path("netbeans/a.zip", "netbeans"), "netbeans/a.zip");
        assert_eq!(canonical_path("netbeans//a.zip", "netbeans"), "netbeans/a.zip");
        assert_eq!(canonical_path("/netbeans/a.zip", "netbeans"), "a.zip");
    }

    #[test]
    fn collapses_separators() {
        assert_eq!(canonical_path("//a///b.zip", "netbeans"), "a/b.zip");
        assert_eq!(canonical_path("a//b///c.tar.gz", "netbeans"), "a/b/c.tar.gz");
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let samples = [
            "/netbeans/netbeans/installer.exe",
            "//a///b.zip",
            "/netbeans/12.0/netbeans-12.0-bin.zip",
            "/httpd//httpd-2.4.58.tar.bz2",
            "relative//path/file.txt",
            "/",
            "",
            "/netbeans",
            "/docs/",
        ];
        for raw in samples {
            let once = canonical_path(raw, "netbeans");
            assert!(!once.contains("//"), "{once} has adjacent separators");
            assert_eq!(canonical_path(&once, "netbeans"), once, "not idempotent for {raw}");
        }
    }

    #[test]
    fn country_codes() {
        assert_eq!(country_code("de"), Some("DE".to_string()));
        assert_eq!(country_code(" US "), Some("US".to_string()));
        for bad in ["", "-", "--", "USA", "A1", "?"] {
            assert_eq!(country_code(bad), None, "{bad:?} should be unresolvable");
        }
    }

    #[test]
    fn zero_and_missing_bytes_are_dropped() {
        let mut missing = RawBucket::new("/netbeans/c.zip", 2);
        missing.metrics.insert(BYTES_SUM_METRIC.to_string(), None);

        let result = RawProviderResult::new().with_buckets(
            AggregationKind::ByTraffic,
            vec![
                traffic("/netbeans/a.zip", 0.0),
                traffic("/netbeans/b.zip", 12_345.0),
                missing,
                RawBucket::new("/netbeans/d.zip", 1),
            ],
        );

        let partial = normalize(&result, "netbeans", true);
        assert_eq!(partial.by_bytes.len(), 1);
        assert_eq!(partial.by_bytes["b.zip"], 12_345);
        assert!(!partial.by_bytes.contains_key("a.zip"));
        assert_eq!(partial.discarded, 3);
    }

    #[test]
    fn requests_need_a_file_extension() {
        let result = RawProviderResult::new().with_buckets(
            AggregationKind::ByPath,
            vec![hits("docs/", 10, 5.0), hits("pkg/readme.txt", 4, 3.0)],
        );

        let partial = normalize(&result, "netbeans", true);
        assert!(!partial.by_requests.contains_key("docs/"));
        assert_eq!(partial.by_requests["pkg/readme.txt"], 4);
        assert_eq!(partial.by_requests_unique.unwrap()["pkg/readme.txt"], 3);
    }

    #[test]
    fn paths_that_canonicalize_together_accumulate() {
        let result = RawProviderResult::new().with_buckets(
            AggregationKind::ByPath,
            vec![hits("/netbeans/a.zip", 2, 1.0), hits("//a.zip", 3, 2.0)],
        );

        let partial = normalize(&result, "netbeans", true);
        assert_eq!(partial.by_requests["a.zip"], 5);
        assert_eq!(partial.by_requests_unique.unwrap()["a.zip"], 3);
    }

    #[test]
    fn unique_metric_is_required_only_when_requested() {
        let bare = RawBucket::new("/netbeans/a.zip", 2);
        let result =
            RawProviderResult::new().with_buckets(AggregationKind::ByPath, vec![bare]);

        let full = normalize(&result, "netbeans", true);
        assert!(full.by_requests.is_empty());
        assert_eq!(full.discarded, 1);

        let lean = normalize(&result, "netbeans", false);
        assert_eq!(lean.by_requests["a.zip"], 2);
        assert!(lean.by_requests_unique.is_none());
    }

    #[test]
    fn placeholder_countries_are_dropped() {
        let result = RawProviderResult::new().with_buckets(
            AggregationKind::ByCountry,
            vec![
                hits("-", 9, 9.0),
                hits("", 4, 4.0),
                hits("gb", 3, 2.0),
                hits("FR", 1, 0.0),
                RawBucket::new(17, 1).with_metric(UNIQUE_CLIENTS_METRIC, 1.0),
            ],
        );

        let partial = normalize(&result, "netbeans", true);
        assert_eq!(partial.by_country.len(), 1);
        assert_eq!(partial.by_country["GB"], 2);
        assert!(!partial.by_country.contains_key("-"));
        assert!(!partial.by_country.contains_key(""));
    }

    #[test]
    fn normalizing_canonical_keys_changes_nothing() {
        let raw = RawProviderResult::new()
            .with_buckets(
                AggregationKind::ByPath,
                vec![hits("/netbeans//a/b.zip", 3, 2.0)],
            )
            .with_buckets(
                AggregationKind::ByTraffic,
                vec![traffic("/netbeans/a//b.zip", 9000.0)],
            );
        let first = normalize(&raw, "netbeans", true);

        let canonical = RawProviderResult::new()
            .with_buckets(
                AggregationKind::ByPath,
                first
                    .by_requests
                    .iter()
                    .map(|(k, v)| hits(k, *v, 2.0))
                    .collect(),
            )
            .with_buckets(
                AggregationKind::ByTraffic,
                first
                    .by_bytes
                    .iter()
                    .map(|(k, v)| traffic(k, *v as f64))
                    .collect(),
            );
        let second = normalize(&canonical, "netbeans", true);

        assert_eq!(first.by_requests, second.by_requests);
        assert_eq!(first.by_bytes, second.by_bytes);
        assert_eq!(first.by_requests_unique, second.by_requests_unique);
    }
}
