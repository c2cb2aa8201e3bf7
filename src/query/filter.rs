use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::EXTENSION_PATTERN;

pub const DEFAULT_DURATION: &str = "30d";
pub const DEFAULT_PROJECT: &str = "netbeans";

/// Responses at or below this size are not counted as downloads
pub const DEFAULT_MIN_BYTES: u64 = 5000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("duration must not be empty")]
    EmptyDuration,
    #[error("invalid duration '{0}': expected a number followed by one of y, M, w, d, h, H, m, s")]
    InvalidDuration(String),
    #[error("project must not be empty")]
    EmptyProject,
    #[error("invalid project '{0}': only letters, digits, '.', '_' and '-' are allowed")]
    InvalidProject(String),
}

/// Which optional clauses and metrics a query carries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryProfile {
    /// GET requests only, with distinct-client counts per path
    #[default]
    Full,
    /// Any request method, hit counts only
    Lean,
}

impl QueryProfile {
    pub fn filters_get(self) -> bool {
        matches!(self, QueryProfile::Full)
    }

    pub fn counts_unique_clients(self) -> bool {
        matches!(self, QueryProfile::Full)
    }
}

impl std::str::FromStr for QueryProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(QueryProfile::Full),
            "lean" => Ok(QueryProfile::Lean),
            other => Err(format!("unknown query profile '{other}'")),
        }
    }
}

/// One request's filter, validated once and immutable afterwards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalFilter {
    duration: String,
    project: String,
    min_bytes: u64,
    profile: QueryProfile,
}

impl CanonicalFilter {
    pub fn new(
        duration: impl Into<String>,
        project: impl Into<String>,
        min_bytes: u64,
        profile: QueryProfile,
    ) -> Result<Self, FilterError> {
        let duration = duration.into().trim().to_string();
        let project = project.into().trim().to_string();

        validate_duration(&duration)?;
        validate_project(&project)?;

        Ok(Self {
            duration,
            project,
            min_bytes,
            profile,
        })
    }

    /// Build from optional request fields; missing or blank fields take the defaults
    pub fn from_params(
        duration: Option<&str>,
        project: Option<&str>,
        defaults: &FilterDefaults,
    ) -> Result<Self, FilterError> {
        let duration = non_blank(duration).unwrap_or(defaults.duration.as_str());
        let project = non_blank(project).unwrap_or(defaults.project.as_str());
        Self::new(duration, project, defaults.min_bytes, defaults.profile)
    }

    /// Relative window such as `30d`, interpreted as `now-30d`
    pub fn duration(&self) -> &str {
        &self.duration
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn min_bytes(&self) -> u64 {
        self.min_bytes
    }

    pub fn profile(&self) -> QueryProfile {
        self.profile
    }

    pub fn extension_pattern(&self) -> &'static str {
        EXTENSION_PATTERN
    }
}

/// Values used when a request leaves a field out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDefaults {
    pub duration: String,
    pub project: String,
    pub min_bytes: u64,
    pub profile: QueryProfile,
}

impl Default for FilterDefaults {
    fn default() -> Self {
        Self {
            duration: DEFAULT_DURATION.to_string(),
            project: DEFAULT_PROJECT.to_string(),
            min_bytes: DEFAULT_MIN_BYTES,
            profile: QueryProfile::default(),
        }
    }
}

impl FilterDefaults {
    /// The filter a request with no fields resolves to
    pub fn resolve(&self) -> Result<CanonicalFilter, FilterError> {
        CanonicalFilter::new(
            self.duration.as_str(),
            self.project.as_str(),
            self.min_bytes,
            self.profile,
        )
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn validate_duration(duration: &str) -> Result<(), FilterError> {
    if duration.is_empty() {
        return Err(FilterError::EmptyDuration);
    }

    let invalid = || FilterError::InvalidDuration(duration.to_string());
    let unit = match duration.chars().last() {
        Some(unit) => unit,
        None => return Err(invalid()),
    };
    let amount = &duration[..duration.len() - unit.len_utf8()];

    if amount.is_empty() || !amount.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    if !matches!(unit, 'y' | 'M' | 'w' | 'd' | 'h' | 'H' | 'm' | 's') {
        return Err(invalid());
    }
    match amount.parse::<u32>() {
        Ok(0) | Err(_) => Err(invalid()),
        Ok(_) => Ok(()),
    }
}

fn validate_project(project: &str) -> Result<(), FilterError> {
    if project.is_empty() {
        return Err(FilterError::EmptyProject);
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-');
    if !project.chars().all(allowed) {
        return Err(FilterError::InvalidProject(project.to_string()));
    }
    Ok(())
}
