use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::query::{FilterDefaults, QueryProfile};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api_server: ServerConfig,
    pub backend: BackendConfig,
    pub federation: FederationConfig,
    pub frontend: FrontendConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the search cluster
    pub url: String,
    /// Per-provider deadline on the client side
    #[serde(default = "BackendConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    /// Search timeout passed to the backend itself, e.g. `60s`
    pub search_timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationConfig {
    /// Providers to query, in merge order
    pub providers: Vec<String>,
    pub defaults: FilterDefaults,
    /// Report cache lifetime; 0 disables caching
    #[serde(default = "FederationConfig::default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "FederationConfig::default_cache_entries")]
    pub cache_max_entries: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontendConfig {
    /// Directory of static files served at `/`
    /// If None, only the API is served
    pub static_dir: Option<String>,
}

impl BackendConfig {
    const fn default_timeout_secs() -> u64 {
        45
    }
}

impl FederationConfig {
    const fn default_cache_ttl_secs() -> u64 {
        300
    }

    const fn default_cache_entries() -> u64 {
        1000
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let api_host = std::env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let api_port = std::env::var("API_PORT")
            .unwrap_or_else(|_| "8082".to_string())
            .parse::<u16>()
            .context("API_PORT must be a valid port number")?;

        let backend_url = std::env::var("ELASTICSEARCH_URL")
            .unwrap_or_else(|_| "http://localhost:9200/".to_string());
        let timeout_secs = std::env::var("BACKEND_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or_else(BackendConfig::default_timeout_secs);
        let search_timeout =
            std::env::var("BACKEND_SEARCH_TIMEOUT").unwrap_or_else(|_| "60s".to_string());

        let providers = std::env::var("DLSTATS_PROVIDERS")
            .unwrap_or_else(|_| "fastly,loggy".to_string())
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();

        let mut defaults = FilterDefaults::default();
        if let Ok(project) = std::env::var("DLSTATS_DEFAULT_PROJECT") {
            defaults.project = project;
        }
        if let Ok(duration) = std::env::var("DLSTATS_DEFAULT_DURATION") {
            defaults.duration = duration;
        }
        if let Ok(min_bytes) = std::env::var("DLSTATS_MIN_BYTES") {
            defaults.min_bytes = min_bytes
                .parse::<u64>()
                .context("DLSTATS_MIN_BYTES must be a non-negative integer")?;
        }
        if let Ok(profile) = std::env::var("DLSTATS_QUERY_PROFILE") {
            defaults.profile = match profile.parse::<QueryProfile>() {
                Ok(profile) => profile,
                Err(e) => {
                    tracing::warn!("{e}, falling back to 'full'. Supported values: full, lean");
                    QueryProfile::Full
                }
            };
        }

        // Requests that leave a field out fall back to these, so reject them now
        defaults
            .resolve()
            .context("invalid DLSTATS_DEFAULT_DURATION/DLSTATS_DEFAULT_PROJECT")?;

        let cache_ttl_secs = std::env::var("DLSTATS_CACHE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or_else(FederationConfig::default_cache_ttl_secs);
        let cache_max_entries = std::env::var("DLSTATS_CACHE_MAX_ENTRIES")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or_else(FederationConfig::default_cache_entries);

        let frontend_static_dir = std::env::var("DLSTATS_STATIC_DIR").ok();

        Ok(Config {
            api_server: ServerConfig {
                host: api_host,
                port: api_port,
            },
            backend: BackendConfig {
                url: backend_url,
                timeout_secs,
                search_timeout,
            },
            federation: FederationConfig {
                providers,
                defaults,
                cache_ttl_secs,
                cache_max_entries,
            },
            frontend: FrontendConfig {
                static_dir: frontend_static_dir,
            },
        })
    }
}
