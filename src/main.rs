use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use dlstats::api;
use dlstats::cache::ReportCache;
use dlstats::config::Config;
use dlstats::federation::Federation;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration");

    // Providers are resolved once here; an unknown name stops startup
    let federation = Arc::new(Federation::from_config(&config)?);
    info!(
        "🔎 Federating over providers [{}] at {}",
        federation.registry().names().join(", "),
        config.backend.url
    );
    info!(
        "   - default project '{}', window {}, profile {:?}",
        config.federation.defaults.project,
        config.federation.defaults.duration,
        config.federation.defaults.profile
    );

    let reports = Arc::new(ReportCache::new(
        federation,
        config.federation.cache_max_entries,
        config.federation.cache_ttl_secs,
    ));
    if config.federation.cache_ttl_secs == 0 {
        info!("Report cache disabled");
    } else {
        info!("Report cache TTL {}s", config.federation.cache_ttl_secs);
    }

    if let Some(ref static_dir) = config.frontend.static_dir {
        info!("🎨 Serving static files from directory: {}", static_dir);
    }

    let router = api::create_api_router(
        reports,
        config.federation.defaults.clone(),
        config.frontend.clone(),
    );

    let api_addr = format!("{}:{}", config.api_server.host, config.api_server.port);
    let listener = tokio::net::TcpListener::bind(&api_addr).await?;
    info!("🚀 API server listening on http://{}", api_addr);
    info!("   - Download stats at http://{}/api/stats", api_addr);

    axum::serve(listener, router).await?;

    Ok(())
}
