use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir};

use crate::cache::ReportCache;
use crate::config::FrontendConfig;
use crate::query::FilterDefaults;

use super::handlers::{get_stats, health_check, post_stats, AppState};

pub fn create_api_router(
    reports: Arc<ReportCache>,
    defaults: FilterDefaults,
    frontend: FrontendConfig,
) -> Router {
    let state = Arc::new(AppState { reports, defaults });

    let router = Router::new()
        .route("/health", get(health_check))
        .route("/api/stats", get(get_stats).post(post_stats))
        .with_state(state)
        .layer(CorsLayer::permissive());

    match frontend.static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    }
}
