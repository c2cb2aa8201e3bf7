use axum::{
    extract::{Query, State},
    http::StatusCode,
    Form, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::cache::ReportCache;
use crate::query::FilterDefaults;
use crate::report::Report;

pub struct AppState {
    pub reports: Arc<ReportCache>,
    pub defaults: FilterDefaults,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub message: String,
}

/// Request fields; both optional and defaulted
#[derive(Debug, Default, Deserialize)]
pub struct StatsParams {
    pub duration: Option<String>,
    pub project: Option<String>,
}

/// Download report from query string parameters
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Arc<Report>>, (StatusCode, Json<ErrorResponse>)> {
    stats(&state, params).await
}

/// Download report from a form body
pub async fn post_stats(
    State(state): State<Arc<AppState>>,
    Form(params): Form<StatsParams>,
) -> Result<Json<Arc<Report>>, (StatusCode, Json<ErrorResponse>)> {
    stats(&state, params).await
}

async fn stats(
    state: &AppState,
    params: StatsParams,
) -> Result<Json<Arc<Report>>, (StatusCode, Json<ErrorResponse>)> {
    match state
        .reports
        .report_for(
            params.duration.as_deref(),
            params.project.as_deref(),
            &state.defaults,
        )
        .await
    {
        Ok(lookup) => {
            if !lookup.metadata.failed_providers.is_empty() {
                tracing::warn!(
                    "Serving partial report; failed providers: {}",
                    lookup.metadata.failed_providers.join(", ")
                );
            }
            Ok(Json(lookup.report))
        }
        Err(e) => Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )),
    }
}

/// Health check endpoint
pub async fn health_check() -> Json<SuccessResponse> {
    Json(SuccessResponse {
        message: "OK".to_string(),
    })
}
