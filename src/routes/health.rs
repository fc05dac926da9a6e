use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};

use crate::AppState;

/// `GET /health`: the C7 health monitor's latest snapshot, not a static
/// liveness payload — generalized from this codebase's original static
/// `{status, version, timestamp}` check into a live readiness report.
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = state.health_report.read().await.clone();
    Json(report)
}
