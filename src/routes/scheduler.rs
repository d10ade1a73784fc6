//! Refresh scheduler status endpoint.
//!
//! GET /api/v1/scheduler/status returns the current state of the recurring
//! weather refresh job as JSON.

use axum::extract::State;
use axum::Json;

use super::AppState;
use crate::services::scheduler::SchedulerState;

/// Get the current scheduler status.
///
/// `running` is true only while an API key is configured. Run statistics
/// (last_run_completed_at, last_run_duration_ms, total_runs) survive a
/// stop/start cycle.
#[utoipa::path(
    get,
    path = "/api/v1/scheduler/status",
    tag = "Scheduler",
    responses(
        (status = 200, description = "Current scheduler status", body = SchedulerState),
    )
)]
pub async fn get_scheduler_status(State(state): State<AppState>) -> Json<SchedulerState> {
    let shared = state.weather.scheduler_state();
    let s = shared.read().await;
    Json(s.clone())
}
