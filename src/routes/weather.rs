//! Weather HTTP endpoints.
//!
//! - GET /api/v1/weather?force=bool (primary location, combined)
//! - GET /api/v1/weather/current, /api/v1/weather/forecast
//! - GET /api/v1/weather/locations
//! - GET /api/v1/weather/locations/:id
//! - GET /api/v1/weather/locations/:id/alerts
//! - GET /api/v1/weather/locations/:id/history?start&end&limit
//! - GET /api/v1/weather/locations/:id/statistics?start&end

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::AppState;
use crate::errors::{AppError, ErrorResponse};
use crate::models::{Alert, CurrentSnapshot, ForecastDay, LocationWeather};
use crate::services::history::{HistoryPoint, WeatherStatistics};

/// Upper bound for the `limit` query parameter of the history endpoint.
const MAX_HISTORY_LIMIT: i64 = 1000;

// ---------------------------------------------------------------------------
// Query parameter structs
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ForceQuery {
    /// Bypass the cache and fetch from the provider
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct HistoryQuery {
    /// Window start, ISO 8601 (default: 24 hours before `end`)
    pub start: Option<String>,
    /// Window end, ISO 8601 (default: now)
    pub end: Option<String>,
    /// Maximum number of points (default 100)
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct StatisticsQuery {
    /// Window start, ISO 8601 (default: 7 days before `end`)
    pub start: Option<String>,
    /// Window end, ISO 8601 (default: now)
    pub end: Option<String>,
}

fn parse_time(name: &str, value: Option<&str>) -> Result<Option<DateTime<Utc>>, AppError> {
    value
        .map(|raw| {
            raw.parse::<DateTime<Utc>>()
                .map_err(|e| AppError::Validation(format!("Invalid {}: {}", name, e)))
        })
        .transpose()
}

fn parse_window(
    start: Option<&str>,
    end: Option<&str>,
) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>), AppError> {
    let start = parse_time("start", start)?;
    let end = parse_time("end", end)?;
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            return Err(AppError::Validation(
                "start must not be after end".to_string(),
            ));
        }
    }
    Ok((start, end))
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct AlertsResponse {
    pub location_id: Uuid,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HistoryResponse {
    pub location_id: Uuid,
    /// Whether the time-series store is connected; `false` means the list is
    /// empty because history is disabled
    pub history_enabled: bool,
    /// Newest first
    pub points: Vec<HistoryPoint>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatisticsResponse {
    pub location_id: Uuid,
    pub history_enabled: bool,
    /// `null` when the window holds no points
    pub statistics: Option<WeatherStatistics>,
}

// ---------------------------------------------------------------------------
// Primary location
// ---------------------------------------------------------------------------

/// Combined current weather and forecast for the primary location.
#[utoipa::path(
    get,
    path = "/api/v1/weather",
    tag = "Weather",
    params(ForceQuery),
    responses(
        (status = 200, description = "Combined weather", body = LocationWeather),
        (status = 400, description = "API key not configured", body = ErrorResponse),
        (status = 404, description = "No primary location or no data", body = ErrorResponse),
    )
)]
pub async fn get_weather(
    State(state): State<AppState>,
    Query(params): Query<ForceQuery>,
) -> Result<Json<LocationWeather>, AppError> {
    Ok(Json(state.weather.get_weather(params.force).await?))
}

/// Current weather for the primary location.
#[utoipa::path(
    get,
    path = "/api/v1/weather/current",
    tag = "Weather",
    params(ForceQuery),
    responses(
        (status = 200, description = "Current weather", body = CurrentSnapshot),
        (status = 400, description = "API key not configured", body = ErrorResponse),
        (status = 404, description = "No primary location or no data", body = ErrorResponse),
    )
)]
pub async fn get_current_weather(
    State(state): State<AppState>,
    Query(params): Query<ForceQuery>,
) -> Result<Json<CurrentSnapshot>, AppError> {
    Ok(Json(state.weather.get_current_weather(params.force).await?))
}

/// Daily forecast for the primary location.
#[utoipa::path(
    get,
    path = "/api/v1/weather/forecast",
    tag = "Weather",
    params(ForceQuery),
    responses(
        (status = 200, description = "Daily forecast", body = Vec<ForecastDay>),
        (status = 400, description = "API key not configured", body = ErrorResponse),
        (status = 404, description = "No primary location or no data", body = ErrorResponse),
    )
)]
pub async fn get_forecast_weather(
    State(state): State<AppState>,
    Query(params): Query<ForceQuery>,
) -> Result<Json<Vec<ForecastDay>>, AppError> {
    Ok(Json(state.weather.get_forecast_weather(params.force).await?))
}

// ---------------------------------------------------------------------------
// Any location
// ---------------------------------------------------------------------------

/// Combined weather for every stored location. Locations whose weather
/// cannot be loaded are left out.
#[utoipa::path(
    get,
    path = "/api/v1/weather/locations",
    tag = "Weather",
    params(ForceQuery),
    responses(
        (status = 200, description = "Weather per location", body = Vec<LocationWeather>),
        (status = 400, description = "API key not configured", body = ErrorResponse),
    )
)]
pub async fn get_all_weather(
    State(state): State<AppState>,
    Query(params): Query<ForceQuery>,
) -> Result<Json<Vec<LocationWeather>>, AppError> {
    Ok(Json(state.weather.get_all_weather(params.force).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/weather/locations/{id}",
    tag = "Weather",
    params(
        ("id" = Uuid, Path, description = "Location ID"),
        ForceQuery,
    ),
    responses(
        (status = 200, description = "Combined weather", body = LocationWeather),
        (status = 400, description = "API key not configured or invalid location", body = ErrorResponse),
        (status = 404, description = "Location or data not found", body = ErrorResponse),
    )
)]
pub async fn get_location_weather(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<ForceQuery>,
) -> Result<Json<LocationWeather>, AppError> {
    Ok(Json(
        state.weather.get_weather_for_location(id, params.force).await?,
    ))
}

/// Active weather alerts for a location. Cached for 15 minutes.
#[utoipa::path(
    get,
    path = "/api/v1/weather/locations/{id}/alerts",
    tag = "Weather",
    params(
        ("id" = Uuid, Path, description = "Location ID"),
        ForceQuery,
    ),
    responses(
        (status = 200, description = "Active alerts", body = AlertsResponse),
        (status = 400, description = "Provider does not support alerts", body = ErrorResponse),
        (status = 404, description = "Location or provider not found", body = ErrorResponse),
    )
)]
pub async fn get_location_alerts(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<ForceQuery>,
) -> Result<Json<AlertsResponse>, AppError> {
    let alerts = state.weather.get_alerts(id, params.force).await?;
    Ok(Json(AlertsResponse {
        location_id: id,
        alerts,
    }))
}

/// Stored weather snapshots for a location, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/weather/locations/{id}/history",
    tag = "Weather",
    params(
        ("id" = Uuid, Path, description = "Location ID"),
        HistoryQuery,
    ),
    responses(
        (status = 200, description = "Weather history", body = HistoryResponse),
        (status = 400, description = "Invalid window or limit", body = ErrorResponse),
        (status = 404, description = "Location not found", body = ErrorResponse),
    )
)]
pub async fn get_location_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    let (start, end) = parse_window(params.start.as_deref(), params.end.as_deref())?;
    if let Some(limit) = params.limit {
        if !(1..=MAX_HISTORY_LIMIT).contains(&limit) {
            return Err(AppError::Validation(format!(
                "limit must be between 1 and {}",
                MAX_HISTORY_LIMIT
            )));
        }
    }

    state.locations.get(id).await?;

    let points = state.history.get_history(id, start, end, params.limit).await;
    Ok(Json(HistoryResponse {
        location_id: id,
        history_enabled: state.history.is_connected(),
        points,
    }))
}

/// Aggregated statistics for a location over a time window.
#[utoipa::path(
    get,
    path = "/api/v1/weather/locations/{id}/statistics",
    tag = "Weather",
    params(
        ("id" = Uuid, Path, description = "Location ID"),
        StatisticsQuery,
    ),
    responses(
        (status = 200, description = "Weather statistics", body = StatisticsResponse),
        (status = 400, description = "Invalid window", body = ErrorResponse),
        (status = 404, description = "Location not found", body = ErrorResponse),
    )
)]
pub async fn get_location_statistics(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<StatisticsQuery>,
) -> Result<Json<StatisticsResponse>, AppError> {
    let (start, end) = parse_window(params.start.as_deref(), params.end.as_deref())?;

    state.locations.get(id).await?;

    let statistics = state.history.get_statistics(id, start, end).await;
    Ok(Json(StatisticsResponse {
        location_id: id,
        history_enabled: state.history.is_connected(),
        statistics,
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
