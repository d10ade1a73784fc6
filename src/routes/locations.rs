//! Location CRUD endpoints. Payload validation is dispatched through the
//! location type mapper, so these handlers work for every registered type.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use super::AppState;
use crate::db::models::Location;
use crate::errors::{AppError, ErrorResponse};
use crate::services::locations::{CreateLocation, UpdateLocation};

#[utoipa::path(
    get,
    path = "/api/v1/locations",
    tag = "Locations",
    responses(
        (status = 200, description = "All weather locations", body = Vec<Location>),
    )
)]
pub async fn list_locations(State(state): State<AppState>) -> Result<Json<Vec<Location>>, AppError> {
    Ok(Json(state.locations.list().await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/locations/{id}",
    tag = "Locations",
    params(("id" = Uuid, Path, description = "Location ID")),
    responses(
        (status = 200, description = "Location", body = Location),
        (status = 404, description = "Location not found", body = ErrorResponse),
    )
)]
pub async fn get_location(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Location>, AppError> {
    Ok(Json(state.locations.get(id).await?))
}

/// Create a location. `attributes` are validated against the shape
/// registered for `type`.
#[utoipa::path(
    post,
    path = "/api/v1/locations",
    tag = "Locations",
    request_body = CreateLocation,
    responses(
        (status = 201, description = "Location created", body = Location),
        (status = 400, description = "Invalid payload or unsupported type", body = ErrorResponse),
    )
)]
pub async fn create_location(
    State(state): State<AppState>,
    Json(input): Json<CreateLocation>,
) -> Result<(StatusCode, Json<Location>), AppError> {
    let location = state.locations.create(input).await?;
    Ok((StatusCode::CREATED, Json(location)))
}

#[utoipa::path(
    patch,
    path = "/api/v1/locations/{id}",
    tag = "Locations",
    params(("id" = Uuid, Path, description = "Location ID")),
    request_body = UpdateLocation,
    responses(
        (status = 200, description = "Location updated", body = Location),
        (status = 400, description = "Invalid payload", body = ErrorResponse),
        (status = 404, description = "Location not found", body = ErrorResponse),
    )
)]
pub async fn update_location(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateLocation>,
) -> Result<Json<Location>, AppError> {
    Ok(Json(state.locations.update(id, input).await?))
}

/// Delete a location. The primary location cannot be deleted.
#[utoipa::path(
    delete,
    path = "/api/v1/locations/{id}",
    tag = "Locations",
    params(("id" = Uuid, Path, description = "Location ID")),
    responses(
        (status = 204, description = "Location deleted"),
        (status = 400, description = "Location is the primary location", body = ErrorResponse),
        (status = 404, description = "Location not found", body = ErrorResponse),
    )
)]
pub async fn delete_location(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.locations.remove(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
