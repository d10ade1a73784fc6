use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// A tracked place. `location_type` selects both the provider and the
/// concrete shape of `attributes` (resolved through the location type mapper).
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, ToSchema)]
pub struct Location {
    pub id: Uuid,
    pub name: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub location_type: String,
    /// Provider-specific fields (coordinates, city identifiers, ...)
    #[schema(value_type = Object)]
    pub attributes: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}
