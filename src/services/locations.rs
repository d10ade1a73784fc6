//! Generic location CRUD.
//!
//! Create and update payloads are validated by the mapping registered for
//! the location's `type`; this module never knows the concrete shapes.
//! Lifecycle changes are forwarded to the weather service so cached data for
//! the location is dropped and re-fetched.

use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::db::models::Location;
use crate::db::queries::{InsertLocationParams, LocationStore, UpdateLocationParams};
use crate::errors::AppError;
use crate::services::location_mapper::LocationTypeMapper;
use crate::services::settings::SettingsService;
use crate::services::weather::WeatherService;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateLocation {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    /// Location type, e.g. `openweathermap`
    #[serde(rename = "type")]
    pub location_type: String,
    /// Type-specific fields
    #[serde(default = "empty_object")]
    #[schema(value_type = Object)]
    pub attributes: serde_json::Value,
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateLocation {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    /// Type-specific fields to change; omitted fields are kept
    #[schema(value_type = Option<Object>)]
    pub attributes: Option<serde_json::Value>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

pub struct LocationsService {
    store: Arc<dyn LocationStore>,
    mapper: Arc<LocationTypeMapper>,
    settings: Arc<SettingsService>,
    weather: Arc<WeatherService>,
}

impl LocationsService {
    pub fn new(
        store: Arc<dyn LocationStore>,
        mapper: Arc<LocationTypeMapper>,
        settings: Arc<SettingsService>,
        weather: Arc<WeatherService>,
    ) -> Self {
        Self {
            store,
            mapper,
            settings,
            weather,
        }
    }

    pub async fn list(&self) -> Result<Vec<Location>, AppError> {
        Ok(self.store.find_all().await?)
    }

    pub async fn get(&self, id: Uuid) -> Result<Location, AppError> {
        self.store
            .find_one(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Location with id={} not found", id)))
    }

    pub async fn create(&self, input: CreateLocation) -> Result<Location, AppError> {
        input.validate()?;
        let mapping = self.mapper.get_mapping(&input.location_type)?;
        let attributes = (mapping.validate_create)(&input.attributes)?;

        let location = self
            .store
            .insert(InsertLocationParams {
                name: input.name,
                location_type: input.location_type,
                attributes,
            })
            .await?;

        if let Some(hook) = mapping.after_create {
            hook(&location);
        }
        tracing::info!(
            "Created weather location={} type={}",
            location.id,
            location.location_type
        );

        let weather = self.weather.clone();
        let created = location.clone();
        tokio::spawn(async move {
            weather.handle_location_changed(None, &created).await;
        });

        Ok(location)
    }

    pub async fn update(&self, id: Uuid, input: UpdateLocation) -> Result<Location, AppError> {
        input.validate()?;
        let previous = self.get(id).await?;
        let mapping = self.mapper.get_mapping(&previous.location_type)?;

        let attributes = match &input.attributes {
            Some(raw) => Some((mapping.validate_update)(raw)?),
            None => None,
        };

        let location = self
            .store
            .update(
                id,
                UpdateLocationParams {
                    name: input.name,
                    attributes,
                },
            )
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Location with id={} not found", id)))?;

        if let Some(hook) = mapping.after_update {
            hook(&location);
        }
        tracing::info!("Updated weather location={}", location.id);

        let weather = self.weather.clone();
        let updated = location.clone();
        tokio::spawn(async move {
            weather.handle_location_changed(Some(&previous), &updated).await;
        });

        Ok(location)
    }

    /// Delete a location. The configured primary location cannot be deleted.
    pub async fn remove(&self, id: Uuid) -> Result<(), AppError> {
        let location = self.get(id).await?;

        if self.settings.weather().primary_location_id == Some(id) {
            return Err(AppError::Validation(
                "The primary weather location cannot be deleted".to_string(),
            ));
        }

        if !self.store.delete(id).await? {
            return Err(AppError::NotFound(format!("Location with id={} not found", id)));
        }

        self.weather.handle_location_deleted(&location).await;
        tracing::info!("Deleted weather location={}", id);
        Ok(())
    }
}
