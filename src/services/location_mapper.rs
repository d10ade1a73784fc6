//! Location type mapper.
//!
//! Maps a location `type` discriminator to the functions that validate its
//! create/update input and construct its concrete shape. Generic location code
//! dispatches through this table instead of knowing every subtype.
//!
//! Unlike the provider registry, registering a mapping for an existing type
//! replaces the previous mapping.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, RwLock};
use validator::Validate;

use crate::db::models::Location;
use crate::errors::AppError;

/// Concrete, typed view of a location's attributes.
pub trait LocationShape: Debug + Send + Sync {
    /// Stable identifier of the place, used in cache keys.
    ///
    /// Fails with `Validation` when the fields required by the shape's active
    /// query mode are missing.
    fn descriptor(&self) -> Result<String, AppError>;
}

/// Validates raw attributes and returns them normalized for storage.
pub type ValidateFn = fn(&serde_json::Value) -> Result<serde_json::Value, AppError>;
/// Builds the concrete shape of a stored location.
pub type ConstructFn = fn(&Location) -> Result<Box<dyn LocationShape>, AppError>;
/// Post-create / post-update hook.
pub type HookFn = fn(&Location);

/// Dispatch entry for one location type.
#[derive(Clone)]
pub struct LocationTypeMapping {
    pub location_type: String,
    /// Name of the concrete shape, for diagnostics
    pub shape: &'static str,
    pub validate_create: ValidateFn,
    pub validate_update: ValidateFn,
    pub construct: ConstructFn,
    pub after_create: Option<HookFn>,
    pub after_update: Option<HookFn>,
}

impl Debug for LocationTypeMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationTypeMapping")
            .field("location_type", &self.location_type)
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

/// Deserialize `value` into `T`, run its `validator` rules and re-serialize it.
///
/// Instantiated per input type and stored as a [`ValidateFn`].
pub fn validate_as<T>(value: &serde_json::Value) -> Result<serde_json::Value, AppError>
where
    T: DeserializeOwned + Serialize + Validate,
{
    let input: T = serde_json::from_value(value.clone())
        .map_err(|e| AppError::Validation(format!("Invalid location attributes: {}", e)))?;
    input.validate()?;
    serde_json::to_value(&input)
        .map_err(|e| AppError::Internal(format!("Failed to normalize location attributes: {}", e)))
}

/// Deserialize a stored location's attributes into its concrete shape.
pub fn construct_as<T>(location: &Location) -> Result<Box<dyn LocationShape>, AppError>
where
    T: DeserializeOwned + LocationShape + 'static,
{
    let shape: T = serde_json::from_value(location.attributes.clone()).map_err(|e| {
        AppError::Validation(format!(
            "Location id={} has invalid attributes: {}",
            location.id, e
        ))
    })?;
    Ok(Box::new(shape))
}

#[derive(Default)]
pub struct LocationTypeMapper {
    mappings: RwLock<HashMap<String, Arc<LocationTypeMapping>>>,
}

impl LocationTypeMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a mapping; the last registration for a type wins.
    pub fn register_mapping(&self, mapping: LocationTypeMapping) {
        let location_type = mapping.location_type.clone();
        let previous = self
            .mappings
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(location_type.clone(), Arc::new(mapping));

        if previous.is_some() {
            tracing::debug!("Replaced location mapping for type={}", location_type);
        } else {
            tracing::info!("Registered location mapping for type={}", location_type);
        }
    }

    /// Resolve a mapping. Unknown types fail with `NotSupported`.
    pub fn get_mapping(&self, location_type: &str) -> Result<Arc<LocationTypeMapping>, AppError> {
        self.mappings
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(location_type)
            .cloned()
            .ok_or_else(|| {
                AppError::NotSupported(format!(
                    "Location type '{}' is not supported",
                    location_type
                ))
            })
    }

    pub fn list_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .mappings
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }

    /// Construct the concrete shape of a stored location.
    pub fn resolve_shape(&self, location: &Location) -> Result<Box<dyn LocationShape>, AppError> {
        let mapping = self.get_mapping(&location.location_type)?;
        (mapping.construct)(location)
    }
}
