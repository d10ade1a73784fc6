//! Weather provider contract and the registry that plugins register into.
//!
//! The registry is append-only for the process lifetime: the first provider
//! registered under a type wins and later registrations for the same type are
//! ignored.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use utoipa::ToSchema;

use crate::db::models::Location;
use crate::models::{Alert, CurrentSnapshot, ForecastDay};

/// A weather backend for one upstream vendor.
///
/// Data operations never fail: upstream and schema errors are logged by the
/// provider and reported as `None`.
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    /// Type discriminator; matches `Location::location_type`.
    fn provider_type(&self) -> &str;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn supports_alerts(&self) -> bool {
        false
    }

    async fn get_current_weather(&self, location: &Location) -> Option<CurrentSnapshot>;

    async fn get_forecast_weather(&self, location: &Location) -> Option<Vec<ForecastDay>>;

    async fn get_alerts(&self, _location: &Location) -> Option<Vec<Alert>> {
        None
    }
}

/// Discovery metadata for a registered provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ProviderMetadata {
    #[serde(rename = "type")]
    pub provider_type: String,
    pub name: String,
    pub description: String,
}

/// Registry of weather providers keyed by type.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn WeatherProvider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its type. Returns `false` (and keeps the
    /// existing entry) if the type is already taken.
    pub fn register(&self, provider: Arc<dyn WeatherProvider>) -> bool {
        let provider_type = provider.provider_type().to_string();
        let mut providers = self
            .providers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if providers.contains_key(&provider_type) {
            tracing::warn!(
                "Weather provider type={} is already registered, ignoring",
                provider_type
            );
            return false;
        }

        providers.insert(provider_type.clone(), provider);
        tracing::info!(
            "Registered weather provider type={} ({} total)",
            provider_type,
            providers.len()
        );
        true
    }

    /// Look up a provider. `None` means the feature is unavailable for this
    /// location type.
    pub fn get(&self, provider_type: &str) -> Option<Arc<dyn WeatherProvider>> {
        self.providers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(provider_type)
            .cloned()
    }

    pub fn has(&self, provider_type: &str) -> bool {
        self.providers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(provider_type)
    }

    /// Metadata for every registered provider, sorted by type.
    pub fn list(&self) -> Vec<ProviderMetadata> {
        let providers = self
            .providers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut list: Vec<ProviderMetadata> = providers
            .values()
            .map(|p| ProviderMetadata {
                provider_type: p.provider_type().to_string(),
                name: p.name().to_string(),
                description: p.description().to_string(),
            })
            .collect();
        list.sort_by(|a, b| a.provider_type.cmp(&b.provider_type));
        list
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakeProvider;
    use super::*;

    #[test]
    fn test_register_and_get_returns_same_instance() {
        let registry = ProviderRegistry::new();
        let provider: Arc<dyn WeatherProvider> = Arc::new(FakeProvider::new("provider-a"));

        assert!(registry.register(provider.clone()));

        let found = registry.get("provider-a").unwrap();
        assert!(Arc::ptr_eq(&found, &provider));
        assert!(registry.has("provider-a"));
    }

    #[test]
    fn test_duplicate_registration_keeps_first() {
        let registry = ProviderRegistry::new();
        let first: Arc<dyn WeatherProvider> = Arc::new(FakeProvider::new("provider-a"));
        let second: Arc<dyn WeatherProvider> = Arc::new(FakeProvider::new("provider-a"));

        assert!(registry.register(first.clone()));
        assert!(!registry.register(second.clone()));

        let found = registry.get("provider-a").unwrap();
        assert!(Arc::ptr_eq(&found, &first));
        assert!(!Arc::ptr_eq(&found, &second));
    }

    #[test]
    fn test_get_unknown_type_is_none() {
        let registry = ProviderRegistry::new();
        assert!(registry.get("nope").is_none());
        assert!(!registry.has("nope"));
    }

    #[test]
    fn test_list_returns_metadata_sorted() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(FakeProvider::new("zeta")));
        registry.register(Arc::new(FakeProvider::new("alpha")));

        let list = registry.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].provider_type, "alpha");
        assert_eq!(list[0].name, "Fake alpha");
        assert_eq!(list[1].provider_type, "zeta");
        assert_eq!(list[1].description, "Scripted test provider");
    }
}
