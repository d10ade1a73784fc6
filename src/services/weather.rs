//! Weather orchestration.
//!
//! Resolves a location to its provider and cache descriptor, serves current
//! weather, forecasts and alerts cache-first, keeps the history store fed and
//! drives the refresh job from the runtime settings.
//!
//! There is no lock around "check cache, else fetch and populate": concurrent
//! callers for the same key may each hit the upstream provider, and the last
//! write wins.

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::db::models::Location;
use crate::db::queries::LocationStore;
use crate::errors::AppError;
use crate::models::{Alert, CurrentSnapshot, ForecastDay, LocationWeather};
use crate::services::cache::{
    cache_key, CacheOp, CachedWeather, WeatherCache, ALERTS_CACHE_TTL_SECS, WEATHER_CACHE_TTL_SECS,
};
use crate::services::history::WeatherHistoryService;
use crate::services::location_mapper::LocationTypeMapper;
use crate::services::provider::{ProviderRegistry, WeatherProvider};
use crate::services::scheduler::{RefreshJob, RefreshScheduler, SharedSchedulerState};
use crate::services::settings::{ConfigEvent, Language, SettingsService, TemperatureUnit};

/// Domain events published by the weather service.
#[derive(Debug, Clone, PartialEq)]
pub enum WeatherEvent {
    /// Fresh combined weather for one location, after a forced fetch.
    Refreshed(LocationWeather),
}

pub struct WeatherService {
    locations: Arc<dyn LocationStore>,
    providers: Arc<ProviderRegistry>,
    mapper: Arc<LocationTypeMapper>,
    settings: Arc<SettingsService>,
    history: WeatherHistoryService,
    scheduler: Arc<RefreshScheduler>,
    cache: WeatherCache,
    events: broadcast::Sender<WeatherEvent>,
    /// Unit and language the cached data was fetched with
    cached_locale: std::sync::Mutex<(TemperatureUnit, Language)>,
}

/// A location with everything needed to fetch its weather.
struct Resolved {
    location: Location,
    provider: Arc<dyn WeatherProvider>,
    descriptor: String,
}

impl WeatherService {
    pub fn new(
        locations: Arc<dyn LocationStore>,
        providers: Arc<ProviderRegistry>,
        mapper: Arc<LocationTypeMapper>,
        settings: Arc<SettingsService>,
        history: WeatherHistoryService,
        scheduler: Arc<RefreshScheduler>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        let cached_locale = (settings.weather().unit, settings.system().language);
        Self {
            locations,
            providers,
            mapper,
            settings,
            history,
            scheduler,
            cache: WeatherCache::new(),
            events,
            cached_locale: std::sync::Mutex::new(cached_locale),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WeatherEvent> {
        self.events.subscribe()
    }

    pub fn scheduler_state(&self) -> SharedSchedulerState {
        self.scheduler.state()
    }

    // -----------------------------------------------------------------------
    // Primary location
    // -----------------------------------------------------------------------

    fn primary_location_id(&self) -> Result<Uuid, AppError> {
        self.settings
            .weather()
            .primary_location_id
            .ok_or_else(|| AppError::NotFound("No primary location configured".to_string()))
    }

    pub async fn get_current_weather(&self, force: bool) -> Result<CurrentSnapshot, AppError> {
        let id = self.primary_location_id()?;
        self.get_current_weather_for(id, force).await
    }

    pub async fn get_forecast_weather(&self, force: bool) -> Result<Vec<ForecastDay>, AppError> {
        let id = self.primary_location_id()?;
        self.get_forecast_weather_for(id, force).await
    }

    pub async fn get_weather(&self, force: bool) -> Result<LocationWeather, AppError> {
        let id = self.primary_location_id()?;
        self.get_weather_for_location(id, force).await
    }

    // -----------------------------------------------------------------------
    // Any location
    // -----------------------------------------------------------------------

    /// Combined weather for every stored location. Locations that fail are
    /// logged and left out.
    pub async fn get_all_weather(&self, force: bool) -> Result<Vec<LocationWeather>, AppError> {
        self.require_api_key()?;

        let locations = self.locations.find_all().await?;
        if locations.is_empty() {
            tracing::debug!("No weather locations configured");
            return Ok(Vec::new());
        }

        let results = join_all(locations.into_iter().map(|location| async move {
            let id = location.id;
            let result = match self.resolve(location) {
                Ok(resolved) => self.combined(&resolved, force).await,
                Err(e) => Err(e),
            };
            (id, result)
        }))
        .await;

        Ok(results
            .into_iter()
            .filter_map(|(id, result)| match result {
                Ok(weather) => Some(weather),
                Err(e) => {
                    tracing::warn!("Failed to fetch weather for location={}: {}", id, e);
                    None
                }
            })
            .collect())
    }

    pub async fn get_weather_for_location(&self, id: Uuid, force: bool) -> Result<LocationWeather, AppError> {
        self.require_api_key()?;
        let resolved = self.resolve(self.load_location(id).await?)?;
        self.combined(&resolved, force).await
    }

    pub async fn get_current_weather_for(&self, id: Uuid, force: bool) -> Result<CurrentSnapshot, AppError> {
        self.require_api_key()?;
        let resolved = self.resolve(self.load_location(id).await?)?;
        self.fetch_current(&resolved, force).await.ok_or_else(|| {
            AppError::NotFound(format!("Current weather for location id={} could not be loaded", id))
        })
    }

    pub async fn get_forecast_weather_for(&self, id: Uuid, force: bool) -> Result<Vec<ForecastDay>, AppError> {
        self.require_api_key()?;
        let resolved = self.resolve(self.load_location(id).await?)?;
        self.fetch_forecast(&resolved, force).await.ok_or_else(|| {
            AppError::NotFound(format!("Forecast for location id={} could not be loaded", id))
        })
    }

    // -----------------------------------------------------------------------
    // Alerts
    // -----------------------------------------------------------------------

    pub async fn get_alerts(&self, id: Uuid, force: bool) -> Result<Vec<Alert>, AppError> {
        self.require_api_key()?;
        let location = self.load_location(id).await?;

        let Some(provider) = self.providers.get(&location.location_type) else {
            return Err(AppError::NotFound(format!(
                "No provider found for location type={}",
                location.location_type
            )));
        };
        if !provider.supports_alerts() {
            return Err(AppError::NotSupported(format!(
                "Weather alerts are not supported by provider type={}",
                location.location_type
            )));
        }

        let descriptor = self.descriptor(&location)?;
        let key = cache_key(CacheOp::Alerts, &descriptor);

        if !force {
            if let Some(CachedWeather::Alerts(alerts)) = self.cache.get(&key).await {
                tracing::debug!("Returning cached alerts for location={}", id);
                return Ok(alerts);
            }
        }

        match provider.get_alerts(&location).await {
            Some(alerts) => {
                self.cache
                    .set(key, CachedWeather::Alerts(alerts.clone()), ALERTS_CACHE_TTL_SECS)
                    .await;
                Ok(alerts)
            }
            None => Ok(Vec::new()),
        }
    }

    /// Whether the location's provider supports alerts. Unknown locations
    /// and types report `false`.
    pub async fn check_alerts_supported(&self, id: Uuid) -> Result<bool, AppError> {
        let Some(location) = self.locations.find_one(id).await? else {
            return Ok(false);
        };
        Ok(self
            .providers
            .get(&location.location_type)
            .map(|p| p.supports_alerts())
            .unwrap_or(false))
    }

    // -----------------------------------------------------------------------
    // Refresh and events
    // -----------------------------------------------------------------------

    /// Force-refresh every location and publish the results. Never fails.
    pub async fn refresh_weather(&self) {
        tracing::debug!("Refreshing weather data for all locations");

        match self.get_all_weather(true).await {
            Ok(list) => {
                let count = list.len();
                for weather in list {
                    self.emit(WeatherEvent::Refreshed(weather));
                }
                tracing::debug!("Weather refreshed for {} locations", count);
            }
            Err(e) => tracing::error!("Scheduled weather refresh failed: {}", e),
        }
    }

    /// Start or stop the refresh job depending on whether an API key is set,
    /// and drop cached data fetched with a different unit or language.
    /// Re-reads settings on every call, so repeated notifications are harmless.
    pub async fn handle_configuration_updated(self: &Arc<Self>) {
        let locale = (self.settings.weather().unit, self.settings.system().language);
        let locale_changed = {
            let mut cached = self
                .cached_locale
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *cached, locale) != locale
        };
        if locale_changed {
            self.cache.clear().await;
            tracing::info!(
                "Weather unit or language changed to {:?}/{:?}, cache cleared",
                locale.0,
                locale.1
            );
        }

        let has_key = self.settings.weather().api_key.is_some();
        if has_key {
            if self.scheduler.start(self.clone()).await {
                tracing::info!("API key configured, weather refresh enabled");
            }
        } else if self.scheduler.stop().await {
            tracing::info!("API key removed, weather refresh disabled");
        }
    }

    /// Forget cached data for a created or updated location and fetch it
    /// fresh. `previous` is the row before an update, if any.
    pub async fn handle_location_changed(&self, previous: Option<&Location>, location: &Location) {
        if let Some(previous) = previous {
            self.clear_location_cache(previous).await;
        }
        self.clear_location_cache(location).await;

        if self.settings.weather().api_key.is_none() {
            return;
        }

        let result = match self.resolve(location.clone()) {
            Ok(resolved) => self.combined(&resolved, true).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(weather) => self.emit(WeatherEvent::Refreshed(weather)),
            Err(e) => tracing::warn!(
                "Failed to refresh weather after change of location={}: {}",
                location.id,
                e
            ),
        }
    }

    pub async fn handle_location_deleted(&self, location: &Location) {
        self.clear_location_cache(location).await;
        tracing::debug!("Cleared weather cache for deleted location={}", location.id);
    }

    /// Apply every configuration-updated notification until the settings
    /// channel closes.
    pub fn spawn_config_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let service = self.clone();
        let mut rx = self.settings.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ConfigEvent::Updated) => service.handle_configuration_updated().await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Missed {} configuration notifications", skipped);
                        service.handle_configuration_updated().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn emit(&self, event: WeatherEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    // -----------------------------------------------------------------------
    // Fetch pipeline
    // -----------------------------------------------------------------------

    fn require_api_key(&self) -> Result<(), AppError> {
        if self.settings.weather().api_key.is_none() {
            return Err(AppError::Validation(
                "Weather API key is required".to_string(),
            ));
        }
        Ok(())
    }

    async fn load_location(&self, id: Uuid) -> Result<Location, AppError> {
        self.locations
            .find_one(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Location with id={} not found", id)))
    }

    fn descriptor(&self, location: &Location) -> Result<String, AppError> {
        self.mapper.resolve_shape(location)?.descriptor()
    }

    fn resolve(&self, location: Location) -> Result<Resolved, AppError> {
        let provider = self.providers.get(&location.location_type).ok_or_else(|| {
            AppError::NotFound(format!(
                "No provider found for location type={}",
                location.location_type
            ))
        })?;
        let descriptor = self.descriptor(&location)?;
        Ok(Resolved {
            location,
            provider,
            descriptor,
        })
    }

    async fn combined(&self, resolved: &Resolved, force: bool) -> Result<LocationWeather, AppError> {
        let (current, forecast) = tokio::join!(
            self.fetch_current(resolved, force),
            self.fetch_forecast(resolved, force)
        );

        match (current, forecast) {
            (Some(snapshot), Some(forecast)) => Ok(LocationWeather {
                location_id: resolved.location.id,
                current: snapshot.current,
                forecast,
                location: snapshot.location,
            }),
            _ => Err(AppError::NotFound(format!(
                "Weather data for location id={} could not be loaded",
                resolved.location.id
            ))),
        }
    }

    async fn fetch_current(&self, resolved: &Resolved, force: bool) -> Option<CurrentSnapshot> {
        let key = cache_key(CacheOp::Current, &resolved.descriptor);

        if !force {
            if let Some(CachedWeather::Current(snapshot)) = self.cache.get(&key).await {
                tracing::debug!("Returning cached current weather for location={}", resolved.location.id);
                return Some(snapshot);
            }
        }

        let snapshot = resolved.provider.get_current_weather(&resolved.location).await?;
        self.cache
            .set(key, CachedWeather::Current(snapshot.clone()), WEATHER_CACHE_TTL_SECS)
            .await;

        let history = self.history.clone();
        let location_id = resolved.location.id;
        let location_name = resolved.location.name.clone();
        let current = snapshot.current.clone();
        tokio::spawn(async move {
            history
                .store_weather_data(location_id, &location_name, &current)
                .await;
        });

        Some(snapshot)
    }

    async fn fetch_forecast(&self, resolved: &Resolved, force: bool) -> Option<Vec<ForecastDay>> {
        let key = cache_key(CacheOp::Forecast, &resolved.descriptor);

        if !force {
            if let Some(CachedWeather::Forecast(forecast)) = self.cache.get(&key).await {
                tracing::debug!("Returning cached forecast for location={}", resolved.location.id);
                return Some(forecast);
            }
        }

        let forecast = resolved.provider.get_forecast_weather(&resolved.location).await?;
        self.cache
            .set(key, CachedWeather::Forecast(forecast.clone()), WEATHER_CACHE_TTL_SECS)
            .await;
        Some(forecast)
    }

    async fn clear_location_cache(&self, location: &Location) {
        match self.descriptor(location) {
            Ok(descriptor) => self.cache.delete_descriptor(&descriptor).await,
            Err(e) => tracing::debug!(
                "No cache descriptor for location={}, nothing to clear: {}",
                location.id,
                e
            ),
        }
    }
}

#[async_trait]
impl RefreshJob for WeatherService {
    async fn run(&self) {
        self.refresh_weather().await;
    }
}
