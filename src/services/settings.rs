//! Runtime-mutable settings for the weather module and the system.
//!
//! Every update is broadcast as [`ConfigEvent::Updated`]; listeners re-read
//! the latest settings instead of trusting the event payload.

use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tokio::sync::broadcast;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    /// Unit system name understood by OpenWeatherMap.
    pub fn as_owm_units(&self) -> &'static str {
        match self {
            TemperatureUnit::Fahrenheit => "imperial",
            TemperatureUnit::Celsius => "metric",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "celsius" | "c" | "metric" => Some(TemperatureUnit::Celsius),
            "fahrenheit" | "f" | "imperial" => Some(TemperatureUnit::Fahrenheit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    English,
    Czech,
}

impl Language {
    /// Language code sent to weather vendors.
    pub fn code(&self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Czech => "cz",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "english" | "en" => Some(Language::English),
            "czech" | "cs" | "cz" => Some(Language::Czech),
            _ => None,
        }
    }
}

/// Weather module configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WeatherSettings {
    /// Vendor API credential; the refresh job only runs while this is set
    pub api_key: Option<String>,
    pub unit: TemperatureUnit,
    pub primary_location_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SystemSettings {
    pub language: Language,
}

/// Partial update of [`WeatherSettings`]. `api_key: Some(None)` clears the key.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateWeatherSettings {
    #[serde(default, with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub api_key: Option<Option<String>>,
    pub unit: Option<TemperatureUnit>,
    #[serde(default, with = "double_option")]
    #[schema(value_type = Option<Uuid>)]
    pub primary_location_id: Option<Option<Uuid>>,
    pub language: Option<Language>,
}

mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

/// Notification published on every settings change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEvent {
    Updated,
}

pub struct SettingsService {
    weather: RwLock<WeatherSettings>,
    system: RwLock<SystemSettings>,
    events: broadcast::Sender<ConfigEvent>,
}

impl SettingsService {
    pub fn new(weather: WeatherSettings, system: SystemSettings) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            weather: RwLock::new(weather),
            system: RwLock::new(system),
            events,
        }
    }

    /// Seed settings from `OPENWEATHERMAP_API_KEY`, `WEATHER_UNIT`,
    /// `WEATHER_LANGUAGE` and `WEATHER_PRIMARY_LOCATION_ID`.
    pub fn from_env() -> Self {
        let weather = WeatherSettings {
            api_key: std::env::var("OPENWEATHERMAP_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            unit: std::env::var("WEATHER_UNIT")
                .ok()
                .and_then(|v| TemperatureUnit::parse(&v))
                .unwrap_or_default(),
            primary_location_id: std::env::var("WEATHER_PRIMARY_LOCATION_ID")
                .ok()
                .and_then(|v| v.parse().ok()),
        };
        let system = SystemSettings {
            language: std::env::var("WEATHER_LANGUAGE")
                .ok()
                .and_then(|v| Language::parse(&v))
                .unwrap_or_default(),
        };
        Self::new(weather, system)
    }

    pub fn weather(&self) -> WeatherSettings {
        self.weather
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn system(&self) -> SystemSettings {
        self.system
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigEvent> {
        self.events.subscribe()
    }

    /// Apply a partial update and publish [`ConfigEvent::Updated`].
    pub fn update(&self, update: UpdateWeatherSettings) -> WeatherSettings {
        let updated = {
            let mut weather = self
                .weather
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(api_key) = update.api_key {
                weather.api_key = api_key.filter(|k| !k.trim().is_empty());
            }
            if let Some(unit) = update.unit {
                weather.unit = unit;
            }
            if let Some(primary) = update.primary_location_id {
                weather.primary_location_id = primary;
            }
            weather.clone()
        };

        if let Some(language) = update.language {
            self.system
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .language = language;
        }

        self.notify();
        updated
    }

    /// Publish a configuration-updated notification without changing anything.
    pub fn notify(&self) {
        // No receivers is fine: nothing is listening yet.
        let _ = self.events.send(ConfigEvent::Updated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_codes() {
        assert_eq!(Language::English.code(), "en");
        assert_eq!(Language::Czech.code(), "cz");
        assert_eq!(Language::parse("cs"), Some(Language::Czech));
        assert_eq!(Language::parse("klingon"), None);
    }

    #[test]
    fn test_units() {
        assert_eq!(TemperatureUnit::Celsius.as_owm_units(), "metric");
        assert_eq!(TemperatureUnit::Fahrenheit.as_owm_units(), "imperial");
        assert_eq!(TemperatureUnit::parse("F"), Some(TemperatureUnit::Fahrenheit));
    }

    #[tokio::test]
    async fn test_update_publishes_event() {
        let settings = SettingsService::new(WeatherSettings::default(), SystemSettings::default());
        let mut rx = settings.subscribe();

        let updated = settings.update(UpdateWeatherSettings {
            api_key: Some(Some("secret".to_string())),
            ..Default::default()
        });

        assert_eq!(updated.api_key.as_deref(), Some("secret"));
        assert_eq!(rx.recv().await.unwrap(), ConfigEvent::Updated);
    }

    #[test]
    fn test_partial_update_json() {
        let settings = SettingsService::new(
            WeatherSettings {
                api_key: Some("secret".to_string()),
                unit: TemperatureUnit::Celsius,
                primary_location_id: None,
            },
            SystemSettings::default(),
        );

        let clear: UpdateWeatherSettings =
            serde_json::from_value(serde_json::json!({ "api_key": null })).unwrap();
        let updated = settings.update(clear);
        assert_eq!(updated.api_key, None);

        let unit_only: UpdateWeatherSettings =
            serde_json::from_value(serde_json::json!({ "unit": "fahrenheit", "language": "czech" }))
                .unwrap();
        let updated = settings.update(unit_only);
        assert_eq!(updated.unit, TemperatureUnit::Fahrenheit);
        assert_eq!(settings.system().language, Language::Czech);
    }
}
