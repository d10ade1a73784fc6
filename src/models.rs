//! Canonical weather model.
//!
//! Every provider normalizes its vendor payload into these types, so the
//! cache, the scheduler, the history store and the HTTP layer never see a
//! vendor-specific shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Wind at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Wind {
    /// Wind speed (m/s for metric, mph for imperial)
    pub speed: f64,
    /// Direction the wind blows from, in degrees
    pub deg: f64,
    pub gust: Option<f64>,
}

/// Weather condition as reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WeatherCondition {
    /// Vendor condition code (e.g. 800 for clear sky)
    pub code: i64,
    /// Condition group (e.g. "Rain", "Clouds")
    pub group: String,
    pub description: String,
    pub icon: String,
}

/// One normalized current-weather snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CurrentWeather {
    pub temperature: f64,
    pub temperature_min: Option<f64>,
    pub temperature_max: Option<f64>,
    pub feels_like: f64,
    /// Pressure in hPa
    pub pressure: f64,
    /// Relative humidity in %
    pub humidity: f64,
    pub weather: WeatherCondition,
    pub wind: Wind,
    /// Cloud cover in %
    pub clouds: f64,
    /// Rain volume for the last hour, mm
    pub rain: Option<f64>,
    /// Snow volume for the last hour, mm
    pub snow: Option<f64>,
    pub sunrise: DateTime<Utc>,
    pub sunset: DateTime<Utc>,
    /// Time the snapshot was taken upstream
    pub day_time: DateTime<Utc>,
}

/// Day temperature split into segments. A segment is `None` when no sample
/// fell into it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ForecastTemperature {
    pub day: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub night: Option<f64>,
    pub eve: Option<f64>,
    pub morn: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ForecastFeelsLike {
    pub day: Option<f64>,
    pub night: Option<f64>,
    pub eve: Option<f64>,
    pub morn: Option<f64>,
}

/// One aggregated forecast day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ForecastDay {
    pub temperature: ForecastTemperature,
    pub feels_like: ForecastFeelsLike,
    pub pressure: f64,
    pub humidity: f64,
    pub weather: WeatherCondition,
    pub wind: Wind,
    pub clouds: f64,
    pub rain: Option<f64>,
    pub snow: Option<f64>,
    pub sunrise: Option<DateTime<Utc>>,
    pub sunset: Option<DateTime<Utc>>,
    pub moonrise: Option<DateTime<Utc>>,
    pub moonset: Option<DateTime<Utc>>,
    /// UTC midnight of the calendar day
    pub day_time: DateTime<Utc>,
}

/// Display information about the place a snapshot belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LocationSummary {
    pub name: String,
    pub country: Option<String>,
}

/// Current weather plus the display info the provider resolved for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CurrentSnapshot {
    pub current: CurrentWeather,
    pub location: LocationSummary,
}

/// Combined current + forecast weather for one location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LocationWeather {
    pub location_id: Uuid,
    pub current: CurrentWeather,
    pub forecast: Vec<ForecastDay>,
    pub location: LocationSummary,
}

/// A weather alert issued by a national agency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Alert {
    pub sender_name: String,
    pub event: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub description: String,
    pub tags: Option<Vec<String>>,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Clear-sky snapshot for Prague at the given temperature.
    pub(crate) fn snapshot(temperature: f64) -> CurrentSnapshot {
        CurrentSnapshot {
            current: CurrentWeather {
                temperature,
                temperature_min: None,
                temperature_max: None,
                feels_like: temperature,
                pressure: 1013.0,
                humidity: 50.0,
                weather: WeatherCondition {
                    code: 800,
                    group: "Clear".to_string(),
                    description: "clear sky".to_string(),
                    icon: "01d".to_string(),
                },
                wind: Wind {
                    speed: 1.0,
                    deg: 90.0,
                    gust: None,
                },
                clouds: 0.0,
                rain: None,
                snow: None,
                sunrise: Utc::now(),
                sunset: Utc::now(),
                day_time: Utc::now(),
            },
            location: LocationSummary {
                name: "Prague".to_string(),
                country: Some("CZ".to_string()),
            },
        }
    }
}
