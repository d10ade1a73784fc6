//! OpenWeatherMap 2.5 provider (`weather` + `forecast` endpoints).
//!
//! Locations of this type pick one query mode (coordinates, city name, city
//! id or postal code). The mode's fields are only checked when a query is
//! built, so a location with missing fields can be stored but fails with a
//! validation error when weather is requested.
//!
//! See: https://openweathermap.org/current and https://openweathermap.org/forecast5

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use crate::db::models::Location;
use crate::errors::AppError;
use crate::models::{CurrentSnapshot, CurrentWeather, ForecastDay, LocationSummary, WeatherCondition, Wind};
use crate::services::forecast::{aggregate_daily, ForecastSample};
use crate::services::location_mapper::{
    construct_as, validate_as, LocationShape, LocationTypeMapping,
};
use crate::services::provider::WeatherProvider;
use crate::services::settings::SettingsService;

pub const OPENWEATHERMAP_TYPE: &str = "openweathermap";

/// How a location is identified upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    LatLon,
    CityName,
    CityId,
    ZipCode,
}

/// Concrete shape of an `openweathermap` location.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OpenWeatherMapLocation {
    pub query_mode: QueryMode,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub city_name: Option<String>,
    pub country_code: Option<String>,
    pub city_id: Option<i64>,
    pub zip_code: Option<String>,
}

impl OpenWeatherMapLocation {
    /// Upstream query parameters for the active query mode.
    pub fn query_params(&self) -> Result<Vec<(&'static str, String)>, AppError> {
        match self.query_mode {
            QueryMode::LatLon => match (self.latitude, self.longitude) {
                (Some(lat), Some(lon)) => Ok(vec![("lat", lat.to_string()), ("lon", lon.to_string())]),
                _ => Err(AppError::Validation(
                    "Invalid lat/lon configuration".to_string(),
                )),
            },
            QueryMode::CityName => match self.city_name.as_deref().filter(|s| !s.is_empty()) {
                Some(city) => {
                    let q = match self.country_code.as_deref().filter(|s| !s.is_empty()) {
                        Some(cc) => format!("{},{}", city, cc),
                        None => city.to_string(),
                    };
                    Ok(vec![("q", q)])
                }
                None => Err(AppError::Validation(
                    "Invalid city name configuration".to_string(),
                )),
            },
            QueryMode::CityId => match self.city_id {
                Some(id) => Ok(vec![("id", id.to_string())]),
                None => Err(AppError::Validation(
                    "Invalid city ID configuration".to_string(),
                )),
            },
            QueryMode::ZipCode => match self.zip_code.as_deref().filter(|s| !s.is_empty()) {
                Some(zip) => Ok(vec![("zip", zip.to_string())]),
                None => Err(AppError::Validation(
                    "Invalid ZIP code configuration".to_string(),
                )),
            },
        }
    }
}

impl LocationShape for OpenWeatherMapLocation {
    fn descriptor(&self) -> Result<String, AppError> {
        let params = self.query_params()?;
        let parts: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        Ok(format!("{}:{}", OPENWEATHERMAP_TYPE, parts.join("&")))
    }
}

/// Create input for an `openweathermap` location.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateOpenWeatherMapLocation {
    pub query_mode: QueryMode,
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: Option<f64>,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: Option<f64>,
    #[validate(length(min = 1, max = 100))]
    pub city_name: Option<String>,
    #[validate(length(equal = 2))]
    pub country_code: Option<String>,
    #[validate(range(min = 1))]
    pub city_id: Option<i64>,
    #[validate(length(min = 1, max = 20))]
    pub zip_code: Option<String>,
}

/// Update input for an `openweathermap` location; absent fields are kept.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct UpdateOpenWeatherMapLocation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_mode: Option<QueryMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 100))]
    pub city_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(equal = 2))]
    pub country_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1))]
    pub city_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 20))]
    pub zip_code: Option<String>,
}

/// Location type mapping registered at startup.
pub fn location_mapping() -> LocationTypeMapping {
    LocationTypeMapping {
        location_type: OPENWEATHERMAP_TYPE.to_string(),
        shape: "OpenWeatherMapLocation",
        validate_create: validate_as::<CreateOpenWeatherMapLocation>,
        validate_update: validate_as::<UpdateOpenWeatherMapLocation>,
        construct: construct_as::<OpenWeatherMapLocation>,
        after_create: None,
        after_update: None,
    }
}

// --- OpenWeatherMap JSON response types ---

#[derive(Debug, Deserialize)]
pub(crate) struct OwmCondition {
    id: i64,
    main: String,
    description: String,
    icon: String,
}

#[derive(Debug, Deserialize)]
struct OwmWind {
    speed: f64,
    deg: f64,
    gust: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwmClouds {
    all: f64,
}

#[derive(Debug, Deserialize)]
struct OwmPrecipitation {
    #[serde(rename = "1h")]
    one_hour: Option<f64>,
    #[serde(rename = "3h")]
    three_hours: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwmMain {
    temp: f64,
    feels_like: f64,
    temp_min: Option<f64>,
    temp_max: Option<f64>,
    pressure: f64,
    humidity: f64,
}

#[derive(Debug, Deserialize)]
struct OwmSys {
    country: Option<String>,
    sunrise: i64,
    sunset: i64,
}

#[derive(Debug, Deserialize)]
struct OwmWeatherResponse {
    name: String,
    dt: i64,
    main: OwmMain,
    weather: Vec<OwmCondition>,
    wind: OwmWind,
    clouds: OwmClouds,
    rain: Option<OwmPrecipitation>,
    snow: Option<OwmPrecipitation>,
    sys: OwmSys,
}

#[derive(Debug, Deserialize)]
struct OwmForecastItem {
    dt: i64,
    main: OwmMain,
    weather: Vec<OwmCondition>,
    wind: OwmWind,
    clouds: OwmClouds,
    rain: Option<OwmPrecipitation>,
    snow: Option<OwmPrecipitation>,
}

#[derive(Debug, Deserialize)]
struct OwmForecastResponse {
    list: Vec<OwmForecastItem>,
}

pub(crate) fn timestamp(secs: i64) -> Result<DateTime<Utc>, String> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| format!("timestamp {} out of range", secs))
}

pub(crate) fn condition(list: &[OwmCondition]) -> Result<WeatherCondition, String> {
    let first = list
        .first()
        .ok_or_else(|| "weather condition list is empty".to_string())?;
    Ok(WeatherCondition {
        code: first.id,
        group: first.main.clone(),
        description: first.description.clone(),
        icon: first.icon.clone(),
    })
}

fn wind(w: &OwmWind) -> Wind {
    Wind {
        speed: w.speed,
        deg: w.deg,
        gust: w.gust,
    }
}

fn transform_current(dto: OwmWeatherResponse) -> Result<CurrentSnapshot, String> {
    let current = CurrentWeather {
        temperature: dto.main.temp,
        temperature_min: dto.main.temp_min,
        temperature_max: dto.main.temp_max,
        feels_like: dto.main.feels_like,
        pressure: dto.main.pressure,
        humidity: dto.main.humidity,
        weather: condition(&dto.weather)?,
        wind: wind(&dto.wind),
        clouds: dto.clouds.all,
        rain: dto.rain.and_then(|r| r.one_hour),
        snow: dto.snow.and_then(|s| s.one_hour),
        sunrise: timestamp(dto.sys.sunrise)?,
        sunset: timestamp(dto.sys.sunset)?,
        day_time: timestamp(dto.dt)?,
    };

    Ok(CurrentSnapshot {
        current,
        location: LocationSummary {
            name: dto.name,
            country: dto.sys.country,
        },
    })
}

fn transform_forecast(dto: OwmForecastResponse) -> Result<Vec<ForecastDay>, String> {
    let samples = dto
        .list
        .into_iter()
        .map(|item| {
            Ok(ForecastSample {
                time: timestamp(item.dt)?,
                temperature: item.main.temp,
                feels_like: item.main.feels_like,
                pressure: item.main.pressure,
                humidity: item.main.humidity,
                weather: condition(&item.weather)?,
                wind: wind(&item.wind),
                clouds: item.clouds.all,
                rain: item.rain.and_then(|r| r.three_hours),
                snow: item.snow.and_then(|s| s.three_hours),
            })
        })
        .collect::<Result<Vec<_>, String>>()?;

    Ok(aggregate_daily(&samples))
}

/// Client for the OpenWeatherMap 2.5 API.
#[derive(Clone)]
pub struct OpenWeatherMapProvider {
    client: reqwest::Client,
    base_url: String,
    settings: Arc<SettingsService>,
}

impl OpenWeatherMapProvider {
    pub fn new(client: reqwest::Client, base_url: &str, settings: Arc<SettingsService>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            settings,
        }
    }

    /// GET `/data/2.5/<endpoint>` for a location and deserialize the body.
    ///
    /// Every failure (missing key, bad location, HTTP, schema) is logged and
    /// returns `None`.
    async fn fetch<T: DeserializeOwned>(&self, endpoint: &str, location: &Location) -> Option<T> {
        let weather_settings = self.settings.weather();
        let Some(api_key) = weather_settings.api_key else {
            tracing::warn!("Missing API key for OpenWeatherMap");
            return None;
        };

        let params = match serde_json::from_value::<OpenWeatherMapLocation>(location.attributes.clone())
            .map_err(|e| AppError::Validation(format!("Invalid location attributes: {}", e)))
            .and_then(|shape| shape.query_params())
        {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("OpenWeatherMap: location={} cannot be queried: {}", location.id, e);
                return None;
            }
        };

        let url = format!("{}/data/2.5/{}", self.base_url, endpoint);
        let language = self.settings.system().language;

        let response = match self
            .client
            .get(&url)
            .query(&params)
            .query(&[
                ("appid", api_key.as_str()),
                ("units", weather_settings.unit.as_owm_units()),
                ("lang", language.code()),
            ])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("OpenWeatherMap {} request failed: {}", endpoint, e);
                return None;
            }
        };

        let status = response.status();
        let body = match response.bytes().await {
            Ok(b) => b,
            Err(e) => {
                tracing::error!("OpenWeatherMap {} body read failed: {}", endpoint, e);
                return None;
            }
        };

        if !status.is_success() {
            tracing::error!(
                "OpenWeatherMap {} request failed with HTTP {}: {}",
                endpoint,
                status,
                String::from_utf8_lossy(&body)
            );
            return None;
        }

        match serde_json::from_slice::<T>(&body) {
            Ok(dto) => Some(dto),
            Err(e) => {
                tracing::error!("OpenWeatherMap {} response validation failed: {}", endpoint, e);
                None
            }
        }
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherMapProvider {
    fn provider_type(&self) -> &str {
        OPENWEATHERMAP_TYPE
    }

    fn name(&self) -> &str {
        "OpenWeatherMap"
    }

    fn description(&self) -> &str {
        "Current weather and 5 day / 3 hour forecast from OpenWeatherMap 2.5"
    }

    async fn get_current_weather(&self, location: &Location) -> Option<CurrentSnapshot> {
        let dto = self.fetch::<OwmWeatherResponse>("weather", location).await?;
        transform_current(dto)
            .map_err(|e| tracing::error!("OpenWeatherMap weather response validation failed: {}", e))
            .ok()
    }

    async fn get_forecast_weather(&self, location: &Location) -> Option<Vec<ForecastDay>> {
        let dto = self.fetch::<OwmForecastResponse>("forecast", location).await?;
        transform_forecast(dto)
            .map_err(|e| tracing::error!("OpenWeatherMap forecast response validation failed: {}", e))
            .ok()
    }
}
