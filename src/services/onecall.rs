//! OpenWeatherMap One Call 3.0 provider.
//!
//! Coordinates only. Returns a native daily forecast, so no sample
//! aggregation happens here, and it is the only provider with alerts.
//!
//! See: https://openweathermap.org/api/one-call-3

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use crate::db::models::Location;
use crate::errors::AppError;
use crate::models::{
    Alert, CurrentSnapshot, CurrentWeather, ForecastDay, ForecastFeelsLike, ForecastTemperature,
    LocationSummary, Wind,
};
use crate::services::location_mapper::{
    construct_as, validate_as, LocationShape, LocationTypeMapping,
};
use crate::services::openweathermap::{condition, timestamp, OwmCondition};
use crate::services::provider::WeatherProvider;
use crate::services::settings::SettingsService;

pub const ONECALL_TYPE: &str = "openweathermap-onecall";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OneCallLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub country_code: Option<String>,
}

impl LocationShape for OneCallLocation {
    fn descriptor(&self) -> Result<String, AppError> {
        Ok(format!(
            "{}:lat={}&lon={}",
            ONECALL_TYPE, self.latitude, self.longitude
        ))
    }
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateOneCallLocation {
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(equal = 2))]
    pub country_code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct UpdateOneCallLocation {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(equal = 2))]
    pub country_code: Option<String>,
}

pub fn location_mapping() -> LocationTypeMapping {
    LocationTypeMapping {
        location_type: ONECALL_TYPE.to_string(),
        shape: "OneCallLocation",
        validate_create: validate_as::<CreateOneCallLocation>,
        validate_update: validate_as::<UpdateOneCallLocation>,
        construct: construct_as::<OneCallLocation>,
        after_create: None,
        after_update: None,
    }
}

// --- One Call JSON response types ---

#[derive(Debug, Deserialize)]
struct OneCallPrecipitation {
    #[serde(rename = "1h")]
    one_hour: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OneCallCurrent {
    dt: i64,
    sunrise: i64,
    sunset: i64,
    temp: f64,
    feels_like: f64,
    pressure: f64,
    humidity: f64,
    clouds: f64,
    wind_speed: f64,
    wind_deg: f64,
    wind_gust: Option<f64>,
    rain: Option<OneCallPrecipitation>,
    snow: Option<OneCallPrecipitation>,
    weather: Vec<OwmCondition>,
}

#[derive(Debug, Deserialize)]
struct OneCallDailyTemp {
    day: f64,
    min: f64,
    max: f64,
    night: f64,
    eve: f64,
    morn: f64,
}

#[derive(Debug, Deserialize)]
struct OneCallDailyFeelsLike {
    day: f64,
    night: f64,
    eve: f64,
    morn: f64,
}

#[derive(Debug, Deserialize)]
struct OneCallDaily {
    dt: i64,
    sunrise: i64,
    sunset: i64,
    moonrise: i64,
    moonset: i64,
    temp: OneCallDailyTemp,
    feels_like: OneCallDailyFeelsLike,
    pressure: f64,
    humidity: f64,
    clouds: f64,
    wind_speed: f64,
    wind_deg: f64,
    wind_gust: Option<f64>,
    rain: Option<f64>,
    snow: Option<f64>,
    weather: Vec<OwmCondition>,
}

#[derive(Debug, Deserialize)]
struct OneCallAlert {
    sender_name: String,
    event: String,
    start: i64,
    end: i64,
    description: String,
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct OneCallResponse {
    current: Option<OneCallCurrent>,
    #[serde(default)]
    daily: Vec<OneCallDaily>,
    #[serde(default)]
    alerts: Vec<OneCallAlert>,
}

/// Moonrise/moonset are 0 on days without one.
fn optional_timestamp(secs: i64) -> Result<Option<chrono::DateTime<chrono::Utc>>, String> {
    if secs == 0 {
        return Ok(None);
    }
    timestamp(secs).map(Some)
}

fn transform_current(current: OneCallCurrent) -> Result<CurrentWeather, String> {
    Ok(CurrentWeather {
        temperature: current.temp,
        // no min/max for a point-in-time reading
        temperature_min: Some(current.temp),
        temperature_max: Some(current.temp),
        feels_like: current.feels_like,
        pressure: current.pressure,
        humidity: current.humidity,
        weather: condition(&current.weather)?,
        wind: Wind {
            speed: current.wind_speed,
            deg: current.wind_deg,
            gust: current.wind_gust,
        },
        clouds: current.clouds,
        rain: current.rain.and_then(|r| r.one_hour),
        snow: current.snow.and_then(|s| s.one_hour),
        sunrise: timestamp(current.sunrise)?,
        sunset: timestamp(current.sunset)?,
        day_time: timestamp(current.dt)?,
    })
}

fn transform_daily(daily: Vec<OneCallDaily>) -> Result<Vec<ForecastDay>, String> {
    daily
        .into_iter()
        .map(|day| {
            Ok(ForecastDay {
                temperature: ForecastTemperature {
                    day: Some(day.temp.day),
                    min: Some(day.temp.min),
                    max: Some(day.temp.max),
                    night: Some(day.temp.night),
                    eve: Some(day.temp.eve),
                    morn: Some(day.temp.morn),
                },
                feels_like: ForecastFeelsLike {
                    day: Some(day.feels_like.day),
                    night: Some(day.feels_like.night),
                    eve: Some(day.feels_like.eve),
                    morn: Some(day.feels_like.morn),
                },
                pressure: day.pressure,
                humidity: day.humidity,
                weather: condition(&day.weather)?,
                wind: Wind {
                    speed: day.wind_speed,
                    deg: day.wind_deg,
                    gust: day.wind_gust,
                },
                clouds: day.clouds,
                rain: day.rain,
                snow: day.snow,
                sunrise: Some(timestamp(day.sunrise)?),
                sunset: Some(timestamp(day.sunset)?),
                moonrise: optional_timestamp(day.moonrise)?,
                moonset: optional_timestamp(day.moonset)?,
                day_time: timestamp(day.dt)?,
            })
        })
        .collect()
}

fn transform_alerts(alerts: Vec<OneCallAlert>) -> Result<Vec<Alert>, String> {
    alerts
        .into_iter()
        .map(|alert| {
            Ok(Alert {
                sender_name: alert.sender_name,
                event: alert.event,
                start: timestamp(alert.start)?,
                end: timestamp(alert.end)?,
                description: alert.description,
                tags: alert.tags,
            })
        })
        .collect()
}

#[derive(Clone)]
pub struct OneCallProvider {
    client: reqwest::Client,
    base_url: String,
    settings: Arc<SettingsService>,
}

impl OneCallProvider {
    pub fn new(client: reqwest::Client, base_url: &str, settings: Arc<SettingsService>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            settings,
        }
    }

    /// GET `/data/3.0/onecall` with the given `exclude` list.
    async fn fetch<T: DeserializeOwned>(&self, location: &Location, exclude: &str) -> Option<T> {
        let weather_settings = self.settings.weather();
        let Some(api_key) = weather_settings.api_key else {
            tracing::warn!("Missing API key for OpenWeatherMap One Call 3.0");
            return None;
        };

        let shape: OneCallLocation = match serde_json::from_value(location.attributes.clone()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("One Call: location={} has invalid attributes: {}", location.id, e);
                return None;
            }
        };

        let url = format!("{}/data/3.0/onecall", self.base_url);
        let language = self.settings.system().language;

        let response = match self
            .client
            .get(&url)
            .query(&[
                ("lat", shape.latitude.to_string()),
                ("lon", shape.longitude.to_string()),
            ])
            .query(&[
                ("appid", api_key.as_str()),
                ("units", weather_settings.unit.as_owm_units()),
                ("lang", language.code()),
                ("exclude", exclude),
            ])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("One Call request failed: {}", e);
                return None;
            }
        };

        let status = response.status();
        let body = match response.bytes().await {
            Ok(b) => b,
            Err(e) => {
                tracing::error!("One Call body read failed: {}", e);
                return None;
            }
        };

        if !status.is_success() {
            tracing::error!(
                "One Call request failed with HTTP {}: {}",
                status,
                String::from_utf8_lossy(&body)
            );
            return None;
        }

        match serde_json::from_slice::<T>(&body) {
            Ok(dto) => Some(dto),
            Err(e) => {
                tracing::error!("One Call response validation failed: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl WeatherProvider for OneCallProvider {
    fn provider_type(&self) -> &str {
        ONECALL_TYPE
    }

    fn name(&self) -> &str {
        "OpenWeatherMap One Call"
    }

    fn description(&self) -> &str {
        "Current weather, 8 day forecast and alerts from OpenWeatherMap One Call 3.0"
    }

    fn supports_alerts(&self) -> bool {
        true
    }

    async fn get_current_weather(&self, location: &Location) -> Option<CurrentSnapshot> {
        let dto = self
            .fetch::<OneCallResponse>(location, "minutely,hourly")
            .await?;
        let Some(current) = dto.current else {
            tracing::error!("One Call response has no current block");
            return None;
        };

        let current = transform_current(current)
            .map_err(|e| tracing::error!("One Call current validation failed: {}", e))
            .ok()?;

        let country = serde_json::from_value::<OneCallLocation>(location.attributes.clone())
            .ok()
            .and_then(|s| s.country_code);

        Some(CurrentSnapshot {
            current,
            location: LocationSummary {
                name: location.name.clone(),
                country,
            },
        })
    }

    async fn get_forecast_weather(&self, location: &Location) -> Option<Vec<ForecastDay>> {
        let dto = self
            .fetch::<OneCallResponse>(location, "minutely,hourly")
            .await?;
        transform_daily(dto.daily)
            .map_err(|e| tracing::error!("One Call daily validation failed: {}", e))
            .ok()
    }

    async fn get_alerts(&self, location: &Location) -> Option<Vec<Alert>> {
        let dto = self
            .fetch::<OneCallResponse>(location, "current,minutely,hourly,daily")
            .await?;
        transform_alerts(dto.alerts)
            .map_err(|e| tracing::error!("One Call alerts validation failed: {}", e))
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::openweathermap::tests::settings;
    use chrono::Utc;
    use uuid::Uuid;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn brno() -> Location {
        Location {
            id: Uuid::new_v4(),
            name: "Brno".to_string(),
            location_type: ONECALL_TYPE.to_string(),
            attributes: serde_json::json!({
                "latitude": 49.19,
                "longitude": 16.61,
                "country_code": "CZ"
            }),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    fn onecall_body() -> serde_json::Value {
        let weather = serde_json::json!([
            { "id": 601, "main": "Snow", "description": "snow", "icon": "13d" }
        ]);
        serde_json::json!({
            "lat": 49.19,
            "lon": 16.61,
            "timezone": "Europe/Prague",
            "timezone_offset": 3600,
            "current": {
                "dt": 1772352000,
                "sunrise": 1772343000,
                "sunset": 1772383000,
                "temp": -2.0,
                "feels_like": -6.5,
                "pressure": 1020,
                "humidity": 88,
                "clouds": 100,
                "wind_speed": 5.5,
                "wind_deg": 340,
                "wind_gust": 9.1,
                "snow": { "1h": 0.8 },
                "weather": weather
            },
            "daily": [{
                "dt": 1772362800,
                "sunrise": 1772343000,
                "sunset": 1772383000,
                "moonrise": 1772370000,
                "moonset": 0,
                "temp": { "day": -1.0, "min": -5.0, "max": 0.5, "night": -4.0, "eve": -2.0, "morn": -3.0 },
                "feels_like": { "day": -5.0, "night": -8.0, "eve": -6.0, "morn": -7.0 },
                "pressure": 1018,
                "humidity": 90,
                "clouds": 100,
                "wind_speed": 6.0,
                "wind_deg": 330,
                "snow": 4.2,
                "weather": weather
            }],
            "alerts": [{
                "sender_name": "CHMI",
                "event": "Snow drifts",
                "start": 1772352000,
                "end": 1772395200,
                "description": "Heavy snow drifts expected",
                "tags": ["Snow/Ice"]
            }]
        })
    }

    #[test]
    fn test_descriptor() {
        let shape: OneCallLocation = serde_json::from_value(brno().attributes).unwrap();
        assert_eq!(
            shape.descriptor().unwrap(),
            "openweathermap-onecall:lat=49.19&lon=16.61"
        );
    }

    #[test]
    fn test_create_requires_coordinates() {
        let mapping = location_mapping();
        let err = (mapping.validate_create)(&serde_json::json!({ "latitude": 49.19 })).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = (mapping.validate_create)(&serde_json::json!({
            "latitude": 49.19,
            "longitude": 200.0
        }))
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_current_weather() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/3.0/onecall"))
            .and(query_param("lat", "49.19"))
            .and(query_param("lon", "16.61"))
            .and(query_param("exclude", "minutely,hourly"))
            .respond_with(ResponseTemplate::new(200).set_body_json(onecall_body()))
            .mount(&server)
            .await;

        let provider = OneCallProvider::new(reqwest::Client::new(), &server.uri(), settings(Some("k")));
        let snapshot = provider.get_current_weather(&brno()).await.unwrap();

        assert_eq!(snapshot.current.temperature, -2.0);
        assert_eq!(snapshot.current.temperature_min, Some(-2.0));
        assert_eq!(snapshot.current.temperature_max, Some(-2.0));
        assert_eq!(snapshot.current.snow, Some(0.8));
        assert_eq!(snapshot.current.wind.gust, Some(9.1));
        assert_eq!(snapshot.location.name, "Brno");
        assert_eq!(snapshot.location.country.as_deref(), Some("CZ"));
    }

    #[tokio::test]
    async fn test_daily_forecast_maps_directly() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/3.0/onecall"))
            .respond_with(ResponseTemplate::new(200).set_body_json(onecall_body()))
            .mount(&server)
            .await;

        let provider = OneCallProvider::new(reqwest::Client::new(), &server.uri(), settings(Some("k")));
        let days = provider.get_forecast_weather(&brno()).await.unwrap();

        assert_eq!(days.len(), 1);
        assert_eq!(days[0].temperature.min, Some(-5.0));
        assert_eq!(days[0].feels_like.night, Some(-8.0));
        assert_eq!(days[0].snow, Some(4.2));
        assert!(days[0].moonrise.is_some());
        assert_eq!(days[0].moonset, None);
    }

    #[tokio::test]
    async fn test_alerts_only_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/3.0/onecall"))
            .and(query_param("exclude", "current,minutely,hourly,daily"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "lat": 49.19,
                "lon": 16.61,
                "alerts": onecall_body()["alerts"].clone()
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OneCallProvider::new(reqwest::Client::new(), &server.uri(), settings(Some("k")));
        let alerts = provider.get_alerts(&brno()).await.unwrap();

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].sender_name, "CHMI");
        assert_eq!(alerts[0].tags, Some(vec!["Snow/Ice".to_string()]));
        assert!(provider.supports_alerts());
    }

    #[tokio::test]
    async fn test_no_alerts_is_empty_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data/3.0/onecall"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "lat": 1.0, "lon": 2.0 })),
            )
            .mount(&server)
            .await;

        let provider = OneCallProvider::new(reqwest::Client::new(), &server.uri(), settings(Some("k")));
        assert_eq!(provider.get_alerts(&brno()).await, Some(vec![]));
    }

    #[tokio::test]
    async fn test_upstream_error_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let provider = OneCallProvider::new(reqwest::Client::new(), &server.uri(), settings(Some("k")));
        assert!(provider.get_current_weather(&brno()).await.is_none());
        assert!(provider.get_alerts(&brno()).await.is_none());
    }
}
