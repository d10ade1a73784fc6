//! Weather history on the time-series backend.
//!
//! Best effort throughout: when the backend is disconnected or a call fails,
//! writes are dropped, history reads return an empty list and statistics
//! return `None`. Errors are logged and never reach the caller.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::CurrentWeather;
use crate::services::timeseries::{
    ContinuousQuery, FieldType, FieldValue, MeasurementSchema, Point, Row, TimeSeriesBackend,
};

const MEASUREMENT: &str = "weather";
const HOURLY_MEASUREMENT: &str = "weather_hourly";

pub const DEFAULT_HISTORY_LIMIT: i64 = 100;
const DEFAULT_HISTORY_HOURS: i64 = 24;
const DEFAULT_STATISTICS_DAYS: i64 = 7;

const FLOAT_FIELDS: [&str; 12] = [
    "temperature",
    "temperature_min",
    "temperature_max",
    "feels_like",
    "pressure",
    "humidity",
    "clouds",
    "wind_speed",
    "wind_deg",
    "wind_gust",
    "rain",
    "snow",
];

/// One stored weather snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct HistoryPoint {
    pub time: DateTime<Utc>,
    pub location_id: String,
    pub location_name: String,
    pub weather_main: String,
    pub temperature: Option<f64>,
    pub temperature_min: Option<f64>,
    pub temperature_max: Option<f64>,
    pub feels_like: Option<f64>,
    pub pressure: Option<f64>,
    pub humidity: Option<f64>,
    pub clouds: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_deg: Option<f64>,
    pub wind_gust: Option<f64>,
    pub rain: Option<f64>,
    pub snow: Option<f64>,
    pub weather_code: Option<i64>,
}

/// Aggregates over a time window.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct WeatherStatistics {
    pub samples: i64,
    pub avg_temperature: Option<f64>,
    pub min_temperature: Option<f64>,
    pub max_temperature: Option<f64>,
    pub avg_humidity: Option<f64>,
    pub avg_pressure: Option<f64>,
    pub total_rain: Option<f64>,
    pub total_snow: Option<f64>,
}

fn float(row: &Row, column: &str) -> Option<f64> {
    row.get(column).and_then(FieldValue::as_f64)
}

fn text(row: &Row, column: &str) -> String {
    row.get(column)
        .and_then(FieldValue::as_str)
        .unwrap_or_default()
        .to_string()
}

impl HistoryPoint {
    fn from_row(row: &Row) -> Option<Self> {
        Some(Self {
            time: row.get("time").and_then(FieldValue::as_time)?,
            location_id: text(row, "location_id"),
            location_name: text(row, "location_name"),
            weather_main: text(row, "weather_main"),
            temperature: float(row, "temperature"),
            temperature_min: float(row, "temperature_min"),
            temperature_max: float(row, "temperature_max"),
            feels_like: float(row, "feels_like"),
            pressure: float(row, "pressure"),
            humidity: float(row, "humidity"),
            clouds: float(row, "clouds"),
            wind_speed: float(row, "wind_speed"),
            wind_deg: float(row, "wind_deg"),
            wind_gust: float(row, "wind_gust"),
            rain: float(row, "rain"),
            snow: float(row, "snow"),
            weather_code: row.get("weather_code").and_then(FieldValue::as_i64),
        })
    }
}

fn schema() -> MeasurementSchema {
    let mut fields: Vec<(&'static str, FieldType)> =
        FLOAT_FIELDS.iter().map(|f| (*f, FieldType::Float)).collect();
    fields.push(("weather_code", FieldType::Integer));

    MeasurementSchema {
        measurement: MEASUREMENT,
        tags: vec!["location_id", "location_name", "weather_main"],
        fields,
        retention: Some("7 days"),
    }
}

fn hourly_rollup() -> ContinuousQuery {
    ContinuousQuery {
        name: "cq_weather_hourly".to_string(),
        query: format!(
            "SELECT time_bucket(INTERVAL '1 hour', time) AS time, \
             location_id, location_name, \
             avg(temperature) AS temperature, \
             min(temperature_min) AS temperature_min, \
             max(temperature_max) AS temperature_max, \
             avg(feels_like) AS feels_like, \
             avg(pressure) AS pressure, \
             avg(humidity) AS humidity, \
             avg(clouds) AS clouds, \
             avg(wind_speed) AS wind_speed, \
             avg(wind_deg) AS wind_deg, \
             max(wind_gust) AS wind_gust, \
             sum(rain) AS rain, \
             sum(snow) AS snow, \
             last(weather_code, time) AS weather_code \
             FROM {} GROUP BY 1, location_id, location_name",
            MEASUREMENT
        ),
        destination: HOURLY_MEASUREMENT.to_string(),
        resample_every: "1 minute".to_string(),
        resample_for: "2 hours".to_string(),
        retention: Some("14 days".to_string()),
    }
}

fn to_point(location_id: Uuid, location_name: &str, current: &CurrentWeather) -> Point {
    let tags = BTreeMap::from([
        ("location_id".to_string(), location_id.to_string()),
        ("location_name".to_string(), location_name.to_string()),
        ("weather_main".to_string(), current.weather.group.clone()),
    ]);

    let values = [
        current.temperature,
        current.temperature_min.unwrap_or(current.temperature),
        current.temperature_max.unwrap_or(current.temperature),
        current.feels_like,
        current.pressure,
        current.humidity,
        current.clouds,
        current.wind.speed,
        current.wind.deg,
        current.wind.gust.unwrap_or(0.0),
        current.rain.unwrap_or(0.0),
        current.snow.unwrap_or(0.0),
    ];
    let mut fields: BTreeMap<String, FieldValue> = FLOAT_FIELDS
        .iter()
        .zip(values)
        .map(|(name, value)| (name.to_string(), FieldValue::Float(value)))
        .collect();
    fields.insert("weather_code".to_string(), FieldValue::Int(current.weather.code));

    Point {
        measurement: MEASUREMENT.to_string(),
        tags,
        fields,
        timestamp: current.day_time,
    }
}

#[derive(Clone)]
pub struct WeatherHistoryService {
    backend: Arc<dyn TimeSeriesBackend>,
}

impl WeatherHistoryService {
    pub fn new(backend: Arc<dyn TimeSeriesBackend>) -> Self {
        Self { backend }
    }

    pub fn is_connected(&self) -> bool {
        self.backend.is_connected()
    }

    /// Create the measurement and the hourly rollup. Idempotent; failures
    /// are logged.
    pub async fn register_schema(&self) {
        if !self.backend.is_connected() {
            tracing::warn!("Time-series backend not connected, weather history disabled");
            return;
        }

        if let Err(e) = self.backend.register_schema(&schema()).await {
            tracing::error!("Failed to register weather history schema: {}", e);
            return;
        }

        if let Err(e) = self.backend.create_continuous_query(&hourly_rollup()).await {
            tracing::warn!("Failed to set up weather history downsampling: {}", e);
        }
    }

    /// Persist one snapshot. A disconnected backend is a silent no-op.
    pub async fn store_weather_data(&self, location_id: Uuid, location_name: &str, current: &CurrentWeather) {
        if !self.backend.is_connected() {
            return;
        }

        let point = to_point(location_id, location_name, current);
        match self.backend.write_points(&[point]).await {
            Ok(()) => tracing::debug!("Stored weather history for location={}", location_id),
            Err(e) => tracing::error!(
                "Failed to store weather history for location={}: {}",
                location_id,
                e
            ),
        }
    }

    /// Points for a location, newest first.
    ///
    /// The window defaults to the 24 hours before `end` (or before now when
    /// `end` is absent). `limit` defaults to 100 and is clamped to at least 1;
    /// the HTTP layer rejects non-positive limits before they get here.
    pub async fn get_history(
        &self,
        location_id: Uuid,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<i64>,
    ) -> Vec<HistoryPoint> {
        if !self.backend.is_connected() {
            return Vec::new();
        }

        let end = end.unwrap_or_else(Utc::now);
        let start = start.unwrap_or(end - Duration::hours(DEFAULT_HISTORY_HOURS));
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).max(1);

        let statement = format!(
            "SELECT time, location_id, location_name, weather_main, {}, weather_code \
             FROM {} WHERE location_id = $1 AND time >= $2 AND time <= $3 \
             ORDER BY time DESC LIMIT $4",
            FLOAT_FIELDS.join(", "),
            MEASUREMENT
        );
        let binds = [
            FieldValue::Text(location_id.to_string()),
            FieldValue::Time(start),
            FieldValue::Time(end),
            FieldValue::Int(limit),
        ];

        match self.backend.query(&statement, &binds).await {
            Ok(rows) => rows.iter().filter_map(HistoryPoint::from_row).collect(),
            Err(e) => {
                tracing::error!("Failed to get weather history for location={}: {}", location_id, e);
                Vec::new()
            }
        }
    }

    /// Aggregates over the window. Defaults to the last 7 days; `None` when
    /// the window holds no points.
    pub async fn get_statistics(
        &self,
        location_id: Uuid,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Option<WeatherStatistics> {
        if !self.backend.is_connected() {
            return None;
        }

        let end = end.unwrap_or_else(Utc::now);
        let start = start.unwrap_or(end - Duration::days(DEFAULT_STATISTICS_DAYS));

        let statement = format!(
            "SELECT count(*) AS samples, \
             avg(temperature) AS avg_temperature, \
             min(temperature_min) AS min_temperature, \
             max(temperature_max) AS max_temperature, \
             avg(humidity) AS avg_humidity, \
             avg(pressure) AS avg_pressure, \
             sum(rain) AS total_rain, \
             sum(snow) AS total_snow \
             FROM {} WHERE location_id = $1 AND time >= $2 AND time <= $3",
            MEASUREMENT
        );
        let binds = [
            FieldValue::Text(location_id.to_string()),
            FieldValue::Time(start),
            FieldValue::Time(end),
        ];

        let rows = match self.backend.query(&statement, &binds).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(
                    "Failed to get weather statistics for location={}: {}",
                    location_id,
                    e
                );
                return None;
            }
        };

        let row = rows.first()?;
        let samples = row.get("samples").and_then(FieldValue::as_i64).unwrap_or(0);
        if samples == 0 {
            return None;
        }

        Some(WeatherStatistics {
            samples,
            avg_temperature: float(row, "avg_temperature"),
            min_temperature: float(row, "min_temperature"),
            max_temperature: float(row, "max_temperature"),
            avg_humidity: float(row, "avg_humidity"),
            avg_pressure: float(row, "avg_pressure"),
            total_rain: float(row, "total_rain"),
            total_snow: float(row, "total_snow"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{WeatherCondition, Wind};
    use crate::services::timeseries::fake::FakeTimeSeries;

    fn current() -> CurrentWeather {
        CurrentWeather {
            temperature: 12.5,
            temperature_min: None,
            temperature_max: Some(14.0),
            feels_like: 11.0,
            pressure: 1015.0,
            humidity: 65.0,
            weather: WeatherCondition {
                code: 500,
                group: "Rain".to_string(),
                description: "light rain".to_string(),
                icon: "10d".to_string(),
            },
            wind: Wind {
                speed: 3.2,
                deg: 200.0,
                gust: None,
            },
            clouds: 80.0,
            rain: Some(0.6),
            snow: None,
            sunrise: "2026-03-01T05:40:00Z".parse().unwrap(),
            sunset: "2026-03-01T16:50:00Z".parse().unwrap(),
            day_time: "2026-03-01T10:00:00Z".parse().unwrap(),
        }
    }

    fn service(backend: FakeTimeSeries) -> (WeatherHistoryService, Arc<FakeTimeSeries>) {
        let backend = Arc::new(backend);
        (WeatherHistoryService::new(backend.clone()), backend)
    }

    #[tokio::test]
    async fn test_disconnected_backend_degrades() {
        let (history, backend) = service(FakeTimeSeries::default());
        let id = Uuid::new_v4();

        history.register_schema().await;
        history.store_weather_data(id, "Prague", &current()).await;
        assert!(history.get_history(id, None, None, None).await.is_empty());
        assert_eq!(history.get_statistics(id, None, None).await, None);

        assert!(backend.points.lock().unwrap().is_empty());
        assert!(backend.statements.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_register_schema_sets_up_rollup() {
        let (history, backend) = service(FakeTimeSeries::connected());
        history.register_schema().await;

        assert_eq!(*backend.schemas.lock().unwrap(), vec!["weather"]);
        let cqs = backend.continuous_queries.lock().unwrap();
        assert_eq!(cqs.len(), 1);
        assert_eq!(cqs[0].name, "cq_weather_hourly");
        assert_eq!(cqs[0].destination, "weather_hourly");
        assert_eq!(cqs[0].retention.as_deref(), Some("14 days"));
    }

    #[tokio::test]
    async fn test_store_applies_field_defaults() {
        let (history, backend) = service(FakeTimeSeries::connected());
        let id = Uuid::new_v4();
        history.store_weather_data(id, "Prague", &current()).await;

        let points = backend.points.lock().unwrap();
        assert_eq!(points.len(), 1);
        let p = &points[0];
        assert_eq!(p.measurement, "weather");
        assert_eq!(p.timestamp, current().day_time);
        assert_eq!(p.tags["location_id"], id.to_string());
        assert_eq!(p.tags["weather_main"], "Rain");
        assert_eq!(p.fields["temperature_min"], FieldValue::Float(12.5));
        assert_eq!(p.fields["temperature_max"], FieldValue::Float(14.0));
        assert_eq!(p.fields["wind_gust"], FieldValue::Float(0.0));
        assert_eq!(p.fields["snow"], FieldValue::Float(0.0));
        assert_eq!(p.fields["rain"], FieldValue::Float(0.6));
        assert_eq!(p.fields["weather_code"], FieldValue::Int(500));
    }

    #[tokio::test]
    async fn test_store_failure_is_swallowed() {
        let (history, _) = service(FakeTimeSeries {
            connected: true,
            fail: true,
            ..Default::default()
        });
        history.store_weather_data(Uuid::new_v4(), "Prague", &current()).await;
        assert!(history.get_history(Uuid::new_v4(), None, None, None).await.is_empty());
    }

    #[tokio::test]
    async fn test_history_window_defaults() {
        let (history, backend) = service(FakeTimeSeries::connected());
        let id = Uuid::new_v4();
        let end: DateTime<Utc> = "2026-03-02T00:00:00Z".parse().unwrap();

        backend.rows.lock().unwrap().push(Row::from([
            ("time".to_string(), FieldValue::Time(end - Duration::hours(1))),
            ("location_id".to_string(), FieldValue::Text(id.to_string())),
            ("location_name".to_string(), FieldValue::Text("Prague".to_string())),
            ("weather_main".to_string(), FieldValue::Text("Rain".to_string())),
            ("temperature".to_string(), FieldValue::Float(9.0)),
            ("weather_code".to_string(), FieldValue::Int(500)),
        ]));

        let points = history.get_history(id, None, Some(end), None).await;
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].temperature, Some(9.0));
        assert_eq!(points[0].humidity, None);
        assert_eq!(points[0].weather_code, Some(500));

        let statements = backend.statements.lock().unwrap();
        let (sql, binds) = &statements[0];
        assert!(sql.contains("ORDER BY time DESC"));
        assert_eq!(binds[1], FieldValue::Time(end - Duration::hours(24)));
        assert_eq!(binds[2], FieldValue::Time(end));
        assert_eq!(binds[3], FieldValue::Int(100));
    }

    #[tokio::test]
    async fn test_statistics_empty_window_is_none() {
        let (history, backend) = service(FakeTimeSeries::connected());
        backend.rows.lock().unwrap().push(Row::from([
            ("samples".to_string(), FieldValue::Int(0)),
            ("avg_temperature".to_string(), FieldValue::Null),
        ]));

        assert_eq!(history.get_statistics(Uuid::new_v4(), None, None).await, None);
    }

    #[tokio::test]
    async fn test_statistics_mapped() {
        let (history, backend) = service(FakeTimeSeries::connected());
        let end: DateTime<Utc> = "2026-03-08T00:00:00Z".parse().unwrap();
        backend.rows.lock().unwrap().push(Row::from([
            ("samples".to_string(), FieldValue::Int(42)),
            ("avg_temperature".to_string(), FieldValue::Float(8.5)),
            ("min_temperature".to_string(), FieldValue::Float(-1.0)),
            ("max_temperature".to_string(), FieldValue::Float(15.0)),
            ("avg_humidity".to_string(), FieldValue::Float(70.0)),
            ("avg_pressure".to_string(), FieldValue::Float(1011.0)),
            ("total_rain".to_string(), FieldValue::Float(12.4)),
            ("total_snow".to_string(), FieldValue::Float(0.0)),
        ]));

        let stats = history
            .get_statistics(Uuid::new_v4(), None, Some(end))
            .await
            .unwrap();
        assert_eq!(stats.samples, 42);
        assert_eq!(stats.min_temperature, Some(-1.0));
        assert_eq!(stats.total_rain, Some(12.4));

        let statements = backend.statements.lock().unwrap();
        assert_eq!(statements[0].1[1], FieldValue::Time(end - Duration::days(7)));
    }

    #[tokio::test]
    async fn test_history_limit_clamped_to_one() {
        let (history, backend) = service(FakeTimeSeries::connected());

        history.get_history(Uuid::new_v4(), None, None, Some(0)).await;
        history.get_history(Uuid::new_v4(), None, None, Some(-5)).await;

        let statements = backend.statements.lock().unwrap();
        assert_eq!(statements[0].1[3], FieldValue::Int(1));
        assert_eq!(statements[1].1[3], FieldValue::Int(1));
    }
}
