//! Time-series backend.
//!
//! A small point/query/continuous-query API in the shape of a metrics store,
//! implemented on TimescaleDB. The backend is optional: without a
//! connection every call fails with [`TimeSeriesError::NotConnected`] and
//! callers decide how to degrade.
//!
//! A point is identified by its measurement, its first tag (the series key)
//! and its timestamp. Writing the same point again replaces its fields
//! instead of adding a row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::{PgArguments, PgPool, PgRow};
use sqlx::query::Query as SqlxQuery;
use sqlx::{Column, Postgres, Row as _, TypeInfo};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

#[derive(Debug, thiserror::Error)]
pub enum TimeSeriesError {
    #[error("Time-series backend is not connected")]
    NotConnected,

    #[error("Time-series database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Unsupported time-series operation: {0}")]
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Float(f64),
    Int(i64),
    Text(String),
    Time(DateTime<Utc>),
    Null,
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            FieldValue::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Time(v) => Some(*v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Float,
    Integer,
}

impl FieldType {
    fn sql(&self) -> &'static str {
        match self {
            FieldType::Float => "DOUBLE PRECISION",
            FieldType::Integer => "BIGINT",
        }
    }
}

/// Field types and tag keys of one measurement.
#[derive(Debug, Clone)]
pub struct MeasurementSchema {
    pub measurement: &'static str,
    /// The first tag is the series key
    pub tags: Vec<&'static str>,
    pub fields: Vec<(&'static str, FieldType)>,
    /// Raw-data retention as a Postgres interval, e.g. `"7 days"`
    pub retention: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: DateTime<Utc>,
}

/// One result row, keyed by column name.
pub type Row = BTreeMap<String, FieldValue>;

/// A background downsampling job.
#[derive(Debug, Clone)]
pub struct ContinuousQuery {
    pub name: String,
    /// `SELECT` producing the aggregated rows
    pub query: String,
    pub destination: String,
    /// How often the job runs, e.g. `"1 minute"`
    pub resample_every: String,
    /// How far back each run recomputes, e.g. `"2 hours"`
    pub resample_for: String,
    pub retention: Option<String>,
}

#[async_trait]
pub trait TimeSeriesBackend: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Create the measurement if it does not exist. Safe to call repeatedly.
    async fn register_schema(&self, schema: &MeasurementSchema) -> Result<(), TimeSeriesError>;

    async fn write_points(&self, points: &[Point]) -> Result<(), TimeSeriesError>;

    /// Run a read statement with positional `$n` binds.
    async fn query(&self, statement: &str, binds: &[FieldValue]) -> Result<Vec<Row>, TimeSeriesError>;

    async fn create_continuous_query(&self, cq: &ContinuousQuery) -> Result<(), TimeSeriesError>;
}

/// Measurement, tag and field names end up in SQL text, so only plain
/// identifiers are accepted.
fn identifier(name: &str) -> Result<&str, TimeSeriesError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(name)
    } else {
        Err(TimeSeriesError::Unsupported(format!("invalid identifier '{}'", name)))
    }
}

fn bind_value<'q>(
    query: SqlxQuery<'q, Postgres, PgArguments>,
    value: &FieldValue,
) -> SqlxQuery<'q, Postgres, PgArguments> {
    match value {
        FieldValue::Float(v) => query.bind(*v),
        FieldValue::Int(v) => query.bind(*v),
        FieldValue::Text(v) => query.bind(v.clone()),
        FieldValue::Time(v) => query.bind(*v),
        FieldValue::Null => query.bind(None::<f64>),
    }
}

fn decode_row(row: &PgRow) -> Result<Row, sqlx::Error> {
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "FLOAT8" => row.try_get::<Option<f64>, _>(i)?.map(FieldValue::Float),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(i)?
                .map(|v| FieldValue::Float(v as f64)),
            "INT8" => row.try_get::<Option<i64>, _>(i)?.map(FieldValue::Int),
            "INT4" => row
                .try_get::<Option<i32>, _>(i)?
                .map(|v| FieldValue::Int(v as i64)),
            "INT2" => row
                .try_get::<Option<i16>, _>(i)?
                .map(|v| FieldValue::Int(v as i64)),
            "TEXT" | "VARCHAR" | "NAME" => row.try_get::<Option<String>, _>(i)?.map(FieldValue::Text),
            "TIMESTAMPTZ" => row
                .try_get::<Option<DateTime<Utc>>, _>(i)?
                .map(FieldValue::Time),
            other => {
                tracing::debug!("Skipping column {} of unsupported type {}", column.name(), other);
                None
            }
        };
        out.insert(column.name().to_string(), value.unwrap_or(FieldValue::Null));
    }
    Ok(out)
}

/// `INSERT` for one point. With a series key the statement upserts on
/// `(series_key, time)`, overwriting every other column.
fn insert_statement(table: &str, columns: &[&str], series_key: Option<&str>) -> String {
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
    let mut statement = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders.join(", ")
    );

    if let Some(key) = series_key {
        let updates: Vec<String> = columns
            .iter()
            .filter(|c| **c != "time" && **c != key)
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect();
        if updates.is_empty() {
            statement.push_str(&format!(" ON CONFLICT ({}, time) DO NOTHING", key));
        } else {
            statement.push_str(&format!(
                " ON CONFLICT ({}, time) DO UPDATE SET {}",
                key,
                updates.join(", ")
            ));
        }
    }
    statement
}

/// TimescaleDB-backed time-series store.
#[derive(Clone)]
pub struct PgTimeSeries {
    pool: Option<PgPool>,
    /// Series key per registered measurement
    series_keys: Arc<RwLock<HashMap<String, String>>>,
}

impl PgTimeSeries {
    pub fn new(pool: Option<PgPool>) -> Self {
        Self {
            pool,
            series_keys: Arc::default(),
        }
    }

    pub fn disconnected() -> Self {
        Self::new(None)
    }

    fn series_key(&self, measurement: &str) -> Option<String> {
        self.series_keys
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(measurement)
            .cloned()
    }

    fn pool(&self) -> Result<&PgPool, TimeSeriesError> {
        self.pool.as_ref().ok_or(TimeSeriesError::NotConnected)
    }
}

#[async_trait]
impl TimeSeriesBackend for PgTimeSeries {
    fn is_connected(&self) -> bool {
        self.pool.is_some()
    }

    async fn register_schema(&self, schema: &MeasurementSchema) -> Result<(), TimeSeriesError> {
        let pool = self.pool()?;
        let table = identifier(schema.measurement)?;

        let mut columns = vec!["time TIMESTAMPTZ NOT NULL".to_string()];
        for tag in &schema.tags {
            columns.push(format!("{} TEXT NOT NULL", identifier(tag)?));
        }
        for (field, field_type) in &schema.fields {
            columns.push(format!("{} {}", identifier(field)?, field_type.sql()));
        }

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            table,
            columns.join(", ")
        ))
        .execute(pool)
        .await?;

        sqlx::query("SELECT create_hypertable($1::regclass, 'time', if_not_exists => TRUE)")
            .bind(table)
            .execute(pool)
            .await?;

        if let Some(first_tag) = schema.tags.first() {
            let key = identifier(first_tag)?;
            sqlx::query(&format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS ux_{table}_{tag}_time ON {table} ({tag}, time DESC)",
                table = table,
                tag = key
            ))
            .execute(pool)
            .await?;
            self.series_keys
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(table.to_string(), key.to_string());
        }

        if let Some(retention) = schema.retention {
            sqlx::query(
                "SELECT add_retention_policy($1::regclass, $2::interval, if_not_exists => TRUE)",
            )
            .bind(table)
            .bind(retention)
            .execute(pool)
            .await?;
        }

        tracing::info!("Registered time-series measurement {}", table);
        Ok(())
    }

    async fn write_points(&self, points: &[Point]) -> Result<(), TimeSeriesError> {
        let pool = self.pool()?;
        let mut tx = pool.begin().await?;

        for point in points {
            let table = identifier(&point.measurement)?;
            let mut names = vec!["time"];
            for name in point.tags.keys().chain(point.fields.keys()) {
                names.push(identifier(name)?);
            }
            let series_key = self.series_key(table);
            let statement = insert_statement(table, &names, series_key.as_deref());

            let mut query = sqlx::query(&statement).bind(point.timestamp);
            for value in point.tags.values() {
                query = query.bind(value.clone());
            }
            for value in point.fields.values() {
                query = bind_value(query, value);
            }
            query.execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, statement: &str, binds: &[FieldValue]) -> Result<Vec<Row>, TimeSeriesError> {
        let pool = self.pool()?;
        let mut query = sqlx::query(statement);
        for value in binds {
            query = bind_value(query, value);
        }
        let rows = query.fetch_all(pool).await?;
        rows.iter()
            .map(|row| decode_row(row).map_err(TimeSeriesError::from))
            .collect()
    }

    async fn create_continuous_query(&self, cq: &ContinuousQuery) -> Result<(), TimeSeriesError> {
        let pool = self.pool()?;
        let destination = identifier(&cq.destination)?;

        sqlx::query(&format!(
            "CREATE MATERIALIZED VIEW IF NOT EXISTS {} WITH (timescaledb.continuous) AS {} WITH NO DATA",
            destination, cq.query
        ))
        .execute(pool)
        .await?;

        sqlx::query(
            "SELECT add_continuous_aggregate_policy($1::regclass, start_offset => $2::interval, \
             end_offset => NULL, schedule_interval => $3::interval, if_not_exists => TRUE)",
        )
        .bind(destination)
        .bind(&cq.resample_for)
        .bind(&cq.resample_every)
        .execute(pool)
        .await?;

        if let Some(retention) = &cq.retention {
            sqlx::query("SELECT add_retention_policy($1::regclass, $2::interval, if_not_exists => TRUE)")
                .bind(destination)
                .bind(retention)
                .execute(pool)
                .await?;
        }

        tracing::info!("Continuous query {} writes into {}", cq.name, destination);
        Ok(())
    }
}
