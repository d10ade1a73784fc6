//! In-process TTL cache for normalized weather data.
//!
//! Entries expire a fixed duration after they were written. Reads and writes
//! are not coordinated beyond the lock: concurrent writers to the same key
//! resolve as last-write-wins.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::models::{Alert, CurrentSnapshot, ForecastDay};

/// TTL for current weather and forecasts.
pub const WEATHER_CACHE_TTL_SECS: i64 = 3600;

/// TTL for weather alerts.
pub const ALERTS_CACHE_TTL_SECS: i64 = 900;

/// A cached, already-normalized value.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedWeather {
    Current(CurrentSnapshot),
    Forecast(Vec<ForecastDay>),
    Alerts(Vec<Alert>),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: CachedWeather,
    expires_at: DateTime<Utc>,
}

/// Cache operation namespace, the first half of a cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOp {
    Current,
    Forecast,
    Alerts,
}

impl CacheOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOp::Current => "current",
            CacheOp::Forecast => "forecast",
            CacheOp::Alerts => "alerts",
        }
    }

    pub const ALL: [CacheOp; 3] = [CacheOp::Current, CacheOp::Forecast, CacheOp::Alerts];
}

/// Build the `"<operation>:<location-descriptor>"` key.
pub fn cache_key(op: CacheOp, descriptor: &str) -> String {
    format!("{}:{}", op.as_str(), descriptor)
}

#[derive(Debug, Default)]
pub struct WeatherCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl WeatherCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a live entry, or `None` if absent or expired.
    pub async fn get(&self, key: &str) -> Option<CachedWeather> {
        self.get_at(key, Utc::now()).await
    }

    async fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<CachedWeather> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone())
    }

    pub async fn set(&self, key: String, value: CachedWeather, ttl_secs: i64) {
        self.set_at(key, value, ttl_secs, Utc::now()).await;
    }

    async fn set_at(&self, key: String, value: CachedWeather, ttl_secs: i64, now: DateTime<Utc>) {
        let mut entries = self.entries.write().await;
        // Drop expired entries on write so the map does not grow unbounded.
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + Duration::seconds(ttl_secs),
            },
        );
    }

    pub async fn delete(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Remove every operation's entry for one location descriptor.
    pub async fn delete_descriptor(&self, descriptor: &str) {
        let mut entries = self.entries.write().await;
        for op in CacheOp::ALL {
            entries.remove(&cache_key(op, descriptor));
        }
    }
}
