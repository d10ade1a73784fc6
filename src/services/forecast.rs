//! Forecast aggregation.
//!
//! Turns a flat list of sub-daily forecast samples into one [`ForecastDay`]
//! per UTC calendar day. Pure functions, no I/O.
//!
//! Temperatures and feels-like values are averaged per day segment; min/max
//! come from every sample of the day. The scalar fields (pressure, humidity,
//! wind, clouds, rain, snow, condition) are copied from the first sample of
//! the day rather than aggregated. That is a known simplification and callers
//! rely on it, so it is kept.

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use std::collections::BTreeMap;

use crate::models::{ForecastDay, ForecastFeelsLike, ForecastTemperature, WeatherCondition, Wind};

/// One sub-daily forecast sample as delivered by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastSample {
    pub time: DateTime<Utc>,
    pub temperature: f64,
    pub feels_like: f64,
    pub pressure: f64,
    pub humidity: f64,
    pub weather: WeatherCondition,
    pub wind: Wind,
    pub clouds: f64,
    pub rain: Option<f64>,
    pub snow: Option<f64>,
}

/// Fixed UTC-hour bucket within a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaySegment {
    Morning,
    Day,
    Evening,
    Night,
}

impl DaySegment {
    /// Classify a UTC hour: [6,12) morning, [12,18) day, [18,20) evening,
    /// everything else night. The evening window is two hours wide on purpose.
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            6..=11 => DaySegment::Morning,
            12..=17 => DaySegment::Day,
            18..=19 => DaySegment::Evening,
            _ => DaySegment::Night,
        }
    }
}

#[derive(Debug, Default)]
struct SegmentValues {
    morn: Vec<f64>,
    day: Vec<f64>,
    eve: Vec<f64>,
    night: Vec<f64>,
}

impl SegmentValues {
    fn push(&mut self, segment: DaySegment, value: f64) {
        match segment {
            DaySegment::Morning => self.morn.push(value),
            DaySegment::Day => self.day.push(value),
            DaySegment::Evening => self.eve.push(value),
            DaySegment::Night => self.night.push(value),
        }
    }
}

struct DayBucket<'a> {
    temps: Vec<f64>,
    temperature: SegmentValues,
    feels_like: SegmentValues,
    representative: &'a ForecastSample,
}

/// Arithmetic mean, or `None` for an empty slice.
pub fn average(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn min_of(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}

fn max_of(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    DateTime::<Utc>::from_naive_utc_and_offset(date.and_time(chrono::NaiveTime::MIN), Utc)
}

/// Aggregate sub-daily samples into one forecast day per UTC calendar day,
/// ordered by day.
pub fn aggregate_daily(samples: &[ForecastSample]) -> Vec<ForecastDay> {
    let mut days: BTreeMap<NaiveDate, DayBucket<'_>> = BTreeMap::new();

    for sample in samples {
        let bucket = days
            .entry(sample.time.date_naive())
            .or_insert_with(|| DayBucket {
                temps: Vec::new(),
                temperature: SegmentValues::default(),
                feels_like: SegmentValues::default(),
                representative: sample,
            });

        let segment = DaySegment::from_hour(sample.time.hour());
        bucket.temps.push(sample.temperature);
        bucket.temperature.push(segment, sample.temperature);
        bucket.feels_like.push(segment, sample.feels_like);
    }

    days.into_iter()
        .map(|(date, bucket)| {
            let item = bucket.representative;
            ForecastDay {
                temperature: ForecastTemperature {
                    day: average(&bucket.temperature.day),
                    min: min_of(&bucket.temps),
                    max: max_of(&bucket.temps),
                    night: average(&bucket.temperature.night),
                    eve: average(&bucket.temperature.eve),
                    morn: average(&bucket.temperature.morn),
                },
                feels_like: ForecastFeelsLike {
                    day: average(&bucket.feels_like.day),
                    night: average(&bucket.feels_like.night),
                    eve: average(&bucket.feels_like.eve),
                    morn: average(&bucket.feels_like.morn),
                },
                pressure: item.pressure,
                humidity: item.humidity,
                weather: item.weather.clone(),
                wind: item.wind.clone(),
                clouds: item.clouds,
                rain: item.rain,
                snow: item.snow,
                sunrise: None,
                sunset: None,
                moonrise: None,
                moonset: None,
                day_time: midnight_utc(date),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(time: &str, temperature: f64) -> ForecastSample {
        ForecastSample {
            time: time.parse().unwrap(),
            temperature,
            feels_like: temperature - 1.0,
            pressure: 1013.0,
            humidity: 70.0,
            weather: WeatherCondition {
                code: 800,
                group: "Clear".to_string(),
                description: "clear sky".to_string(),
                icon: "01d".to_string(),
            },
            wind: Wind {
                speed: 3.0,
                deg: 180.0,
                gust: None,
            },
            clouds: 0.0,
            rain: None,
            snow: None,
        }
    }

    #[test]
    fn test_segment_boundaries() {
        assert_eq!(DaySegment::from_hour(0), DaySegment::Night);
        assert_eq!(DaySegment::from_hour(5), DaySegment::Night);
        assert_eq!(DaySegment::from_hour(6), DaySegment::Morning);
        assert_eq!(DaySegment::from_hour(11), DaySegment::Morning);
        assert_eq!(DaySegment::from_hour(12), DaySegment::Day);
        assert_eq!(DaySegment::from_hour(17), DaySegment::Day);
        assert_eq!(DaySegment::from_hour(18), DaySegment::Evening);
        assert_eq!(DaySegment::from_hour(19), DaySegment::Evening);
        assert_eq!(DaySegment::from_hour(20), DaySegment::Night);
        assert_eq!(DaySegment::from_hour(23), DaySegment::Night);
    }

    #[test]
    fn test_single_day_segments() {
        let samples = vec![
            sample("2026-03-01T03:00:00Z", 10.0),
            sample("2026-03-01T09:00:00Z", 12.0),
            sample("2026-03-01T15:00:00Z", 18.0),
            sample("2026-03-01T19:00:00Z", 14.0),
        ];

        let days = aggregate_daily(&samples);
        assert_eq!(days.len(), 1);

        let t = &days[0].temperature;
        assert_eq!(t.morn, Some(12.0));
        assert_eq!(t.day, Some(18.0));
        assert_eq!(t.eve, Some(14.0));
        // 03:00 is the only night sample
        assert_eq!(t.night, Some(10.0));
        assert_eq!(t.min, Some(10.0));
        assert_eq!(t.max, Some(18.0));

        assert_eq!(days[0].feels_like.morn, Some(11.0));
        assert_eq!(days[0].feels_like.day, Some(17.0));
    }

    #[test]
    fn test_empty_segment_is_none() {
        let samples = vec![
            sample("2026-03-01T12:00:00Z", 20.0),
            sample("2026-03-01T15:00:00Z", 22.0),
        ];

        let days = aggregate_daily(&samples);
        let t = &days[0].temperature;
        assert_eq!(t.day, Some(21.0));
        assert_eq!(t.morn, None);
        assert_eq!(t.eve, None);
        assert_eq!(t.night, None);
        assert_eq!(days[0].feels_like.night, None);
    }

    #[test]
    fn test_min_max_use_all_samples_not_segment_means() {
        let samples = vec![
            sample("2026-03-01T12:00:00Z", 10.0),
            sample("2026-03-01T15:00:00Z", 30.0),
        ];

        let days = aggregate_daily(&samples);
        let t = &days[0].temperature;
        assert_eq!(t.day, Some(20.0));
        assert_eq!(t.min, Some(10.0));
        assert_eq!(t.max, Some(30.0));
    }

    #[test]
    fn test_days_ordered_and_anchored_at_midnight() {
        let samples = vec![
            sample("2026-03-02T09:00:00Z", 5.0),
            sample("2026-03-01T21:00:00Z", 3.0),
            sample("2026-03-02T21:00:00Z", 1.0),
        ];

        let days = aggregate_daily(&samples);
        assert_eq!(days.len(), 2);
        assert_eq!(
            days[0].day_time,
            "2026-03-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
        assert_eq!(
            days[1].day_time,
            "2026-03-02T00:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
        assert_eq!(days[1].temperature.morn, Some(5.0));
        assert_eq!(days[1].temperature.night, Some(1.0));
    }

    #[test]
    fn test_scalars_come_from_first_sample_of_day() {
        let mut first = sample("2026-03-01T09:00:00Z", 5.0);
        first.pressure = 1000.0;
        first.rain = Some(0.4);
        let mut second = sample("2026-03-01T12:00:00Z", 7.0);
        second.pressure = 1020.0;
        second.rain = Some(3.0);

        let days = aggregate_daily(&[first, second]);
        assert_eq!(days[0].pressure, 1000.0);
        assert_eq!(days[0].rain, Some(0.4));
        assert_eq!(days[0].sunrise, None);
    }

    #[test]
    fn test_no_samples_no_days() {
        assert!(aggregate_daily(&[]).is_empty());
    }

    #[test]
    fn test_average() {
        assert_eq!(average(&[]), None);
        assert_eq!(average(&[1.0, 2.0, 3.0]), Some(2.0));
    }
}
