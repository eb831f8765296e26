//! Data structures for decoded sensor reports and window averages.

use crate::sensor::protocol::{
    CloudCondition, Daylight, Precipitation, RainCondition, ReportType, SkyCondition,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One decoded sensor (`D`) report.
///
/// Numeric fields are `None` when the device sent an invalid value or a
/// sentinel code instead of a measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// When the frame was decoded
    pub timestamp: DateTime<Utc>,
    /// Sky minus ambient temperature in °C
    pub sky_temperature: Option<f64>,
    /// Ambient temperature in °C
    pub ambient_temperature: Option<f64>,
    /// Wind speed in the units configured on the device
    pub wind_speed: Option<f64>,
    /// Relative humidity in percent (not every head has the sensor)
    pub humidity: Option<f64>,
    /// Dew point in °C
    pub dew_point: Option<f64>,
    /// Rain sensor state
    pub rain: Precipitation,
    /// Wetness sensor state
    pub wet: Precipitation,
    pub cloud_condition: CloudCondition,
    pub sky_condition: SkyCondition,
    pub rain_condition: RainCondition,
    pub daylight: Daylight,
    /// The frame as received, for diagnostics
    pub raw_line: String,
}

impl Reading {
    /// Create a reading with every field unknown.
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            sky_temperature: None,
            ambient_temperature: None,
            wind_speed: None,
            humidity: None,
            dew_point: None,
            rain: Precipitation::Unknown,
            wet: Precipitation::Unknown,
            cloud_condition: CloudCondition::Unknown,
            sky_condition: SkyCondition::Unknown,
            rain_condition: RainCondition::Unknown,
            daylight: Daylight::Unknown,
            raw_line: String::new(),
        }
    }

    /// Daylight as a flag, `None` while the device reports it as unknown.
    pub fn is_daylight(&self) -> Option<bool> {
        match self.daylight {
            Daylight::Unknown => None,
            Daylight::Daylight => Some(true),
            Daylight::Night | Daylight::Twilight => Some(false),
        }
    }

    /// Whether any of the averaged fields holds a valid value.
    pub fn has_averaged_value(&self) -> bool {
        self.sky_temperature.is_some()
            || self.ambient_temperature.is_some()
            || self.wind_speed.is_some()
            || self.humidity.is_some()
            || self.rain.is_known()
    }

    /// Age of the reading relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.timestamp
    }
}

/// Average over the readings of one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AverageSnapshot {
    /// Timestamp of the oldest reading that was averaged
    pub window_start: Option<DateTime<Utc>>,
    /// Timestamp of the newest reading that was averaged
    pub window_end: Option<DateTime<Utc>>,
    /// When the average was computed
    pub computed_at: DateTime<Utc>,
    /// Number of readings with at least one valid averaged field
    pub sample_count: usize,
    pub sky_temperature: Option<f64>,
    pub ambient_temperature: Option<f64>,
    pub wind_speed: Option<f64>,
    pub humidity: Option<f64>,
    /// Wet if any reading in the window was wet
    pub rain: Precipitation,
}

impl AverageSnapshot {
    /// Snapshot of an empty window.
    pub fn empty(computed_at: DateTime<Utc>) -> Self {
        Self {
            window_start: None,
            window_end: None,
            computed_at,
            sample_count: 0,
            sky_temperature: None,
            ambient_temperature: None,
            wind_speed: None,
            humidity: None,
            rain: Precipitation::Unknown,
        }
    }

    /// Average `readings`, field by field, over the values that are known.
    pub fn compute<'a, I>(readings: I, computed_at: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = &'a Reading>,
        I::IntoIter: Clone,
    {
        let readings = readings.into_iter();
        let mut snapshot = Self::empty(computed_at);

        for reading in readings.clone() {
            snapshot.window_start = Some(match snapshot.window_start {
                Some(start) => start.min(reading.timestamp),
                None => reading.timestamp,
            });
            snapshot.window_end = Some(match snapshot.window_end {
                Some(end) => end.max(reading.timestamp),
                None => reading.timestamp,
            });
            if reading.has_averaged_value() {
                snapshot.sample_count += 1;
            }
        }

        snapshot.sky_temperature = mean(readings.clone().filter_map(|r| r.sky_temperature));
        snapshot.ambient_temperature =
            mean(readings.clone().filter_map(|r| r.ambient_temperature));
        snapshot.wind_speed = mean(readings.clone().filter_map(|r| r.wind_speed));
        snapshot.humidity = mean(readings.clone().filter_map(|r| r.humidity));

        let mut rain = Precipitation::Unknown;
        for reading in readings {
            match reading.rain {
                Precipitation::Wet => {
                    rain = Precipitation::Wet;
                    break;
                }
                Precipitation::Dry => rain = Precipitation::Dry,
                Precipitation::Unknown => {}
            }
        }
        snapshot.rain = rain;

        snapshot
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Value of one decoded column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Flag(char),
    Code(u8),
    Unknown,
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Code(c) => Some(f64::from(*c)),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<char> {
        match self {
            Self::Flag(c) => Some(*c),
            _ => None,
        }
    }

    pub fn as_code(&self) -> Option<u8> {
        match self {
            Self::Code(c) => Some(*c),
            _ => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

/// A decoded report other than the sensors report: calibration, thresholds
/// or wetness details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuxiliaryReport {
    pub report_type: ReportType,
    pub timestamp: DateTime<Utc>,
    /// Column values in device order
    pub values: Vec<(String, FieldValue)>,
    pub raw_line: String,
}

impl AuxiliaryReport {
    /// Look up a column by name.
    pub fn value(&self, name: &str) -> Option<FieldValue> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }
}
