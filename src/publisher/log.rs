//! Plain-text log of published averages.

use crate::error::{MonitorError, Result};
use crate::sensor::data::AverageSnapshot;
use crate::sensor::protocol::Precipitation;
use chrono::{NaiveDateTime, TimeZone, Utc};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// First line of every average log.
pub const LOG_HEADER: &str = "time,T_ambient,humidity,windspeed,dT_sky,raining,samples";

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const UNKNOWN: &str = "NA";

/// Appends one CSV line per published average.
///
/// Write failures are reported once per failure episode: the first failure
/// is logged, later ones are suppressed until a write succeeds again.
#[derive(Debug)]
pub struct AverageLog {
    path: PathBuf,
    failing: bool,
    reported_failures: u64,
}

impl AverageLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            failing: false,
            reported_failures: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the last write failed.
    pub fn is_failing(&self) -> bool {
        self.failing
    }

    /// Number of failure episodes that were reported.
    pub fn reported_failures(&self) -> u64 {
        self.reported_failures
    }

    /// Write `snapshot`, reporting a failure only when an episode starts.
    /// Returns whether the line was written.
    pub fn record(&mut self, snapshot: &AverageSnapshot) -> bool {
        match self.append(snapshot) {
            Ok(()) => {
                if self.failing {
                    info!("Average log {} is writable again", self.path.display());
                    self.failing = false;
                }
                true
            }
            Err(e) => {
                if !self.failing {
                    error!("{}", e);
                    self.failing = true;
                    self.reported_failures += 1;
                }
                false
            }
        }
    }

    /// Append one line, writing the header first if the file is new or empty.
    pub fn append(&self, snapshot: &AverageSnapshot) -> Result<()> {
        let write = || -> std::io::Result<()> {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            let mut text = String::new();
            if file.metadata()?.len() == 0 {
                text.push_str(LOG_HEADER);
                text.push('\n');
            }
            text.push_str(&format_line(snapshot));
            text.push('\n');
            file.write_all(text.as_bytes())
        };
        write().map_err(|e| {
            MonitorError::log_write_error(format!(
                "cannot write average log {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    /// Read the most recent `limit` averages back from the log, newest first.
    /// A missing file yields an empty history.
    pub fn load_history(&self, limit: usize) -> Result<Vec<AverageSnapshot>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        let mut lines = content.lines();
        if lines.next() != Some(LOG_HEADER) {
            error!("Invalid average log format in {}", self.path.display());
            return Ok(Vec::new());
        }

        let mut history: Vec<AverageSnapshot> = lines
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| {
                let parsed = parse_line(line);
                if parsed.is_none() {
                    warn!("Skipping invalid average log line: {}", line);
                }
                parsed
            })
            .collect();
        // Lines are appended in publish order and timestamps only keep whole
        // seconds, so reverse first and let the stable sort keep ties newest first.
        history.reverse();
        history.sort_by(|a, b| b.computed_at.cmp(&a.computed_at));
        history.truncate(limit);
        Ok(history)
    }
}

/// Format one log line (without the terminator).
pub fn format_line(snapshot: &AverageSnapshot) -> String {
    format!(
        "{},{},{},{},{},{},{}",
        snapshot.computed_at.format(TIME_FORMAT),
        format_value(snapshot.ambient_temperature),
        format_value(snapshot.humidity),
        format_value(snapshot.wind_speed),
        format_value(snapshot.sky_temperature),
        match snapshot.rain {
            Precipitation::Wet => "True",
            Precipitation::Dry => "False",
            Precipitation::Unknown => UNKNOWN,
        },
        snapshot.sample_count
    )
}

fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.2}", v),
        None => UNKNOWN.to_string(),
    }
}

/// Parse one log line back into a snapshot. The window bounds are not
/// logged, so they come back empty.
pub fn parse_line(line: &str) -> Option<AverageSnapshot> {
    let columns: Vec<&str> = line.trim().split(',').collect();
    let [time, ambient, humidity, wind, sky, raining, samples] = columns.as_slice() else {
        return None;
    };

    let time = NaiveDateTime::parse_from_str(time, TIME_FORMAT).ok()?;
    let mut snapshot = AverageSnapshot::empty(Utc.from_utc_datetime(&time));
    snapshot.ambient_temperature = parse_value(ambient)?;
    snapshot.humidity = parse_value(humidity)?;
    snapshot.wind_speed = parse_value(wind)?;
    snapshot.sky_temperature = parse_value(sky)?;
    snapshot.rain = match *raining {
        "True" => Precipitation::Wet,
        "False" => Precipitation::Dry,
        UNKNOWN => Precipitation::Unknown,
        _ => return None,
    };
    snapshot.sample_count = samples.parse().ok()?;
    Some(snapshot)
}

/// `Some(None)` for the unknown marker, `None` for unparseable text.
fn parse_value(text: &str) -> Option<Option<f64>> {
    if text == UNKNOWN {
        Some(None)
    } else {
        text.parse().ok().map(Some)
    }
}
