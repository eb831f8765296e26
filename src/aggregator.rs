//! Shared store of the latest reading and the trailing averaging window.

use crate::error::{MonitorError, Result};
use crate::sensor::data::{AuxiliaryReport, AverageSnapshot, Reading};
use crate::sensor::protocol::ReportType;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Bound on the readings retained for averaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Window {
    /// Keep the most recent `n` readings
    Count(usize),
    /// Keep readings no older than this, measured from the newest reading
    Duration(Duration),
}

impl Default for Window {
    fn default() -> Self {
        Self::Duration(Duration::from_secs(300))
    }
}

impl Window {
    /// An empty window would never hold a reading to average.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Count(0) => Err(MonitorError::config_error(
                "Averaging window must hold at least one reading",
            )),
            Self::Duration(d) if d.is_zero() => Err(MonitorError::config_error(
                "Averaging window duration must be positive",
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    readings: VecDeque<Reading>,
    latest: Option<Reading>,
    auxiliary: HashMap<ReportType, AuxiliaryReport>,
}

/// Single-writer, multi-reader store between the port reader and the
/// publisher. All access goes through one lock, so a reader never sees a
/// window that is half updated.
#[derive(Debug)]
pub struct Aggregator {
    window: Window,
    state: RwLock<State>,
}

impl Aggregator {
    pub fn new(window: Window) -> Result<Self> {
        window.validate()?;
        Ok(Self {
            window,
            state: RwLock::new(State::default()),
        })
    }

    pub fn window(&self) -> Window {
        self.window
    }

    /// Append a reading and evict what falls outside the window.
    pub fn record(&self, reading: Reading) {
        let mut state = self.write();
        state.latest = Some(reading.clone());
        state.readings.push_back(reading);

        match self.window {
            Window::Count(n) => {
                while state.readings.len() > n {
                    state.readings.pop_front();
                }
            }
            Window::Duration(span) => {
                // A span too large for chrono never evicts anything.
                let Ok(span) = chrono::Duration::from_std(span) else {
                    return;
                };
                if let Some(newest) = state.readings.back().map(|r| r.timestamp) {
                    while state
                        .readings
                        .front()
                        .is_some_and(|oldest| newest - oldest.timestamp > span)
                    {
                        state.readings.pop_front();
                    }
                }
            }
        }
    }

    /// The most recently recorded reading, even if it has left the window.
    pub fn latest(&self) -> Option<Reading> {
        self.read().latest.clone()
    }

    /// Average of the readings currently in the window.
    pub fn average(&self) -> AverageSnapshot {
        let state = self.read();
        AverageSnapshot::compute(state.readings.iter(), Utc::now())
    }

    /// Number of readings in the window.
    pub fn len(&self) -> usize {
        self.read().readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().readings.is_empty()
    }

    /// Keep the latest report of each auxiliary type.
    pub fn record_auxiliary(&self, report: AuxiliaryReport) {
        self.write().auxiliary.insert(report.report_type, report);
    }

    pub fn auxiliary(&self, report_type: ReportType) -> Option<AuxiliaryReport> {
        self.read().auxiliary.get(&report_type).cloned()
    }

    /// Latest report of every auxiliary type received so far, ordered by
    /// report letter.
    pub fn auxiliary_reports(&self) -> Vec<AuxiliaryReport> {
        let mut reports: Vec<_> = self.read().auxiliary.values().cloned().collect();
        reports.sort_by_key(|r| r.report_type.code());
        reports
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self {
            window: Window::default(),
            state: RwLock::new(State::default()),
        }
    }
}
