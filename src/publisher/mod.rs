//! Periodic publication of window averages.
//!
//! The publisher is the only part of the core the web layer talks to. Every
//! accessor returns an owned copy, so nothing handed out can change the
//! aggregator or the reader status.

pub mod log;

pub use log::AverageLog;

use crate::aggregator::Aggregator;
use crate::error::{MonitorError, Result};
use crate::sensor::data::{AuxiliaryReport, AverageSnapshot, Reading};
use crate::sensor::protocol::ReportType;
use crate::sensor::reader::{ConnectionState, LinkStatus, StatusHandle};
use crate::shutdown::Shutdown;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Publisher settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Time between published averages
    pub interval: Duration,
    /// A reading older than this counts as stale
    pub stale_after: Duration,
    /// Number of published averages kept in memory
    pub history_len: usize,
    /// Average log; nothing is written when unset
    pub log_file: Option<PathBuf>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            stale_after: Duration::from_secs(60),
            history_len: 10,
            log_file: None,
        }
    }
}

impl PublisherConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_history_len(mut self, history_len: usize) -> Self {
        self.history_len = history_len;
        self
    }

    pub fn with_log_file(mut self, log_file: Option<PathBuf>) -> Self {
        self.log_file = log_file;
        self
    }

    /// Reject settings the publish loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(MonitorError::config_error("Publish interval must be positive"));
        }
        if self.history_len == 0 {
            return Err(MonitorError::config_error("History must keep at least one average"));
        }
        Ok(())
    }
}

/// Data availability as seen by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Health {
    /// Connected and the latest reading is recent
    Fresh { age_seconds: i64 },
    /// Connected but the latest reading is older than the threshold
    Stale { age_seconds: i64 },
    /// Connected but nothing has been decoded yet
    NoData,
    /// The serial link is not connected
    ConnectionDown,
}

pub struct Publisher {
    aggregator: Arc<Aggregator>,
    status: StatusHandle,
    config: PublisherConfig,
    history: RwLock<VecDeque<AverageSnapshot>>,
    log: Mutex<Option<AverageLog>>,
    log_failing: AtomicBool,
}

impl Publisher {
    /// Create a publisher, reloading recent history from the average log.
    pub fn new(
        aggregator: Arc<Aggregator>,
        status: StatusHandle,
        config: PublisherConfig,
    ) -> Result<Self> {
        config.validate()?;
        let log = config.log_file.as_ref().map(AverageLog::new);

        let history = match &log {
            Some(log) => match log.load_history(config.history_len) {
                Ok(history) => {
                    if !history.is_empty() {
                        info!(
                            "Loaded {} averages from {}",
                            history.len(),
                            log.path().display()
                        );
                    }
                    history
                }
                Err(e) => {
                    warn!("Failed to load history from {}: {}", log.path().display(), e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        Ok(Self {
            aggregator,
            status,
            config,
            history: RwLock::new(history.into()),
            log: Mutex::new(log),
            log_failing: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// The latest decoded reading.
    pub fn current_reading(&self) -> Option<Reading> {
        self.aggregator.latest()
    }

    /// The latest published average, or the current window's average when
    /// nothing has been published yet.
    pub fn current_average(&self) -> AverageSnapshot {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .front()
            .cloned()
            .unwrap_or_else(|| self.aggregator.average())
    }

    /// Published averages, newest first.
    pub fn history(&self) -> Vec<AverageSnapshot> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Latest calibration, threshold or wetness report of the given type.
    pub fn auxiliary(&self, report_type: ReportType) -> Option<AuxiliaryReport> {
        self.aggregator.auxiliary(report_type)
    }

    /// Latest report of every auxiliary type received so far.
    pub fn auxiliary_reports(&self) -> Vec<AuxiliaryReport> {
        self.aggregator.auxiliary_reports()
    }

    /// Connection status of the port reader.
    pub fn status(&self) -> LinkStatus {
        self.status.snapshot()
    }

    pub fn health(&self, now: DateTime<Utc>) -> Health {
        if self.status.state() != ConnectionState::Connected {
            return Health::ConnectionDown;
        }
        let Some(latest) = self.aggregator.latest() else {
            return Health::NoData;
        };

        let age = latest.age(now);
        let age_seconds = age.num_seconds();
        if age.to_std().unwrap_or_default() > self.config.stale_after {
            Health::Stale { age_seconds }
        } else {
            Health::Fresh { age_seconds }
        }
    }

    /// Whether the average log is in a failure episode.
    pub fn log_is_failing(&self) -> bool {
        self.log_failing.load(Ordering::Relaxed)
    }

    /// Compute the current average, add it to the history and log it.
    pub fn publish(&self) -> AverageSnapshot {
        let snapshot = self.aggregator.average();
        debug!(
            "Publishing average over {} samples",
            snapshot.sample_count
        );

        {
            let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
            history.push_front(snapshot.clone());
            history.truncate(self.config.history_len);
        }

        if let Some(log) = self
            .log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            log.record(&snapshot);
            self.log_failing.store(log.is_failing(), Ordering::Relaxed);
        }
        snapshot
    }

    /// Publish every `interval` until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: Shutdown) {
        let period = self.config.interval;
        let mut interval = time::interval_at(time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Publishing averages every {:?}", period);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.publish();
                }
                _ = shutdown.triggered() => {
                    debug!("Publisher stopping");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::Window;
    use crate::sensor::protocol::Precipitation;
    use chrono::Duration as ChronoDuration;

    fn reading(at: DateTime<Utc>, sky: f64) -> Reading {
        let mut reading = Reading::new(at);
        reading.sky_temperature = Some(sky);
        reading.rain = Precipitation::Dry;
        reading
    }

    fn publisher(config: PublisherConfig) -> (Publisher, Arc<Aggregator>, StatusHandle) {
        let aggregator = Arc::new(Aggregator::new(Window::Count(10)).unwrap());
        let status = StatusHandle::default();
        let publisher = Publisher::new(Arc::clone(&aggregator), status.clone(), config).unwrap();
        (publisher, aggregator, status)
    }

    #[test]
    fn test_health_distinguishes_degraded_states() {
        let (publisher, aggregator, status) = publisher(PublisherConfig::default());
        let now = Utc::now();

        assert_eq!(publisher.health(now), Health::ConnectionDown);

        status.update(|s| s.state = ConnectionState::Connected);
        assert_eq!(publisher.health(now), Health::NoData);

        aggregator.record(reading(now - ChronoDuration::seconds(5), -20.0));
        assert_eq!(publisher.health(now), Health::Fresh { age_seconds: 5 });

        let later = now + ChronoDuration::seconds(120);
        assert_eq!(publisher.health(later), Health::Stale { age_seconds: 125 });

        status.update(|s| s.state = ConnectionState::Reconnecting);
        assert_eq!(publisher.health(later), Health::ConnectionDown);
    }

    #[test]
    fn test_current_average_falls_back_to_window() {
        let (publisher, aggregator, _) = publisher(PublisherConfig::default());
        aggregator.record(reading(Utc::now(), -10.0));
        assert_eq!(publisher.current_average().sky_temperature, Some(-10.0));
        assert!(publisher.history().is_empty());

        publisher.publish();
        aggregator.record(reading(Utc::now(), -20.0));

        // The published snapshot stays current until the next publication.
        assert_eq!(publisher.current_average().sky_temperature, Some(-10.0));
        publisher.publish();
        assert_eq!(publisher.current_average().sky_temperature, Some(-15.0));
    }

    #[test]
    fn test_history_is_bounded() {
        let (publisher, aggregator, _) =
            publisher(PublisherConfig::default().with_history_len(3));
        for i in 0..5 {
            aggregator.record(reading(Utc::now(), -(i as f64)));
            publisher.publish();
        }
        assert_eq!(publisher.history().len(), 3);
    }

    #[test]
    fn test_accessors_return_copies() {
        let (publisher, aggregator, _) = publisher(PublisherConfig::default());
        aggregator.record(reading(Utc::now(), -10.0));

        let mut copy = publisher.current_reading().unwrap();
        copy.sky_temperature = Some(99.0);
        assert_eq!(
            publisher.current_reading().unwrap().sky_temperature,
            Some(-10.0)
        );
    }

    #[test]
    fn test_history_reloaded_from_log() {
        let path = std::env::temp_dir().join(format!(
            "boltwood-publisher-{}.csv",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        let config = PublisherConfig::default().with_log_file(Some(path.clone()));

        {
            let (publisher, aggregator, _) = publisher(config.clone());
            aggregator.record(reading(Utc::now(), -12.5));
            publisher.publish();
            assert!(!publisher.log_is_failing());
        }

        let (reloaded, _, _) = publisher(config);
        let history = reloaded.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].sky_temperature, Some(-12.5));
        assert_eq!(history[0].sample_count, 1);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_rejects_unusable_config() {
        let aggregator = Arc::new(Aggregator::default());
        let zero_interval = PublisherConfig::default().with_interval(std::time::Duration::ZERO);
        assert!(matches!(
            Publisher::new(Arc::clone(&aggregator), StatusHandle::default(), zero_interval),
            Err(MonitorError::Config(_))
        ));

        let no_history = PublisherConfig::default().with_history_len(0);
        assert!(no_history.validate().is_err());
        assert!(PublisherConfig::default().validate().is_ok());
    }

    #[test]
    fn test_log_failure_visible_while_log_is_busy() {
        let dir = std::env::temp_dir().join(format!("boltwood-busy-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let (publisher, _, _) = publisher(PublisherConfig::default().with_log_file(Some(dir.clone())));

        publisher.publish();
        assert!(publisher.log_is_failing());

        // Status reads must not wait for a write in progress.
        let writing = publisher.log.lock().unwrap();
        assert!(publisher.log_is_failing());
        drop(writing);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_publishes_on_interval_until_shutdown() {
        let (publisher, aggregator, _) = publisher(
            PublisherConfig::default().with_interval(std::time::Duration::from_secs(60)),
        );
        let publisher = Arc::new(publisher);
        aggregator.record(reading(Utc::now(), -10.0));

        let shutdown = Shutdown::new();
        let task = tokio::spawn(Arc::clone(&publisher).run(shutdown.clone()));

        time::sleep(std::time::Duration::from_secs(150)).await;
        assert_eq!(publisher.history().len(), 2);

        shutdown.trigger();
        task.await.unwrap();
    }
}
