//! Serial acquisition loop.
//!
//! The reader is an explicit state machine:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> (I/O error) -> Reconnecting -> Connecting
//! ```
//!
//! `Stopped` is only entered when shutdown is requested. Decode errors are
//! counted in the status and never close the link; only I/O failures do.

use crate::aggregator::Aggregator;
use crate::error::DecodeError;
use crate::sensor::frame::{decode_frame, Frame, LineBuffer};
use crate::sensor::link::LinkOpener;
use crate::sensor::protocol::{ACK_AND_POLL, REQUEST_POLL};
use crate::shutdown::Shutdown;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Resend the poll request when the sensor has been quiet this long.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

const READ_CHUNK: usize = 512;

/// Connection state of the port reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Stopped,
}

/// Observable state of the acquisition loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkStatus {
    pub state: ConnectionState,
    /// Consecutive failed connection attempts; reset on success
    pub retry_count: u32,
    /// Most recent connection-level error
    pub last_error: Option<String>,
    /// Successful connections since start
    pub connections: u64,
    /// Sensor reports decoded into readings
    pub frames_decoded: u64,
    /// Calibration, threshold and wetness reports received
    pub auxiliary_reports: u64,
    pub malformed_frames: u64,
    pub unsupported_frames: u64,
    /// When the last reading was decoded
    pub last_frame_at: Option<DateTime<Utc>>,
}

/// Read-only view of the reader's status, shared with the publisher.
#[derive(Debug, Clone, Default)]
pub struct StatusHandle {
    inner: Arc<RwLock<LinkStatus>>,
}

impl StatusHandle {
    pub fn snapshot(&self) -> LinkStatus {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut LinkStatus)) {
        let mut status = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut status);
    }
}

/// Delay between connection attempts. The delay starts at `initial` and
/// doubles after every `failures_per_step` consecutive failures, up to `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub failures_per_step: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(900),
            failures_per_step: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the next attempt after `failures` consecutive failures.
    pub fn delay(&self, failures: u32) -> Duration {
        let steps = failures / self.failures_per_step.max(1);
        let factor = 1u32.checked_shl(steps).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

/// Owns the serial link and feeds decoded readings into the aggregator.
pub struct PortReader<O: LinkOpener> {
    opener: O,
    link: Option<O::Link>,
    aggregator: Arc<Aggregator>,
    status: StatusHandle,
    shutdown: Shutdown,
    policy: ReconnectPolicy,
    poll_interval: Duration,
    lines: LineBuffer,
    last_activity: Instant,
}

impl<O: LinkOpener> PortReader<O> {
    pub fn new(opener: O, aggregator: Arc<Aggregator>, shutdown: Shutdown) -> Self {
        Self {
            opener,
            link: None,
            aggregator,
            status: StatusHandle::default(),
            shutdown,
            policy: ReconnectPolicy::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            lines: LineBuffer::new(),
            last_activity: Instant::now(),
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Handle for observing the connection status from other tasks.
    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    /// Run one cycle of the state machine and return the resulting state.
    pub fn step(&mut self) -> ConnectionState {
        if self.shutdown.is_triggered() {
            self.stop();
            return ConnectionState::Stopped;
        }

        match self.status.state() {
            ConnectionState::Stopped => {}
            ConnectionState::Disconnected | ConnectionState::Connecting => self.connect(),
            ConnectionState::Reconnecting => {
                let delay = self.policy.delay(self.status.snapshot().retry_count);
                if self.shutdown.wait_timeout(delay) {
                    self.stop();
                } else {
                    self.connect();
                }
            }
            ConnectionState::Connected => self.read_once(),
        }
        self.status.state()
    }

    /// Run until shutdown is requested. The link is closed before returning.
    pub fn run(mut self) -> LinkStatus {
        info!("Starting acquisition from {}", self.opener.describe());
        while self.step() != ConnectionState::Stopped {}
        self.status.snapshot()
    }

    fn connect(&mut self) {
        self.status.update(|s| s.state = ConnectionState::Connecting);
        debug!("Connecting to Boltwood II sensor on {}", self.opener.describe());

        let mut link = match self.opener.open() {
            Ok(link) => link,
            Err(e) => {
                self.fail(e.to_string());
                return;
            }
        };
        if let Err(e) = link.write_all(&[REQUEST_POLL]) {
            self.fail(format!("failed to send poll request: {}", e));
            return;
        }

        self.link = Some(link);
        self.lines.clear();
        self.last_activity = Instant::now();
        self.status.update(|s| {
            s.state = ConnectionState::Connected;
            s.retry_count = 0;
            s.connections += 1;
        });
        info!("Connected to Boltwood II sensor on {}", self.opener.describe());
    }

    fn fail(&mut self, message: String) {
        self.link = None;
        let mut retries = 0;
        self.status.update(|s| {
            s.state = ConnectionState::Reconnecting;
            s.retry_count += 1;
            s.last_error = Some(message.clone());
            retries = s.retry_count;
        });

        let delay = self.policy.delay(retries);
        if retries == 1 {
            warn!("Connection to Boltwood II failed: {}, retrying in {:?}", message, delay);
        } else if retries % self.policy.failures_per_step.max(1) == 0 {
            error!(
                "{} failed connections to Boltwood II: {}, retrying in {:?}",
                retries, message, delay
            );
        } else {
            debug!("Connection attempt {} failed: {}", retries, message);
        }
    }

    fn stop(&mut self) {
        if self.link.take().is_some() {
            info!("Closed serial link to {}", self.opener.describe());
        }
        self.status.update(|s| s.state = ConnectionState::Stopped);
    }

    fn read_once(&mut self) {
        let Some(link) = self.link.as_mut() else {
            self.fail("serial link is not open".to_string());
            return;
        };

        let mut buf = [0u8; READ_CHUNK];
        let result = link.read(&mut buf);
        match result {
            Ok(0) => self.poll_if_quiet(),
            Ok(n) => {
                let overflows = self.lines.overflows();
                let lines = self.lines.push(&buf[..n]);
                let discarded = self.lines.overflows() - overflows;
                if discarded > 0 {
                    warn!("Discarded unterminated data from the sensor");
                    self.status.update(|s| s.malformed_frames += discarded);
                }
                for line in lines {
                    if let Err(e) = self.handle_line(&line) {
                        self.fail(format!("write failed: {}", e));
                        return;
                    }
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                self.poll_if_quiet()
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => self.fail(format!("read failed: {}", e)),
        }
    }

    fn poll_if_quiet(&mut self) {
        if self.last_activity.elapsed() < self.poll_interval {
            return;
        }
        debug!("No report for {:?}, sending poll request", self.poll_interval);
        if let Err(e) = self.send(&[REQUEST_POLL]) {
            self.fail(format!("write failed: {}", e));
        }
    }

    fn send(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.last_activity = Instant::now();
        match self.link.as_mut() {
            Some(link) => link.write_all(data),
            None => Err(std::io::Error::new(ErrorKind::NotConnected, "link closed")),
        }
    }

    fn handle_line(&mut self, line: &str) -> std::io::Result<()> {
        if line.is_empty() {
            return self.send(&[REQUEST_POLL]);
        }
        self.last_activity = Instant::now();

        match decode_frame(line) {
            Ok(Frame::Poll) => {
                debug!("Sensor requested poll, acknowledging");
                self.send(&ACK_AND_POLL)?;
            }
            Ok(Frame::Ack) => debug!("Sensor acknowledged"),
            Ok(Frame::Nack) => debug!("Sensor sent negative acknowledgement"),
            Ok(Frame::Sensors(reading)) => {
                let timestamp = reading.timestamp;
                self.aggregator.record(reading);
                self.status.update(|s| {
                    s.frames_decoded += 1;
                    s.last_frame_at = Some(timestamp);
                });
            }
            Ok(Frame::Auxiliary(report)) => {
                debug!("Received {} report", report.report_type);
                self.aggregator.record_auxiliary(report);
                self.status.update(|s| s.auxiliary_reports += 1);
            }
            Err(DecodeError::MalformedFrame(reason)) => {
                warn!("Discarding malformed frame: {}", reason);
                self.status.update(|s| s.malformed_frames += 1);
            }
            Err(DecodeError::UnsupportedFrameType(reason)) => {
                debug!("Skipping frame: {}", reason);
                self.status.update(|s| s.unsupported_frames += 1);
            }
        }
        Ok(())
    }
}

impl<O> PortReader<O>
where
    O: LinkOpener + 'static,
    O::Link: 'static,
{
    /// Run the reader on tokio's blocking thread pool.
    pub fn spawn(self) -> tokio::task::JoinHandle<LinkStatus> {
        tokio::task::spawn_blocking(move || self.run())
    }
}
