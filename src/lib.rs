//! # Boltwood - Boltwood II cloud sensor monitor
//!
//! Reads the telemetry a Boltwood II cloud sensor emits over its serial
//! link, keeps a trailing average of the most useful fields and exposes the
//! latest reading and average over HTTP.
//!
//! ## Pipeline
//!
//! - [`sensor::PortReader`] owns the serial link and reconnects on failure
//! - [`sensor::frame`] decodes each line into a [`Reading`]
//! - [`Aggregator`] keeps the latest reading and the averaging window
//! - [`Publisher`] logs an average on a fixed interval and serves accessors
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use boltwood::{Aggregator, PortReader, Publisher, PublisherConfig, SerialConfig, Shutdown, Window};
//! use boltwood::sensor::SerialPortOpener;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = SerialConfig::new("/dev/ttyUSB0").validate()?;
//!     let aggregator = Arc::new(Aggregator::new(Window::default())?);
//!     let shutdown = Shutdown::new();
//!
//!     let reader = PortReader::new(
//!         SerialPortOpener::new(settings),
//!         Arc::clone(&aggregator),
//!         shutdown.clone(),
//!     );
//!     let publisher = Publisher::new(aggregator, reader.status_handle(), PublisherConfig::default())?;
//!     let acquisition = reader.spawn();
//!
//!     println!("{:?}", publisher.current_average());
//!     shutdown.trigger();
//!     acquisition.await?;
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod error;
pub mod publisher;
pub mod sensor;
pub mod shutdown;
pub mod web;

// Re-export public API
pub use aggregator::{Aggregator, Window};
pub use error::{DecodeError, MonitorError, Result};
pub use publisher::{Health, Publisher, PublisherConfig};
pub use sensor::{
    data::{AverageSnapshot, Reading},
    reader::{ConnectionState, LinkStatus, PortReader, ReconnectPolicy},
    SerialConfig,
};
pub use shutdown::Shutdown;
pub use web::{start_web_server, WebConfig};

/// The default web server port
pub const DEFAULT_WEB_PORT: u16 = 8888;

/// The default interval between published averages in seconds
pub const DEFAULT_PUBLISH_INTERVAL_SECS: u64 = 300;
