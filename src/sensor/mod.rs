//! Boltwood II sensor acquisition.
//!
//! This module covers everything between the serial port and the
//! aggregator: link configuration and access, frame decoding, and the
//! reconnecting acquisition loop.

pub mod config;
pub mod data;
pub mod frame;
pub mod link;
pub mod protocol;
pub mod reader;

// Re-export commonly used items
pub use config::SerialConfig;
pub use data::{AuxiliaryReport, AverageSnapshot, Reading};
pub use frame::{decode, decode_frame, Frame};
pub use link::{LinkOpener, SerialLink, SerialPortOpener};
pub use reader::{ConnectionState, LinkStatus, PortReader, StatusHandle};
