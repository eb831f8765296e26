//! Traits for the serial link to the sensor.

use crate::error::Result;
use crate::sensor::config::SerialSettings;
use std::io::{Read, Write};
use tracing::debug;

/// An open connection to the sensor.
///
/// Reads are expected to honour a timeout and report it as
/// [`std::io::ErrorKind::TimedOut`] (or `WouldBlock`), which the reader
/// treats as "no data yet" rather than as a failure.
pub trait SerialLink: Read + Write + Send {}

impl<T: Read + Write + Send> SerialLink for T {}

/// Opens links to the sensor. The reader calls this again after every
/// connection failure.
pub trait LinkOpener: Send {
    type Link: SerialLink;

    /// Open a fresh link.
    fn open(&mut self) -> Result<Self::Link>;

    /// Human readable name of the link target, for logging.
    fn describe(&self) -> String;
}

/// Opens the physical serial port with the `serialport` crate.
#[derive(Debug, Clone)]
pub struct SerialPortOpener {
    settings: SerialSettings,
}

impl SerialPortOpener {
    pub fn new(settings: SerialSettings) -> Self {
        Self { settings }
    }
}

impl LinkOpener for SerialPortOpener {
    type Link = Box<dyn serialport::SerialPort>;

    fn open(&mut self) -> Result<Self::Link> {
        let s = &self.settings;
        debug!("Opening serial port {} at {} baud", s.port, s.baud_rate);
        let port = serialport::new(&s.port, s.baud_rate)
            .data_bits(s.data_bits)
            .parity(s.parity)
            .stop_bits(s.stop_bits)
            .flow_control(s.flow_control)
            .timeout(s.read_timeout)
            .open()?;
        Ok(port)
    }

    fn describe(&self) -> String {
        self.settings.port.clone()
    }
}

/// Information about a serial port present on the system.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PortInfo {
    pub name: String,
    pub kind: String,
    pub product: Option<String>,
}

/// List the serial ports present on the system.
pub fn available_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|port| {
            let (kind, product) = match port.port_type {
                serialport::SerialPortType::UsbPort(info) => ("USB", info.product),
                serialport::SerialPortType::BluetoothPort => ("Bluetooth", None),
                serialport::SerialPortType::PciPort => ("PCI", None),
                serialport::SerialPortType::Unknown => ("Unknown", None),
            };
            PortInfo {
                name: port.port_name,
                kind: kind.to_string(),
                product,
            }
        })
        .collect())
}
