//! Serial link configuration.

use crate::error::{MonitorError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Serial parameters of the sensor connection, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial device, e.g. `/dev/ttyUSB0`
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Bits per character (5 to 8)
    pub data_bits: u8,
    /// Parity: `N`, `E` or `O`
    pub parity: char,
    /// Number of stop bits (1 or 2)
    pub stop_bits: u8,
    /// Hardware (RTS/CTS) flow control
    pub rtscts: bool,
    /// Read timeout; a read that times out just yields no data
    pub read_timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 4800,
            data_bits: 8,
            parity: 'N',
            stop_bits: 1,
            rtscts: false,
            read_timeout: Duration::from_secs(10),
        }
    }
}

impl SerialConfig {
    /// Create a configuration for `port` with the sensor's default parameters.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Default::default()
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_data_bits(mut self, data_bits: u8) -> Self {
        self.data_bits = data_bits;
        self
    }

    pub fn with_parity(mut self, parity: char) -> Self {
        self.parity = parity;
        self
    }

    pub fn with_stop_bits(mut self, stop_bits: u8) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    pub fn with_rtscts(mut self, rtscts: bool) -> Self {
        self.rtscts = rtscts;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Check every parameter and convert to the `serialport` settings.
    pub fn validate(&self) -> Result<SerialSettings> {
        if self.port.trim().is_empty() {
            return Err(MonitorError::config_error("serial port must not be empty"));
        }
        if self.baud_rate == 0 {
            return Err(MonitorError::config_error("baud rate must be positive"));
        }
        if self.read_timeout.is_zero() {
            return Err(MonitorError::config_error("read timeout must be positive"));
        }

        let data_bits = match self.data_bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            8 => serialport::DataBits::Eight,
            other => {
                return Err(MonitorError::config_error(format!(
                    "unsupported byte size {}, expected 5 to 8",
                    other
                )))
            }
        };
        let parity = match self.parity.to_ascii_uppercase() {
            'N' => serialport::Parity::None,
            'E' => serialport::Parity::Even,
            'O' => serialport::Parity::Odd,
            other => {
                return Err(MonitorError::config_error(format!(
                    "unsupported parity {:?}, expected N, E or O",
                    other
                )))
            }
        };
        let stop_bits = match self.stop_bits {
            1 => serialport::StopBits::One,
            2 => serialport::StopBits::Two,
            other => {
                return Err(MonitorError::config_error(format!(
                    "unsupported stop bits {}, expected 1 or 2",
                    other
                )))
            }
        };
        let flow_control = if self.rtscts {
            serialport::FlowControl::Hardware
        } else {
            serialport::FlowControl::None
        };

        Ok(SerialSettings {
            port: self.port.clone(),
            baud_rate: self.baud_rate,
            data_bits,
            parity,
            stop_bits,
            flow_control,
            read_timeout: self.read_timeout,
        })
    }
}

/// Validated serial parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: serialport::DataBits,
    pub parity: serialport::Parity,
    pub stop_bits: serialport::StopBits,
    pub flow_control: serialport::FlowControl,
    pub read_timeout: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_sensor() {
        let settings = SerialConfig::default().validate().unwrap();
        assert_eq!(settings.port, "/dev/ttyUSB0");
        assert_eq!(settings.baud_rate, 4800);
        assert_eq!(settings.data_bits, serialport::DataBits::Eight);
        assert_eq!(settings.parity, serialport::Parity::None);
        assert_eq!(settings.stop_bits, serialport::StopBits::One);
        assert_eq!(settings.flow_control, serialport::FlowControl::None);
    }

    #[test]
    fn test_builder() {
        let settings = SerialConfig::new("/dev/ttyS1")
            .with_baud_rate(9600)
            .with_data_bits(7)
            .with_parity('e')
            .with_stop_bits(2)
            .with_rtscts(true)
            .validate()
            .unwrap();
        assert_eq!(settings.port, "/dev/ttyS1");
        assert_eq!(settings.baud_rate, 9600);
        assert_eq!(settings.data_bits, serialport::DataBits::Seven);
        assert_eq!(settings.parity, serialport::Parity::Even);
        assert_eq!(settings.stop_bits, serialport::StopBits::Two);
        assert_eq!(settings.flow_control, serialport::FlowControl::Hardware);
    }

    #[test]
    fn test_invalid_combinations_fail_fast() {
        let invalid = [
            SerialConfig::new(""),
            SerialConfig::default().with_baud_rate(0),
            SerialConfig::default().with_data_bits(9),
            SerialConfig::default().with_parity('X'),
            SerialConfig::default().with_stop_bits(3),
            SerialConfig::default().with_read_timeout(Duration::ZERO),
        ];
        for config in invalid {
            assert!(
                matches!(config.validate(), Err(MonitorError::Config(_))),
                "expected configuration error for {:?}",
                config
            );
        }
    }
}
