//! Error handling for the Boltwood monitor crate.

/// A specialized `Result` type for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

/// The main error type for monitor operations.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// Invalid startup configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A line received from the sensor could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// I/O operation on the serial link failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Opening the serial port failed
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Writing the average log failed
    #[error("Log write error: {0}")]
    LogWrite(String),

    /// Web server error
    #[error("Web server error: {0}")]
    WebServer(String),
}

impl MonitorError {
    /// Create a new configuration error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new log write error
    pub fn log_write_error(msg: impl Into<String>) -> Self {
        Self::LogWrite(msg.into())
    }

    /// Create a new web server error
    pub fn web_server_error(msg: impl Into<String>) -> Self {
        Self::WebServer(msg.into())
    }

    /// Whether the error should stop the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::WebServer(_))
    }
}

/// Per-line decode failures. Neither variant affects the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The line does not have the structure of a device frame
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// A well-formed frame of a type this decoder does not turn into a reading
    #[error("Unsupported frame type: {0}")]
    UnsupportedFrameType(String),
}

impl DecodeError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedFrame(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedFrameType(msg.into())
    }
}
