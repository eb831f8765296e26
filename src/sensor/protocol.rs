//! Wire constants and condition codes of the Boltwood II serial protocol.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Byte sent to ask the sensor for its next report.
pub const REQUEST_POLL: u8 = 0x01;
/// First byte of every frame.
pub const FRAME_START: u8 = 0x02;
/// Terminator of every frame.
pub const FRAME_END: u8 = b'\n';
/// Characters at the end of a message frame that carry no data.
pub const FRAME_TRAILER_LEN: usize = 4;

/// Acknowledge frame followed by a new poll request.
pub const ACK_AND_POLL: [u8; 4] = [FRAME_START, b'A', FRAME_END, REQUEST_POLL];

/// Command character following the start marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandChar {
    Poll,
    Ack,
    Nack,
    Message,
}

impl CommandChar {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'P' => Some(Self::Poll),
            'A' => Some(Self::Ack),
            'N' => Some(Self::Nack),
            'M' => Some(Self::Message),
            _ => None,
        }
    }
}

/// Report variants carried by message frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    ThermopileCalibration,
    Sensors,
    WetnessCalibration,
    Thresholds,
    Wetness,
}

impl ReportType {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'C' => Some(Self::ThermopileCalibration),
            'D' => Some(Self::Sensors),
            'K' => Some(Self::WetnessCalibration),
            'T' => Some(Self::Thresholds),
            'W' => Some(Self::Wetness),
            _ => None,
        }
    }

    pub fn code(self) -> char {
        match self {
            Self::ThermopileCalibration => 'C',
            Self::Sensors => 'D',
            Self::WetnessCalibration => 'K',
            Self::Thresholds => 'T',
            Self::Wetness => 'W',
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ThermopileCalibration => "thermopile calibration",
            Self::Sensors => "sensors",
            Self::WetnessCalibration => "wetness calibration",
            Self::Thresholds => "thresholds",
            Self::Wetness => "wetness",
        };
        write!(f, "{} ({})", name, self.code())
    }
}

/// Cloud condition code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloudCondition {
    #[default]
    Unknown,
    Clear,
    Cloudy,
    VeryCloudy,
}

impl CloudCondition {
    pub fn from_code(code: Option<u8>) -> Self {
        match code {
            Some(1) => Self::Clear,
            Some(2) => Self::Cloudy,
            Some(3) => Self::VeryCloudy,
            _ => Self::Unknown,
        }
    }
}

/// Sky condition code, which folds in the wetness state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkyCondition {
    #[default]
    Unknown,
    Clear,
    Cloudy,
    VeryCloudy,
    Wet,
}

impl SkyCondition {
    pub fn from_code(code: Option<u8>) -> Self {
        match code {
            Some(1) => Self::Clear,
            Some(2) => Self::Cloudy,
            Some(3) => Self::VeryCloudy,
            Some(4) => Self::Wet,
            _ => Self::Unknown,
        }
    }
}

/// Rain condition code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RainCondition {
    #[default]
    Unknown,
    NotRaining,
    RecentlyRaining,
    Raining,
}

impl RainCondition {
    pub fn from_code(code: Option<u8>) -> Self {
        match code {
            Some(1) => Self::NotRaining,
            Some(2) => Self::RecentlyRaining,
            Some(3) => Self::Raining,
            _ => Self::Unknown,
        }
    }
}

/// Daylight condition code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Daylight {
    #[default]
    Unknown,
    Night,
    Twilight,
    Daylight,
}

impl Daylight {
    pub fn from_code(code: Option<u8>) -> Self {
        match code {
            Some(1) => Self::Night,
            Some(2) => Self::Twilight,
            Some(3) => Self::Daylight,
            _ => Self::Unknown,
        }
    }
}

/// Tri-state of the rain and wetness sensor flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precipitation {
    Dry,
    Wet,
    #[default]
    Unknown,
}

impl Precipitation {
    /// Rain sensor flag: `N` none, `R` rain, `r` recent rain.
    pub fn from_rain_flag(flag: Option<char>) -> Self {
        match flag {
            Some('N') => Self::Dry,
            Some('R' | 'r' | 'Y') => Self::Wet,
            _ => Self::Unknown,
        }
    }

    /// Wetness sensor flag: `N` dry, `W` wet, `w` recently wet.
    pub fn from_wet_flag(flag: Option<char>) -> Self {
        match flag {
            Some('N') => Self::Dry,
            Some('W' | 'w' | 'Y') => Self::Wet,
            _ => Self::Unknown,
        }
    }

    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }
}

// Sky temperature sentinels: above 999 saturated hot, below -998 saturated
// cold or wet sensor.
pub(crate) const SKY_SATURATED_HOT: f64 = 999.0;
pub(crate) const SKY_SATURATED_COLD: f64 = -998.0;
