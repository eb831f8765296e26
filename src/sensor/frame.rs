//! Frame decoding.
//!
//! A message frame looks like `\x02MD <columns...><trailer>`: the start
//! marker, the `M` command character, the report type, a separator, the
//! whitespace separated columns and a four character trailer. Columns are
//! decoded by [`parse_columns`] from a declarative [`FieldSpec`] layout, so
//! each report type is described by a table rather than by parsing code.

use crate::error::DecodeError;
use crate::sensor::data::{AuxiliaryReport, FieldValue, Reading};
use crate::sensor::protocol::{
    CloudCondition, CommandChar, Daylight, Precipitation, RainCondition, ReportType,
    SkyCondition, FRAME_END, FRAME_START, FRAME_TRAILER_LEN, SKY_SATURATED_COLD,
    SKY_SATURATED_HOT,
};
use chrono::{DateTime, Utc};

/// How the text of one column is turned into a [`FieldValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Float,
    /// Float where the device's saturation and wet-sensor sentinels mean unknown
    Temperature,
    /// Float where negative values are device status codes
    NonNegative,
    /// Single status character
    Flag,
    /// Small enumerated integer code
    Code,
}

/// One column of a report layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub column: usize,
    pub kind: FieldKind,
}

const fn field(name: &'static str, column: usize, kind: FieldKind) -> FieldSpec {
    FieldSpec { name, column, kind }
}

use FieldKind::*;

/// Columns of the sensors (`D`) report.
pub const SENSORS_LAYOUT: &[FieldSpec] = &[
    field("humidstatTempCode", 0, Code),
    field("cloudCond", 1, Code),
    field("windCond", 2, Code),
    field("rainCond", 3, Code),
    field("skyCond", 4, Code),
    field("roofCloseRequested", 5, Code),
    field("skyMinusAmbientTemperature", 6, Temperature),
    field("ambientTemperature", 7, Float),
    field("windSpeed", 8, NonNegative),
    field("wetSensor", 9, Flag),
    field("rainSensor", 10, Flag),
    field("relativeHumidityPercentage", 11, NonNegative),
    field("dewPointTemperature", 12, Float),
    field("caseTemperature", 13, Float),
    field("rainHeaterPercentage", 14, Integer),
    field("blackBodyTemperature", 15, Float),
    field("rainHeaterState", 16, Code),
    field("powerVoltage", 17, Float),
    field("anemometerTemperatureDiff", 18, Float),
    field("wetnessDrop", 19, Integer),
    field("wetnessAvg", 20, Integer),
    field("wetnessDry", 21, Integer),
    field("rainHeaterPWM", 22, Integer),
    field("anemometerHeaterPWM", 23, Integer),
    field("thermopileADC", 24, Integer),
    field("thermistorADC", 25, Integer),
    field("powerADC", 26, Integer),
    field("blockADC", 27, Integer),
    field("anemometerThermistorADC", 28, Integer),
    field("davisVaneADC", 29, Integer),
    field("dkMPH", 30, Float),
    field("extAnemometerDirection", 31, Integer),
    field("rawWetnessOsc", 32, Integer),
    field("dayCond", 33, Code),
    field("daylightADC", 34, Integer),
];

/// Sensors reports shorter than this (through the humidity column) are rejected.
pub const SENSORS_MIN_COLUMNS: usize = 12;

const THERMOPILE_CALIBRATION_LAYOUT: &[FieldSpec] = &[
    field("eThermopileCal", 0, Integer),
    field("eBestK", 1, Float),
    field("eBestD", 2, Float),
    field("eBestOffs", 3, Float),
];

const WETNESS_CALIBRATION_LAYOUT: &[FieldSpec] = &[
    field("eWetCal", 0, Integer),
    field("eWetOscFactor", 1, Float),
    field("eRawWetAvg", 2, Integer),
    field("eCaseT", 3, Float),
    field("eshtAmbientT", 4, Float),
    field("enomOsc", 5, Integer),
    field("oscDry", 6, Integer),
    field("minWetAvg", 7, Integer),
    field("dif", 8, Integer),
];

const THRESHOLDS_LAYOUT: &[FieldSpec] = &[
    field("serialNumber", 0, Integer),
    field("version", 1, Integer),
    field("eSendErrs", 2, Integer),
    field("eCloudyThresh", 3, Float),
    field("eVeryCloudyThresh", 4, Float),
    field("eWindyThresh", 5, Float),
    field("eVeryWindyThresh", 6, Float),
    field("eRainThresh", 7, Integer),
    field("eWetThresh", 8, Integer),
    field("eDaylightCode", 9, Integer),
    field("eDayThresh", 10, Integer),
    field("eVeryDayThresh", 11, Integer),
];

const WETNESS_LAYOUT: &[FieldSpec] = &[
    field("caseVal", 0, Float),
    field("ambT", 1, Float),
    field("wAvgW", 2, Integer),
    field("wAvgC", 3, Float),
    field("nomos", 4, Float),
    field("rawWT", 5, Integer),
    field("wetAvg", 6, Integer),
];

/// Layout and minimum column count for a report type.
pub fn layout(report_type: ReportType) -> (&'static [FieldSpec], usize) {
    match report_type {
        ReportType::Sensors => (SENSORS_LAYOUT, SENSORS_MIN_COLUMNS),
        ReportType::ThermopileCalibration => (THERMOPILE_CALIBRATION_LAYOUT, 0),
        ReportType::WetnessCalibration => (WETNESS_CALIBRATION_LAYOUT, 8),
        ReportType::Thresholds => (THRESHOLDS_LAYOUT, 0),
        ReportType::Wetness => (WETNESS_LAYOUT, 0),
    }
}

/// Column values decoded against a layout.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFields {
    values: Vec<(&'static str, FieldValue)>,
}

impl DecodedFields {
    pub fn get(&self, name: &str) -> FieldValue {
        self.values
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
            .unwrap_or(FieldValue::Unknown)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(&'static str, FieldValue)> {
        self.values.iter()
    }
}

/// Decode `columns` against `layout`. Columns that are missing or fail to
/// parse become [`FieldValue::Unknown`]; extra columns are ignored.
pub fn parse_columns(layout: &[FieldSpec], columns: &[&str]) -> DecodedFields {
    let values = layout
        .iter()
        .map(|entry| {
            let value = columns
                .get(entry.column)
                .map(|text| parse_value(entry.kind, text))
                .unwrap_or(FieldValue::Unknown);
            (entry.name, value)
        })
        .collect();
    DecodedFields { values }
}

fn parse_value(kind: FieldKind, text: &str) -> FieldValue {
    match kind {
        Integer => text
            .parse::<i64>()
            .map(|v| FieldValue::Number(v as f64))
            .unwrap_or(FieldValue::Unknown),
        Float => parse_float(text)
            .map(FieldValue::Number)
            .unwrap_or(FieldValue::Unknown),
        Temperature => match parse_float(text) {
            Some(v) if v > SKY_SATURATED_COLD && v < SKY_SATURATED_HOT => FieldValue::Number(v),
            _ => FieldValue::Unknown,
        },
        NonNegative => match parse_float(text) {
            Some(v) if v >= 0.0 => FieldValue::Number(v),
            _ => FieldValue::Unknown,
        },
        Flag => {
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphabetic() => FieldValue::Flag(c),
                _ => FieldValue::Unknown,
            }
        }
        Code => text
            .parse::<u8>()
            .map(FieldValue::Code)
            .unwrap_or(FieldValue::Unknown),
    }
}

fn parse_float(text: &str) -> Option<f64> {
    text.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Classification of one line received from the sensor.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// The sensor is ready to be polled and waits for an acknowledgement
    Poll,
    Ack,
    Nack,
    Sensors(Reading),
    Auxiliary(AuxiliaryReport),
}

/// Decode one newline-stripped line into a [`Reading`], stamped with the
/// current time.
pub fn decode(raw_line: &str) -> Result<Reading, DecodeError> {
    decode_at(raw_line, Utc::now())
}

/// Decode one line into a [`Reading`] stamped with `timestamp`.
///
/// Handshake frames and reports other than the sensors report yield
/// [`DecodeError::UnsupportedFrameType`].
pub fn decode_at(raw_line: &str, timestamp: DateTime<Utc>) -> Result<Reading, DecodeError> {
    match decode_frame_at(raw_line, timestamp)? {
        Frame::Sensors(reading) => Ok(reading),
        Frame::Poll => Err(DecodeError::unsupported("poll request")),
        Frame::Ack => Err(DecodeError::unsupported("acknowledgement")),
        Frame::Nack => Err(DecodeError::unsupported("negative acknowledgement")),
        Frame::Auxiliary(report) => Err(DecodeError::unsupported(format!(
            "{} report",
            report.report_type
        ))),
    }
}

/// Classify and decode one line, stamping reports with the current time.
pub fn decode_frame(raw_line: &str) -> Result<Frame, DecodeError> {
    decode_frame_at(raw_line, Utc::now())
}

pub fn decode_frame_at(raw_line: &str, timestamp: DateTime<Utc>) -> Result<Frame, DecodeError> {
    let line = raw_line.strip_prefix('\0').unwrap_or(raw_line);
    if line.is_empty() {
        return Err(DecodeError::malformed("empty line"));
    }

    let body = line
        .strip_prefix(FRAME_START as char)
        .ok_or_else(|| DecodeError::malformed("missing start marker"))?;

    let mut chars = body.chars();
    let command = chars
        .next()
        .ok_or_else(|| DecodeError::malformed("missing command character"))?;
    match CommandChar::from_char(command) {
        Some(CommandChar::Poll) => return Ok(Frame::Poll),
        Some(CommandChar::Ack) => return Ok(Frame::Ack),
        Some(CommandChar::Nack) => return Ok(Frame::Nack),
        Some(CommandChar::Message) => {}
        None => {
            return Err(DecodeError::malformed(format!(
                "invalid command character {:?}",
                command
            )))
        }
    }

    let type_char = chars
        .next()
        .ok_or_else(|| DecodeError::malformed("missing report type"))?;
    let report_type = ReportType::from_char(type_char).ok_or_else(|| {
        DecodeError::unsupported(format!("unknown report type {:?}", type_char))
    })?;

    // "M" + type + separator, then the trailer at the end.
    let content = body
        .get(3..)
        .and_then(|rest| {
            rest.len()
                .checked_sub(FRAME_TRAILER_LEN)
                .and_then(|end| rest.get(..end))
        })
        .filter(|_| body[2..].starts_with(' '))
        .ok_or_else(|| DecodeError::malformed("message frame too short"))?;

    let columns: Vec<&str> = content.split_whitespace().collect();
    let (layout, min_columns) = layout(report_type);
    if columns.len() < min_columns {
        return Err(DecodeError::malformed(format!(
            "{} report has {} columns, expected at least {}",
            report_type,
            columns.len(),
            min_columns
        )));
    }

    let fields = parse_columns(layout, &columns);
    match report_type {
        ReportType::Sensors => Ok(Frame::Sensors(reading_from_fields(
            &fields, timestamp, raw_line,
        ))),
        _ => Ok(Frame::Auxiliary(AuxiliaryReport {
            report_type,
            timestamp,
            values: fields
                .iter()
                .map(|(name, value)| (name.to_string(), *value))
                .collect(),
            raw_line: raw_line.to_string(),
        })),
    }
}

fn reading_from_fields(fields: &DecodedFields, timestamp: DateTime<Utc>, raw_line: &str) -> Reading {
    Reading {
        timestamp,
        sky_temperature: fields.get("skyMinusAmbientTemperature").as_number(),
        ambient_temperature: fields.get("ambientTemperature").as_number(),
        wind_speed: fields.get("windSpeed").as_number(),
        humidity: fields.get("relativeHumidityPercentage").as_number(),
        dew_point: fields.get("dewPointTemperature").as_number(),
        rain: Precipitation::from_rain_flag(fields.get("rainSensor").as_flag()),
        wet: Precipitation::from_wet_flag(fields.get("wetSensor").as_flag()),
        cloud_condition: CloudCondition::from_code(fields.get("cloudCond").as_code()),
        sky_condition: SkyCondition::from_code(fields.get("skyCond").as_code()),
        rain_condition: RainCondition::from_code(fields.get("rainCond").as_code()),
        daylight: Daylight::from_code(fields.get("dayCond").as_code()),
        raw_line: raw_line.to_string(),
    }
}

/// Maximum bytes buffered without a line terminator.
pub const MAX_LINE_LEN: usize = 4096;

/// Splits the byte stream from the serial link into lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
    overflows: u64,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes and return every line they complete.
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(data);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == FRAME_END) {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            // The sensor sometimes prefixes a response with a NUL byte.
            if line.first() == Some(&0) {
                line.remove(0);
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }

        if self.buf.len() > MAX_LINE_LEN {
            self.buf.clear();
            self.overflows += 1;
        }
        lines
    }

    /// Number of times unterminated data was discarded.
    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SENSORS_BODY: &str = "0 1 1 1 1 0 -28.5 12.3 4.5 N N 45 0.7 14.1 0 -16.2 0 12.1 0.0 0 0 0 0 0 0 0 0 0 0 0 0.0 0 0 3 0";

    fn frame(report: char, body: &str) -> String {
        format!("\x02M{} {}!A5F", report, body)
    }

    #[test]
    fn test_decode_sensors_report() {
        let line = frame('D', SENSORS_BODY);
        let reading = decode(&line).unwrap();

        assert_eq!(reading.sky_temperature, Some(-28.5));
        assert_eq!(reading.ambient_temperature, Some(12.3));
        assert_eq!(reading.wind_speed, Some(4.5));
        assert_eq!(reading.humidity, Some(45.0));
        assert_eq!(reading.dew_point, Some(0.7));
        assert_eq!(reading.rain, Precipitation::Dry);
        assert_eq!(reading.wet, Precipitation::Dry);
        assert_eq!(reading.cloud_condition, CloudCondition::Clear);
        assert_eq!(reading.sky_condition, SkyCondition::Clear);
        assert_eq!(reading.rain_condition, RainCondition::NotRaining);
        assert_eq!(reading.daylight, Daylight::Daylight);
        assert_eq!(reading.raw_line, line);
    }

    #[test]
    fn test_invalid_column_only_affects_that_field() {
        let body = SENSORS_BODY.replacen("12.3", "xx.x", 1);
        let reading = decode(&frame('D', &body)).unwrap();

        assert_eq!(reading.ambient_temperature, None);
        assert_eq!(reading.sky_temperature, Some(-28.5));
        assert_eq!(reading.wind_speed, Some(4.5));
    }

    #[test]
    fn test_sentinels_decode_as_unknown() {
        let body = SENSORS_BODY
            .replacen("-28.5", "-998.9", 1)
            .replacen(" 4.5 ", " -2. ", 1);
        let reading = decode(&frame('D', &body)).unwrap();

        assert_eq!(reading.sky_temperature, None);
        assert_eq!(reading.wind_speed, None);
        assert_eq!(reading.ambient_temperature, Some(12.3));
    }

    #[test]
    fn test_short_report_keeps_required_fields() {
        let body = "0 2 1 3 2 0 -5.0 3.0 1.0 W R 80";
        let reading = decode(&frame('D', body)).unwrap();

        assert_eq!(reading.cloud_condition, CloudCondition::Cloudy);
        assert_eq!(reading.rain_condition, RainCondition::Raining);
        assert_eq!(reading.rain, Precipitation::Wet);
        assert_eq!(reading.wet, Precipitation::Wet);
        assert_eq!(reading.humidity, Some(80.0));
        assert_eq!(reading.dew_point, None);
        assert_eq!(reading.daylight, Daylight::Unknown);
    }

    #[test]
    fn test_too_few_columns_is_malformed() {
        let body = "0 1 1 1 1 0 -28.5 12.3 4.5 N N";
        assert!(matches!(
            decode(&frame('D', body)),
            Err(DecodeError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_structural_errors_are_malformed() {
        for line in ["", "MD 0 1 1", "\x02", "\x02X", "\x02M", "\x02MD", "\x02MDx"] {
            assert!(
                matches!(decode(line), Err(DecodeError::MalformedFrame(_))),
                "expected malformed for {:?}",
                line
            );
        }
    }

    #[test]
    fn test_other_report_types_are_unsupported() {
        let line = frame('T', "1234 56 0 -25.0 -10.0 10.0 30.0 10 20 1 5 10 0 0 0 0 0");
        assert!(matches!(
            decode(&line),
            Err(DecodeError::UnsupportedFrameType(_))
        ));
        assert!(matches!(
            decode("\x02MZ 1 2 3 ABCD"),
            Err(DecodeError::UnsupportedFrameType(_))
        ));
        assert!(matches!(
            decode("\x02P"),
            Err(DecodeError::UnsupportedFrameType(_))
        ));
    }

    #[test]
    fn test_decode_frame_classifies_handshakes() {
        assert_eq!(decode_frame("\x02P").unwrap(), Frame::Poll);
        assert_eq!(decode_frame("\0\x02A").unwrap(), Frame::Ack);
        assert_eq!(decode_frame("\x02N").unwrap(), Frame::Nack);
    }

    #[test]
    fn test_decode_auxiliary_report() {
        let line = frame('T', "1234 56 0 -25.0 -10.0 10.0 30.0 10 20 1 5 10 0 0 0 0 0");
        let Frame::Auxiliary(report) = decode_frame(&line).unwrap() else {
            panic!("expected auxiliary report");
        };
        assert_eq!(report.report_type, ReportType::Thresholds);
        assert_eq!(report.value("serialNumber"), Some(FieldValue::Number(1234.0)));
        assert_eq!(report.value("eCloudyThresh"), Some(FieldValue::Number(-25.0)));
    }

    #[test]
    fn test_wetness_calibration_requires_eight_columns() {
        assert!(matches!(
            decode_frame(&frame('K', "1 0.5 100 20.0 19.0 300")),
            Err(DecodeError::MalformedFrame(_))
        ));
        assert!(decode_frame(&frame('K', "1 0.5 100 20.0 19.0 300 310 90")).is_ok());
    }

    #[test]
    fn test_decoding_is_idempotent() {
        let line = frame('D', SENSORS_BODY);
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(decode_at(&line, ts).unwrap(), decode_at(&line, ts).unwrap());
    }

    #[test]
    fn test_parse_columns_marks_missing_columns_unknown() {
        let fields = parse_columns(SENSORS_LAYOUT, &["0", "3"]);
        assert_eq!(fields.get("cloudCond"), FieldValue::Code(3));
        assert!(fields.get("windSpeed").is_unknown());
        assert!(fields.get("noSuchField").is_unknown());
    }

    #[test]
    fn test_line_buffer_splits_and_keeps_partial_data() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"\x02MD 1 2").is_empty());

        let lines = buffer.push(b" 3\r\n\0\x02P\n\x02A");
        assert_eq!(lines, vec!["\x02MD 1 2 3".to_string(), "\x02P".to_string()]);

        let lines = buffer.push(b"\n");
        assert_eq!(lines, vec!["\x02A".to_string()]);
    }

    #[test]
    fn test_line_buffer_discards_runaway_data() {
        let mut buffer = LineBuffer::new();
        buffer.push(&vec![b'x'; MAX_LINE_LEN + 1]);
        assert_eq!(buffer.overflows(), 1);
        assert_eq!(buffer.push(b"\x02P\n"), vec!["\x02P".to_string()]);
    }
}
