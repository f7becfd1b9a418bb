//! Decoding of peripheral output lines.
//!
//! A peripheral emits one of:
//!
//! - a reading as a key/value line: `TEMP:23.5,HUMIDITY:41,LIGHT:300,MOTION:1`
//! - a reading as a JSON object: `{"temp":23.5,"humidity":41,"light":300,"motion":1}`
//! - a status record: any JSON object with a top-level `"status"` key
//! - the sentinels `SENSOR_NODE_READY` and `ERROR:<message>`
//!
//! Numeric fields missing from a reading default to zero so a peripheral
//! may omit idle sensors.

use serde_json::{Map, Value};

use crate::error::ParseError;
use crate::model::{RawReading, LIGHT_MAX};

pub const READY_SENTINEL: &str = "SENSOR_NODE_READY";
pub const ERROR_PREFIX: &str = "ERROR:";

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Reading(RawReading),
    Ready,
    PeripheralError(String),
    /// Diagnostic dump, kept verbatim for republishing.
    Status(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Temperature,
    Humidity,
    Light,
    Motion,
}

impl Field {
    fn from_key(key: &str) -> Option<Field> {
        match key.to_ascii_lowercase().as_str() {
            "temp" | "temperature" => Some(Field::Temperature),
            "humidity" | "hum" => Some(Field::Humidity),
            "light" => Some(Field::Light),
            "motion" => Some(Field::Motion),
            _ => None,
        }
    }
}

pub fn parse_line(line: &str) -> Result<Frame, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::Empty);
    }

    if line == READY_SENTINEL {
        return Ok(Frame::Ready);
    }

    if let Some(message) = line.strip_prefix(ERROR_PREFIX) {
        return Ok(Frame::PeripheralError(message.trim().to_string()));
    }

    if line.starts_with('{') {
        return parse_object(line);
    }

    if looks_like_key_value(line) {
        return parse_key_value(line).map(Frame::Reading);
    }

    Err(ParseError::UnrecognizedLine(line.to_string()))
}

fn looks_like_key_value(line: &str) -> bool {
    line.split_once(':')
        .map(|(key, _)| Field::from_key(key.trim()).is_some())
        .unwrap_or(false)
}

fn parse_key_value(line: &str) -> Result<RawReading, ParseError> {
    let mut reading = RawReading::default();
    let mut seen = false;

    for part in line.split(',') {
        let (key, value) = part
            .split_once(':')
            .ok_or_else(|| ParseError::MalformedField(part.trim().to_string()))?;
        let key = key.trim();
        let value = value.trim();

        // Unknown keys are extensions of newer firmware; skip them.
        let Some(field) = Field::from_key(key) else {
            continue;
        };

        let number: f64 = value.parse().map_err(|_| ParseError::InvalidNumber {
            field: key.to_string(),
            value: value.to_string(),
        })?;
        apply(&mut reading, field, number)?;
        seen = true;
    }

    if !seen {
        return Err(ParseError::NoReadingFields);
    }
    Ok(reading)
}

fn parse_object(line: &str) -> Result<Frame, ParseError> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| ParseError::InvalidRecord(e.to_string()))?;
    let Value::Object(object) = value else {
        return Err(ParseError::InvalidRecord("not a JSON object".to_string()));
    };

    if object.contains_key("status") {
        return Ok(Frame::Status(line.to_string()));
    }

    parse_object_reading(&object).map(Frame::Reading)
}

fn parse_object_reading(object: &Map<String, Value>) -> Result<RawReading, ParseError> {
    let mut reading = RawReading::default();
    let mut seen = false;

    for (key, value) in object {
        let Some(field) = Field::from_key(key) else {
            continue;
        };
        let number = match value {
            Value::Number(n) => n.as_f64(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Null => None,
            _ => {
                return Err(ParseError::InvalidNumber {
                    field: key.clone(),
                    value: value.to_string(),
                })
            }
        };
        if let Some(number) = number {
            apply(&mut reading, field, number)?;
            seen = true;
        }
    }

    if !seen {
        return Err(ParseError::NoReadingFields);
    }
    Ok(reading)
}

fn apply(reading: &mut RawReading, field: Field, value: f64) -> Result<(), ParseError> {
    if !value.is_finite() {
        return Err(ParseError::InvalidNumber {
            field: format!("{field:?}"),
            value: value.to_string(),
        });
    }

    match field {
        Field::Temperature => reading.temperature_c = value,
        Field::Humidity => reading.humidity_percent = value,
        Field::Light => {
            let max = f64::from(LIGHT_MAX);
            if !(0.0..=max).contains(&value) {
                return Err(ParseError::OutOfRange { field: "light", value, min: 0.0, max });
            }
            reading.light_level = value.round() as u16;
        }
        Field::Motion => reading.motion_detected = value != 0.0,
    }
    Ok(())
}
