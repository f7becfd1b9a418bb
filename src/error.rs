use std::time::Duration;

/// Failures of the serial link to the peripheral.
#[derive(thiserror::Error, Debug)]
pub enum SerialError {
    #[error("open serial port {port} at {baud} baud: {source}")]
    Open {
        port: String,
        baud: u32,
        #[source]
        source: tokio_serial::Error,
    },

    #[error("serial i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("line is not valid UTF-8: {0}")]
    Decode(#[from] std::string::FromUtf8Error),

    #[error("serial port closed by peer")]
    Closed,

    #[error("line exceeds {0} bytes without a terminator")]
    LineTooLong(usize),

    #[error("serial write timed out after {0:?}")]
    Timeout(Duration),

    #[error("command does not fit the wire buffer")]
    Encode,
}

/// Reasons a peripheral line could not be turned into a frame.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("empty line")]
    Empty,

    #[error("unrecognized line: {0:?}")]
    UnrecognizedLine(String),

    #[error("malformed field {0:?}, expected KEY:VALUE")]
    MalformedField(String),

    #[error("field {field} has non-numeric value {value:?}")]
    InvalidNumber { field: String, value: String },

    #[error("field {field} value {value} outside {min}..={max}")]
    OutOfRange { field: &'static str, value: f64, min: f64, max: f64 },

    #[error("invalid structured record: {0}")]
    InvalidRecord(String),

    #[error("record carries no reading fields")]
    NoReadingFields,
}

/// Message bus failures.
#[derive(thiserror::Error, Debug)]
pub enum BusError {
    #[error("broker {address} unavailable: {reason}")]
    BrokerUnavailable { address: String, reason: String },

    #[error("mqtt client: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("bus operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A manual control payload that cannot be applied.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandRejected {
    #[error("unknown control target {0:?}")]
    UnknownTarget(String),

    #[error("expected on/off, got {0:?}")]
    InvalidSwitch(String),

    #[error("expected 3 colour channels, got {0}")]
    WrongFieldCount(usize),

    #[error("colour channel {0:?} is not a number in 0..=255")]
    InvalidChannel(String),

    #[error("expected start/stop, got {0:?}")]
    InvalidMonitorAction(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("option {option}: invalid value {value:?}")]
    InvalidValue { option: &'static str, value: String },

    #[error("invalid thresholds: {0}")]
    InvalidThresholds(&'static str),
}

/// Errors surfaced out of a node's `run`; only startup resource
/// acquisition ends up here.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("serial connection: {0}")]
    Serial(#[from] SerialError),

    #[error("broker connection: {0}")]
    Bus(#[from] BusError),

    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
}
