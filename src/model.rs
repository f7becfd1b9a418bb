use core::fmt::{self, Write};

use arrayvec::ArrayString;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SerialError;

pub const LIGHT_MAX: u16 = 1023;
pub const MAX_COMMAND_SIZE: usize = 32;

pub type CommandBuffer = ArrayString<MAX_COMMAND_SIZE>;

/// One normalized snapshot of the environment.
///
/// Serialized with the short field names the bus subscribers expect
/// (`temp`, `humidity`, `light`, `motion`, `timestamp`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    #[serde(rename = "temp")]
    pub temperature_c: f64,
    #[serde(rename = "humidity")]
    pub humidity_percent: f64,
    #[serde(rename = "light")]
    pub light_level: u16,
    #[serde(rename = "motion")]
    pub motion_detected: bool,
    #[serde(rename = "timestamp")]
    pub captured_at: DateTime<Utc>,
}

static_assertions::assert_impl_all!(SensorReading: Send, Sync, Copy);

impl SensorReading {
    pub fn is_dark_motion(&self, light_dark: u16) -> bool {
        self.motion_detected && self.light_level < light_dark
    }
}

/// Sensor values as decoded from the wire, before a capture time is attached.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RawReading {
    pub temperature_c: f64,
    pub humidity_percent: f64,
    pub light_level: u16,
    pub motion_detected: bool,
}

impl RawReading {
    pub fn captured_at(self, captured_at: DateTime<Utc>) -> SensorReading {
        SensorReading {
            temperature_c: self.temperature_c,
            humidity_percent: self.humidity_percent,
            light_level: self.light_level,
            motion_detected: self.motion_detected,
            captured_at,
        }
    }
}

/// Payload shape used by the cloud telemetry forwarder.
#[derive(Debug, Clone, Serialize)]
pub struct CloudTelemetry {
    pub temperature: f64,
    pub humidity: f64,
    pub light: u16,
    pub motion: u8,
}

impl From<&SensorReading> for CloudTelemetry {
    fn from(reading: &SensorReading) -> Self {
        Self {
            temperature: reading.temperature_c,
            humidity: reading.humidity_percent,
            light: reading.light_level,
            motion: u8::from(reading.motion_detected),
        }
    }
}

/// Threshold breach categories with the values that triggered them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AlertKind {
    HighTemperature { temperature: f64, threshold: f64 },
    LowTemperature { temperature: f64, threshold: f64 },
    HighHumidity { humidity: f64, threshold: f64 },
    MotionInDarkness { light_level: u16, threshold: u16 },
}

impl AlertKind {
    pub fn key(&self) -> AlertKey {
        match self {
            AlertKind::HighTemperature { .. } => AlertKey::HighTemperature,
            AlertKind::LowTemperature { .. } => AlertKey::LowTemperature,
            AlertKind::HighHumidity { .. } => AlertKey::HighHumidity,
            AlertKind::MotionInDarkness { .. } => AlertKey::MotionInDarkness,
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKind::HighTemperature { temperature, threshold } => {
                write!(f, "High temperature: {temperature:.1}°C (threshold {threshold}°C)")
            }
            AlertKind::LowTemperature { temperature, threshold } => {
                write!(f, "Low temperature: {temperature:.1}°C (threshold {threshold}°C)")
            }
            AlertKind::HighHumidity { humidity, threshold } => {
                write!(f, "High humidity: {humidity:.1}% (threshold {threshold}%)")
            }
            AlertKind::MotionInDarkness { light_level, threshold } => {
                write!(f, "Motion detected in darkness: light {light_level} (dark below {threshold})")
            }
        }
    }
}

/// Payload-free discriminant of [`AlertKind`], used to index cooldowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKey {
    HighTemperature,
    LowTemperature,
    HighHumidity,
    MotionInDarkness,
}

impl AlertKey {
    pub const ALL: [AlertKey; 4] = [
        AlertKey::HighTemperature,
        AlertKey::LowTemperature,
        AlertKey::HighHumidity,
        AlertKey::MotionInDarkness,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub kind: AlertKind,
    pub raised_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const OFF: Rgb = Rgb::new(0, 0, 0);
    pub const RED: Rgb = Rgb::new(255, 0, 0);
    pub const GREEN: Rgb = Rgb::new(0, 255, 0);
    pub const BLUE: Rgb = Rgb::new(0, 0, 255);
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);
    pub const PURPLE: Rgb = Rgb::new(255, 0, 255);
    pub const YELLOW: Rgb = Rgb::new(255, 255, 0);
    pub const CYAN: Rgb = Rgb::new(0, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Looks up one of the named colours the operator CLI accepts.
    pub fn named(name: &str) -> Option<Rgb> {
        let color = match name.to_ascii_lowercase().as_str() {
            "red" => Rgb::RED,
            "green" => Rgb::GREEN,
            "blue" => Rgb::BLUE,
            "white" => Rgb::WHITE,
            "purple" => Rgb::PURPLE,
            "yellow" => Rgb::YELLOW,
            "cyan" => Rgb::CYAN,
            "off" => Rgb::OFF,
            _ => return None,
        };
        Some(color)
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.r, self.g, self.b)
    }
}

/// The controller's belief about the physical outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActuatorState {
    pub fan_on: bool,
    pub led: Rgb,
    pub buzzer_on: bool,
}

impl ActuatorState {
    /// The commands that drive a peripheral into exactly this state.
    pub fn commands(&self) -> [DeviceCommand; 3] {
        [
            DeviceCommand::Fan(self.fan_on),
            DeviceCommand::Led(self.led),
            DeviceCommand::Buzzer(self.buzzer_on),
        ]
    }
}

/// Outbound line protocol understood by the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    Fan(bool),
    Led(Rgb),
    Buzzer(bool),
    Status,
}

impl DeviceCommand {
    /// Encodes the command without its line terminator.
    pub fn encode(&self) -> Result<CommandBuffer, SerialError> {
        let mut buffer = CommandBuffer::new();
        write!(buffer, "{self}").map_err(|_| SerialError::Encode)?;
        Ok(buffer)
    }
}

fn on_off(on: bool) -> &'static str {
    if on { "ON" } else { "OFF" }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceCommand::Fan(on) => write!(f, "FAN:{}", on_off(*on)),
            DeviceCommand::Led(color) => write!(f, "LED:{color}"),
            DeviceCommand::Buzzer(on) => write!(f, "BUZZER:{}", on_off(*on)),
            DeviceCommand::Status => f.write_str("STATUS"),
        }
    }
}
