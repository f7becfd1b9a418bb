//! Actuator decision logic.
//!
//! [`ActuatorController`] turns readings, alerts and manual commands into
//! the serial commands that bring the outputs to the desired state. It
//! performs no I/O; the owning agent executes the returned [`Plan`] step
//! by step and reports failed writes back through
//! [`ActuatorController::forget`].

use std::time::Duration;

use heapless::Vec;

use crate::config::Thresholds;
use crate::error::CommandRejected;
use crate::model::{ActuatorState, AlertEvent, AlertKind, DeviceCommand, Rgb, SensorReading};

pub const MAX_FLASHES: u8 = 8;
const MAX_STEPS: usize = MAX_FLASHES as usize * 2 + 2;

pub const OVER_TEMPERATURE_COLOR: Rgb = Rgb::RED;
pub const DARK_MOTION_COLOR: Rgb = Rgb::PURPLE;
pub const NORMAL_COLOR: Rgb = Rgb::GREEN;

/// One serial write, followed by an optional pause before the next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub command: DeviceCommand,
    pub hold: Duration,
}

pub type Plan = Vec<Step, MAX_STEPS>;

/// Output targets addressable by manual commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualTarget {
    Fan,
    Led,
    Buzzer,
}

impl ManualTarget {
    pub fn from_topic_segment(segment: &str) -> Result<Self, CommandRejected> {
        match segment {
            "fan" => Ok(ManualTarget::Fan),
            "led" => Ok(ManualTarget::Led),
            "buzzer" => Ok(ManualTarget::Buzzer),
            other => Err(CommandRejected::UnknownTarget(other.to_string())),
        }
    }
}

pub fn parse_switch(payload: &str) -> Result<bool, CommandRejected> {
    match payload.trim().to_ascii_lowercase().as_str() {
        "on" => Ok(true),
        "off" => Ok(false),
        _ => Err(CommandRejected::InvalidSwitch(payload.to_string())),
    }
}

/// Parses `r,g,b` with every channel in `0..=255`.
pub fn parse_color(payload: &str) -> Result<Rgb, CommandRejected> {
    let channels: std::vec::Vec<&str> = payload.trim().split(',').map(str::trim).collect();
    if channels.len() != 3 {
        return Err(CommandRejected::WrongFieldCount(channels.len()));
    }

    let mut values = [0u8; 3];
    for (value, channel) in values.iter_mut().zip(&channels) {
        *value = channel
            .parse()
            .map_err(|_| CommandRejected::InvalidChannel(channel.to_string()))?;
    }
    Ok(Rgb::new(values[0], values[1], values[2]))
}

/// Last written value per output. `None` means unknown, so the next
/// decision always writes it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Cache {
    fan: Option<bool>,
    led: Option<Rgb>,
    buzzer: Option<bool>,
}

#[derive(Debug)]
pub struct ActuatorController {
    thresholds: Thresholds,
    flash_count: u8,
    flash_period: Duration,
    cache: Cache,
    /// Whether the last reading was over the fan threshold. The red LED
    /// then outranks any dark-motion colour, alerts included.
    over_temperature: bool,
}

impl ActuatorController {
    pub fn new(thresholds: Thresholds, flash_count: u8, flash_period: Duration) -> Self {
        Self {
            thresholds,
            flash_count: flash_count.clamp(1, MAX_FLASHES),
            flash_period,
            cache: Cache::default(),
            over_temperature: false,
        }
    }

    /// Current belief about the outputs; unknown outputs read as off.
    pub fn state(&self) -> ActuatorState {
        ActuatorState {
            fan_on: self.cache.fan.unwrap_or(false),
            led: self.cache.led.unwrap_or(Rgb::OFF),
            buzzer_on: self.cache.buzzer.unwrap_or(false),
        }
    }

    /// The state a reading asks for, by priority: over-temperature beats
    /// motion in darkness, which beats normal.
    pub fn desired_state(&self, reading: &SensorReading) -> ActuatorState {
        let over_temperature = reading.temperature_c > self.thresholds.fan_on_above;
        let dark_motion = reading.is_dark_motion(self.thresholds.light_dark);

        let led = if over_temperature {
            OVER_TEMPERATURE_COLOR
        } else if dark_motion {
            DARK_MOTION_COLOR
        } else {
            NORMAL_COLOR
        };

        ActuatorState {
            fan_on: over_temperature,
            led,
            buzzer_on: dark_motion,
        }
    }

    pub fn on_reading(&mut self, reading: &SensorReading) -> Plan {
        let desired = self.desired_state(reading);
        self.over_temperature = desired.fan_on;
        let mut plan = Plan::new();
        self.set_fan(&mut plan, desired.fan_on, false);
        self.set_led(&mut plan, desired.led, false);
        self.set_buzzer(&mut plan, desired.buzzer_on, false);
        plan
    }

    /// Transient override for an alert. Reading-driven control resumes
    /// with the next reading. Dark motion never repaints an over-temperature
    /// LED.
    pub fn on_alert(&mut self, alert: &AlertEvent) -> Plan {
        let mut plan = Plan::new();
        match alert.kind {
            AlertKind::MotionInDarkness { .. } => {
                self.set_buzzer(&mut plan, true, false);
                if !self.over_temperature {
                    self.set_led(&mut plan, DARK_MOTION_COLOR, false);
                }
            }
            AlertKind::HighTemperature { .. } => {
                for _ in 0..self.flash_count {
                    self.push(&mut plan, DeviceCommand::Led(Rgb::OFF), self.flash_period);
                    self.push(&mut plan, DeviceCommand::Led(OVER_TEMPERATURE_COLOR), self.flash_period);
                }
            }
            AlertKind::LowTemperature { .. } | AlertKind::HighHumidity { .. } => {}
        }
        plan
    }

    /// Applies a manual command, bypassing policy. Always writes, even if
    /// the cached value already matches.
    pub fn on_manual(&mut self, target: ManualTarget, payload: &str) -> Result<Plan, CommandRejected> {
        let mut plan = Plan::new();
        match target {
            ManualTarget::Fan => self.set_fan(&mut plan, parse_switch(payload)?, true),
            ManualTarget::Led => self.set_led(&mut plan, parse_color(payload)?, true),
            ManualTarget::Buzzer => self.set_buzzer(&mut plan, parse_switch(payload)?, true),
        }
        Ok(plan)
    }

    /// Commands that leave every output off, issued on shutdown.
    pub fn safe_off(&mut self) -> Plan {
        let mut plan = Plan::new();
        self.set_fan(&mut plan, false, true);
        self.set_led(&mut plan, Rgb::OFF, true);
        self.set_buzzer(&mut plan, false, true);
        plan
    }

    /// Marks the output touched by `command` as unknown after a failed
    /// write so the next decision rewrites it.
    pub fn forget(&mut self, command: &DeviceCommand) {
        match command {
            DeviceCommand::Fan(_) => self.cache.fan = None,
            DeviceCommand::Led(_) => self.cache.led = None,
            DeviceCommand::Buzzer(_) => self.cache.buzzer = None,
            DeviceCommand::Status => {}
        }
    }

    fn set_fan(&mut self, plan: &mut Plan, on: bool, force: bool) {
        if force || self.cache.fan != Some(on) {
            self.push(plan, DeviceCommand::Fan(on), Duration::ZERO);
        }
    }

    fn set_led(&mut self, plan: &mut Plan, color: Rgb, force: bool) {
        if force || self.cache.led != Some(color) {
            self.push(plan, DeviceCommand::Led(color), Duration::ZERO);
        }
    }

    fn set_buzzer(&mut self, plan: &mut Plan, on: bool, force: bool) {
        if force || self.cache.buzzer != Some(on) {
            self.push(plan, DeviceCommand::Buzzer(on), Duration::ZERO);
        }
    }

    fn push(&mut self, plan: &mut Plan, command: DeviceCommand, hold: Duration) {
        if plan.push(Step { command, hold }).is_err() {
            return;
        }
        match command {
            DeviceCommand::Fan(on) => self.cache.fan = Some(on),
            DeviceCommand::Led(color) => self.cache.led = Some(color),
            DeviceCommand::Buzzer(on) => self.cache.buzzer = Some(on),
            DeviceCommand::Status => {}
        }
    }
}
