//! Startup configuration.
//!
//! Every option can be given on the command line or through an
//! `EDGELOOP_*` environment variable. Values are read once and treated as
//! immutable afterwards.

use std::str::FromStr;
use std::time::Duration;

use clap::{App, Arg, ArgMatches};
use serde::{Deserialize, Serialize};

use crate::bus::{BusConfig, Topics};
use crate::error::ConfigError;
use crate::model::LIGHT_MAX;

pub const DEFAULT_BROKER_HOST: &str = "test.mosquitto.org";
pub const DEFAULT_BROKER_PORT: &str = "1883";
pub const DEFAULT_TOPIC_PREFIX: &str = "seaas";
pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyACM0";
pub const DEFAULT_BAUD: &str = "115200";
pub const DEFAULT_CLOUD_TOPIC: &str = "v1/devices/me/telemetry";

/// Comparison points shared by the alert policy and the controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub temp_high: f64,
    pub temp_low: f64,
    pub humidity_high: f64,
    pub humidity_low: f64,
    pub light_dark: u16,
    /// Controller-local temperature above which the fan runs and the
    /// LED turns red. Independent of `temp_high`.
    pub fan_on_above: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            temp_high: 30.0,
            temp_low: 10.0,
            humidity_high: 80.0,
            humidity_low: 20.0,
            light_dark: 100,
            fan_on_above: 25.0,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.temp_low >= self.temp_high {
            return Err(ConfigError::InvalidThresholds("temp-low must be below temp-high"));
        }
        if self.humidity_low >= self.humidity_high {
            return Err(ConfigError::InvalidThresholds("humidity-low must be below humidity-high"));
        }
        if self.light_dark > LIGHT_MAX {
            return Err(ConfigError::InvalidThresholds("light-dark must be within 0..=1023"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub port: String,
    pub baud: u32,
    pub io_timeout: Duration,
}

/// Optional second broker that receives telemetry in the cloud format.
#[derive(Debug, Clone)]
pub struct CloudConfig {
    pub bus: BusConfig,
    pub topic: String,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bus: BusConfig,
    pub serial: SerialConfig,
    pub topics: Topics,
    pub thresholds: Thresholds,
    pub cooldown: Duration,
    pub poll_interval: Duration,
    pub publish_fields: bool,
    pub inline_policy: bool,
    pub cloud: Option<CloudConfig>,
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub bus: BusConfig,
    pub serial: SerialConfig,
    pub topics: Topics,
    pub thresholds: Thresholds,
    pub poll_interval: Duration,
    pub status_interval: Duration,
    pub flash_count: u8,
    pub flash_period: Duration,
    /// Evaluate alerts here instead of waiting for the gateway's.
    pub alert_policy: bool,
    pub cooldown: Duration,
}

fn opt(name: &'static str, env: &'static str, help: &'static str) -> Arg<'static, 'static> {
    Arg::with_name(name)
        .long(name)
        .value_name("VALUE")
        .takes_value(true)
        .env(env)
        .help(help)
}

/// Broker options shared by every binary.
pub fn bus_args() -> Vec<Arg<'static, 'static>> {
    vec![
        opt("broker-host", "EDGELOOP_BROKER_HOST", "MQTT broker host").default_value(DEFAULT_BROKER_HOST),
        opt("broker-port", "EDGELOOP_BROKER_PORT", "MQTT broker port").default_value(DEFAULT_BROKER_PORT),
        opt("client-id", "EDGELOOP_CLIENT_ID", "MQTT client id"),
        opt("username", "EDGELOOP_BROKER_USERNAME", "MQTT username"),
        opt("password", "EDGELOOP_BROKER_PASSWORD", "MQTT password"),
        opt("topic-prefix", "EDGELOOP_TOPIC_PREFIX", "Prefix for all bus topics").default_value(DEFAULT_TOPIC_PREFIX),
        opt("bus-timeout-ms", "EDGELOOP_BUS_TIMEOUT_MS", "Timeout for broker operations").default_value("5000"),
    ]
}

fn serial_args() -> Vec<Arg<'static, 'static>> {
    vec![
        opt("serial-port", "EDGELOOP_SERIAL_PORT", "Peripheral serial port").default_value(DEFAULT_SERIAL_PORT),
        opt("baud", "EDGELOOP_BAUD", "Serial baud rate").default_value(DEFAULT_BAUD),
        opt("serial-timeout-ms", "EDGELOOP_SERIAL_TIMEOUT_MS", "Serial read/write timeout").default_value("2000"),
    ]
}

/// Alert and actuator thresholds, shared by both nodes and the CLI.
pub fn threshold_args() -> Vec<Arg<'static, 'static>> {
    vec![
        opt("temp-high", "EDGELOOP_TEMP_HIGH", "High temperature alert threshold (°C)").default_value("30"),
        opt("temp-low", "EDGELOOP_TEMP_LOW", "Low temperature alert threshold (°C)").default_value("10"),
        opt("humidity-high", "EDGELOOP_HUMIDITY_HIGH", "High humidity alert threshold (%)").default_value("80"),
        opt("humidity-low", "EDGELOOP_HUMIDITY_LOW", "Low humidity comfort bound (%)").default_value("20"),
        opt("light-dark", "EDGELOOP_LIGHT_DARK", "Light level below which it is dark (0-1023)").default_value("100"),
        opt("fan-on-above", "EDGELOOP_FAN_ON_ABOVE", "Temperature above which the fan runs (°C)").default_value("25"),
    ]
}

pub fn gateway_app() -> App<'static, 'static> {
    App::new("edgeloop-gateway")
        .version("0.1.0")
        .about("Sensing gateway: reads the sensor peripheral and publishes readings and alerts")
        .args(&bus_args())
        .args(&serial_args())
        .args(&threshold_args())
        .arg(opt("poll-ms", "EDGELOOP_POLL_MS", "Interval between serial read attempts").default_value("500"))
        .arg(opt("cooldown-secs", "EDGELOOP_COOLDOWN_SECS", "Minimum time between alerts of one kind").default_value("300"))
        .arg(
            Arg::with_name("no-field-topics")
                .long("no-field-topics")
                .help("Do not publish per-field sensor topics"),
        )
        .arg(
            Arg::with_name("no-inline-policy")
                .long("no-inline-policy")
                .help("Do not evaluate alert thresholds on this node"),
        )
        .arg(opt("cloud-host", "EDGELOOP_CLOUD_HOST", "Cloud telemetry broker host"))
        .arg(opt("cloud-port", "EDGELOOP_CLOUD_PORT", "Cloud telemetry broker port").default_value("1883"))
        .arg(opt("cloud-token", "EDGELOOP_CLOUD_TOKEN", "Cloud device access token"))
        .arg(opt("cloud-topic", "EDGELOOP_CLOUD_TOPIC", "Cloud telemetry topic").default_value(DEFAULT_CLOUD_TOPIC))
}

pub fn controller_app() -> App<'static, 'static> {
    App::new("edgeloop-controller")
        .version("0.1.0")
        .about("Actuator controller: drives fan, LED and buzzer from bus readings and alerts")
        .args(&bus_args())
        .args(&serial_args())
        .args(&threshold_args())
        .arg(opt("poll-ms", "EDGELOOP_POLL_MS", "Interval between serial read attempts").default_value("200"))
        .arg(opt("status-secs", "EDGELOOP_STATUS_SECS", "Interval between peripheral status requests").default_value("30"))
        .arg(opt("flash-count", "EDGELOOP_FLASH_COUNT", "LED flashes on a high temperature alert (1-8)").default_value("3"))
        .arg(opt("flash-ms", "EDGELOOP_FLASH_MS", "Duration of each flash phase").default_value("250"))
        .arg(opt("cooldown-secs", "EDGELOOP_COOLDOWN_SECS", "Minimum time between alerts of one kind").default_value("300"))
        .arg(
            Arg::with_name("alert-policy")
                .long("alert-policy")
                .help("Evaluate alert thresholds on this node"),
        )
}

fn parsed<T: FromStr>(matches: &ArgMatches<'_>, option: &'static str) -> Result<T, ConfigError> {
    let raw = matches.value_of(option).unwrap_or_default();
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        option,
        value: raw.to_string(),
    })
}

fn millis(matches: &ArgMatches<'_>, option: &'static str) -> Result<Duration, ConfigError> {
    parsed::<u64>(matches, option).map(Duration::from_millis)
}

fn secs(matches: &ArgMatches<'_>, option: &'static str) -> Result<Duration, ConfigError> {
    parsed::<u64>(matches, option).map(Duration::from_secs)
}

/// Ticker periods and timeouts must be non-zero.
fn period(duration: Duration, option: &'static str) -> Result<Duration, ConfigError> {
    if duration.is_zero() {
        return Err(ConfigError::InvalidValue {
            option,
            value: "0".to_string(),
        });
    }
    Ok(duration)
}

pub fn bus_config(matches: &ArgMatches<'_>, default_client_id: &str) -> Result<BusConfig, ConfigError> {
    Ok(BusConfig {
        host: matches.value_of("broker-host").unwrap_or(DEFAULT_BROKER_HOST).to_string(),
        port: parsed(matches, "broker-port")?,
        client_id: matches.value_of("client-id").unwrap_or(default_client_id).to_string(),
        username: matches.value_of("username").map(str::to_string),
        password: matches.value_of("password").map(str::to_string),
        keep_alive: Duration::from_secs(60),
        op_timeout: period(millis(matches, "bus-timeout-ms")?, "bus-timeout-ms")?,
    })
}

pub fn topics(matches: &ArgMatches<'_>) -> Topics {
    Topics::new(matches.value_of("topic-prefix").unwrap_or(DEFAULT_TOPIC_PREFIX))
}

fn serial_config(matches: &ArgMatches<'_>) -> Result<SerialConfig, ConfigError> {
    Ok(SerialConfig {
        port: matches.value_of("serial-port").unwrap_or(DEFAULT_SERIAL_PORT).to_string(),
        baud: parsed(matches, "baud")?,
        io_timeout: millis(matches, "serial-timeout-ms")?,
    })
}

pub fn thresholds(matches: &ArgMatches<'_>) -> Result<Thresholds, ConfigError> {
    let thresholds = Thresholds {
        temp_high: parsed(matches, "temp-high")?,
        temp_low: parsed(matches, "temp-low")?,
        humidity_high: parsed(matches, "humidity-high")?,
        humidity_low: parsed(matches, "humidity-low")?,
        light_dark: parsed(matches, "light-dark")?,
        fan_on_above: parsed(matches, "fan-on-above")?,
    };
    thresholds.validate()?;
    Ok(thresholds)
}

impl GatewayConfig {
    pub fn from_matches(matches: &ArgMatches<'_>) -> Result<Self, ConfigError> {
        let bus = bus_config(matches, "edgeloop-gateway")?;

        let cloud = match matches.value_of("cloud-host") {
            Some(host) => Some(CloudConfig {
                bus: BusConfig {
                    host: host.to_string(),
                    port: parsed(matches, "cloud-port")?,
                    client_id: format!("{}-cloud", bus.client_id),
                    username: matches.value_of("cloud-token").map(str::to_string),
                    password: None,
                    keep_alive: bus.keep_alive,
                    op_timeout: bus.op_timeout,
                },
                topic: matches.value_of("cloud-topic").unwrap_or(DEFAULT_CLOUD_TOPIC).to_string(),
            }),
            None => None,
        };

        Ok(Self {
            serial: serial_config(matches)?,
            topics: topics(matches),
            thresholds: thresholds(matches)?,
            cooldown: secs(matches, "cooldown-secs")?,
            poll_interval: period(millis(matches, "poll-ms")?, "poll-ms")?,
            publish_fields: !matches.is_present("no-field-topics"),
            inline_policy: !matches.is_present("no-inline-policy"),
            cloud,
            bus,
        })
    }
}

impl ControllerConfig {
    pub fn from_matches(matches: &ArgMatches<'_>) -> Result<Self, ConfigError> {
        let flash_count: u8 = parsed(matches, "flash-count")?;
        if !(1..=crate::controller::MAX_FLASHES).contains(&flash_count) {
            return Err(ConfigError::InvalidValue {
                option: "flash-count",
                value: flash_count.to_string(),
            });
        }

        Ok(Self {
            bus: bus_config(matches, "edgeloop-controller")?,
            serial: serial_config(matches)?,
            topics: topics(matches),
            thresholds: thresholds(matches)?,
            poll_interval: period(millis(matches, "poll-ms")?, "poll-ms")?,
            status_interval: period(secs(matches, "status-secs")?, "status-secs")?,
            flash_count,
            flash_period: millis(matches, "flash-ms")?,
            alert_policy: matches.is_present("alert-policy"),
            cooldown: secs(matches, "cooldown-secs")?,
        })
    }
}
