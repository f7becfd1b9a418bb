//! # Edge Loop
//!
//! Sensor-to-actuator control loop for two edge nodes joined by an MQTT
//! bus: a sensing gateway that reads an environmental sensor peripheral
//! over serial, and an actuator controller that drives a fan relay, an
//! RGB indicator and a buzzer on its own serial peripheral.
//!
//! ## Features
//!
//! - **Tolerant frame parsing**: key/value and JSON reading records plus
//!   peripheral sentinels, with a dedicated error per malformed shape
//! - **Alert policy**: threshold checks with a per-kind cooldown window
//!   and monitoring start/stop control
//! - **Actuator control**: priority-ordered output derivation that only
//!   writes what changed, alert overrides and manual commands
//! - **Single-owner state**: every mutable table lives inside one actor
//!   fed by a mailbox; serial writes are serialized by one lock
//!
//! ## Quick Start
//!
//! ```rust
//! use edgeloop::config::Thresholds;
//! use edgeloop::controller::ActuatorController;
//! use edgeloop::frame::{parse_line, Frame};
//! use std::time::Duration;
//!
//! let mut controller = ActuatorController::new(Thresholds::default(), 3, Duration::from_millis(250));
//!
//! if let Ok(Frame::Reading(raw)) = parse_line("TEMP:32,HUMIDITY:50,LIGHT:50,MOTION:1") {
//!     let reading = raw.captured_at(chrono::Utc::now());
//!     for step in controller.on_reading(&reading).iter() {
//!         println!("{}", step.command);
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`model`] - Readings, alerts, actuator state and the device wire format
//! - [`frame`] - Peripheral line parser
//! - [`serial`] - Line-oriented serial link with a shared write lock
//! - [`bus`] - MQTT client, topic layout and wildcard routing
//! - [`policy`] - Alert thresholds and cooldowns
//! - [`controller`] - Actuator decisions
//! - [`gateway`] - Reading publication
//! - [`agent`] - Node runtimes wiring the above together
//! - [`config`] - Command line and environment configuration

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod agent;
pub mod bus;
pub mod config;
pub mod controller;
pub mod error;
pub mod frame;
pub mod gateway;
pub mod model;
pub mod policy;
pub mod serial;

// Re-export main public types for convenience
pub use agent::{run_controller, run_gateway};
pub use config::Thresholds;
pub use controller::ActuatorController;
pub use error::Error;
pub use model::{ActuatorState, AlertEvent, AlertKind, DeviceCommand, Rgb, SensorReading};
pub use policy::AlertPolicy;
