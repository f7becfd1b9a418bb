use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::Thresholds;
use crate::error::CommandRejected;
use crate::model::{AlertEvent, AlertKey, AlertKind, SensorReading};

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(300);

/// Last raise time per alert kind. A kind is "raised" while its entry is
/// younger than the cooldown window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownTable {
    last_raised: [Option<DateTime<Utc>>; 4],
}

impl CooldownTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_raised(&self, key: AlertKey) -> Option<DateTime<Utc>> {
        self.last_raised[key.index()]
    }

    pub fn is_cooling(&self, key: AlertKey, now: DateTime<Utc>, window: ChronoDuration) -> bool {
        match self.last_raised(key) {
            Some(raised) => now.signed_duration_since(raised) < window,
            None => false,
        }
    }

    fn record(&mut self, key: AlertKey, at: DateTime<Utc>) {
        self.last_raised[key.index()] = Some(at);
    }

    pub fn clear(&mut self) {
        self.last_raised = [None; 4];
    }

    pub fn is_empty(&self) -> bool {
        self.last_raised.iter().all(Option::is_none)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitorAction {
    Start,
    Stop,
}

impl MonitorAction {
    pub fn parse(payload: &str) -> Result<Self, CommandRejected> {
        match payload.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(MonitorAction::Start),
            "stop" => Ok(MonitorAction::Stop),
            _ => Err(CommandRejected::InvalidMonitorAction(payload.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MonitorAction::Start => "start",
            MonitorAction::Stop => "stop",
        }
    }
}

#[derive(Debug)]
pub struct AlertPolicy {
    thresholds: Thresholds,
    cooldown: ChronoDuration,
    table: CooldownTable,
}

impl AlertPolicy {
    pub fn new(thresholds: Thresholds, cooldown: Duration) -> Self {
        Self {
            thresholds,
            cooldown: ChronoDuration::from_std(cooldown).unwrap_or(ChronoDuration::MAX),
            table: CooldownTable::new(),
        }
    }

    /// Evaluates one reading and returns the alerts that pass cooldown.
    pub fn evaluate(&mut self, reading: &SensorReading, now: DateTime<Utc>) -> Vec<AlertEvent> {
        let mut events = Vec::new();

        for kind in self.breaches(reading) {
            let key = kind.key();
            if self.table.is_cooling(key, now, self.cooldown) {
                continue;
            }
            self.table.record(key, now);
            events.push(AlertEvent { kind, raised_at: now });
        }

        events
    }

    /// Threshold comparisons for a single reading, ignoring cooldown.
    pub fn breaches(&self, reading: &SensorReading) -> Vec<AlertKind> {
        let t = &self.thresholds;
        let mut kinds = Vec::with_capacity(3);

        // High and low temperature are mutually exclusive.
        if reading.temperature_c > t.temp_high {
            kinds.push(AlertKind::HighTemperature {
                temperature: reading.temperature_c,
                threshold: t.temp_high,
            });
        } else if reading.temperature_c < t.temp_low {
            kinds.push(AlertKind::LowTemperature {
                temperature: reading.temperature_c,
                threshold: t.temp_low,
            });
        }

        if reading.humidity_percent > t.humidity_high {
            kinds.push(AlertKind::HighHumidity {
                humidity: reading.humidity_percent,
                threshold: t.humidity_high,
            });
        }

        if reading.is_dark_motion(t.light_dark) {
            kinds.push(AlertKind::MotionInDarkness {
                light_level: reading.light_level,
                threshold: t.light_dark,
            });
        }

        kinds
    }

    pub fn apply_monitor(&mut self, action: MonitorAction, now: DateTime<Utc>) {
        match action {
            MonitorAction::Start => self.start_monitoring(),
            MonitorAction::Stop => self.stop_monitoring(now),
        }
    }

    /// Suppresses every kind until a full window has elapsed from `now`.
    pub fn stop_monitoring(&mut self, now: DateTime<Utc>) {
        for key in AlertKey::ALL {
            self.table.record(key, now);
        }
    }

    /// Forgets all cooldowns so any breach raises immediately.
    pub fn start_monitoring(&mut self) {
        self.table.clear();
    }

    pub fn cooldowns(&self) -> &CooldownTable {
        &self.table
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }
}
