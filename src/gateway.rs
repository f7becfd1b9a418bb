use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::bus::Topics;
use crate::error::BusError;
use crate::frame::Frame;
use crate::model::{AlertEvent, CloudTelemetry, SensorReading};
use crate::policy::{AlertPolicy, MonitorAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Edge,
    Cloud,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub destination: Destination,
    pub topic: String,
    pub payload: Vec<u8>,
}

impl Publication {
    fn edge(topic: String, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            destination: Destination::Edge,
            topic,
            payload: payload.into(),
        }
    }
}

/// Turns parsed peripheral frames into bus publications.
#[derive(Debug)]
pub struct SensingGateway {
    topics: Topics,
    publish_fields: bool,
    cloud_topic: Option<String>,
    policy: Option<AlertPolicy>,
    last_reading: Option<SensorReading>,
}

impl SensingGateway {
    pub fn new(topics: Topics, publish_fields: bool) -> Self {
        Self {
            topics,
            publish_fields,
            cloud_topic: None,
            policy: None,
            last_reading: None,
        }
    }

    /// Evaluates alerts inline instead of relying on a remote engine.
    pub fn with_policy(mut self, policy: AlertPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_cloud_topic(mut self, topic: &str) -> Self {
        self.cloud_topic = Some(topic.to_string());
        self
    }

    pub fn policy(&self) -> Option<&AlertPolicy> {
        self.policy.as_ref()
    }

    pub fn last_reading(&self) -> Option<&SensorReading> {
        self.last_reading.as_ref()
    }

    pub fn on_frame(&mut self, frame: Frame, captured_at: DateTime<Utc>) -> Result<Vec<Publication>, BusError> {
        match frame {
            Frame::Reading(raw) => self.on_reading(raw.captured_at(captured_at), captured_at),
            Frame::Ready => {
                info!("sensor peripheral ready");
                Ok(Vec::new())
            }
            Frame::PeripheralError(message) => {
                warn!(%message, "sensor peripheral reported an error");
                Ok(Vec::new())
            }
            Frame::Status(raw) => {
                info!(status = %raw, "sensor peripheral status");
                Ok(Vec::new())
            }
        }
    }

    pub fn on_reading(&mut self, reading: SensorReading, now: DateTime<Utc>) -> Result<Vec<Publication>, BusError> {
        let mut publications = vec![Publication::edge(
            self.topics.sensors_all(),
            serde_json::to_vec(&reading)?,
        )];

        if self.publish_fields {
            let fields = [
                ("temperature", reading.temperature_c.to_string()),
                ("humidity", reading.humidity_percent.to_string()),
                ("light", reading.light_level.to_string()),
                ("motion", u8::from(reading.motion_detected).to_string()),
            ];
            for (field, value) in fields {
                publications.push(Publication::edge(self.topics.sensor_field(field), value));
            }
        }

        if let Some(topic) = &self.cloud_topic {
            publications.push(Publication {
                destination: Destination::Cloud,
                topic: topic.clone(),
                payload: serde_json::to_vec(&CloudTelemetry::from(&reading))?,
            });
        }

        if let Some(policy) = self.policy.as_mut() {
            for alert in policy.evaluate(&reading, now) {
                info!(kind = %alert.kind, "alert raised");
                publications.push(alert_publication(&self.topics, &alert)?);
            }
        }

        self.last_reading = Some(reading);
        Ok(publications)
    }

    pub fn on_monitor(&mut self, action: MonitorAction, now: DateTime<Utc>) {
        match self.policy.as_mut() {
            Some(policy) => {
                policy.apply_monitor(action, now);
                info!(?action, "alert monitoring updated");
            }
            None => warn!(?action, "monitor command ignored, no alert policy on this node"),
        }
    }
}

pub fn alert_publication(topics: &Topics, alert: &AlertEvent) -> Result<Publication, BusError> {
    Ok(Publication::edge(topics.alerts(), serde_json::to_vec(alert)?))
}
