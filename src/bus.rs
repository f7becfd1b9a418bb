//! Publish/subscribe message bus.
//!
//! [`BusClient`] wraps an MQTT session. Inbound messages are routed to
//! handlers from a dedicated delivery task; handlers must return quickly
//! and hand real work to another task. Subscriptions are recorded and
//! re-asserted on every (re)connect since sessions are clean.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::error::BusError;

const REQUEST_CHANNEL_CAPACITY: usize = 64;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub op_timeout: Duration,
}

impl BusConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// An inbound message as seen by handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

pub type Handler = Arc<dyn Fn(BusMessage) + Send + Sync>;

/// Anything that can publish onto the bus.
pub trait Publish {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> impl Future<Output = Result<(), BusError>> + Send;
}

/// Topic names under a deployment prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
}

impl Topics {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn sensors_all(&self) -> String {
        format!("{}/sensors/all", self.prefix)
    }

    pub fn sensor_field(&self, field: &str) -> String {
        format!("{}/sensors/{}", self.prefix, field)
    }

    pub fn alerts(&self) -> String {
        format!("{}/sensors/alerts", self.prefix)
    }

    pub fn control(&self, target: &str) -> String {
        format!("{}/control/{}", self.prefix, target)
    }

    pub fn control_any(&self) -> String {
        format!("{}/control/+", self.prefix)
    }

    pub fn control_status(&self) -> String {
        self.control("status")
    }

    pub fn control_monitor(&self) -> String {
        self.control("monitor")
    }

    /// Extracts `<target>` from `<prefix>/control/<target>`.
    pub fn control_target<'t>(&self, topic: &'t str) -> Option<&'t str> {
        topic
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix("/control/")
            .filter(|target| !target.is_empty() && !target.contains('/'))
    }
}

/// MQTT filter matching: `+` matches one level, a trailing `#` matches
/// the remaining levels (including none).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[derive(Default)]
struct Router {
    routes: Vec<(String, Handler)>,
}

impl Router {
    fn add(&mut self, filter: &str, handler: Handler) {
        self.routes.push((filter.to_string(), handler));
    }

    /// Distinct filters, one SUBSCRIBE each.
    fn filters(&self) -> BTreeSet<String> {
        self.routes.iter().map(|(f, _)| f.clone()).collect()
    }

    fn matching(&self, topic: &str) -> Vec<Handler> {
        self.routes
            .iter()
            .filter(|(filter, _)| topic_matches(filter, topic))
            .map(|(_, handler)| Arc::clone(handler))
            .collect()
    }
}

pub struct BusClient {
    client: AsyncClient,
    router: Arc<Mutex<Router>>,
    address: String,
    op_timeout: Duration,
    delivery: JoinHandle<()>,
}

impl BusClient {
    /// Connects and waits for the broker's acknowledgement. Failure to
    /// reach the broker here is fatal to the caller.
    pub async fn connect(config: &BusConfig) -> Result<Self, BusError> {
        let address = config.address();
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(config.keep_alive);
        options.set_clean_session(true);
        if let Some(username) = &config.username {
            options.set_credentials(username, config.password.as_deref().unwrap_or(""));
        }

        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        info!(%address, client_id = %config.client_id, "connecting to the MQTT broker");
        let acknowledged = time::timeout(config.op_timeout, wait_for_connack(&mut event_loop)).await;
        match acknowledged {
            Ok(Ok(())) => info!(%address, "connected to the MQTT broker"),
            Ok(Err(reason)) => {
                error!(%address, %reason, "failed to connect to the MQTT broker");
                return Err(BusError::BrokerUnavailable { address, reason });
            }
            Err(_) => {
                error!(%address, "timed out connecting to the MQTT broker");
                return Err(BusError::BrokerUnavailable {
                    address,
                    reason: format!("no CONNACK within {:?}", config.op_timeout),
                });
            }
        }

        let router = Arc::new(Mutex::new(Router::default()));
        let delivery = tokio::spawn(deliver(event_loop, client.clone(), Arc::clone(&router)));

        Ok(Self {
            client,
            router,
            address,
            op_timeout: config.op_timeout,
            delivery,
        })
    }

    /// Registers `handler` for messages matching `filter` and subscribes.
    pub async fn subscribe<F>(&self, filter: &str, handler: F) -> Result<(), BusError>
    where
        F: Fn(BusMessage) + Send + Sync + 'static,
    {
        if let Ok(mut router) = self.router.lock() {
            router.add(filter, Arc::new(handler));
        }
        time::timeout(self.op_timeout, self.client.subscribe(filter, QoS::AtLeastOnce))
            .await
            .map_err(|_| BusError::Timeout(self.op_timeout))??;
        debug!(filter, "subscribed");
        Ok(())
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn disconnect(self) {
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "disconnect request failed");
        }
        self.delivery.abort();
    }
}

impl Publish for BusClient {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        time::timeout(
            self.op_timeout,
            self.client.publish(topic, QoS::AtLeastOnce, false, payload),
        )
        .await
        .map_err(|_| BusError::Timeout(self.op_timeout))??;
        Ok(())
    }
}

async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), String> {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(format!("{:?}", ack.code))
                };
            }
            Ok(_) => {}
            Err(e) => return Err(e.to_string()),
        }
    }
}

async fn deliver(mut event_loop: EventLoop, client: AsyncClient, router: Arc<Mutex<Router>>) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = BusMessage {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                };
                let handlers = match router.lock() {
                    Ok(router) => router.matching(&message.topic),
                    Err(_) => Vec::new(),
                };
                if handlers.is_empty() {
                    debug!(topic = %message.topic, "no handler for message");
                }
                for handler in handlers {
                    handler(message.clone());
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("reconnected to the MQTT broker, re-asserting subscriptions");
                let filters = match router.lock() {
                    Ok(router) => router.filters(),
                    Err(_) => BTreeSet::new(),
                };
                for filter in filters {
                    if let Err(e) = client.try_subscribe(filter.as_str(), QoS::AtLeastOnce) {
                        warn!(%filter, error = %e, "failed to re-subscribe");
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                // The event loop reconnects on the next poll.
                warn!(error = %e, "MQTT connection error");
                time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}
