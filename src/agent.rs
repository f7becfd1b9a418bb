//! Node runtimes.
//!
//! Each node runs three kinds of tasks:
//!
//! - a peripheral poller that reads and parses serial lines on a fixed
//!   cadence,
//! - bus handlers that decode messages and drop them into a mailbox,
//! - one actor that owns all mutable state (cooldowns or actuator cache)
//!   and drains the mailbox in order.
//!
//! Nothing but the actor touches that state, and the serial write lock is
//! held for one command at a time.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::bus::{BusClient, BusMessage, Publish, Topics};
use crate::config::{ControllerConfig, GatewayConfig};
use crate::controller::{ActuatorController, ManualTarget, Plan};
use crate::error::{Error, ParseError, SerialError};
use crate::frame::{parse_line, Frame, ERROR_PREFIX};
use crate::gateway::{alert_publication, Destination, Publication, SensingGateway};
use crate::model::{AlertEvent, DeviceCommand, SensorReading};
use crate::policy::{AlertPolicy, MonitorAction};
use crate::serial::{CommandWriter, LineReader, SerialLink};

pub const MAILBOX_CAPACITY: usize = 64;

/// Reads lines on a fixed cadence and hands every parsed frame to
/// `on_frame`. Read and parse failures are logged and skipped; the loop
/// ends only when the port is closed.
pub async fn poll_peripheral<F>(mut reader: LineReader, poll_interval: Duration, mut on_frame: F)
where
    F: FnMut(Frame),
{
    let mut ticker = time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let line = match reader.read_line().await {
            Ok(Some(line)) => line,
            Ok(None) => continue,
            Err(SerialError::Closed) => {
                error!("serial port closed, peripheral polling stopped");
                return;
            }
            Err(e) => {
                warn!(error = %e, "serial read failed");
                continue;
            }
        };

        match parse_line(&line) {
            Ok(frame) => on_frame(frame),
            Err(ParseError::Empty) => {}
            Err(e) => warn!(%line, error = %e, "discarding peripheral line"),
        }
    }
}

fn forward<T>(mailbox: &mpsc::Sender<T>, input: T, topic: &str) {
    match mailbox.try_send(input) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => warn!(topic, "mailbox full, dropping message"),
        Err(mpsc::error::TrySendError::Closed(_)) => debug!(topic, "mailbox closed"),
    }
}

pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayInput {
    Frame { frame: Frame, captured_at: DateTime<Utc> },
    Monitor(MonitorAction),
}

/// Runs the sensing gateway until Ctrl-C. Returns an error only when the
/// serial port or a broker cannot be reached at startup.
pub async fn run_gateway(config: GatewayConfig) -> Result<(), Error> {
    let link = SerialLink::open(&config.serial.port, config.serial.baud, config.serial.io_timeout)?;
    let (reader, _writer) = link.split();

    let bus = BusClient::connect(&config.bus).await?;
    let cloud = match &config.cloud {
        Some(cloud) => Some(BusClient::connect(&cloud.bus).await?),
        None => None,
    };

    let mut gateway = SensingGateway::new(config.topics.clone(), config.publish_fields);
    if config.inline_policy {
        gateway = gateway.with_policy(AlertPolicy::new(config.thresholds, config.cooldown));
    }
    if let Some(cloud) = &config.cloud {
        gateway = gateway.with_cloud_topic(&cloud.topic);
    }

    let (mailbox, inbox) = mpsc::channel(MAILBOX_CAPACITY);

    if config.inline_policy {
        let monitor_mailbox = mailbox.clone();
        bus.subscribe(&config.topics.control_monitor(), move |message: BusMessage| {
            match MonitorAction::parse(&message.payload_text()) {
                Ok(action) => forward(&monitor_mailbox, GatewayInput::Monitor(action), &message.topic),
                Err(e) => warn!(topic = %message.topic, payload = %message.payload_text(), error = %e, "monitor command rejected"),
            }
        })
        .await?;
    }

    let poller = tokio::spawn(poll_peripheral(reader, config.poll_interval, move |frame| {
        let input = GatewayInput::Frame { frame, captured_at: Utc::now() };
        forward(&mailbox, input, "serial");
    }));

    info!(port = %config.serial.port, broker = %bus.address(), "sensing gateway running");
    drive_gateway(&mut gateway, inbox, &bus, cloud.as_ref(), shutdown_signal()).await;

    poller.abort();
    bus.disconnect().await;
    if let Some(cloud) = cloud {
        cloud.disconnect().await;
    }
    info!("sensing gateway stopped");
    Ok(())
}

/// The gateway actor: drains the mailbox until it closes or `shutdown`
/// resolves.
pub async fn drive_gateway<P, S>(
    gateway: &mut SensingGateway,
    mut inbox: mpsc::Receiver<GatewayInput>,
    edge: &P,
    cloud: Option<&P>,
    shutdown: S,
) where
    P: Publish,
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        let input = tokio::select! {
            input = inbox.recv() => match input {
                Some(input) => input,
                None => break,
            },
            () = &mut shutdown => break,
        };

        match input {
            GatewayInput::Frame { frame, captured_at } => match gateway.on_frame(frame, captured_at) {
                Ok(publications) => publish_all(edge, cloud, publications).await,
                Err(e) => error!(error = %e, "failed to encode publications"),
            },
            GatewayInput::Monitor(action) => gateway.on_monitor(action, Utc::now()),
        }
    }
}

async fn publish_all<P: Publish>(edge: &P, cloud: Option<&P>, publications: Vec<Publication>) {
    for publication in publications {
        let target = match publication.destination {
            Destination::Edge => edge,
            Destination::Cloud => match cloud {
                Some(cloud) => cloud,
                None => continue,
            },
        };
        if let Err(e) = target.publish(&publication.topic, publication.payload).await {
            warn!(topic = %publication.topic, error = %e, "publish failed");
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerInput {
    Reading(SensorReading),
    Alert(AlertEvent),
    Manual { target: ManualTarget, payload: String, topic: String },
    Monitor(MonitorAction),
    Peripheral(Frame),
}

/// Runs the actuator controller until Ctrl-C, then drives every output
/// off before the port closes.
pub async fn run_controller(config: ControllerConfig) -> Result<(), Error> {
    let link = SerialLink::open(&config.serial.port, config.serial.baud, config.serial.io_timeout)?;
    let (reader, writer) = link.split();

    let bus = BusClient::connect(&config.bus).await?;
    let (mailbox, inbox) = mpsc::channel(MAILBOX_CAPACITY);

    let readings = mailbox.clone();
    bus.subscribe(&config.topics.sensors_all(), move |message: BusMessage| {
        match serde_json::from_slice::<SensorReading>(&message.payload) {
            Ok(reading) => forward(&readings, ControllerInput::Reading(reading), &message.topic),
            Err(e) => warn!(topic = %message.topic, payload = %message.payload_text(), error = %e, "undecodable reading"),
        }
    })
    .await?;

    // A node that raises its own alerts reacts to them directly.
    if !config.alert_policy {
        let alerts = mailbox.clone();
        bus.subscribe(&config.topics.alerts(), move |message: BusMessage| {
            match serde_json::from_slice::<AlertEvent>(&message.payload) {
                Ok(alert) => forward(&alerts, ControllerInput::Alert(alert), &message.topic),
                Err(e) => warn!(topic = %message.topic, payload = %message.payload_text(), error = %e, "undecodable alert"),
            }
        })
        .await?;
    }

    let manual = mailbox.clone();
    let topics = config.topics.clone();
    let accept_monitor = config.alert_policy;
    bus.subscribe(&config.topics.control_any(), move |message: BusMessage| {
        if let Some(input) = manual_input(&topics, &message, accept_monitor) {
            forward(&manual, input, &message.topic);
        }
    })
    .await?;

    let poller = tokio::spawn(poll_peripheral(reader, config.poll_interval, move |frame| {
        forward(&mailbox, ControllerInput::Peripheral(frame), "serial");
    }));
    let status = tokio::spawn(request_status(writer.clone(), config.status_interval));

    let mut controller = ActuatorController::new(config.thresholds, config.flash_count, config.flash_period);
    let mut policy = config
        .alert_policy
        .then(|| AlertPolicy::new(config.thresholds, config.cooldown));

    info!(
        port = %config.serial.port,
        broker = %bus.address(),
        alert_policy = config.alert_policy,
        "actuator controller running"
    );
    drive_controller(
        &mut controller,
        &writer,
        inbox,
        &bus,
        &config.topics,
        policy.as_mut(),
        shutdown_signal(),
    )
    .await;

    status.abort();
    poller.abort();
    info!("driving outputs to a safe state");
    let plan = controller.safe_off();
    execute(&mut controller, &writer, &plan).await;

    bus.disconnect().await;
    info!("actuator controller stopped");
    Ok(())
}

/// Maps a message on `<prefix>/control/<target>` to a mailbox input.
/// Status echoes belong to other consumers, and so do monitor commands
/// unless this node owns the alert policy.
pub fn manual_input(topics: &Topics, message: &BusMessage, accept_monitor: bool) -> Option<ControllerInput> {
    let segment = topics.control_target(&message.topic)?;
    match segment {
        "status" => return None,
        "monitor" if !accept_monitor => return None,
        "monitor" => {
            return match MonitorAction::parse(&message.payload_text()) {
                Ok(action) => Some(ControllerInput::Monitor(action)),
                Err(e) => {
                    warn!(topic = %message.topic, payload = %message.payload_text(), error = %e, "monitor command rejected");
                    None
                }
            };
        }
        _ => {}
    }
    match ManualTarget::from_topic_segment(segment) {
        Ok(target) => Some(ControllerInput::Manual {
            target,
            payload: message.payload_text(),
            topic: message.topic.clone(),
        }),
        Err(e) => {
            warn!(topic = %message.topic, error = %e, "ignoring control message");
            None
        }
    }
}

/// The controller actor. Readings, alerts and manual commands are applied
/// strictly in arrival order; peripheral status is echoed to the bus.
///
/// With a `policy`, every reading is also evaluated here: raised alerts
/// are published on the alerts topic and acted on right after the
/// reading's own commands.
pub async fn drive_controller<P, S>(
    controller: &mut ActuatorController,
    writer: &CommandWriter,
    mut inbox: mpsc::Receiver<ControllerInput>,
    bus: &P,
    topics: &Topics,
    mut policy: Option<&mut AlertPolicy>,
    shutdown: S,
) where
    P: Publish,
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        let input = tokio::select! {
            input = inbox.recv() => match input {
                Some(input) => input,
                None => break,
            },
            () = &mut shutdown => break,
        };

        match input {
            ControllerInput::Reading(reading) => {
                let plan = controller.on_reading(&reading);
                execute(controller, writer, &plan).await;

                if let Some(policy) = policy.as_deref_mut() {
                    for alert in policy.evaluate(&reading, Utc::now()) {
                        publish_alert(bus, topics, &alert).await;
                        react_to_alert(controller, writer, &alert).await;
                    }
                }
            }
            ControllerInput::Alert(alert) => react_to_alert(controller, writer, &alert).await,
            ControllerInput::Manual { target, payload, topic } => match controller.on_manual(target, &payload) {
                Ok(plan) => execute(controller, writer, &plan).await,
                Err(e) => warn!(%topic, %payload, error = %e, "manual command rejected"),
            },
            ControllerInput::Monitor(action) => match policy.as_deref_mut() {
                Some(policy) => {
                    policy.apply_monitor(action, Utc::now());
                    info!(?action, "alert monitoring updated");
                }
                None => warn!(?action, "monitor command ignored, no alert policy on this node"),
            },
            ControllerInput::Peripheral(frame) => echo_peripheral(bus, topics, frame).await,
        }
    }
}

async fn react_to_alert(controller: &mut ActuatorController, writer: &CommandWriter, alert: &AlertEvent) {
    info!(kind = %alert.kind, "reacting to alert");
    let plan = controller.on_alert(alert);
    execute(controller, writer, &plan).await;
}

async fn publish_alert<P: Publish>(bus: &P, topics: &Topics, alert: &AlertEvent) {
    let publication = match alert_publication(topics, alert) {
        Ok(publication) => publication,
        Err(e) => {
            error!(kind = %alert.kind, error = %e, "failed to encode alert");
            return;
        }
    };
    if let Err(e) = bus.publish(&publication.topic, publication.payload).await {
        warn!(topic = %publication.topic, error = %e, "publish failed");
    }
}

async fn echo_peripheral<P: Publish>(bus: &P, topics: &Topics, frame: Frame) {
    let payload = match frame {
        Frame::Status(raw) => raw,
        Frame::PeripheralError(message) => {
            warn!(%message, "actuator peripheral reported an error");
            format!("{ERROR_PREFIX}{message}")
        }
        Frame::Ready => {
            info!("actuator peripheral ready");
            return;
        }
        Frame::Reading(_) => {
            debug!("ignoring reading from actuator peripheral");
            return;
        }
    };

    let topic = topics.control_status();
    if let Err(e) = bus.publish(&topic, payload.into_bytes()).await {
        warn!(%topic, error = %e, "failed to publish peripheral status");
    }
}

/// Writes each step in order. A failed write leaves that output unknown
/// so the next decision rewrites it.
pub async fn execute(controller: &mut ActuatorController, writer: &CommandWriter, plan: &Plan) {
    for step in plan.iter() {
        match writer.write_command(step.command).await {
            Ok(()) => debug!(command = %step.command, "command written"),
            Err(e) => {
                error!(command = %step.command, error = %e, "serial write failed");
                controller.forget(&step.command);
                continue;
            }
        }
        if !step.hold.is_zero() {
            time::sleep(step.hold).await;
        }
    }
}

/// Asks the peripheral for a diagnostic dump on a fixed interval.
pub async fn request_status(writer: CommandWriter, interval: Duration) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if let Err(e) = writer.write_command(DeviceCommand::Status).await {
            warn!(error = %e, "status request failed");
        }
    }
}
