use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use edgeloop::bus::Topics;
use edgeloop::config::{Thresholds, DEFAULT_CLOUD_TOPIC};
use edgeloop::frame::{parse_line, Frame};
use edgeloop::gateway::{Destination, Publication, SensingGateway};
use edgeloop::model::{AlertEvent, AlertKey, RawReading, SensorReading};
use edgeloop::policy::{AlertPolicy, MonitorAction, DEFAULT_COOLDOWN};

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

fn gateway() -> SensingGateway {
    SensingGateway::new(Topics::new("seaas"), true)
        .with_policy(AlertPolicy::new(Thresholds::default(), DEFAULT_COOLDOWN))
}

fn frame(line: &str) -> Frame {
    parse_line(line).unwrap()
}

fn topics_of(publications: &[Publication]) -> Vec<&str> {
    publications.iter().map(|p| p.topic.as_str()).collect()
}

fn alerts_in(publications: &[Publication]) -> Vec<AlertEvent> {
    publications
        .iter()
        .filter(|p| p.topic == "seaas/sensors/alerts")
        .map(|p| serde_json::from_slice(&p.payload).unwrap())
        .collect()
}

#[test]
fn test_reading_fans_out_to_all_topics() {
    let mut gateway = gateway();
    let publications = gateway
        .on_frame(frame("TEMP:22.5,HUMIDITY:40,LIGHT:600,MOTION:0"), start_time())
        .unwrap();

    assert_eq!(
        topics_of(&publications),
        vec![
            "seaas/sensors/all",
            "seaas/sensors/temperature",
            "seaas/sensors/humidity",
            "seaas/sensors/light",
            "seaas/sensors/motion",
        ]
    );
    assert!(publications.iter().all(|p| p.destination == Destination::Edge));
    assert_eq!(publications[1].payload, b"22.5");
    assert_eq!(publications[2].payload, b"40");
    assert_eq!(publications[3].payload, b"600");
    assert_eq!(publications[4].payload, b"0");
}

#[test]
fn test_combined_reading_payload() {
    let mut gateway = gateway();
    let publications = gateway
        .on_frame(frame("TEMP:22.5,HUMIDITY:40,LIGHT:600,MOTION:1"), start_time())
        .unwrap();

    let json: serde_json::Value = serde_json::from_slice(&publications[0].payload).unwrap();
    assert_eq!(json["temp"], 22.5);
    assert_eq!(json["humidity"], 40.0);
    assert_eq!(json["light"], 600);
    assert_eq!(json["motion"], true);
    assert!(json["timestamp"].is_string());

    let decoded: SensorReading = serde_json::from_slice(&publications[0].payload).unwrap();
    assert_eq!(Some(&decoded), gateway.last_reading());
    assert_eq!(decoded.captured_at, start_time());
}

#[test]
fn test_field_topics_can_be_disabled() {
    let mut gateway = SensingGateway::new(Topics::new("seaas"), false);
    let publications = gateway.on_frame(frame("TEMP:22,LIGHT:600"), start_time()).unwrap();

    assert_eq!(topics_of(&publications), vec!["seaas/sensors/all"]);
}

#[test]
fn test_breach_publishes_alert_after_reading() {
    let mut gateway = gateway();
    let publications = gateway
        .on_frame(frame("TEMP:32,HUMIDITY:50,LIGHT:50,MOTION:1"), start_time())
        .unwrap();

    assert_eq!(publications[0].topic, "seaas/sensors/all");
    let alerts = alerts_in(&publications);
    assert_eq!(
        alerts.iter().map(|a| a.kind.key()).collect::<Vec<_>>(),
        vec![AlertKey::HighTemperature, AlertKey::MotionInDarkness]
    );
    assert!(alerts.iter().all(|a| a.raised_at == start_time()));
}

#[test]
fn test_alerts_respect_cooldown() {
    let mut gateway = gateway();
    let hot = RawReading {
        temperature_c: 33.0,
        humidity_percent: 50.0,
        light_level: 600,
        motion_detected: false,
    };
    let t0 = start_time();

    let first = gateway.on_reading(hot.captured_at(t0), t0).unwrap();
    assert_eq!(alerts_in(&first).len(), 1);

    let t1 = t0 + ChronoDuration::seconds(30);
    let second = gateway.on_reading(hot.captured_at(t1), t1).unwrap();
    assert!(alerts_in(&second).is_empty());
    assert_eq!(second[0].topic, "seaas/sensors/all");
}

#[test]
fn test_monitor_commands() {
    let mut gateway = gateway();
    let t0 = start_time();

    gateway.on_monitor(MonitorAction::Stop, t0);
    let muted = gateway.on_frame(frame("TEMP:40"), t0 + ChronoDuration::seconds(5)).unwrap();
    assert!(alerts_in(&muted).is_empty());

    gateway.on_monitor(MonitorAction::Start, t0 + ChronoDuration::seconds(6));
    let resumed = gateway.on_frame(frame("TEMP:40"), t0 + ChronoDuration::seconds(7)).unwrap();
    assert_eq!(alerts_in(&resumed).len(), 1);
}

#[test]
fn test_gateway_without_policy_never_alerts() {
    let mut gateway = SensingGateway::new(Topics::new("seaas"), true);
    gateway.on_monitor(MonitorAction::Start, start_time());

    let publications = gateway.on_frame(frame("TEMP:45,HUMIDITY:95,LIGHT:0,MOTION:1"), start_time()).unwrap();
    assert!(gateway.policy().is_none());
    assert!(alerts_in(&publications).is_empty());
}

#[test]
fn test_cloud_forwarding() {
    let mut gateway = SensingGateway::new(Topics::new("seaas"), false).with_cloud_topic(DEFAULT_CLOUD_TOPIC);
    let publications = gateway
        .on_frame(frame("TEMP:22.5,HUMIDITY:40,LIGHT:600,MOTION:1"), start_time())
        .unwrap();

    let cloud: Vec<&Publication> = publications
        .iter()
        .filter(|p| p.destination == Destination::Cloud)
        .collect();
    assert_eq!(cloud.len(), 1);
    assert_eq!(cloud[0].topic, "v1/devices/me/telemetry");

    let json: serde_json::Value = serde_json::from_slice(&cloud[0].payload).unwrap();
    assert_eq!(json["temperature"], 22.5);
    assert_eq!(json["humidity"], 40.0);
    assert_eq!(json["light"], 600);
    assert_eq!(json["motion"], 1);
}

#[test]
fn test_non_reading_frames_publish_nothing() {
    let mut gateway = gateway();

    assert!(gateway.on_frame(Frame::Ready, start_time()).unwrap().is_empty());
    assert!(gateway
        .on_frame(Frame::PeripheralError("sensor fault".to_string()), start_time())
        .unwrap()
        .is_empty());
    assert!(gateway
        .on_frame(Frame::Status(r#"{"status":"ok"}"#.to_string()), start_time())
        .unwrap()
        .is_empty());
    assert!(gateway.last_reading().is_none());
}
