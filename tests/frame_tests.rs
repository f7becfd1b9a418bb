use edgeloop::error::ParseError;
use edgeloop::frame::{parse_line, Frame};
use edgeloop::model::RawReading;

fn reading(line: &str) -> RawReading {
    match parse_line(line) {
        Ok(Frame::Reading(raw)) => raw,
        other => panic!("expected a reading from {line:?}, got {other:?}"),
    }
}

#[test]
fn test_key_value_reading() {
    let raw = reading("TEMP:23.5,HUMIDITY:41,LIGHT:300,MOTION:1");

    assert_eq!(raw.temperature_c, 23.5);
    assert_eq!(raw.humidity_percent, 41.0);
    assert_eq!(raw.light_level, 300);
    assert!(raw.motion_detected);
}

#[test]
fn test_key_value_tolerates_whitespace_case_and_line_endings() {
    let raw = reading("  temp: 19.0 , Humidity :55, light:12 ,motion:0\r\n");

    assert_eq!(raw.temperature_c, 19.0);
    assert_eq!(raw.humidity_percent, 55.0);
    assert_eq!(raw.light_level, 12);
    assert!(!raw.motion_detected);
}

#[test]
fn test_missing_fields_default_to_zero() {
    let raw = reading("TEMP:21");

    assert_eq!(raw.temperature_c, 21.0);
    assert_eq!(raw.humidity_percent, 0.0);
    assert_eq!(raw.light_level, 0);
    assert!(!raw.motion_detected);
}

#[test]
fn test_unknown_keys_are_skipped() {
    let raw = reading("TEMP:20,PRESSURE:1013,LIGHT:400");

    assert_eq!(raw.temperature_c, 20.0);
    assert_eq!(raw.light_level, 400);
}

#[test]
fn test_json_reading() {
    let raw = reading(r#"{"temp":23.5,"humidity":41,"light":300,"motion":true}"#);

    assert_eq!(raw.temperature_c, 23.5);
    assert_eq!(raw.humidity_percent, 41.0);
    assert_eq!(raw.light_level, 300);
    assert!(raw.motion_detected);
}

#[test]
fn test_json_reading_accepts_long_names_and_numeric_motion() {
    let raw = reading(r#"{"temperature":18,"hum":60,"motion":1,"light":null}"#);

    assert_eq!(raw.temperature_c, 18.0);
    assert_eq!(raw.humidity_percent, 60.0);
    assert_eq!(raw.light_level, 0);
    assert!(raw.motion_detected);
}

#[test]
fn test_status_record_is_kept_verbatim() {
    let line = r#"{"status":"ok","fan":"ON","led":"0,255,0","buzzer":"OFF"}"#;

    assert_eq!(parse_line(line), Ok(Frame::Status(line.to_string())));
}

#[test]
fn test_sentinels() {
    assert_eq!(parse_line("SENSOR_NODE_READY"), Ok(Frame::Ready));
    assert_eq!(
        parse_line("ERROR: DHT read failed"),
        Ok(Frame::PeripheralError("DHT read failed".to_string()))
    );
}

#[test]
fn test_empty_lines() {
    assert_eq!(parse_line(""), Err(ParseError::Empty));
    assert_eq!(parse_line("   \r\n"), Err(ParseError::Empty));
}

#[test]
fn test_unrecognized_line() {
    assert_eq!(
        parse_line("booting firmware v2"),
        Err(ParseError::UnrecognizedLine("booting firmware v2".to_string()))
    );
}

#[test]
fn test_non_numeric_value() {
    assert_eq!(
        parse_line("TEMP:abc,HUMIDITY:40"),
        Err(ParseError::InvalidNumber {
            field: "TEMP".to_string(),
            value: "abc".to_string(),
        })
    );
}

#[test]
fn test_malformed_field() {
    assert_eq!(
        parse_line("TEMP:20,garbage"),
        Err(ParseError::MalformedField("garbage".to_string()))
    );
}

#[test]
fn test_light_out_of_range() {
    assert!(matches!(
        parse_line("TEMP:20,LIGHT:2000"),
        Err(ParseError::OutOfRange { field: "light", .. })
    ));
    assert!(matches!(
        parse_line(r#"{"light":-5}"#),
        Err(ParseError::OutOfRange { field: "light", .. })
    ));
}

#[test]
fn test_non_finite_values_rejected() {
    assert!(matches!(parse_line("TEMP:NaN"), Err(ParseError::InvalidNumber { .. })));
    assert!(matches!(parse_line("HUMIDITY:inf"), Err(ParseError::InvalidNumber { .. })));
}

#[test]
fn test_invalid_json_records() {
    assert!(matches!(parse_line("{not json"), Err(ParseError::InvalidRecord(_))));
    assert!(matches!(
        parse_line(r#"{"temp":"hot"}"#),
        Err(ParseError::InvalidNumber { .. })
    ));
    assert_eq!(parse_line(r#"{"pressure":1013}"#), Err(ParseError::NoReadingFields));
}
