use edgeloop::error::SerialError;
use edgeloop::model::{DeviceCommand, Rgb};
use edgeloop::serial::{SerialLink, MAX_LINE_BYTES};
use std::collections::HashSet;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

const IO_TIMEOUT: Duration = Duration::from_millis(100);

#[tokio::test]
async fn test_reads_lines_without_terminators() {
    let (mut device, host) = tokio::io::duplex(256);
    let (mut reader, _writer) = SerialLink::from_stream(host, IO_TIMEOUT).split();

    device.write_all(b"TEMP:21,HUMIDITY:40\r\nSENSOR_NODE_READY\n").await.unwrap();

    assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("TEMP:21,HUMIDITY:40"));
    assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("SENSOR_NODE_READY"));
}

#[tokio::test]
async fn test_read_timeout_returns_none_and_keeps_partial_line() {
    let (mut device, host) = tokio::io::duplex(256);
    let (mut reader, _writer) = SerialLink::from_stream(host, IO_TIMEOUT).split();

    assert_eq!(reader.read_line().await.unwrap(), None);

    device.write_all(b"TEMP:2").await.unwrap();
    assert_eq!(reader.read_line().await.unwrap(), None);

    device.write_all(b"5,LIGHT:300\n").await.unwrap();
    assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("TEMP:25,LIGHT:300"));
}

#[tokio::test]
async fn test_closed_port_is_reported() {
    let (mut device, host) = tokio::io::duplex(256);
    let (mut reader, _writer) = SerialLink::from_stream(host, IO_TIMEOUT).split();

    device.write_all(b"LAST\n").await.unwrap();
    drop(device);

    assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("LAST"));
    assert!(matches!(reader.read_line().await, Err(SerialError::Closed)));
}

#[tokio::test]
async fn test_invalid_utf8_is_a_decode_error() {
    let (mut device, host) = tokio::io::duplex(256);
    let (mut reader, _writer) = SerialLink::from_stream(host, IO_TIMEOUT).split();

    device.write_all(&[0xff, 0xfe, b'\n', b'O', b'K', b'\n']).await.unwrap();

    assert!(matches!(reader.read_line().await, Err(SerialError::Decode(_))));
    assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("OK"));
}

#[tokio::test]
async fn test_commands_are_newline_terminated() {
    let (device, host) = tokio::io::duplex(256);
    let (_reader, writer) = SerialLink::from_stream(host, IO_TIMEOUT).split();
    let mut device = BufReader::new(device);

    writer.write_command(DeviceCommand::Fan(true)).await.unwrap();
    writer.write_command(DeviceCommand::Led(Rgb::new(1, 2, 3))).await.unwrap();
    writer.write_command(DeviceCommand::Status).await.unwrap();

    let mut received = String::new();
    for _ in 0..3 {
        device.read_line(&mut received).await.unwrap();
    }
    assert_eq!(received, "FAN:ON\nLED:1,2,3\nSTATUS\n");
}

#[tokio::test]
async fn test_concurrent_writers_never_interleave() {
    let (device, host) = tokio::io::duplex(4096);
    let (_reader, writer) = SerialLink::from_stream(host, IO_TIMEOUT).split();

    let mut expected = HashSet::new();
    let mut tasks = Vec::new();
    for value in 0..40u8 {
        let command = DeviceCommand::Led(Rgb::new(value, 255 - value, value / 2));
        expected.insert(command.to_string());
        let writer = writer.clone();
        tasks.push(tokio::spawn(async move { writer.write_command(command).await }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let mut lines = BufReader::new(device).lines();
    let mut received = HashSet::new();
    for _ in 0..40 {
        let line = lines.next_line().await.unwrap().unwrap();
        assert!(expected.contains(&line), "interleaved or corrupt line {line:?}");
        received.insert(line);
    }
    assert_eq!(received, expected);
}

#[tokio::test]
async fn test_write_times_out_when_peer_stalls() {
    let (_device, host) = tokio::io::duplex(4);
    let (_reader, writer) = SerialLink::from_stream(host, Duration::from_millis(50)).split();

    let result = writer.write_command(DeviceCommand::Led(Rgb::WHITE)).await;
    assert!(matches!(result, Err(SerialError::Timeout(_))));
}

#[tokio::test]
async fn test_overlong_line_is_bounded_and_dropped() {
    let (mut device, host) = tokio::io::duplex(8192);
    let (mut reader, _writer) = SerialLink::from_stream(host, IO_TIMEOUT).split();

    let noise = vec![b'x'; MAX_LINE_BYTES * 3];
    device.write_all(&noise).await.unwrap();
    device.write_all(b"\nTEMP:20\n").await.unwrap();

    assert!(matches!(reader.read_line().await, Err(SerialError::LineTooLong(MAX_LINE_BYTES))));

    let mut next = None;
    for _ in 0..6 {
        if let Some(line) = reader.read_line().await.unwrap() {
            next = Some(line);
            break;
        }
    }
    assert_eq!(next.as_deref(), Some("TEMP:20"));
}
