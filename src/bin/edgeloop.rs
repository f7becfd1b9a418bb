use clap::{App, Arg, ArgMatches, SubCommand};
use colored::*;
use edgeloop::bus::{BusClient, BusMessage, Publish, Topics};
use edgeloop::config::{bus_args, bus_config, threshold_args, thresholds, topics};
use edgeloop::controller::parse_color;
use edgeloop::model::{AlertEvent, AlertKind, Rgb, SensorReading};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("edgeloop")
        .version("0.1.0")
        .about("Operator console for the edge loop: manual actuator control and live monitoring")
        .args(&bus_args())
        .args(&threshold_args())
        .subcommand(
            SubCommand::with_name("fan")
                .about("Switch the fan relay")
                .arg(
                    Arg::with_name("state")
                        .help("Fan state")
                        .required(true)
                        .possible_values(&["on", "off"]),
                ),
        )
        .subcommand(
            SubCommand::with_name("led")
                .about("Set the RGB indicator")
                .long_about("Accepts a colour name (red, green, blue, white, purple, yellow, cyan, off) or r,g,b channels in 0-255")
                .arg(Arg::with_name("color").help("Colour name or r,g,b").required(true)),
        )
        .subcommand(
            SubCommand::with_name("buzzer")
                .about("Switch the buzzer")
                .arg(
                    Arg::with_name("state")
                        .help("Buzzer state")
                        .required(true)
                        .possible_values(&["on", "off"]),
                ),
        )
        .subcommand(
            SubCommand::with_name("monitor")
                .about("Start or stop alert monitoring on the gateway")
                .arg(
                    Arg::with_name("action")
                        .help("Monitoring action")
                        .required(true)
                        .possible_values(&["start", "stop"]),
                ),
        )
        .subcommand(SubCommand::with_name("watch").about("Follow readings, alerts and peripheral status until Ctrl-C"))
        .get_matches();

    let config = bus_config(&matches, &format!("edgeloop-cli-{}", std::process::id()))?;
    let topics = topics(&matches);
    let thresholds = thresholds(&matches)?;

    let command = match matches.subcommand() {
        ("fan", Some(sub)) => Some(("fan", switch_payload(sub))),
        ("buzzer", Some(sub)) => Some(("buzzer", switch_payload(sub))),
        ("led", Some(sub)) => Some(("led", color_payload(sub)?)),
        ("monitor", Some(sub)) => Some(("monitor", sub.value_of("action").unwrap_or("start").to_string())),
        ("watch", _) => None,
        _ => {
            println!("{}", matches.usage());
            return Ok(());
        }
    };

    let client = match BusClient::connect(&config).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("{} {}", "❌".red(), e.to_string().bright_red());
            std::process::exit(1);
        }
    };

    match command {
        Some((target, payload)) => send_control(&client, &topics, target, &payload).await?,
        None => watch(&client, &topics, thresholds.temp_high).await?,
    }

    client.disconnect().await;
    Ok(())
}

fn switch_payload(matches: &ArgMatches<'_>) -> String {
    matches.value_of("state").unwrap_or("off").to_ascii_uppercase()
}

fn color_payload(matches: &ArgMatches<'_>) -> Result<String, Box<dyn std::error::Error>> {
    let raw = matches.value_of("color").unwrap_or_default();
    let color = match Rgb::named(raw) {
        Some(color) => color,
        None => parse_color(raw)?,
    };
    Ok(color.to_string())
}

async fn send_control(
    client: &BusClient,
    topics: &Topics,
    target: &str,
    payload: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let topic = topics.control(target);
    client.publish(&topic, payload.as_bytes().to_vec()).await?;
    println!("{} {} set to {}", "✅".green(), target.bright_white(), payload.bright_cyan());
    Ok(())
}

async fn watch(client: &BusClient, topics: &Topics, temp_high: f64) -> Result<(), Box<dyn std::error::Error>> {
    client
        .subscribe(&topics.sensors_all(), move |message| print_reading(message, temp_high))
        .await?;
    client.subscribe(&topics.alerts(), print_alert).await?;
    client.subscribe(&topics.control_status(), print_status).await?;

    println!("{} Watching {} (Ctrl-C to stop)", "📡".cyan(), client.address().bright_white());
    tokio::signal::ctrl_c().await?;
    Ok(())
}

/// Temperatures above `temp_high` are shown in red.
fn print_reading(message: BusMessage, temp_high: f64) {
    let Ok(reading) = serde_json::from_slice::<SensorReading>(&message.payload) else {
        println!("{} {}", "?".yellow(), message.payload_text());
        return;
    };

    let temp = format!("{:>6.1}°C", reading.temperature_c);
    let temp = if reading.temperature_c > temp_high { temp.red() } else { temp.white() };
    let motion = if reading.motion_detected { "MOTION".yellow() } else { "  idle".dimmed() };
    println!(
        "{} {} {:>5.1}% light {:>4} {}",
        reading.captured_at.format("%H:%M:%S").to_string().dimmed(),
        temp,
        reading.humidity_percent,
        reading.light_level,
        motion
    );
}

fn print_alert(message: BusMessage) {
    match serde_json::from_slice::<AlertEvent>(&message.payload) {
        Ok(alert) => {
            let icon = match alert.kind {
                AlertKind::HighTemperature { .. } => "🔥",
                AlertKind::LowTemperature { .. } => "❄️ ",
                AlertKind::HighHumidity { .. } => "💧",
                AlertKind::MotionInDarkness { .. } => "🌙",
            };
            println!("{} {}", icon, alert.kind.to_string().bright_red());
        }
        Err(_) => println!("{} {}", "⚠️ ".yellow(), message.payload_text().bright_red()),
    }
}

fn print_status(message: BusMessage) {
    let text = message.payload_text();
    if text.starts_with(edgeloop::frame::ERROR_PREFIX) {
        println!("{} {}", "❌".red(), text.bright_red());
    } else {
        println!("{} {}", "ℹ️ ".blue(), text.bright_white());
    }
}
