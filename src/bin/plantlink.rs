use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use plantlink::protocol::{binary, StateReport, UpdateAck, CMD_ACK, CMD_NACK};
use plantlink::{ChannelId, Command, FeedResult, Frame, FrameCodec, LinkCodec, PumpCommand, RunStatus};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "7070";
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult<()> {
    let pump_arg = |name: &'static str| {
        Arg::with_name(name)
            .required(true)
            .possible_values(&["0", "1", "2", "3"])
            .help("Pump status code (0 off, 1 starting, 2 on, 3 shutting down)")
    };

    let matches = App::new("plantlink")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Plant Controls Engineering Team")
        .about("Command-line client for a plantlink node (binary link protocol)")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("host")
                .short("H")
                .long("host")
                .value_name("HOST")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true)
                .help("Node host address"),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true)
                .help("Node link port"),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .takes_value(true)
                .possible_values(&["table", "json", "compact"])
                .default_value("table")
                .global(true)
                .help("Output format"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .global(true)
                .help("Show raw frames"),
        )
        .subcommand(SubCommand::with_name("ping").about("Check the node is responsive"))
        .subcommand(
            SubCommand::with_name("update")
                .about("Send a telemetry update (thermal kW and three pump codes)")
                .arg(Arg::with_name("kw").required(true).help("Thermal power in kW"))
                .arg(pump_arg("pump1"))
                .arg(pump_arg("pump2"))
                .arg(pump_arg("pump3")),
        )
        .subcommand(
            SubCommand::with_name("target")
                .about("Set an actuator target")
                .arg(
                    Arg::with_name("channel")
                        .required(true)
                        .help("rod1|rod2|rod3|safety|shim|regulating|steam|turbine|condenser|cooling or index 0-6"),
                )
                .arg(Arg::with_name("percent").required(true).help("Target 0-100 (larger values are clamped)")),
        )
        .subcommand(
            SubCommand::with_name("pressure")
                .about("Report primary pressure")
                .arg(Arg::with_name("bar").required(true).help("Pressure in bar")),
        )
        .subcommand(
            SubCommand::with_name("pumps")
                .about("Report pump status codes")
                .arg(pump_arg("pump1"))
                .arg(pump_arg("pump2"))
                .arg(pump_arg("pump3")),
        )
        .subcommand(
            SubCommand::with_name("pump")
                .about("Switch one pump on or off")
                .arg(Arg::with_name("pump").required(true).help("Pump number 1-3"))
                .arg(
                    Arg::with_name("action")
                        .required(true)
                        .possible_values(&["on", "off"])
                        .help("on|off"),
                ),
        )
        .subcommand(SubCommand::with_name("state").about("Read actuator positions and plant state"))
        .subcommand(SubCommand::with_name("estop").about("Latch the emergency stop"))
        .subcommand(SubCommand::with_name("reset").about("Clear the emergency stop latch"))
        .subcommand(
            SubCommand::with_name("corrupt-demo")
                .about("Send a checksum-corrupted ping followed by a valid one"),
        )
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port: u16 = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse()?;
    let format = matches.value_of("format").unwrap_or("table");
    let verbose = matches.is_present("verbose");
    let addr = format!("{}:{}", host, port);

    match matches.subcommand() {
        ("corrupt-demo", _) => handle_corrupt_demo(&addr, format, verbose).await,
        (name, Some(sub)) => {
            let command = build_command(name, sub)?;
            handle_command(&addr, command, format, verbose).await
        }
        _ => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
            Ok(())
        }
    }
}

fn parse_pumps(sub: &ArgMatches<'_>) -> CliResult<[RunStatus; 3]> {
    let mut pumps = [RunStatus::Off; 3];
    for (slot, name) in pumps.iter_mut().zip(["pump1", "pump2", "pump3"]) {
        let code: u8 = sub.value_of(name).unwrap_or("0").parse()?;
        *slot = RunStatus::from_code(code).ok_or("pump code must be 0-3")?;
    }
    Ok(pumps)
}

fn build_command(name: &str, sub: &ArgMatches<'_>) -> CliResult<Command> {
    let command = match name {
        "ping" => Command::Ping,
        "state" => Command::ReadState,
        "estop" => Command::EmergencyStop,
        "reset" => Command::Reset,
        "update" => Command::TelemetryUpdate {
            thermal_kw: sub.value_of("kw").unwrap_or("0").parse()?,
            pumps: parse_pumps(sub)?,
        },
        "pumps" => Command::PumpStatus {
            pumps: parse_pumps(sub)?,
        },
        "pump" => {
            let pump: u8 = sub.value_of("pump").unwrap_or("0").parse()?;
            if !(1..=3).contains(&pump) {
                return Err("pump number must be 1-3".into());
            }
            let command = match sub.value_of("action") {
                Some("on") => PumpCommand::On,
                _ => PumpCommand::Off,
            };
            Command::PumpControl {
                pump: pump - 1,
                command,
            }
        }
        "pressure" => Command::SetPressure {
            bar: sub.value_of("bar").unwrap_or("0").parse()?,
        },
        "target" => {
            let channel = sub.value_of("channel").unwrap_or("");
            let percent: u32 = sub.value_of("percent").unwrap_or("0").parse()?;
            Command::SetTarget {
                channel: ChannelId::parse(channel).ok_or("unknown channel")?,
                percent: percent.min(u32::from(u8::MAX)) as u8,
            }
        }
        other => return Err(format!("unknown command {}", other).into()),
    };
    Ok(command)
}

async fn handle_command(addr: &str, command: Command, format: &str, verbose: bool) -> CliResult<()> {
    let request = binary::encode(&command.to_frame());
    if verbose {
        println!("{} {}", "TX".dimmed(), hex(&request).dimmed());
    }
    let replies = transact(addr, &request, 1, verbose).await?;
    match replies.first() {
        Some(reply) => print_reply(&command, reply, format),
        None => println!("{} no reply within {:?}", "⏰".yellow(), REPLY_TIMEOUT),
    }
    Ok(())
}

async fn handle_corrupt_demo(addr: &str, format: &str, verbose: bool) -> CliResult<()> {
    let ping = binary::encode(&Command::Ping.to_frame());
    let mut corrupted = ping.clone();
    let crc_index = corrupted.len() - 2;
    corrupted[crc_index] ^= 0xFF;

    let mut stream_bytes = Vec::new();
    stream_bytes.extend_from_slice(&corrupted);
    stream_bytes.extend_from_slice(&ping);
    if verbose {
        println!("{} {}", "TX".dimmed(), hex(&stream_bytes).dimmed());
    }

    let replies = transact(addr, &stream_bytes, 2, verbose).await?;
    for reply in &replies {
        print_reply(&Command::Ping, reply, format);
    }
    let acks = replies.iter().filter(|f| f.command == CMD_ACK).count();
    let nacks = replies.iter().filter(|f| f.command == CMD_NACK).count();
    if format != "json" {
        let verdict = if acks == 1 && nacks == 1 {
            "resynchronized: one NACK, one ACK".bright_green()
        } else {
            "unexpected reply pattern".bright_red()
        };
        println!("{} {}", "↺".bright_blue(), verdict);
    }
    Ok(())
}

/// Writes `request` and collects up to `expected` reply frames.
async fn transact(addr: &str, request: &[u8], expected: usize, verbose: bool) -> CliResult<Vec<Frame>> {
    let mut stream = match TcpStream::connect(addr).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("{} Failed to connect to node at {}", "❌".red(), addr.bright_white());
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                eprintln!("{} Start one with: {}", "💡".yellow(), "plantlink-node".bright_cyan());
            }
            return Err(e.into());
        }
    };
    stream.write_all(request).await?;

    let mut codec = FrameCodec::new();
    let mut frames = Vec::new();
    let mut buf = [0u8; 128];
    let started = Instant::now();
    while frames.len() < expected {
        let remaining = match REPLY_TIMEOUT.checked_sub(started.elapsed()) {
            Some(remaining) => remaining,
            None => break,
        };
        let n = match tokio::time::timeout(remaining, stream.read(&mut buf)).await {
            Ok(result) => result?,
            Err(_) => break,
        };
        if n == 0 {
            break;
        }
        if verbose {
            println!("{} {}", "RX".dimmed(), hex(&buf[..n]).dimmed());
        }
        let now_ms = started.elapsed().as_millis() as u64;
        for &byte in &buf[..n] {
            match codec.feed(byte, now_ms) {
                FeedResult::Complete(frame) => frames.push(frame),
                FeedResult::Invalid(err) => eprintln!("{} bad reply frame: {}", "⚠️".yellow(), err),
                FeedResult::Incomplete => {}
            }
        }
    }
    Ok(frames)
}

fn print_reply(command: &Command, reply: &Frame, format: &str) {
    let acked = reply.command == CMD_ACK;
    match format {
        "compact" => println!("{}", if acked { "ACK".bright_green() } else { "NACK".bright_red() }),
        "json" => {
            let body = match (command, acked) {
                (Command::TelemetryUpdate { .. }, true) => UpdateAck::decode(reply.payload())
                    .ok()
                    .and_then(|ack| serde_json::to_value(ack).ok()),
                (Command::ReadState, true) => StateReport::decode(reply.payload())
                    .ok()
                    .and_then(|report| serde_json::to_value(report).ok()),
                _ => None,
            };
            let value = serde_json::json!({
                "request": command.code(),
                "status": if acked { "ACK" } else { "NACK" },
                "body": body,
            });
            println!("{}", value);
        }
        _ => {
            if !acked {
                println!("{} {} rejected (NACK)", "❌".red(), command_name(command).bright_white());
                return;
            }
            println!("{} {} acknowledged", "✅".green(), command_name(command).bright_white());
            match command {
                Command::TelemetryUpdate { .. } => print_update_ack(reply),
                Command::ReadState => print_state(reply),
                _ => {}
            }
        }
    }
}

fn print_update_ack(reply: &Frame) {
    match UpdateAck::decode(reply.payload()) {
        Ok(ack) => {
            println!("  {} {:.3} MW", "Output:".bright_white(), ack.electrical_mw);
            println!("  {} {}", "Indicator PWM:".bright_white(), ack.indicator_pwm);
            let codes: Vec<String> = ack.pumps.iter().map(|p| p.code().to_string()).collect();
            println!("  {} ({})", "Pumps:".bright_white(), codes.join(", ").bright_cyan());
        }
        Err(e) => println!("  {} {}", "malformed ACK payload:".bright_red(), e),
    }
}

fn print_state(reply: &Frame) {
    let report = match StateReport::decode(reply.payload()) {
        Ok(report) => report,
        Err(e) => {
            println!("  {} {}", "malformed state report:".bright_red(), e);
            return;
        }
    };
    println!("{}", "┌──────────────┬──────────┐".bright_white());
    for (channel, position) in ChannelId::ALL.iter().zip(report.positions) {
        println!("│ {:<12} │ {:>6} % │", channel.key(), position);
    }
    println!("{}", "└──────────────┴──────────┘".bright_white());
    println!("  {} {:.1} kW (level {})", "Thermal:".bright_white(), report.thermal_kw, report.power_level);
    println!("  {} {}", "Plant state:".bright_white(), report.plant_state.name().bright_cyan());
    println!("  {} {}", "Rod interlock:".bright_white(), flag(report.rods_permitted));
    println!("  {} {}", "Turbine interlock:".bright_white(), flag(report.turbine_permitted));
    if report.emergency_latched {
        println!("  {}", "EMERGENCY STOP LATCHED".bright_red().bold());
    }
}

fn flag(permitted: bool) -> ColoredString {
    if permitted {
        "permitted".bright_green()
    } else {
        "blocked".bright_red()
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Ping => "Ping",
        Command::TelemetryUpdate { .. } => "Telemetry update",
        Command::SetTarget { .. } => "Set target",
        Command::SetPressure { .. } => "Pressure report",
        Command::PumpStatus { .. } => "Pump status",
        Command::PumpControl { .. } => "Pump control",
        Command::ReadState => "State read",
        Command::EmergencyStop => "Emergency stop",
        Command::Reset => "Reset",
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
