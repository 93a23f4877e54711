use clap::{App, Arg};
use plantlink::error::NodeError;
use plantlink::indicator::{IndicatorDriver, LogIndicator};
use plantlink::link::{chunks, ChannelSource, Chunk};
use plantlink::{LinkError, PlantConfig, PlantSupervisor};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn, Level};

const DEFAULT_BIND: &str = "127.0.0.1:7070";
// Loop iteration rate; the control cycle itself is rate-limited by config.
const POLL_INTERVAL_MS: u64 = 5;
const RX_CHANNEL_CAPACITY: usize = 64;
const REPLY_CHANNEL_CAPACITY: usize = 32;
const DOWNSTREAM_BUFFER: usize = 16;
const READ_BUFFER_SIZE: usize = 256;

enum LinkEvent {
    Connected(std::net::SocketAddr, mpsc::Sender<Vec<u8>>),
}

#[tokio::main]
async fn main() {
    let matches = App::new("plantlink-node")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Supervisory control node: serial link over TCP, fixed-rate control loop")
        .arg(
            Arg::with_name("bind")
                .long("bind")
                .short("b")
                .value_name("ADDR")
                .default_value(DEFAULT_BIND)
                .help("Address the link listens on"),
        )
        .arg(
            Arg::with_name("protocol")
                .long("protocol")
                .short("p")
                .value_name("PROTOCOL")
                .possible_values(&["binary", "text"])
                .default_value("binary")
                .help("Link encoding"),
        )
        .arg(
            Arg::with_name("config")
                .long("config")
                .short("c")
                .value_name("FILE")
                .help("JSON configuration file"),
        )
        .arg(
            Arg::with_name("downstream")
                .long("downstream")
                .short("d")
                .value_name("ADDR")
                .help("Indicator node that receives text telemetry lines"),
        )
        .arg(
            Arg::with_name("verbose")
                .long("verbose")
                .short("v")
                .multiple(true)
                .help("Increase log verbosity"),
        )
        .get_matches();

    let level = match matches.occurrences_of("verbose") {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    if let Err(e) = run(
        matches.value_of("bind").unwrap_or(DEFAULT_BIND),
        matches.value_of("protocol").unwrap_or("binary"),
        matches.value_of("config"),
        matches.value_of("downstream"),
    )
    .await
    {
        error!("node stopped: {}", e);
        std::process::exit(1);
    }
}

async fn run(
    bind: &str,
    protocol: &str,
    config_path: Option<&str>,
    downstream: Option<&str>,
) -> Result<(), NodeError> {
    let config = match config_path {
        Some(path) => PlantConfig::load(path)?,
        None => PlantConfig::default(),
    };
    let control_period_ms = config.control_period_ms;
    let mut supervisor = match protocol {
        "text" => PlantSupervisor::text(config)?,
        _ => PlantSupervisor::binary(config)?,
    };

    let listener = TcpListener::bind(bind).await?;
    info!(
        bind,
        codec = supervisor.codec_name(),
        control_period_ms,
        "plant node listening"
    );

    let (rx_tx, mut source) = ChannelSource::channel(RX_CHANNEL_CAPACITY);
    let (event_tx, mut event_rx) = mpsc::channel(4);
    let accept_task = tokio::spawn(accept_links(listener, rx_tx, event_tx));

    let (downstream_tx, _) = broadcast::channel::<String>(DOWNSTREAM_BUFFER);
    let downstream_task = downstream.map(|addr| {
        tokio::spawn(forward_downstream(addr.to_string(), downstream_tx.subscribe()))
    });

    let mut reply_tx: Option<mpsc::Sender<Vec<u8>>> = None;
    let mut indicator = LogIndicator::new();
    let start = Instant::now();
    let mut interval = time::interval(Duration::from_millis(POLL_INTERVAL_MS));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
        }
        let now_ms = start.elapsed().as_millis() as u64;

        while let Ok(LinkEvent::Connected(addr, tx)) = event_rx.try_recv() {
            info!(%addr, "link attached");
            reply_tx = Some(tx);
        }

        match supervisor.poll_link(&mut source, now_ms) {
            Ok(_) => {}
            Err(LinkError::Disconnected) => {
                warn!("receive side closed");
                break;
            }
        }

        let outbound = supervisor.take_outbound();
        if !outbound.is_empty() {
            if let Some(tx) = &reply_tx {
                if tx.try_send(outbound).is_err() {
                    warn!("reply dropped, link writer busy or gone");
                }
            }
        }

        if let Some(report) = supervisor.run_cycle(now_ms) {
            if let Some((from, to)) = report.outcome.transition {
                info!(%from, %to, "plant state");
            }
            indicator.render(&report.indicator);
            if let Some(snapshot) = report.telemetry {
                match snapshot.to_json() {
                    Ok(json) => debug!(telemetry = %json, "telemetry"),
                    Err(e) => warn!("telemetry serialization failed: {}", e),
                }
                let _ = downstream_tx.send(snapshot.to_text_line().as_str().to_string());
            }
        }
    }

    accept_task.abort();
    if let Some(task) = downstream_task {
        task.abort();
    }
    info!(
        cycles = supervisor.plant().cycle_count(),
        "plant node stopped"
    );
    Ok(())
}

async fn accept_links(
    listener: TcpListener,
    rx_tx: mpsc::Sender<Chunk>,
    events: mpsc::Sender<LinkEvent>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let (reply_tx, reply_rx) = mpsc::channel(REPLY_CHANNEL_CAPACITY);
                if events.send(LinkEvent::Connected(addr, reply_tx)).await.is_err() {
                    return;
                }
                let rx_tx = rx_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_link(stream, rx_tx, reply_rx).await {
                        warn!(%addr, "link error: {}", e);
                    }
                    info!(%addr, "link detached");
                });
            }
            Err(e) => error!("failed to accept link: {}", e),
        }
    }
}

/// I/O side of one link: bytes in go to the control loop as chunks, encoded
/// replies come back on `reply_rx`.
async fn serve_link(
    stream: TcpStream,
    rx_tx: mpsc::Sender<Chunk>,
    mut reply_rx: mpsc::Receiver<Vec<u8>>,
) -> Result<(), NodeError> {
    let (mut reader, mut writer) = stream.into_split();
    let writer_task = tokio::spawn(async move {
        while let Some(bytes) = reply_rx.recv().await {
            if writer.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        for chunk in chunks(&buf[..n]) {
            if rx_tx.send(chunk).await.is_err() {
                writer_task.abort();
                return Err(NodeError::Link(LinkError::Disconnected));
            }
        }
    }
    writer_task.abort();
    Ok(())
}

async fn forward_downstream(addr: String, mut lines: broadcast::Receiver<String>) {
    loop {
        match TcpStream::connect(&addr).await {
            Ok(mut stream) => {
                info!(%addr, "downstream connected");
                loop {
                    match lines.recv().await {
                        Ok(line) => {
                            if stream.write_all(line.as_bytes()).await.is_err() {
                                warn!(%addr, "downstream write failed");
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!(skipped = n, "downstream lagging");
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
            Err(e) => {
                debug!(%addr, "downstream unavailable: {}", e);
                time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
