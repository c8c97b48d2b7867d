//! Serial port terminal
//! Features: raw-mode keystrokes, line-buffered sends, hot-plug autoconnect,
//! `Ctrl-T` device commands

mod commands;
mod config;
mod input;
mod raw_mode;
mod sink;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use commands::DeviceCommand;
use config::{Config, TerminalSettings};
use input::InputEvent;
use serde::Serialize;
use serialterm_core::{
    ConnectionAdapter, DataBits, DeviceHandle, DisplaySink, FlowControl, HotplugEvent, MockDevice,
    OpenOptions, OutputStream, Parity, PortDiscovery, PortKind, PortRegistry, SessionEvent, SessionState,
    StopBits,
};
use sink::StdoutSink;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How often the OS port list is polled for hot-plug changes
const HOTPLUG_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Inbound chunks queued for the screen before device reads are held off
const DISPLAY_QUEUE_CHUNKS: usize = 64;

#[derive(Parser, Debug)]
#[command(name = "serialterm", version, about = "Terminal for serial ports")]
#[command(args_conflicts_with_subcommands = true)]
struct Args {
    /// Config file (default: $CONFIG_DIR/serialterm/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Write logs here instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    connect: ConnectArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Open a terminal on a serial port (default)
    Connect(ConnectArgs),
}

#[derive(clap::Args, Debug, Clone, Default)]
struct ConnectArgs {
    /// Port to open: slot number, `Port N` label, or device path
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate, any positive value
    #[arg(short, long)]
    baud: Option<u32>,

    /// Data bits (5-8)
    #[arg(long, value_parser = parse_data_bits)]
    data_bits: Option<DataBits>,

    /// Parity (none, even, odd)
    #[arg(long)]
    parity: Option<Parity>,

    /// Stop bits (1 or 2)
    #[arg(long, value_parser = parse_stop_bits)]
    stop_bits: Option<StopBits>,

    /// Flow control (none, hardware)
    #[arg(long)]
    flow_control: Option<FlowControl>,

    /// Read buffer size in bytes
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Echo typed bytes locally
    #[arg(long)]
    echo: bool,

    /// Send typed bytes a line at a time, on Enter
    #[arg(long)]
    flush_on_enter: bool,

    /// Render received `\n` as `\r\n`
    #[arg(long, overrides_with = "no_convert_eol")]
    convert_eol: bool,

    /// Show received bytes as-is
    #[arg(long)]
    no_convert_eol: bool,

    /// Connect to ports as they are plugged in
    #[arg(long)]
    autoconnect: bool,

    /// Do not send `\n` after connecting
    #[arg(long)]
    no_wake: bool,

    /// Command to send periodically while connected (`\n` escapes allowed,
    /// `raw\n` when given without a value)
    #[arg(long, num_args = 0..=1, default_missing_value = "raw\\n")]
    repeat: Option<String>,

    /// Period for --repeat, in milliseconds
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    interval: u64,

    /// Block addressed by `Ctrl-T +` and `Ctrl-T -`
    #[arg(long)]
    sense_block: Option<u32>,

    /// Talk to an in-memory echo device instead of real hardware
    #[arg(long)]
    loopback: bool,
}

fn parse_data_bits(s: &str) -> std::result::Result<DataBits, String> {
    let bits: u8 = s.parse().map_err(|_| format!("'{}' is not a number", s))?;
    DataBits::try_from(bits).map_err(|e| e.to_string())
}

fn parse_stop_bits(s: &str) -> std::result::Result<StopBits, String> {
    let bits: u8 = s.parse().map_err(|_| format!("'{}' is not a number", s))?;
    StopBits::try_from(bits).map_err(|e| e.to_string())
}

/// Command line over config file over defaults
fn resolve_options(args: &ConnectArgs, base: &OpenOptions) -> Result<OpenOptions> {
    let mut options = base.clone();
    if let Some(baud) = args.baud {
        options.baud_rate = baud;
    }
    if let Some(bits) = args.data_bits {
        options.data_bits = bits;
    }
    if let Some(parity) = args.parity {
        options.parity = parity;
    }
    if let Some(bits) = args.stop_bits {
        options.stop_bits = bits;
    }
    if let Some(flow) = args.flow_control {
        options.flow_control = flow;
    }
    if let Some(size) = args.buffer_size {
        options.buffer_size = size;
    }
    options.validate().context("Invalid line settings")?;
    Ok(options)
}

fn resolve_terminal(args: &ConnectArgs, base: &TerminalSettings) -> TerminalSettings {
    let mut settings = base.clone();
    settings.echo |= args.echo;
    settings.flush_on_enter |= args.flush_on_enter;
    settings.autoconnect |= args.autoconnect;
    if args.no_wake {
        settings.wake_on_connect = false;
    }
    if args.convert_eol {
        settings.convert_eol = true;
    } else if args.no_convert_eol {
        settings.convert_eol = false;
    }
    if let Some(block) = args.sense_block {
        settings.sense_block = block;
    }
    settings
}

/// Setup tracing. With a log file the terminal stays clean for device output.
fn setup_logging(level: &str, file: Option<&Path>) -> Result<()> {
    let log_level = level.parse::<Level>().unwrap_or(Level::WARN);

    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    match file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_ansi(false).with_writer(std::sync::Mutex::new(file)))
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;

    let level = args.log_level.clone().unwrap_or_else(|| config.logging.level.clone());
    let log_file = args.log_file.clone().or_else(|| config.logging.file.clone());
    setup_logging(&level, log_file.as_deref())?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
    let result = runtime.block_on(async move {
        match args.command {
            Some(Command::List { json }) => run_list(json).await,
            Some(Command::Connect(connect)) => run_connect(connect, config).await,
            None => run_connect(args.connect, config).await,
        }
    });
    // The stdin reader may still be parked in a blocking read
    runtime.shutdown_background();
    result
}

#[derive(Serialize)]
struct PortListing {
    label: String,
    path: String,
    #[serde(flatten)]
    kind: PortKind,
}

async fn run_list(json: bool) -> Result<()> {
    let discovery = PortDiscovery::system();
    let mut registry = PortRegistry::new();
    registry.enumerate(discovery.get_ports().await.context("Failed to enumerate ports")?);

    if json {
        let listing: Vec<PortListing> = registry
            .iter()
            .map(|entry| {
                let info = entry.handle().info();
                PortListing {
                    label: entry.label(),
                    path: info.path,
                    kind: info.kind,
                }
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    if registry.is_empty() {
        println!("No serial ports found");
    }
    for entry in registry.iter() {
        println!("{}", entry);
    }
    Ok(())
}

/// Pick the port to open at startup. `None` means wait for a hot-plug.
async fn select_port(
    discovery: &PortDiscovery,
    registry: &mut PortRegistry,
    selector: Option<&str>,
    autoconnect: bool,
) -> Result<Option<DeviceHandle>> {
    if let Some(selector) = selector {
        if let Some(entry) = registry.resolve(selector) {
            return Ok(Some(entry.handle().clone()));
        }
        let handle = discovery
            .request_port(selector)
            .await
            .with_context(|| format!("No port matches '{}'", selector))?;
        registry.add(handle.clone());
        return Ok(Some(handle));
    }

    match registry.len() {
        0 if autoconnect => Ok(None),
        0 => bail!("No serial ports found (use --port PATH or --autoconnect)"),
        1 => Ok(registry.iter().next().map(|entry| entry.handle().clone())),
        _ => {
            let listing: Vec<String> = registry.iter().map(|entry| format!("  {}", entry)).collect();
            bail!("Several ports found, pick one with --port:\n{}", listing.join("\n"))
        }
    }
}

/// Status lines for a session event, in print order
fn status_lines(event: &SessionEvent) -> Vec<String> {
    match event {
        SessionEvent::Connected { .. } => vec!["CONNECTED".to_string()],
        SessionEvent::Error {
            message, disconnect, ..
        } => {
            let mut lines = vec![format!("ERROR: {}", message)];
            if *disconnect {
                lines.push("DISCONNECTED".to_string());
            }
            lines
        }
        SessionEvent::Closed { .. } => vec!["DISCONNECTED".to_string()],
    }
}

fn show_event(sink: &StdoutSink, event: &SessionEvent) {
    for line in status_lines(event) {
        sink.status(&line);
    }
}

async fn connect(adapter: &ConnectionAdapter, device: DeviceHandle, options: &OpenOptions, wake: bool) {
    tracing::info!("Connecting to {} at {}", device.info().path, options);
    // Failures are reported on the event channel
    if let Err(e) = adapter.open(device, options.clone(), wake).await {
        tracing::debug!("Open failed: {}", e);
    }
}

/// Run a `Ctrl-T` command. Device commands need a live session.
async fn run_command(
    adapter: &ConnectionAdapter,
    sink: &StdoutSink,
    command: DeviceCommand,
    block: &mut u32,
) {
    if let DeviceCommand::SelectBlock(selected) = command {
        *block = selected;
        sink.status(&format!("SENSE BLOCK {}", selected));
        return;
    }
    let Some(payload) = command.payload(*block) else {
        return;
    };
    if !adapter.is_connected().await {
        sink.status(commands::NOT_CONNECTED);
        return;
    }
    tracing::debug!("Sending {:?}", command);
    adapter.send(&payload, false).await;
}

/// Copy queued inbound chunks to the terminal
fn spawn_display(
    sink: Arc<StdoutSink>,
    mut rx: mpsc::Receiver<bytes::Bytes>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(chunk) = rx.recv().await {
            if let Err(e) = sink.write(chunk).await {
                tracing::warn!("{}", e);
            }
        }
    })
}

async fn next_hotplug(rx: &mut Option<mpsc::UnboundedReceiver<HotplugEvent>>) -> Option<HotplugEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn print_banner(port: &str, options: &OpenOptions, settings: &TerminalSettings) {
    let mut stdout = std::io::stdout();
    let _ = write!(stdout, "\x1b]0;[SERIALTERM] {}\x07", port);

    let started = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    let mut modes = Vec::new();
    if settings.echo {
        modes.push("echo");
    }
    if settings.flush_on_enter {
        modes.push("line");
    }
    if settings.convert_eol {
        modes.push("crlf");
    }
    if settings.autoconnect {
        modes.push("autoconnect");
    }
    let sense = format!("sense:{}", settings.sense_block);
    modes.push(&sense);

    let banner = format!(
        "\r\n\
        \x1b[1;36mserialterm {}\x1b[0m\r\n\
        \x1b[90mPort:\x1b[0m    {}\r\n\
        \x1b[90mLine:\x1b[0m    {}\r\n\
        \x1b[90mModes:\x1b[0m   {}\r\n\
        \x1b[90mStarted:\x1b[0m {}\r\n\
        \x1b[90mExit:\x1b[0m    \x1b[33mCtrl-]\x1b[0m\r\n\
        \x1b[90mKeys:\x1b[0m    \x1b[33mCtrl-T r\x1b[0m raw  \x1b[33mCtrl-T +/-\x1b[0m sense  \x1b[33mCtrl-T 0-9\x1b[0m block\r\n",
        serialterm_core::APP_VERSION_STRING,
        port,
        options,
        if modes.is_empty() { "-".to_string() } else { modes.join(" ") },
        started
    );
    let _ = stdout.write_all(banner.as_bytes());
    let _ = stdout.flush();
}

async fn run_connect(args: ConnectArgs, config: Config) -> Result<()> {
    let options = resolve_options(&args, &config.line)?;
    let settings = resolve_terminal(&args, &config.terminal);

    let discovery = Arc::new(PortDiscovery::system());
    let mut registry = PortRegistry::new();
    let initial = if args.loopback {
        let loopback = DeviceHandle::new(MockDevice::new("loopback").with_loopback(true));
        registry.add(loopback.clone());
        Some(loopback)
    } else {
        registry.enumerate(discovery.get_ports().await.context("Failed to enumerate ports")?);
        select_port(&discovery, &mut registry, args.port.as_deref(), settings.autoconnect).await?
    };

    let port_label = match &initial {
        Some(device) => device.info().to_string(),
        None => "(waiting for a port)".to_string(),
    };
    print_banner(&port_label, &options, &settings);

    let sink = Arc::new(StdoutSink::new(settings.convert_eol));
    let (display, display_rx) = OutputStream::new(DISPLAY_QUEUE_CHUNKS);
    let display_task = spawn_display(sink.clone(), display_rx);
    let (adapter, mut events) = ConnectionAdapter::with_channel(Arc::new(display));
    let mut sense_block = settings.sense_block;

    let guard = raw_mode::RawModeGuard::try_enable();
    let (mut keys, _stdin_task) = input::spawn_stdin_reader(guard.is_some());

    let cancel = CancellationToken::new();
    let mut hotplug = if args.loopback {
        None
    } else {
        Some(discovery.watch(HOTPLUG_POLL_INTERVAL, cancel.clone()))
    };

    let repeat = args.repeat.as_deref().map(input::expand_escapes);
    let mut repeat_tick = repeat.as_ref().map(|_| {
        let mut interval = tokio::time::interval(Duration::from_millis(args.interval));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval
    });

    if let Some(device) = initial {
        connect(&adapter, device, &options, settings.wake_on_connect).await;
    }

    loop {
        tokio::select! {
            key = keys.recv() => match key {
                Some(InputEvent::Data(data)) => {
                    if settings.echo {
                        sink.echo(&data);
                    }
                    adapter.send(&data, settings.flush_on_enter).await;
                }
                Some(InputEvent::Command(command)) => {
                    run_command(&adapter, &sink, command, &mut sense_block).await;
                }
                Some(InputEvent::Exit) | None => break,
            },
            Some(event) = events.recv() => {
                show_event(&sink, &event);
                if event.is_terminal() && !settings.autoconnect {
                    break;
                }
            }
            Some(change) = next_hotplug(&mut hotplug) => match change {
                HotplugEvent::Connected(device) => {
                    let label = registry.add(device.clone()).to_string();
                    tracing::info!("Plugged in: {}", label);
                    if settings.autoconnect && adapter.state().await == SessionState::Closed {
                        connect(&adapter, device, &options, settings.wake_on_connect).await;
                    }
                }
                HotplugEvent::Disconnected(device) => {
                    if let Some(entry) = registry.remove(&device) {
                        tracing::info!("Unplugged: {}", entry);
                    }
                }
            },
            _ = next_tick(&mut repeat_tick) => {
                if let Some(command) = &repeat {
                    if adapter.is_connected().await {
                        adapter.send(command, false).await;
                    }
                }
            }
        }
    }

    cancel.cancel();
    adapter.disconnect().await;
    // Last sender goes with the adapter; let the screen catch up
    drop(adapter);
    if tokio::time::timeout(Duration::from_secs(1), display_task).await.is_err() {
        tracing::warn!("Display did not drain");
    }
    while let Ok(event) = events.try_recv() {
        show_event(&sink, &event);
    }

    drop(guard);
    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(b"\x1b]0;\x07\r\nConnection closed.\r\n");
    let _ = stdout.flush();

    Ok(())
}
