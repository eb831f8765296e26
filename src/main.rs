//! Boltwood II cloud sensor monitor binary.
//!
//! Reads the sensor over its serial port, logs averages and serves the
//! latest data over HTTP.

use anyhow::Context;
use boltwood::{
    sensor::{frame, link, SerialPortOpener},
    start_web_server, Aggregator, PortReader, Publisher, PublisherConfig, SerialConfig, Shutdown,
    WebConfig, Window, DEFAULT_PUBLISH_INTERVAL_SECS, DEFAULT_WEB_PORT,
};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "boltwood")]
#[command(about = "Boltwood II cloud sensor monitor")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = "Reads a Boltwood II cloud sensor over its serial port and serves averaged readings over HTTP")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Read the sensor and serve the web interface (default)
    Serve(ServeArgs),

    /// Decode a single frame and print it as JSON
    Decode(DecodeArgs),

    /// List the serial ports present on this system
    Ports,
}

#[derive(Args, Clone)]
struct ServeArgs {
    /// Serial port of the sensor
    #[arg(long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Baud rate
    #[arg(long, default_value_t = 4800)]
    baud_rate: u32,

    /// Bits per character
    #[arg(long, default_value_t = 8)]
    data_bits: u8,

    /// Parity: N, E or O
    #[arg(long, default_value_t = 'N')]
    parity: char,

    /// Number of stop bits
    #[arg(long, default_value_t = 1)]
    stop_bits: u8,

    /// Use RTS/CTS flow control
    #[arg(long)]
    rtscts: bool,

    /// Serial read timeout in seconds
    #[arg(long, default_value_t = 10)]
    read_timeout: u64,

    /// Web server bind address
    #[arg(long, default_value = "0.0.0.0")]
    http_host: String,

    /// Web server port
    #[arg(long, default_value_t = DEFAULT_WEB_PORT)]
    http_port: u16,

    /// Disable CORS headers
    #[arg(long)]
    no_cors: bool,

    /// Do not serve /current.json and /average.json
    #[arg(long)]
    no_compat_json: bool,

    /// CSV file that receives one line per published average
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Seconds between published averages
    #[arg(short, long, default_value_t = DEFAULT_PUBLISH_INTERVAL_SECS)]
    interval: u64,

    /// Averaging window in seconds
    #[arg(long, default_value_t = DEFAULT_PUBLISH_INTERVAL_SECS)]
    window: u64,

    /// Seconds after which the latest reading counts as stale
    #[arg(long, default_value_t = 60)]
    stale_after: u64,
}

impl Default for ServeArgs {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 4800,
            data_bits: 8,
            parity: 'N',
            stop_bits: 1,
            rtscts: false,
            read_timeout: 10,
            http_host: "0.0.0.0".to_string(),
            http_port: DEFAULT_WEB_PORT,
            no_cors: false,
            no_compat_json: false,
            log_file: None,
            interval: DEFAULT_PUBLISH_INTERVAL_SECS,
            window: DEFAULT_PUBLISH_INTERVAL_SECS,
            stale_after: 60,
        }
    }
}

impl ServeArgs {
    fn serial_config(&self) -> SerialConfig {
        SerialConfig::new(&self.port)
            .with_baud_rate(self.baud_rate)
            .with_data_bits(self.data_bits)
            .with_parity(self.parity)
            .with_stop_bits(self.stop_bits)
            .with_rtscts(self.rtscts)
            .with_read_timeout(Duration::from_secs(self.read_timeout))
    }

    fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig::default()
            .with_interval(Duration::from_secs(self.interval))
            .with_stale_after(Duration::from_secs(self.stale_after))
            .with_log_file(self.log_file.clone())
    }

    fn web_config(&self) -> WebConfig {
        WebConfig::new(&self.http_host, self.http_port)
            .with_cors(!self.no_cors)
            .with_compat_json(!self.no_compat_json)
    }
}

#[derive(Args)]
struct DecodeArgs {
    /// Frame text; the leading 0x02 marker may be omitted
    line: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing/logging
    init_logging(&cli)?;

    match &cli.command {
        Some(Commands::Serve(args)) => serve_command(args).await,
        Some(Commands::Decode(args)) => decode_command(args),
        Some(Commands::Ports) => ports_command(),
        None => serve_command(&ServeArgs::default()).await,
    }
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let level = log_level(cli);

    // RUST_LOG wins when set, otherwise the flags pick the level.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

fn log_level(cli: &Cli) -> Level {
    if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else {
        Level::WARN
    }
}

fn default_filter(level: Level) -> EnvFilter {
    EnvFilter::new(level.as_str())
}

async fn serve_command(args: &ServeArgs) -> anyhow::Result<()> {
    info!("Starting Boltwood II monitor...");

    let settings = args
        .serial_config()
        .validate()
        .context("invalid serial configuration")?;
    let aggregator = Arc::new(
        Aggregator::new(Window::Duration(Duration::from_secs(args.window)))
            .context("invalid averaging window")?,
    );
    let shutdown = Shutdown::new();

    let reader = PortReader::new(
        SerialPortOpener::new(settings),
        Arc::clone(&aggregator),
        shutdown.clone(),
    );
    let publisher = Arc::new(
        Publisher::new(aggregator, reader.status_handle(), args.publisher_config())
            .context("invalid publisher configuration")?,
    );

    info!("Configuration:");
    info!("  - Serial port: {} at {} baud", args.port, args.baud_rate);
    info!("  - Averaging window: {}s", args.window);
    info!("  - Publish interval: {}s", args.interval);
    if let Some(log_file) = &args.log_file {
        info!("  - Average log: {}", log_file.display());
    }

    let acquisition = reader.spawn();
    let publishing = tokio::spawn(Arc::clone(&publisher).run(shutdown.clone()));

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for ctrl-c: {}", e);
                return;
            }
            info!("Shutdown requested");
            shutdown.trigger();
        });
    }

    let served = start_web_server(args.web_config(), publisher, shutdown.clone()).await;
    // Stop the other tasks whether the server exited cleanly or not.
    shutdown.trigger();

    let status = acquisition.await.context("acquisition task failed")?;
    publishing.await.context("publisher task failed")?;
    info!(
        "Stopped after {} readings ({} malformed frames)",
        status.frames_decoded, status.malformed_frames
    );

    served.context("web server failed")
}

fn decode_command(args: &DecodeArgs) -> anyhow::Result<()> {
    let line = if args.line.starts_with('\x02') {
        args.line.clone()
    } else {
        format!("\x02{}", args.line)
    };

    match frame::decode_frame(&line)? {
        frame::Frame::Sensors(reading) => println!("{}", serde_json::to_string_pretty(&reading)?),
        frame::Frame::Auxiliary(report) => println!("{}", serde_json::to_string_pretty(&report)?),
        other => println!("{:?}", other),
    }
    Ok(())
}

fn ports_command() -> anyhow::Result<()> {
    let ports = link::available_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        match port.product {
            Some(product) => println!("  {} ({}, {})", port.name, port.kind, product),
            None => println!("  {} ({})", port.name, port.kind),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["boltwood", "serve", "--port", "/dev/ttyS0", "--http-port", "9090"])
            .unwrap();
        let Some(Commands::Serve(args)) = cli.command else {
            panic!("expected serve command");
        };
        assert_eq!(args.port, "/dev/ttyS0");
        assert_eq!(args.http_port, 9090);
    }

    #[test]
    fn test_default_values() {
        let cli = Cli::try_parse_from(["boltwood", "serve"]).unwrap();
        let Some(Commands::Serve(args)) = cli.command else {
            panic!("expected serve command");
        };
        assert_eq!(args.baud_rate, 4800);
        assert_eq!(args.parity, 'N');
        assert_eq!(args.http_port, DEFAULT_WEB_PORT);
        assert_eq!(args.interval, DEFAULT_PUBLISH_INTERVAL_SECS);
        assert!(args.serial_config().validate().is_ok());
    }

    #[test]
    fn test_logging_flags_select_level() {
        let quiet = Cli::try_parse_from(["boltwood", "serve"]).unwrap();
        let verbose = Cli::try_parse_from(["boltwood", "-v", "serve"]).unwrap();
        let debug = Cli::try_parse_from(["boltwood", "serve", "-d"]).unwrap();

        assert_eq!(log_level(&quiet), Level::WARN);
        assert_eq!(log_level(&verbose), Level::INFO);
        assert_eq!(log_level(&debug), Level::DEBUG);
    }

    #[test]
    fn test_default_filter_enables_selected_level() {
        use tracing_subscriber::filter::LevelFilter;

        assert_eq!(default_filter(Level::DEBUG).max_level_hint(), Some(LevelFilter::DEBUG));
        assert_eq!(default_filter(Level::INFO).max_level_hint(), Some(LevelFilter::INFO));
        assert_eq!(default_filter(Level::WARN).max_level_hint(), Some(LevelFilter::WARN));
    }

    #[test]
    fn test_invalid_serial_arguments_fail_validation() {
        let cli = Cli::try_parse_from(["boltwood", "serve", "--parity", "Q"]).unwrap();
        let Some(Commands::Serve(args)) = cli.command else {
            panic!("expected serve command");
        };
        assert!(args.serial_config().validate().is_err());
    }
}
