//! epd: e-paper image encoder and BLE sender.
//!
//! ```text
//! epd encode <image> [--mode] [--gray N]    Dither and pack to files
//! epd send <image> [--mode]                 Full session against the simulator
//! epd raw <hex>                             Send one raw command
//! epd info                                  Connect and print device details
//! epd --gen-config                          Dump default config and exit
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use epd_core::{
    DitherMode, DriverProfile, EpdError, LinkSession, SessionEvent, SimulatedPeripheral,
    TransferControl, TransferEvent, TransferOutcome, dither, encode_image, encode_image_for,
};
use epd_core::raster::posterize_gray;

use epd_cli::config::{EpdConfig, LoggingConfig};
use epd_cli::imaging;
use epd_cli::reconnect::ReconnectPolicy;

/// How long to wait for the configuration notification after connecting.
const CONFIG_WAIT: Duration = Duration::from_secs(2);

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "epd", about = "Encode images for e-paper panels and send them over BLE")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "epd.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

/// Encoder overrides shared by `encode` and `send`.
#[derive(clap::Args, Debug)]
struct EncodeArgs {
    /// Image file (any format the `image` crate decodes).
    image: PathBuf,

    /// Dither mode: none, bayer, floydsteinberg, Atkinson, bwr,
    /// bwr_floydsteinberg, bwr_Atkinson.
    #[arg(short, long)]
    mode: Option<DitherMode>,

    /// Threshold for the monochrome modes.
    #[arg(short, long)]
    threshold: Option<u8>,

    /// Panel driver id (hex, e.g. 02).
    #[arg(short, long, value_parser = parse_driver)]
    driver: Option<u8>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dither and pack an image, writing the planes and a preview.
    Encode {
        #[command(flatten)]
        args: EncodeArgs,

        #[arg(short, long, default_value = "out")]
        out_dir: PathBuf,

        /// Also write `gray.png`, the image posterized to this many gray levels.
        #[arg(long, value_name = "LEVELS")]
        gray: Option<u8>,
    },
    /// Connect, stream an image and refresh the panel.
    Send {
        #[command(flatten)]
        args: EncodeArgs,
    },
    /// Send a hex command; the first byte is the opcode.
    Raw { hex: String },
    /// Connect and print firmware version and configuration.
    Info,
}

fn parse_driver(s: &str) -> Result<u8, std::num::ParseIntError> {
    u8::from_str_radix(s.trim_start_matches("0x"), 16)
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&EpdConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let mut config = EpdConfig::load(&cli.config)
        .map_err(|e| format!("invalid config {}: {e}", cli.config.display()))?;
    if let Command::Encode { args, .. } | Command::Send { args } = &command {
        if let Some(driver) = args.driver {
            config.device.driver = driver;
        }
        if let Some(mode) = args.mode {
            config.image.mode = mode;
        }
        if let Some(threshold) = args.threshold {
            config.image.threshold = threshold;
        }
    }
    config.validate()?;
    init_tracing(&config.logging)?;

    info!("epd v{}", env!("CARGO_PKG_VERSION"));
    if let Some(id) = config.driver().filter(|&id| !DriverProfile::lookup(id).is_known()) {
        warn!(driver = format_args!("{id:#04x}"), "unknown panel driver, using the generic profile");
    }

    match command {
        Command::Encode {
            args,
            out_dir,
            gray,
        } => encode(&config, &args.image, &out_dir, gray),
        Command::Send { args } => send(&config, &args.image).await,
        Command::Raw { hex } => raw(&config, &hex).await,
        Command::Info => device_info(&config).await,
    }
}

fn init_tracing(logging: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.file.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        let file = std::fs::File::create(&logging.file)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    }
    Ok(())
}

// ── Commands ─────────────────────────────────────────────────────

fn encode(
    config: &EpdConfig,
    image: &Path,
    out_dir: &Path,
    gray: Option<u8>,
) -> Result<(), Box<dyn std::error::Error>> {
    let pixels = imaging::load(image, config.device.width, config.device.height)?;
    let threshold = Some(config.image.threshold);
    let encoded = match config.driver() {
        Some(id) => encode_image_for(&pixels, config.image.mode, threshold, &DriverProfile::lookup(id))?,
        None => encode_image(&pixels, config.image.mode, threshold),
    };
    let reduced = dither(&pixels, config.image.mode, threshold);

    let mut written = imaging::write_outputs(out_dir, &encoded, &reduced)?;
    if let Some(levels) = gray {
        let preview = posterize_gray(&pixels, levels)?;
        written.push(imaging::write_png(out_dir, "gray.png", &preview)?);
    }
    for path in written {
        println!("wrote {}", path.display());
    }
    println!(
        "{}x{} {} -> {} bytes",
        encoded.width,
        encoded.height,
        encoded.mode,
        encoded.payload_len()
    );
    Ok(())
}

async fn send(config: &EpdConfig, image: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let pixels = imaging::load(image, config.device.width, config.device.height)?;
    let (sim, session) = open_session(config)?;
    let policy = ReconnectPolicy::from(&config.reconnect);

    let mut events = session.events();
    policy.connect(&session).await?;
    wait_for_config(&mut events).await;
    let logger = tokio::spawn(log_device_events(events));

    let profile = session.driver_profile();
    let encoded = encode_image_for(
        &pixels,
        config.image.mode,
        Some(config.image.threshold),
        &profile,
    )?;
    info!(driver = %profile, bytes = encoded.payload_len(), "encoded");

    let (ctl, progress) = TransferControl::with_progress();
    let printer = tokio::spawn(print_progress(progress));
    let token = ctl.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("cancelling transfer");
            token.cancel();
        }
    });

    let mut attempts = 1;
    let outcome = loop {
        match session.send_image(&encoded, &ctl).await {
            Err(EpdError::PeerDisconnected) if attempts < policy.max_attempts => {
                attempts += 1;
                warn!(attempt = attempts, "link lost during transfer, reconnecting");
                policy.connect(&session).await?;
            }
            other => break other?,
        }
    };
    drop(ctl);
    let _ = printer.await;

    match outcome {
        TransferOutcome::Completed(report) => println!(
            "sent {} bytes in {} chunks ({} acknowledged, {} dropped) in {:.2}s; device refreshed {} time(s)",
            report.bytes,
            report.chunks,
            report.acknowledged,
            report.dropped,
            report.elapsed.as_secs_f64(),
            sim.refreshes()
        ),
        TransferOutcome::Cancelled(report) => {
            println!("cancelled after {} of {} bytes", report.bytes, encoded.payload_len())
        }
    }

    session.disconnect().await?;
    logger.abort();
    Ok(())
}

async fn raw(config: &EpdConfig, hex: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (sim, session) = open_session(config)?;
    ReconnectPolicy::from(&config.reconnect)
        .connect(&session)
        .await?;
    session.send_raw(hex).await?;
    if let Some((frame, kind)) = sim.writes().last() {
        println!("wrote {} ({kind})", epd_core::protocol::to_hex(frame));
    }
    session.disconnect().await?;
    Ok(())
}

async fn device_info(config: &EpdConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (_sim, session) = open_session(config)?;
    let mut events = session.events();
    let caps = ReconnectPolicy::from(&config.reconnect)
        .connect(&session)
        .await?;
    wait_for_config(&mut events).await;

    println!(
        "firmware version: {:#04x}{}",
        caps.version,
        if caps.version_reported { "" } else { " (assumed)" }
    );
    println!("image path: {}", if caps.supports_write_img() { "WRITE_IMG" } else { "SEND_CMD/SEND_DATA" });
    match session.device_config() {
        Some(cfg) => {
            println!("driver: {}", DriverProfile::lookup(cfg.driver));
            println!("pins: {}", epd_core::protocol::to_hex(&cfg.pin_bytes()));
        }
        None => println!("no configuration received"),
    }
    let profile = session.driver_profile();
    let modes: Vec<_> = profile.modes().map(|m| m.as_str()).collect();
    println!("modes: {}", modes.join(", "));

    session.disconnect().await?;
    Ok(())
}

// ── Helpers ──────────────────────────────────────────────────────

type SimSession = LinkSession<SimulatedPeripheral>;

fn open_session(config: &EpdConfig) -> Result<(Arc<SimulatedPeripheral>, SimSession), EpdError> {
    info!(device = %config.device.name, "using simulated peripheral");
    let sim = Arc::new(SimulatedPeripheral::new());
    let session = LinkSession::new(Arc::clone(&sim), config.link_options())?;
    Ok((sim, session))
}

async fn wait_for_config(events: &mut broadcast::Receiver<SessionEvent>) {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Config(cfg)) => return Some(cfg),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    };
    match tokio::time::timeout(CONFIG_WAIT, wait).await {
        Ok(Some(cfg)) => info!(driver = format_args!("{:#04x}", cfg.driver), "device configuration"),
        _ => warn!("no configuration notification; using the generic driver profile"),
    }
}

async fn log_device_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::DeviceLog(line)) => println!("device: {line}"),
            Ok(SessionEvent::PeerDisconnected) => warn!("display disconnected"),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => warn!("dropped {n} device events"),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn print_progress(mut progress: tokio::sync::mpsc::UnboundedReceiver<TransferEvent>) {
    while let Some(event) = progress.recv().await {
        match event {
            TransferEvent::Progress(p) => {
                info!(percent = format_args!("{:.0}", p.fraction() * 100.0), "{p}")
            }
            TransferEvent::Completed { job, report } => println!(
                "{job}: {} bytes, {} chunks, {:.2}s",
                report.bytes,
                report.chunks,
                report.elapsed.as_secs_f64()
            ),
        }
    }
}
