use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, LevelFilter};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use thingy_bridge_lib::config::{AppConfig, CONFIG_FILE_NAME};
use thingy_bridge_lib::core::bluetooth::constants::BLUEZ_ROOT;
use thingy_bridge_lib::core::bluetooth::{BluestBus, EventHub};
use thingy_bridge_lib::core::Session;
use thingy_bridge_lib::logging;
use thingy_bridge_lib::sink::memory::MemoryPublisher;
use thingy_bridge_lib::sink::{MqttPublisher, Publisher};

/// Scan for a BLE sensor, connect to it and forward its readings to MQTT.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Config file; defaults are used when it does not exist
    #[arg(short, long, default_value = CONFIG_FILE_NAME)]
    config: PathBuf,

    /// Scan window in seconds, overriding the config
    #[arg(short, long)]
    scan_secs: Option<u64>,

    /// Address to connect to after the scan instead of asking for one
    #[arg(short, long)]
    address: Option<String>,

    /// Log level: off, error, warn, info, debug or trace
    #[arg(long, default_value = "info", value_parser = logging::parse_level)]
    log_level: LevelFilter,

    /// Log readings instead of publishing them to the broker
    #[arg(long)]
    dry_run: bool,

    /// Write the effective config to the config path and exit
    #[arg(long)]
    init_config: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Err(e) = logging::init(cli.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    rt.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = AppConfig::load(&cli.config).await?;
    if let Some(secs) = cli.scan_secs {
        config.bluetooth.scan_duration_secs = secs;
    }
    if cli.init_config {
        return config.save(&cli.config).await;
    }

    let (hub, events) = EventHub::new();
    let bus = BluestBus::new(hub.clone(), BLUEZ_ROOT, &config.bluetooth.adapter)
        .await
        .context("Bluetooth adapter unavailable")?;
    let publisher: Arc<dyn Publisher> = if cli.dry_run {
        info!("Dry run: readings are logged, not published");
        Arc::new(MemoryPublisher::new())
    } else {
        Arc::new(MqttPublisher::new(&config.mqtt))
    };

    let mut session = Session::new(Arc::new(bus), hub, events, publisher, config);

    let devices = session.discover().await?;
    println!("Full list of {} devices discovered:", devices.len());
    for device in &devices {
        println!("{}", device);
    }

    let address = match cli.address {
        Some(address) => address,
        None => prompt_address().await?,
    };

    let resolved = session
        .resolve(&address)
        .await
        .with_context(|| format!("Device {} is not usable", address))?;
    info!(
        "Streaming {} ({}) from {}",
        resolved.characteristic,
        resolved.characteristic_flags.join(","),
        resolved.device
    );

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => on_signal.cancel(),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    let (end, stats) = session.stream(&resolved, shutdown).await?;
    info!("Stopped ({:?}) after {} published readings", end, stats.published);
    Ok(())
}

async fn prompt_address() -> Result<String> {
    println!("Input a Bluetooth device address from above list want to connect: ");
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read device address")?;
    Ok(line.trim().to_string())
}
