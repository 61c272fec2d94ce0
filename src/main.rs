//! vmidi-bridge demo
//!
//! Opens a virtual MIDI device, then sends a note on / note off pair on every
//! port once a second and prints whatever comes back, until Ctrl+C.

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod endpoints;

use crate::endpoints::{Backend, Endpoints, Received};
use vmidi_bridge::config::BridgeSettings;
use vmidi_bridge::{
    DeviceEnumerator, LoopbackDevices, LoopbackEngine, MidirDevices, VirtualMidiDevice,
};

const NOTE_ON: [u8; 3] = [144, 64, 64];
const NOTE_OFF: [u8; 3] = [128, 64, 64];
const DEMO_PORT: &str = "test";

/// Virtual MIDI device bridging the application and the system MIDI fabric
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to an optional YAML configuration file
    #[arg(short, long, env = "VMIDI_CONFIG")]
    config: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Device name (overrides the config file)
    #[arg(short, long)]
    name: Option<String>,

    /// Logical port name, repeatable (overrides the config file)
    #[arg(short, long = "port")]
    ports: Vec<String>,

    /// Handle resolution timeout in milliseconds
    #[arg(long)]
    resolve_timeout_ms: Option<u64>,

    /// List available MIDI ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Interactive prompt instead of the note demo
    #[arg(long)]
    repl: bool,

    /// Route in-process without creating OS MIDI ports
    #[arg(long)]
    loopback: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level, args.log_json)?;

    if args.list_ports {
        return list_ports();
    }

    let settings = load_settings(&args).await?;
    info!(
        "Opening '{}' with port(s) {:?}",
        settings.device_name, settings.ports
    );

    let loopback = args
        .loopback
        .then(|| Arc::new(LoopbackDevices::new(Arc::new(LoopbackEngine::new()))));

    let builder_settings = settings.clone();
    let builder_loopback = loopback.clone();
    let mut device = tokio::task::spawn_blocking(move || {
        let mut builder = VirtualMidiDevice::builder(builder_settings.ports)
            .name(builder_settings.device_name)
            .resolve_policy(builder_settings.resolve.policy());
        if let Some(devices) = builder_loopback {
            builder = builder
                .engine(devices.engine().clone())
                .devices(devices);
        }
        builder.open()
    })
    .await?
    .context("Failed to open virtual MIDI device")?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let backend = match loopback {
        Some(devices) => Backend::Loopback(devices),
        None => Backend::Midir,
    };
    let endpoints = Endpoints::connect(&device, backend, tx)?;

    if args.repl {
        tokio::task::block_in_place(|| cli::run_repl(&device, &endpoints, &mut rx))?;
    } else {
        run_demo(&device, &endpoints, &mut rx).await;
    }

    drop(endpoints);
    tokio::task::block_in_place(|| device.stop());
    info!("vmidi-bridge shutdown complete");
    Ok(())
}

async fn load_settings(args: &Args) -> Result<BridgeSettings> {
    let mut settings = match &args.config {
        Some(path) => BridgeSettings::load(path).await?,
        None => BridgeSettings::default(),
    };

    if let Some(name) = &args.name {
        settings.device_name = name.clone();
    }
    if !args.ports.is_empty() {
        settings.ports = args.ports.clone();
    }
    if let Some(timeout_ms) = args.resolve_timeout_ms {
        settings.resolve.timeout_ms = timeout_ms;
    }
    if settings.ports.is_empty() {
        settings.ports.push(DEMO_PORT.to_string());
    }

    Ok(settings)
}

async fn run_demo(
    device: &VirtualMidiDevice,
    endpoints: &Endpoints,
    rx: &mut mpsc::UnboundedReceiver<Received>,
) {
    println!(
        "{}",
        format!("=== {} running, Ctrl+C to stop ===", device.name()).bold().cyan()
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(failure) = device.engine_failure() {
                    warn!("Routing engine failed: {}", failure);
                    break;
                }
                for port in endpoints.port_names() {
                    for message in [&NOTE_ON[..], &NOTE_OFF[..]] {
                        if let Err(e) = endpoints.send(port, message) {
                            warn!("{}", e);
                        }
                    }
                }
            }
            Some(received) = rx.recv() => {
                cli::print_received(&received);
            }
            _ = &mut shutdown => {
                break;
            }
        }
    }
}

fn list_ports() -> Result<()> {
    let devices = MidirDevices::new("vmidi-bridge scanner");

    println!("\n{}", "=== Available MIDI Ports ===".bold().cyan());
    for (title, list) in [
        ("Input Ports:", devices.input_devices()?),
        ("Output Ports:", devices.output_devices()?),
    ] {
        println!("\n{}", title.bold());
        if list.is_empty() {
            println!("  {}", "No ports found".dimmed());
        }
        for port in list {
            let marker = if port.is_internal() {
                "[BRIDGE]".yellow()
            } else {
                "[DEVICE]".green()
            };
            println!("  {} {} {}", marker, port.handle.to_string().dimmed(), port.name);
        }
    }
    println!();
    Ok(())
}

fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            )
            .init();
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
