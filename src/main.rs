use anyhow::Context;
use clap::Parser;
use cncd::{
    init_logging, server, Config, Device, Dispatcher, HookRegistry, MemoryStatusStore,
    PortConnector, ProgressObserver, BUILD_DATE, VERSION,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Stream G-code to CNC machines and 3D printers
#[derive(Parser, Debug)]
#[command(name = "cncd", version, about)]
struct Args {
    /// Configuration file (.toml or .json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level, overrides the configuration file
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let (path, config) = match &args.config {
        Some(path) => (path.clone(), Config::load_from_file(path)?),
        None => Config::load_default()?,
    };

    let level = args
        .log_level
        .as_deref()
        .unwrap_or(config.general.log_level.as_str());
    init_logging(level)?;

    tracing::info!("cncd {} (built {})", VERSION, BUILD_DATE);
    tracing::info!("Loaded configuration from {}", path.display());
    config.log_summary();

    let status = Arc::new(MemoryStatusStore::default());
    let hooks = Arc::new(HookRegistry::new());
    let progress = Arc::new(ProgressObserver::new(status.clone()));
    hooks.register(progress.clone());

    let connector = Arc::new(PortConnector);
    let devices: Vec<Device> = config
        .device_configs()
        .into_iter()
        .map(|device| Device::new(device, connector.clone(), hooks.clone(), status.clone()))
        .collect();
    if devices.is_empty() {
        tracing::warn!("No devices configured");
    }

    let dispatcher = Arc::new(Dispatcher::new(devices, status, progress));

    let bind = (config.general.address.as_str(), config.general.port);
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}:{}", bind.0, bind.1))?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
        }
    };
    server::serve(listener, dispatcher.clone(), shutdown).await?;

    dispatcher.shutdown().await;
    Ok(())
}
