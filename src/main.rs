use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use diffdrive_zenoh_runtime::config::RuntimeConfig;

/// Differential-drive base runtime: velocity commands in, odometry and sensors out
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// JSON configuration file (missing fields use built-in defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port of the motor bus
    #[arg(short, long)]
    port: Option<String>,

    /// Control period in milliseconds
    #[arg(long)]
    period_ms: Option<u64>,

    /// Command staleness timeout in milliseconds
    #[arg(long)]
    cmd_timeout_ms: Option<u64>,
}

fn load_config(args: Args) -> Result<RuntimeConfig, Box<dyn std::error::Error + Send + Sync>> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            RuntimeConfig::from_file(path)?
        }
        None => RuntimeConfig::default(),
    };

    if let Some(port) = args.port {
        config.hardware.port = port;
    }
    if let Some(period_ms) = args.period_ms {
        config.period_ms = period_ms;
    }
    if let Some(cmd_timeout_ms) = args.cmd_timeout_ms {
        config.cmd_timeout_ms = cmd_timeout_ms;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let result = match load_config(args) {
        Ok(config) => diffdrive_zenoh_runtime::runtime::run(config).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
