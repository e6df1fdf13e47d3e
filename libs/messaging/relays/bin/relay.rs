//! Report relay binary
//!
//! Usage:
//!   relay --config config/relay.toml [--environment staging]
//!   relay --env-file .env
//!   relay --config config/relay.toml --check

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use message_sink::{LapinConnector, MessageSink, SinkFactory};
use relay_config::EnvFile;
use relay_core::{check_sink, check_source, Relay, RelayConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(about = "Forwards upload status reports from the source queue to one destination")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, required_unless_present = "env_file", conflicts_with = "env_file")]
    config: Option<PathBuf>,

    /// Flat KEY="value" configuration file
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Overlay config/environments/<name>.toml on top of --config
    #[arg(short, long)]
    environment: Option<String>,

    /// Log filter when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,

    /// Check source and destination connectivity, then exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;
    info!("🚀 Starting report relay");

    let config = load_config(&args).map_err(|e| {
        error!("Failed to load configuration: {:#}", e);
        e
    })?;
    info!(
        relay = %config.relay.name,
        source = %config.source.endpoint(),
        queue = %config.topology.queue,
        target = config.destination.kind(),
        use_queue = config.destination.use_queue(),
        "Loaded configuration"
    );
    debug!(config = ?config, "Effective configuration");

    let source = LapinConnector::new(config.source.clone());
    let mut backend = SinkFactory::new(config.relay.name.as_str()).build(&config.destination)?;

    if args.check {
        return run_checks(&source, backend.as_mut()).await;
    }

    let mut relay = Relay::new(config.settings(), source, backend)
        .with_reconnect_policy(config.reconnect_policy());
    if config.relay.provision {
        relay = relay.with_topology(config.topology.clone());
    }

    let stats = relay.run(shutdown_signal()).await.map_err(|e| {
        error!("Relay failed: {}", e);
        e
    })?;

    info!(
        received = stats.received,
        acked = stats.acked,
        requeued = stats.requeued,
        faults = stats.faults,
        source_reconnects = stats.source_reconnects,
        "✅ Relay stopped"
    );
    Ok(())
}

fn init_logging(args: &Args) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&args.log_level)
            .with_context(|| format!("invalid log level '{}'", args.log_level))?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if args.json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow!("failed to initialize logging: {}", e))
}

fn load_config(args: &Args) -> Result<RelayConfig> {
    if let Some(path) = &args.env_file {
        info!("Configuration: {}", path.display());
        let env = EnvFile::load(path)?;
        for (key, value) in env.redacted() {
            debug!(key = %key, value = %value, "Env setting");
        }
        return Ok(RelayConfig::from_key_values(&env)?);
    }

    let path = args
        .config
        .as_ref()
        .context("either --config or --env-file is required")?;
    info!("Configuration: {}", path.display());
    Ok(RelayConfig::from_file(path, args.environment.as_deref())?)
}

async fn run_checks(source: &LapinConnector, backend: &mut dyn MessageSink) -> Result<()> {
    let reports = [
        check_source(source, HEALTH_CHECK_TIMEOUT).await,
        check_sink(backend, HEALTH_CHECK_TIMEOUT).await,
    ];

    for report in &reports {
        println!("{}", report);
    }
    if reports.iter().all(|r| r.is_up()) {
        Ok(())
    } else {
        bail!("health check failed")
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl-C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
