//! Telemetry device simulator
//!
//! Publishes simulated metrics over MQTT on a fixed cadence, keeping the
//! broker connection alive through the connection manager's reconnect ticks.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use telemetry_link::config::AppConfig;
use telemetry_link::connection::{ConnectionManager, ManagerSettings};
use telemetry_link::observability::init_logging_from_env;
use telemetry_link::protocol::unix_time_s;
use telemetry_link::telemetry::TelemetryPublisher;
use telemetry_link::transport::{MqttTransport, Transport};
use tokio::signal;
use tokio::time::{interval, interval_at, sleep, Duration, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

/// Time given to the network loop to flush the final DISCONNECT
const SHUTDOWN_FLUSH: Duration = Duration::from_millis(500);

const DEFAULT_CONFIG_PATHS: &[&str] = &["telemetry.toml", "config/telemetry.toml"];

/// MQTT telemetry device simulator
#[derive(Parser)]
#[command(name = "telemetry-link")]
#[command(about = "Publishes simulated device telemetry over a self-healing MQTT link")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "TELEMETRY_CONFIG")]
    config: Option<PathBuf>,

    /// Raise log verbosity above the configured level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and publish until SIGINT/SIGTERM
    Run,
    /// Validate the configuration
    Config {
        /// Print the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logging depends on the config, so config errors go to stderr
    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            process::exit(1);
        }
    };

    let level = match cli.verbose {
        0 => config.log_level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    if let Err(e) = init_logging_from_env(level) {
        eprintln!("Failed to initialise logging: {e}");
    }

    info!(
        "Starting telemetry-link v{} as {}",
        env!("CARGO_PKG_VERSION"),
        config.client_id
    );

    let result = match cli.command {
        Commands::Run => run_device(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Shutdown complete");
}

fn load_configuration(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    if let Some(path) = path {
        return Ok(AppConfig::load_from_file(path)?);
    }

    DEFAULT_CONFIG_PATHS
        .iter()
        .map(Path::new)
        .find(|path| path.exists())
        .ok_or_else(|| {
            format!(
                "no configuration file found; pass --config or create one of {}",
                DEFAULT_CONFIG_PATHS.join(", ")
            )
            .into()
        })
        .and_then(|path| Ok(AppConfig::load_from_file(path)?))
}

/// Build the manager; a transport that cannot be created leaves it degraded
fn build_manager(config: &AppConfig) -> Result<Arc<ConnectionManager>, Box<dyn std::error::Error>> {
    let builder = ConnectionManager::builder(ManagerSettings::from_config(config));

    let builder = match MqttTransport::new(&config.client_id) {
        Ok(transport) => builder.transport(Arc::new(transport) as Arc<dyn Transport>),
        Err(e) => {
            error!(error = %e, "Failed to create MQTT transport");
            builder
        }
    };

    Ok(builder.build()?)
}

async fn run_device(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let manager = build_manager(&config)?;

    // A failed first connect is not fatal; ticks keep retrying
    if let Err(e) = manager.connect(config.broker.keepalive) {
        warn!(error = %e, "Initial connect failed, will retry");
    }

    let mut publisher = TelemetryPublisher::new(manager.clone(), &config);

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    let mut sample_timer = interval(Duration::from_millis(config.interval_ms));
    sample_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let health_period = Duration::from_millis(config.health_interval_ms);
    let mut health_timer = interval_at(Instant::now() + health_period, health_period);
    health_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        interval_ms = config.interval_ms,
        metrics = publisher.generators().len(),
        "Publishing telemetry"
    );

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
                break;
            }
            _ = sample_timer.tick() => {
                manager.tick();
                publisher.publish_samples(unix_time_s());
            }
            _ = health_timer.tick() => {
                // Failures are logged by the publisher
                let _ = publisher.publish_health(unix_time_s());
            }
        }
    }

    manager.stop();
    let stats = manager.stats();
    let counters = publisher.counters();
    info!(
        reconnects = stats.reconnects,
        in_flight_timeouts = stats.in_flight_timeouts,
        publish_ok = counters.publish_ok,
        publish_fail = counters.publish_fail,
        "Connection manager stopped"
    );

    sleep(SHUTDOWN_FLUSH).await;
    Ok(())
}

fn handle_config_command(config: &AppConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("{}", toml::to_string_pretty(config)?);
    } else {
        println!("Configuration is valid");
    }
    Ok(())
}
