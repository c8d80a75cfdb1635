//! upcheck server
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - UPCHECK_HOST: Bind address (default: 0.0.0.0)
//! - UPCHECK_PORT: Port number (default: 8080)
//! - UPCHECK_PROBE_TIMEOUT_SECS: Per-probe timeout (default: 10)
//! - UPCHECK_SCHEDULER_TICK_SECS: How often due alarms are selected (default: 5)
//! - UPCHECK_PARTITION_INTERVAL_SECS: Partition maintenance interval (default: 300)
//! - UPCHECK_PARTITION_LEAD_MINUTES: Create tomorrow's table this long before midnight (default: 60)
//! - UPCHECK_RETENTION_DAYS: Drop result tables older than this (default: 30)
//! - UPCHECK_RESULTS_TABLE: Parent table for check results (default: check_results)
//! - UPCHECK_EMAIL_FROM, UPCHECK_SLACK_USERNAME, UPCHECK_SLACK_EMOJI: Notification identity
//! - UPCHECK_SEED_FILE: JSON file with alarms and directory data to load at startup
//! - RUST_LOG: Log level (default: info)

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upcheck::api::run_server;
use upcheck::ServiceConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "upcheck=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServiceConfig::from_env();

    tracing::info!("upcheck configuration:");
    tracing::info!("  Host: {}:{}", config.host, config.port);
    tracing::info!("  Probe timeout: {:?}", config.probe.timeout);
    tracing::info!("  Scheduler tick: {:?}", config.scheduler_tick);
    tracing::info!(
        "  Partitions: {} (lead {} min, retention {} days, every {:?})",
        config.partition.parent_table,
        config.partition.lead_time.num_minutes(),
        config.partition.retention.num_days(),
        config.partition_interval
    );
    match &config.seed_file {
        Some(path) => tracing::info!("  Seed file: {}", path.display()),
        None => tracing::info!("  Seed file: none"),
    }

    println!("\n upcheck {}\n", env!("CARGO_PKG_VERSION"));

    run_server(config).await
}
