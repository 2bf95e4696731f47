//! Telemetry Sender Binary
//!
//! Reads pre-rendered metric lines from stdin and reports them.

use std::sync::Arc;
use std::time::Duration;
use telemetry_sender::{Config, DataKind, Endpoint, Result, Sender};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const STATS_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    initialize_tracing();

    info!("Starting Telemetry Sender v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::from_env();

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    match &config.endpoint {
        Endpoint::Http { server_url, .. } => info!(
            "Sender configuration - URL: {}, Batch: {}, Buffer: {}, Flush: {:?}",
            server_url, config.batch_size, config.max_buffer_size, config.flush_interval
        ),
        Endpoint::Stream { host, metrics_port, .. } => info!(
            "Sender configuration - Proxy: {}:{}, Batch: {}, Buffer: {}, Flush: {:?}",
            host, metrics_port, config.batch_size, config.max_buffer_size, config.flush_interval
        ),
    }

    let sender = Arc::new(Sender::new(config)?);

    let stats_sender = Arc::clone(&sender);
    let stats_task = tokio::spawn(async move {
        report_stats(stats_sender).await;
    });

    tokio::select! {
        result = read_stdin(&sender) => {
            if let Err(e) = result {
                error!("Failed reading input: {}", e);
            }
            info!("Input closed, shutting down");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    stats_task.abort();

    if let Err(e) = sender.close().await {
        error!("Sender closed with errors: {}", e);
        std::process::exit(1);
    }

    let stats = sender.stats();
    info!(
        "Sender stopped - failures: {}, dropped: {}",
        sender.failure_count(),
        stats.total_dropped()
    );

    Ok(())
}

/// Feed each non-empty stdin line into the points pipeline
async fn read_stdin(sender: &Sender) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        if let Err(e) = sender.send_line(DataKind::Points, line) {
            debug!("Line not accepted: {}", e);
        }
    }

    Ok(())
}

/// Periodically log a stats snapshot
async fn report_stats(sender: Arc<Sender>) {
    let mut interval = tokio::time::interval(STATS_INTERVAL);
    interval.tick().await;

    loop {
        interval.tick().await;

        let stats = sender.stats();
        match serde_json::to_string(&stats) {
            Ok(json) => info!(
                "Sender stats - queued: {}, dropped: {}, failures: {}, detail: {}",
                stats.total_queued(),
                stats.total_dropped(),
                sender.failure_count(),
                json
            ),
            Err(e) => warn!("Failed to serialize stats: {}", e),
        }
    }
}

/// Initialize structured logging
fn initialize_tracing() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .json();

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&log_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
