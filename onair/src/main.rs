use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use onair::api::ApiServer;
use onair::config::Config;
use onair::database;
use onair::delivery::DeliveryPipeline;
use onair::orchestrator::{Channels, Orchestrator};
use onair::telegram::TelegramClient;
use platforms_poller::{FxHashMap, PollerRunner};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let log_dir = std::env::var_os("ONAIR_LOG_DIR").map(PathBuf::from);
    let _log_guard = onair::logging::init(log_dir.as_deref());

    let config_path = std::env::args()
        .nth(1)
        .context("usage: onair <config.json>")?;
    let config = Arc::new(Config::load(&config_path)?);
    info!(platform = %config.platform, "starting");

    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;

    let cancel = CancellationToken::new();

    // Platform poller and its runner task.
    let poller_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_seconds))
        .build()?;
    let specific: FxHashMap<String, String> = config
        .specific_config
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    let poller = platforms_poller::for_platform(&config.platform, poller_client, specific)?;
    let runner = PollerRunner::new(
        poller.clone(),
        Duration::from_millis(config.poll_interval_ms),
        cancel.clone(),
    );
    let poll_handle = runner.spawn();

    // Delivery lanes over the Telegram transport.
    let telegram = Arc::new(TelegramClient::new(
        Duration::from_secs(config.timeout_seconds),
        &config.endpoints,
    )?);
    let (results_tx, results_rx) = mpsc::channel(config.queue_capacity);
    let pipeline = DeliveryPipeline::spawn(
        telegram.clone(),
        config.queue_capacity,
        results_tx,
        cancel.clone(),
    );

    // HTTP surface feeding the orchestrator's event channel.
    let (events_tx, events_rx) = mpsc::channel(1024);
    let api = ApiServer::new(config.clone(), events_tx, cancel.clone());
    let api_cancel = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = api.run().await {
            error!("http surface failed: {e}");
            api_cancel.cancel();
        }
    });

    // Stop on SIGINT/SIGTERM.
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_cancel.cancel();
    });

    let orchestrator = Orchestrator::new(
        config,
        pool,
        pipeline,
        telegram,
        poller,
        poll_handle.requests.clone(),
        cancel,
    )?;
    orchestrator
        .run(Channels {
            poll_outcomes: poll_handle.outcomes,
            events: events_rx,
            delivery_results: results_rx,
        })
        .await?;

    info!("bye");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!("cannot install SIGTERM handler: {e}");
            return std::future::pending().await;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
