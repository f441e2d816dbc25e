mod activity;
mod agent;
mod api;
mod capture;
mod config;
mod connectivity;
mod db;
mod delivery;
mod error;
mod metrics;
mod models;
mod session;
mod sidecar;
mod utils;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use agent::{Agent, AgentParts};
use api::HttpBackend;
use capture::CommandCapturer;
use config::ConfigStore;
use connectivity::ConnectivityMonitor;
use db::Database;
use metrics::MetricsCollector;

/// Runs the capture agent as a sidecar of the desktop shell until stdin
/// closes, the shell sends `shutdown`, or the process gets Ctrl-C.
pub fn run() -> Result<()> {
    utils::logging::init(config::debug_enabled());

    info!("punchcam {} starting up...", env!("CARGO_PKG_VERSION"));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let result = runtime.block_on(run_agent());
    // A pending stdin read holds a blocking thread that would stall drop.
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}

async fn run_agent() -> Result<()> {
    let data_dir = config::resolve_data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;

    let config_store = ConfigStore::new(data_dir.join("config.json"))?;
    let config = config_store.get();
    if !config_store.path().exists() {
        config_store.update(config.clone())?;
    }

    let database = Database::new(data_dir.join("punchcam.sqlite3"))?;

    // Captures left over from a crash stay queued and drain once online.
    let pending = database.count_pending_uploads().await?;
    if pending > 0 {
        warn!("Recovered {pending} queued capture(s) from a previous run");
    }

    let backend: Arc<dyn api::Backend> = Arc::new(HttpBackend::new(&config)?);
    let capturer = Arc::new(CommandCapturer::new(&config, data_dir.join("captures"))?);

    let monitor = ConnectivityMonitor::new(
        backend.clone(),
        config.connectivity_probe_interval(),
        config.connectivity_stable_observations,
    );
    let (notifications_tx, notifications_rx) = mpsc::unbounded_channel();
    let (agent, handle) = Agent::new(
        AgentParts {
            config,
            backend,
            capturer,
            db: database.clone(),
            connectivity: monitor.subscribe(),
            metrics: MetricsCollector::new(),
        },
        notifications_tx.clone(),
    );

    let cancel = CancellationToken::new();
    let monitor_task = tokio::spawn(monitor.run(agent.credentials(), cancel.clone()));
    let mut agent_task = tokio::spawn(agent.run(cancel.clone()));
    let writer_task = tokio::spawn(sidecar::write_notifications(
        notifications_rx,
        tokio::io::stdout(),
    ));
    let reader_task = tokio::spawn(sidecar::read_commands(
        BufReader::new(tokio::io::stdin()),
        handle,
        notifications_tx,
    ));

    tokio::select! {
        result = &mut agent_task => {
            if let Err(err) = result {
                error!("Agent task failed: {err}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted; shutting down");
            cancel.cancel();
            if let Err(err) = agent_task.await {
                error!("Agent task failed: {err}");
            }
        }
    }

    cancel.cancel();
    if let Err(err) = monitor_task.await {
        error!("Connectivity monitor failed: {err}");
    }
    reader_task.abort();
    match writer_task.await {
        Ok(Err(err)) => warn!("Notification writer stopped: {err:#}"),
        Err(err) => error!("Notification writer failed: {err}"),
        Ok(Ok(())) => {}
    }

    database.checkpoint().await?;
    info!("punchcam stopped");
    Ok(())
}
