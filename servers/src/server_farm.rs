use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;

mod farm_logic;
use farm_logic::{config, downstream, logger, state};

use lib_smartfarm::connections::MqttCommandPublisher;
use lib_smartfarm::core::{CommandDispatcher, IngestionLifecycle, SnapshotAccessor, TelemetryCache};
use lib_smartfarm::ingestors::run_bus_session;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = config::load_config().context("Invalid configuration")?;
    let log_path = logger::setup_logging(&settings.log_dir, &settings.log_level)?;
    log::info!("Logging to {}", log_path.display());

    let cache = Arc::new(TelemetryCache::new());

    let mut lifecycle = IngestionLifecycle::new();
    let bus_config = settings.bus.clone();
    let ingest_cache = Arc::clone(&cache);
    lifecycle.start(move |token| run_bus_session(bus_config, ingest_cache, token))?;

    let topic = settings.mqtt.topic.clone();
    let publisher = Arc::new(MqttCommandPublisher::new(settings.mqtt.clone()));
    let dispatcher = CommandDispatcher::new(publisher, topic);
    log::info!(
        "Pump commands go to topic '{}' on {}:{}",
        dispatcher.topic(),
        settings.mqtt.host,
        settings.mqtt.port
    );

    let app_state = state::AppState::new(SnapshotAccessor::new(cache), dispatcher, lifecycle.status());

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let downstream_handle = tokio::spawn(downstream::run(settings.port, app_state, shutdown_tx.subscribe()));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::warn!("Could not install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    let _ = shutdown_tx.send(());
    lifecycle.shutdown();

    match downstream_handle.await {
        Ok(Err(e)) => log::error!("HTTP API exited with error: {}", e),
        Err(e) => log::error!("HTTP API task failed: {}", e),
        Ok(Ok(())) => {}
    }

    log::info!("Shutdown complete.");
    Ok(())
}
