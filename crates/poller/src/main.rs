use std::time::Duration;

use parcel_common::config::{AppConfig, RunMode};
use parcel_engine::scheduler::{Monitor, PollEngine};
use parcel_poller::bootstrap;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "parcel_poller=info,parcel_engine=info,parcel_notifier=info".into()
            }),
        )
        .json()
        .init();

    tracing::info!("Parcel poller starting...");

    // Load configuration
    let config = AppConfig::from_env()?;
    let raw_input = config.read_input().await?;

    let client = bootstrap::build_client(&config)?;
    let store = bootstrap::build_store(&config).await?;
    let notifier = bootstrap::build_notifier(&config)?;
    let strategy = bootstrap::fetch_strategy(&config);

    let mut engine = PollEngine::new(client, store, notifier).await;

    match config.mode {
        RunMode::Once => {
            let report = engine.run_once(&raw_input, strategy).await;
            bootstrap::log_report(&report);
        }
        RunMode::Watch => {
            let mut monitor = Monitor::new(
                engine,
                Duration::from_secs(config.poll_interval_secs),
                strategy,
            )?;
            let mut reports = monitor.subscribe();
            monitor.start(raw_input);

            // Run until Ctrl+C, logging each finished cycle
            loop {
                tokio::select! {
                    changed = reports.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let report = reports.borrow_and_update().clone();
                        if let Some(report) = report {
                            bootstrap::log_report(&report);
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("Received shutdown signal, stopping gracefully...");
                        break;
                    }
                }
            }

            monitor.shutdown().await;
        }
    }

    tracing::info!("Parcel poller stopped.");
    Ok(())
}
