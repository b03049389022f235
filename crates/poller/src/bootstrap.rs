//! Turns an [`AppConfig`] into the concrete pieces the engine runs on.

use std::sync::Arc;
use std::time::Duration;

use parcel_common::config::{AppConfig, RunMode, StateBackend};
use parcel_common::notify::Notifier;
use parcel_common::redis_pool::create_redis_pool;
use parcel_common::types::Outcome;
use parcel_engine::client::{FetchStrategy, TrackingClient};
use parcel_engine::http::ReqwestTransport;
use parcel_engine::relay::RelayChain;
use parcel_engine::scheduler::CycleReport;
use parcel_engine::store::{JsonFileStateStore, RedisStateStore, StateStore};
use parcel_notifier::{DiscordWebhookNotifier, LogNotifier};

pub fn build_client(config: &AppConfig) -> anyhow::Result<TrackingClient<ReqwestTransport>> {
    let chain = RelayChain::from_entries(&config.relays)?;
    tracing::info!(
        relays = chain.len(),
        primary = %chain.current_endpoint().name(),
        "Relay chain configured"
    );

    let client = TrackingClient::new(
        ReqwestTransport::new(),
        chain,
        &config.api_base_url,
        config.language_code.clone(),
    )?
    .with_timeout(Duration::from_secs(config.request_timeout_secs));
    Ok(client)
}

pub async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn StateStore>> {
    let store: Arc<dyn StateStore> = match config.state_backend {
        StateBackend::File => Arc::new(JsonFileStateStore::new(&config.state_file)),
        StateBackend::Redis => {
            let conn = create_redis_pool(&config.redis_url).await?;
            Arc::new(RedisStateStore::new(conn, config.state_key.clone()))
        }
    };
    tracing::info!(store = %store.describe(), "State store configured");
    Ok(store)
}

/// Discord when a webhook is configured, otherwise log-only.
pub fn build_notifier(config: &AppConfig) -> anyhow::Result<Arc<dyn Notifier>> {
    let notifier: Arc<dyn Notifier> = match &config.discord_webhook_url {
        Some(url) => Arc::new(DiscordWebhookNotifier::with_timeout(
            url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )?),
        None => {
            tracing::info!("No Discord webhook configured, changes will only be logged");
            Arc::new(LogNotifier::new())
        }
    };
    Ok(notifier)
}

/// One-shot runs fetch everything at once; watch mode paces requests.
pub fn fetch_strategy(config: &AppConfig) -> FetchStrategy {
    match config.mode {
        RunMode::Once => FetchStrategy::Parallel,
        RunMode::Watch => FetchStrategy::Sequential {
            delay: Duration::from_millis(config.request_delay_ms),
        },
    }
}

/// Log one line per result of a finished cycle.
pub fn log_report(report: &CycleReport) {
    for result in &report.results {
        match &result.outcome {
            Outcome::Success(status) => tracing::info!(
                cycle_id = %report.cycle_id,
                code = %result.code,
                note = %result.note,
                status = %status.raw_status_id,
                description = %status.description,
                status_timestamp = ?status.status_timestamp,
                "Tracking result"
            ),
            Outcome::Failure { reason } => tracing::warn!(
                cycle_id = %report.cycle_id,
                code = %result.code,
                note = %result.note,
                reason = %reason,
                "Tracking lookup failed"
            ),
        }
    }
    if let Some(error) = &report.persistence_error {
        tracing::error!(cycle_id = %report.cycle_id, error = %error, "State was not saved this cycle");
    }
}
