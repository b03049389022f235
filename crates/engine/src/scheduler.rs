//! Poll scheduler: drives cycles of parse → fetch → diff → persist → notify.
//!
//! [`PollEngine`] owns everything a cycle touches (client + relay cursor,
//! in-memory state, store, notifier) and runs one cycle per call.
//! [`Monitor`] runs the engine periodically on a background task:
//! - start: one cycle right away, then one per interval
//! - start while running: cancel the old task, start fresh
//! - stop: cancel pending cycles; an in-flight cycle still finishes and persists
//!
//! The engine sits behind a `tokio::sync::Mutex`, so a restarted task waits
//! for the previous task's in-flight cycle instead of overlapping it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use parcel_common::error::AppError;
use parcel_common::notify::Notifier;
use parcel_common::types::{ChangeEvent, Outcome, PersistedState, TrackingRequest, TrackingResult};

use crate::client::{FetchStrategy, TrackingClient};
use crate::detector;
use crate::http::HttpTransport;
use crate::parser;
use crate::relay::RelayChain;
use crate::store::StateStore;

/// Default interval between monitoring cycles (5 minutes).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(300);

/// Upper bound on one notifier call; a stalled sink must not hold the engine.
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(15);

/// Everything one cycle produced.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// One entry per parsed request, in input order.
    pub results: Vec<TrackingResult>,
    /// Changes handed to the notifier.
    pub changes: Vec<ChangeEvent>,
    /// Set when the state could not be written back.
    pub persistence_error: Option<String>,
}

impl CycleReport {
    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_success()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.results.len() - self.success_count()
    }
}

/// Single-cycle polling engine.
pub struct PollEngine<H> {
    client: TrackingClient<H>,
    store: Arc<dyn StateStore>,
    notifier: Arc<dyn Notifier>,
    notify_timeout: Duration,
    state: PersistedState,
}

impl<H: HttpTransport> PollEngine<H> {
    /// Build the engine and load the persisted state once.
    ///
    /// An unreadable store is logged and treated as empty.
    pub async fn new(
        client: TrackingClient<H>,
        store: Arc<dyn StateStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let state = match store.load().await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(
                    store = %store.describe(),
                    error = %e,
                    "Failed to load tracking state, starting empty"
                );
                PersistedState::new()
            }
        };

        Self {
            client,
            store,
            notifier,
            notify_timeout: DEFAULT_NOTIFY_TIMEOUT,
            state,
        }
    }

    pub fn with_notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    pub fn state(&self) -> &PersistedState {
        &self.state
    }

    pub fn relay_chain(&self) -> &RelayChain {
        self.client.relay_chain()
    }

    /// Parse `raw_input` and run one cycle over it.
    pub async fn run_once(&mut self, raw_input: &str, strategy: FetchStrategy) -> CycleReport {
        let requests = parser::parse(raw_input);
        self.run_cycle(&requests, strategy).await
    }

    /// Run one full cycle over already-parsed requests.
    pub async fn run_cycle(
        &mut self,
        requests: &[TrackingRequest],
        strategy: FetchStrategy,
    ) -> CycleReport {
        let cycle_id = Uuid::new_v4();
        let started_at = Utc::now();
        tracing::info!(
            cycle_id = %cycle_id,
            codes = requests.len(),
            relay = %self.client.relay_chain().current_endpoint().name(),
            "Starting tracking cycle"
        );

        // All results are in before anything is compared or written.
        let results = self.client.fetch_all(requests, strategy).await;

        let diff = detector::apply(&self.state, &results, Utc::now());

        let persistence_error = match self.store.save(&diff.state).await {
            Ok(()) => None,
            Err(e) => {
                tracing::error!(
                    cycle_id = %cycle_id,
                    store = %self.store.describe(),
                    error = %e,
                    "Failed to persist tracking state"
                );
                Some(e.to_string())
            }
        };
        // Keep the new baseline in memory even if the write failed, so the
        // same transition is not reported again next cycle.
        self.state = diff.state;

        for change in &diff.changes {
            let delivery = tokio::time::timeout(self.notify_timeout, self.notifier.notify(change))
                .await
                .unwrap_or_else(|_| {
                    Err(AppError::Notification(format!(
                        "{} sink timed out after {:?}",
                        self.notifier.name(),
                        self.notify_timeout
                    )))
                });
            if let Err(e) = delivery {
                tracing::error!(
                    cycle_id = %cycle_id,
                    code = %change.code,
                    notifier = self.notifier.name(),
                    error = %e,
                    "Failed to deliver change notification"
                );
            }
        }

        if all_transport_failures(&results) {
            tracing::warn!(
                cycle_id = %cycle_id,
                "Every lookup failed at the transport level, rotating relay chain"
            );
            self.client.relay_chain_mut().rotate();
        }

        let report = CycleReport {
            cycle_id,
            started_at,
            results,
            changes: diff.changes,
            persistence_error,
        };

        tracing::info!(
            cycle_id = %cycle_id,
            succeeded = report.success_count(),
            failed = report.failure_count(),
            changes = report.changes.len(),
            "Tracking cycle finished"
        );

        report
    }
}

fn all_transport_failures(results: &[TrackingResult]) -> bool {
    !results.is_empty()
        && results.iter().all(|r| match &r.outcome {
            Outcome::Failure { reason } => reason.is_transport(),
            Outcome::Success(_) => false,
        })
}

// ============================================================
// Continuous mode
// ============================================================

/// Whether a [`Monitor`] currently has a live schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Stopped,
    Monitoring,
}

struct ActiveSchedule {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Periodic driver around a shared [`PollEngine`].
pub struct Monitor<H> {
    engine: Arc<Mutex<PollEngine<H>>>,
    interval: Duration,
    strategy: FetchStrategy,
    active: Option<ActiveSchedule>,
    reports: watch::Sender<Option<Arc<CycleReport>>>,
}

impl<H: HttpTransport + 'static> Monitor<H> {
    /// A zero interval is rejected: it would re-poll the relays back to back.
    pub fn new(
        engine: PollEngine<H>,
        interval: Duration,
        strategy: FetchStrategy,
    ) -> Result<Self, AppError> {
        if interval.is_zero() {
            return Err(AppError::Config(
                "monitoring interval must be greater than zero".to_string(),
            ));
        }

        let (reports, _) = watch::channel(None);
        Ok(Self {
            engine: Arc::new(Mutex::new(engine)),
            interval,
            strategy,
            active: None,
            reports,
        })
    }

    /// Shared handle to the engine (e.g. to inspect state between cycles).
    pub fn engine(&self) -> Arc<Mutex<PollEngine<H>>> {
        Arc::clone(&self.engine)
    }

    /// Receive the report of every completed cycle.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<CycleReport>>> {
        self.reports.subscribe()
    }

    pub fn state(&self) -> MonitorState {
        if self.active.is_some() {
            MonitorState::Monitoring
        } else {
            MonitorState::Stopped
        }
    }

    /// Enter monitoring for `raw_input`. Restarts the schedule if already running.
    pub fn start(&mut self, raw_input: impl Into<String>) {
        if self.active.is_some() {
            tracing::info!("Monitor already running, restarting schedule");
            self.stop();
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(monitor_loop(
            Arc::clone(&self.engine),
            raw_input.into(),
            self.interval,
            self.strategy,
            token.clone(),
            self.reports.clone(),
        ));

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Monitoring started"
        );
        self.active = Some(ActiveSchedule { token, handle });
    }

    /// Cancel future cycles. Idempotent; an in-flight cycle is left to finish.
    pub fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.token.cancel();
            tracing::info!("Monitoring stopped");
        }
    }

    /// Stop and wait for the background task (including any in-flight cycle).
    pub async fn shutdown(&mut self) {
        if let Some(active) = self.active.take() {
            active.token.cancel();
            if let Err(e) = active.handle.await {
                tracing::error!(error = %e, "Monitor task ended abnormally");
            }
            tracing::info!("Monitor shut down");
        }
    }
}

impl<H> Drop for Monitor<H> {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.token.cancel();
        }
    }
}

async fn monitor_loop<H: HttpTransport>(
    engine: Arc<Mutex<PollEngine<H>>>,
    raw_input: String,
    interval: Duration,
    strategy: FetchStrategy,
    token: CancellationToken,
    reports: watch::Sender<Option<Arc<CycleReport>>>,
) {
    loop {
        if token.is_cancelled() {
            break;
        }

        let report = {
            let mut engine = engine.lock().await;
            // Cancelled while waiting for a previous schedule's cycle.
            if token.is_cancelled() {
                break;
            }
            engine.run_once(&raw_input, strategy).await
        };
        reports.send_replace(Some(Arc::new(report)));

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    tracing::debug!("Monitor loop exited");
}
