//! End-to-end tests for the tracking engine: parse → fetch → diff → persist → notify.
//!
//! Everything except the Redis test runs against scripted relays and a
//! temporary state file. The Redis test needs a running server:
//!
//! ```bash
//! REDIS_URL="redis://127.0.0.1:6379" \
//!   cargo test -p parcel-engine --test integration -- --ignored --nocapture
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use parcel_common::error::Result;
use parcel_common::notify::Notifier;
use parcel_common::redis_pool::create_redis_pool;
use parcel_common::types::{ChangeEvent, FailureReason, Outcome, PersistedState};
use parcel_engine::client::{FetchStrategy, TrackingClient};
use parcel_engine::http::{MockReply, MockTransport, TransportError};
use parcel_engine::relay::{Relay, RelayChain, UrlEncoding};
use parcel_engine::scheduler::{Monitor, MonitorState, PollEngine};
use parcel_engine::store::{JsonFileStateStore, RedisStateStore, StateStore};

// ============================================================
// Shared helpers
// ============================================================

const API_BASE: &str = "https://spx.test/shipment/order/open/order/get_order_info";
const WORKER: &str = "https://worker.test/?url=";
const ALLORIGINS: &str = "https://allorigins.test/raw?url=";

#[derive(Default)]
struct CollectingNotifier {
    events: Mutex<Vec<ChangeEvent>>,
}

#[async_trait]
impl Notifier for CollectingNotifier {
    async fn notify(&self, event: &ChangeEvent) -> Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "collecting"
    }
}

fn relay_chain() -> RelayChain {
    RelayChain::new(vec![
        Relay::new(WORKER, UrlEncoding::Encoded),
        Relay::new(ALLORIGINS, UrlEncoding::Encoded),
    ])
    .unwrap()
}

fn client(mock: &MockTransport) -> TrackingClient<MockTransport> {
    TrackingClient::new(mock.clone(), relay_chain(), API_BASE, "vi").unwrap()
}

/// Relay URL prefix that only matches lookups of `code`.
fn lookup_prefix(relay: &str, code: &str) -> String {
    let upstream = format!("{}?spx_tn={}", API_BASE, code);
    let encoded: String = url::form_urlencoded::byte_serialize(upstream.as_bytes()).collect();
    format!("{}{}", relay, encoded)
}

fn tracking_body(status_id: &str, description: &str, actual_time: i64) -> serde_json::Value {
    json!({
        "retcode": 0,
        "message": "success",
        "data": {
            "sls_tracking_info": {
                "records": [
                    { "tracking_code": status_id, "description": description, "actual_time": actual_time },
                    { "tracking_code": "F000", "description": "Order created", "actual_time": 1_699_000_000 }
                ]
            }
        }
    })
}

// ============================================================
// Tests
// ============================================================

#[tokio::test]
async fn test_first_cycle_seeds_second_cycle_notifies() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("tracking-state.json");
    let store = Arc::new(JsonFileStateStore::new(&state_path));
    let notifier = Arc::new(CollectingNotifier::default());
    let mock = MockTransport::new();

    mock.push_json(&lookup_prefix(WORKER, "SPX001"), tracking_body("F100", "Picked up", 1_700_000_000));
    mock.push_json(&lookup_prefix(WORKER, "SPX002"), tracking_body("F100", "Picked up", 1_700_000_000));
    mock.push_json(&lookup_prefix(WORKER, "SPX002"), tracking_body("F510", "Out for delivery", 1_700_050_000));

    let input = "SPX001\nSPX002 (gift)";

    let mut engine = PollEngine::new(client(&mock), store.clone(), notifier.clone()).await;
    let report = engine.run_once(input, FetchStrategy::Parallel).await;
    assert_eq!(report.results.len(), 2);
    assert_eq!(report.success_count(), 2);
    assert!(report.changes.is_empty());
    assert!(notifier.events.lock().is_empty());
    assert!(state_path.exists());

    // A fresh engine reads the baseline back from disk.
    let mut engine = PollEngine::new(client(&mock), store.clone(), notifier.clone()).await;
    let report = engine.run_once(input, FetchStrategy::Parallel).await;
    assert!(report.persistence_error.is_none());

    let events = notifier.events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].code, "SPX002");
    assert_eq!(events[0].note, "gift");
    assert_eq!(events[0].raw_status_id, "F510");
    assert_eq!(events[0].description, "Out for delivery");
    assert_eq!(events[0].status_timestamp, Some(1_700_050_000));
    assert_eq!(events[0].previous_status_id, "F100");

    let stored = store.load().await.unwrap();
    assert_eq!(stored["SPX001"].as_ref().unwrap().raw_status_id, "F100");
    assert_eq!(stored["SPX002"].as_ref().unwrap().raw_status_id, "F510");
}

#[tokio::test(start_paused = true)]
async fn test_all_failures_leave_state_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("tracking-state.json");
    let store = Arc::new(JsonFileStateStore::new(&state_path));
    let mock = MockTransport::new();

    mock.push_json(&lookup_prefix(WORKER, "SPX001"), tracking_body("F100", "Picked up", 1_700_000_000));
    let mut engine = PollEngine::new(
        client(&mock),
        store.clone(),
        Arc::new(CollectingNotifier::default()),
    )
    .await;
    engine.run_once("SPX001", FetchStrategy::Parallel).await;
    let before = std::fs::read(&state_path).unwrap();

    // Every relay now either hangs or refuses.
    let failing = MockTransport::new();
    failing.push(WORKER, MockReply::Hang);
    failing.push(ALLORIGINS, MockReply::Fail(TransportError::Connection("refused".into())));
    let notifier = Arc::new(CollectingNotifier::default());
    let mut engine = PollEngine::new(client(&failing), store.clone(), notifier.clone()).await;

    let report = engine
        .run_once("SPX001\nSPX404", FetchStrategy::Parallel)
        .await;
    assert_eq!(report.failure_count(), 2);
    assert!(notifier.events.lock().is_empty());
    assert_eq!(std::fs::read(&state_path).unwrap(), before);
}

#[tokio::test]
async fn test_failover_to_second_relay() {
    let mock = MockTransport::new();
    mock.push(WORKER, MockReply::Fail(TransportError::Connection("dns".into())));
    mock.push_json(ALLORIGINS, tracking_body("F100", "Picked up", 1_700_000_000));

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileStateStore::new(dir.path().join("state.json")));
    let mut engine =
        PollEngine::new(client(&mock), store, Arc::new(CollectingNotifier::default())).await;

    let report = engine.run_once("SPX001 note", FetchStrategy::Parallel).await;
    match &report.results[0].outcome {
        Outcome::Success(status) => assert_eq!(status.raw_status_id, "F100"),
        other => panic!("expected success, got {:?}", other),
    }
    assert_eq!(report.results[0].note, "note");

    let calls = mock.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].starts_with(WORKER));
    assert!(calls[1].starts_with(ALLORIGINS));
    // One code failing over does not move the shared cursor.
    assert_eq!(engine.relay_chain().current_index(), 0);
}

#[tokio::test]
async fn test_rejection_is_reported_not_retried() {
    let mock = MockTransport::new();
    mock.push_json(WORKER, json!({ "retcode": 100404, "message": "Order not found" }));

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileStateStore::new(dir.path().join("state.json")));
    let mut engine =
        PollEngine::new(client(&mock), store, Arc::new(CollectingNotifier::default())).await;

    let report = engine.run_once("BAD1", FetchStrategy::Parallel).await;
    assert_eq!(
        report.results[0].outcome,
        Outcome::failure(FailureReason::Rejected("Order not found".into()))
    );
    assert_eq!(mock.call_count(), 1);
    assert!(!engine.state().contains_key("BAD1"));
}

#[tokio::test]
async fn test_legacy_state_file_is_compared_by_status_id() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("tracking-state.json");
    std::fs::write(
        &state_path,
        r#"{
  "SPX001": { "tracking_code": "F100", "description": "Picked up", "actual_time": 1700000000 },
  "SPX002": null
}"#,
    )
    .unwrap();

    let mock = MockTransport::new();
    mock.push_json(&lookup_prefix(WORKER, "SPX001"), tracking_body("F200", "In transit", 1_700_010_000));
    mock.push_json(&lookup_prefix(WORKER, "SPX002"), tracking_body("F100", "Picked up", 1_700_000_000));
    let notifier = Arc::new(CollectingNotifier::default());
    let store = Arc::new(JsonFileStateStore::new(&state_path));

    let mut engine = PollEngine::new(client(&mock), store, notifier.clone()).await;
    let report = engine
        .run_once("SPX001\nSPX002", FetchStrategy::Parallel)
        .await;

    assert_eq!(report.changes.len(), 1);
    assert_eq!(notifier.events.lock()[0].code, "SPX001");
    assert_eq!(notifier.events.lock()[0].previous_status_id, "F100");
}

#[tokio::test(start_paused = true)]
async fn test_monitor_stop_twice() {
    let mock = MockTransport::new();
    mock.push_json(WORKER, tracking_body("F100", "Picked up", 1_700_000_000));
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileStateStore::new(dir.path().join("state.json")));
    let engine =
        PollEngine::new(client(&mock), store, Arc::new(CollectingNotifier::default())).await;

    let mut monitor = Monitor::new(
        engine,
        Duration::from_secs(300),
        FetchStrategy::Sequential {
            delay: Duration::from_secs(1),
        },
    )
    .unwrap();
    let mut reports = monitor.subscribe();

    monitor.start("SPX001\nSPX002");
    reports.changed().await.unwrap();
    let report = reports.borrow().clone().unwrap();
    assert_eq!(report.results.len(), 2);

    monitor.stop();
    monitor.stop();
    assert_eq!(monitor.state(), MonitorState::Stopped);

    tokio::time::sleep(Duration::from_secs(900)).await;
    assert_eq!(mock.call_count(), 2);
}

#[tokio::test]
#[ignore] // Requires REDIS_URL, run explicitly with --ignored
async fn test_redis_store_round_trip() {
    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
    let conn = create_redis_pool(&redis_url).await.unwrap();
    let key = format!("parcel:test:{}", uuid::Uuid::new_v4());
    let store = RedisStateStore::new(conn, key);

    assert!(store.load().await.unwrap().is_empty());

    let mut state = PersistedState::new();
    state.insert("SPX001".into(), None);
    store.save(&state).await.unwrap();
    assert_eq!(store.load().await.unwrap(), state);
}
