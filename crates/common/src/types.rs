use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One line of user input, split into a tracking code and an optional note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingRequest {
    /// Non-empty, trimmed tracking code.
    pub code: String,
    /// Free text attached by the user (may be empty).
    pub note: String,
}

/// Why a lookup produced no usable status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// Every attempt hit the per-request timeout.
    Timeout,
    /// Network error or an unusable relay response.
    Connection,
    /// Upstream answered but reported no record (carries its message).
    Rejected(String),
    /// Response body could not be decoded.
    Malformed(String),
}

impl FailureReason {
    /// Timeouts and connection errors, as opposed to upstream answers.
    pub fn is_transport(&self) -> bool {
        matches!(self, FailureReason::Timeout | FailureReason::Connection)
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::Connection => write!(f, "connection failure"),
            FailureReason::Rejected(msg) => write!(f, "{}", msg),
            FailureReason::Malformed(detail) => write!(f, "malformed response: {}", detail),
        }
    }
}

/// Latest status reported upstream for one tracking code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingStatus {
    pub description: String,
    /// Event time in seconds since the epoch, when upstream provides one.
    pub status_timestamp: Option<i64>,
    /// Stable upstream status identifier; the change-detection key.
    pub raw_status_id: String,
}

/// Outcome of a single lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Success(TrackingStatus),
    Failure { reason: FailureReason },
}

impl Outcome {
    pub fn failure(reason: FailureReason) -> Self {
        Outcome::Failure { reason }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

/// Result of resolving one [`TrackingRequest`] during a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingResult {
    pub code: String,
    pub note: String,
    pub outcome: Outcome,
}

impl TrackingResult {
    pub fn new(request: &TrackingRequest, outcome: Outcome) -> Self {
        Self {
            code: request.code.clone(),
            note: request.note.clone(),
            outcome,
        }
    }
}

/// Persisted snapshot of the last successful lookup of a code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// Older state files call this field `tracking_code`.
    #[serde(alias = "tracking_code")]
    pub raw_status_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub observed_at: DateTime<Utc>,
}

impl StatusRecord {
    pub fn from_status(status: &TrackingStatus, observed_at: DateTime<Utc>) -> Self {
        Self {
            raw_status_id: status.raw_status_id.clone(),
            description: status.description.clone(),
            observed_at,
        }
    }
}

/// Tracking code → last known status. `None` entries mean "never observed".
///
/// A `BTreeMap` keeps the serialized form stable, so an unchanged state
/// always writes the same bytes.
pub type PersistedState = BTreeMap<String, Option<StatusRecord>>;

/// Emitted once per detected status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub code: String,
    pub note: String,
    pub description: String,
    pub status_timestamp: Option<i64>,
    pub raw_status_id: String,
    pub previous_status_id: String,
}
