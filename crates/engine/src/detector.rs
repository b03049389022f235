//! Change detector: decides which results are genuine status transitions.
//!
//! The key is the upstream status identifier, never the description text
//! (descriptions get reworded without the shipment moving). A code seen for
//! the first time seeds the baseline silently, and a failed lookup neither
//! fires nor touches the stored record.

use chrono::{DateTime, Utc};

use parcel_common::types::{
    ChangeEvent, Outcome, PersistedState, StatusRecord, TrackingResult, TrackingStatus,
};

/// True when a previous record exists and its status id differs from `current`.
pub fn detect(previous: Option<&StatusRecord>, current: &TrackingStatus) -> bool {
    previous.is_some_and(|prev| prev.raw_status_id != current.raw_status_id)
}

/// Next state plus the changes found while computing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff {
    pub state: PersistedState,
    pub changes: Vec<ChangeEvent>,
}

/// Fold one cycle's results into `previous`, entirely in memory.
///
/// Results apply in input order; a duplicated code compares against the record
/// its earlier occurrence just wrote, so one transition fires at most once.
/// Codes absent from `results` are carried over unchanged.
pub fn apply(previous: &PersistedState, results: &[TrackingResult], now: DateTime<Utc>) -> Diff {
    let mut state = previous.clone();
    let mut changes = Vec::new();

    for result in results {
        let status = match &result.outcome {
            Outcome::Success(status) => status,
            Outcome::Failure { reason } => {
                tracing::debug!(code = %result.code, reason = %reason, "Keeping stale record");
                continue;
            }
        };

        let prior = state.get(&result.code).and_then(Option::as_ref);

        if detect(prior, status) {
            let previous_status_id = prior
                .map(|p| p.raw_status_id.clone())
                .unwrap_or_default();
            tracing::info!(
                code = %result.code,
                from = %previous_status_id,
                to = %status.raw_status_id,
                "Status change detected"
            );
            changes.push(ChangeEvent {
                code: result.code.clone(),
                note: result.note.clone(),
                description: status.description.clone(),
                status_timestamp: status.status_timestamp,
                raw_status_id: status.raw_status_id.clone(),
                previous_status_id,
            });
        } else if prior.is_none() {
            tracing::info!(code = %result.code, status = %status.raw_status_id, "First observation, seeding baseline");
        }

        state.insert(
            result.code.clone(),
            Some(StatusRecord::from_status(status, now)),
        );
    }

    Diff { state, changes }
}
