//! Tracking client: resolves tracking codes through the relay chain.
//!
//! Per lookup:
//! 1. Build the upstream URL (`spx_tn` + `language_code`)
//! 2. Try the chain's current relay with a per-attempt timeout
//! 3. On timeout / transport error / non-2xx relay status, retry once via the
//!    next relay (the chain cursor itself does not move)
//! 4. Interpret the payload; anything unusable becomes a `Failure` outcome
//!
//! A lookup never returns an error: every code yields exactly one `Outcome`.

use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Deserializer};
use url::Url;

use parcel_common::error::AppError;
use parcel_common::types::{FailureReason, Outcome, TrackingRequest, TrackingResult, TrackingStatus};

use crate::http::{HttpResponse, HttpTransport, TransportError};
use crate::relay::{Relay, RelayChain};

/// Per-attempt timeout used when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Pause between lookups in sequential (unattended) mode.
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_secs(1);

/// Reason used when upstream rejects a lookup without a message.
pub const GENERIC_REJECTION: &str = "unable to retrieve tracking info";

/// Description used when the newest record has none.
pub const MISSING_DESCRIPTION: &str = "no status information";

/// How a batch of requests is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    /// All lookups at once (user-triggered batches).
    Parallel,
    /// One lookup at a time with a fixed pause in between (unattended polling).
    Sequential { delay: Duration },
}

// ============================================================
// Upstream payload
// ============================================================

#[derive(Debug, Deserialize)]
struct TrackingPayload {
    retcode: Option<i64>,
    #[serde(default)]
    message: Option<String>,
    /// Relays report their own failures as `{"error": "..."}`.
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<PayloadData>,
}

#[derive(Debug, Deserialize)]
struct PayloadData {
    #[serde(default)]
    sls_tracking_info: Option<SlsTrackingInfo>,
}

#[derive(Debug, Deserialize)]
struct SlsTrackingInfo {
    #[serde(default)]
    records: Vec<TrackingRecord>,
}

#[derive(Debug, Deserialize)]
struct TrackingRecord {
    #[serde(default, deserialize_with = "string_or_number")]
    tracking_code: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    actual_time: Option<i64>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

/// Turn a relay response body into an outcome.
pub fn interpret_payload(body: &str) -> Outcome {
    let payload: TrackingPayload = match serde_json::from_str(body) {
        Ok(payload) => payload,
        Err(e) => return Outcome::failure(FailureReason::Malformed(e.to_string())),
    };

    if payload.retcode == Some(0)
        && let Some(record) = payload
            .data
            .and_then(|d| d.sls_tracking_info)
            .and_then(|info| info.records.into_iter().next())
    {
        return Outcome::Success(TrackingStatus {
            description: record
                .description
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| MISSING_DESCRIPTION.to_string()),
            status_timestamp: record.actual_time.filter(|t| *t > 0),
            raw_status_id: record.tracking_code,
        });
    }

    let message = payload
        .message
        .or(payload.error)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| GENERIC_REJECTION.to_string());
    Outcome::failure(FailureReason::Rejected(message))
}

// ============================================================
// Client
// ============================================================

/// Issues tracking lookups through a [`RelayChain`].
pub struct TrackingClient<H> {
    transport: H,
    chain: RelayChain,
    api_base_url: Url,
    language_code: String,
    timeout: Duration,
}

impl<H: HttpTransport> TrackingClient<H> {
    pub fn new(
        transport: H,
        chain: RelayChain,
        api_base_url: &str,
        language_code: impl Into<String>,
    ) -> Result<Self, AppError> {
        let api_base_url = Url::parse(api_base_url).map_err(|e| {
            AppError::Config(format!("invalid tracking API URL '{}': {}", api_base_url, e))
        })?;
        Ok(Self {
            transport,
            chain,
            api_base_url,
            language_code: language_code.into(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Override the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn relay_chain(&self) -> &RelayChain {
        &self.chain
    }

    pub fn relay_chain_mut(&mut self) -> &mut RelayChain {
        &mut self.chain
    }

    /// Upstream URL for one tracking code.
    pub fn upstream_url(&self, code: &str) -> String {
        let mut url = self.api_base_url.clone();
        url.query_pairs_mut()
            .append_pair("spx_tn", code)
            .append_pair("language_code", &self.language_code);
        url.to_string()
    }

    /// Look up one code: current relay first, then exactly one fallback.
    pub async fn fetch_status(&self, code: &str) -> Outcome {
        let upstream = self.upstream_url(code);
        let primary_index = self.chain.current_index();
        let primary = self.chain.current_endpoint();

        let first_error = match self.attempt(primary, &upstream).await {
            Ok(response) => return interpret_payload(&response.body),
            Err(e) => e,
        };

        let fallback = self.chain.next_after(primary_index);
        tracing::warn!(
            code,
            relay = %primary.name(),
            fallback = %fallback.name(),
            error = %first_error,
            "Relay attempt failed, trying fallback"
        );

        match self.attempt(fallback, &upstream).await {
            Ok(response) => interpret_payload(&response.body),
            Err(e) => {
                tracing::warn!(code, relay = %fallback.name(), error = %e, "Fallback relay failed");
                Outcome::failure(match e {
                    TransportError::Timeout => FailureReason::Timeout,
                    TransportError::Connection(_) => FailureReason::Connection,
                })
            }
        }
    }

    /// Resolve every request, one result per request, in input order.
    pub async fn fetch_all(
        &self,
        requests: &[TrackingRequest],
        strategy: FetchStrategy,
    ) -> Vec<TrackingResult> {
        match strategy {
            FetchStrategy::Parallel => {
                join_all(requests.iter().map(|request| async move {
                    TrackingResult::new(request, self.fetch_status(&request.code).await)
                }))
                .await
            }
            FetchStrategy::Sequential { delay } => {
                let mut results = Vec::with_capacity(requests.len());
                for (i, request) in requests.iter().enumerate() {
                    if i > 0 && !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    tracing::debug!(code = %request.code, "Checking tracking code");
                    results.push(TrackingResult::new(
                        request,
                        self.fetch_status(&request.code).await,
                    ));
                }
                results
            }
        }
    }

    /// One request through one relay, bounded by the timeout regardless of transport.
    async fn attempt(&self, relay: &Relay, upstream: &str) -> Result<HttpResponse, TransportError> {
        let url = relay
            .build_url(upstream)
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, self.transport.get(&url, self.timeout))
            .await
            .map_err(|_| TransportError::Timeout)??;

        if !response.is_success() {
            return Err(TransportError::Connection(format!(
                "relay returned HTTP {}",
                response.status
            )));
        }
        Ok(response)
    }
}
