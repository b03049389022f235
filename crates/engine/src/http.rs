//! HTTP transport abstraction used by the tracking client.
//!
//! The `HttpTransport` trait keeps the client testable: production code uses
//! [`ReqwestTransport`], tests script responses with [`MockTransport`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

/// Response returned by a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport-level failure of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),
}

/// Issues GET requests through a relay.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// GET `url`, asking for a JSON response, giving up after `timeout`.
    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse, TransportError>;
}

#[async_trait]
impl<T: HttpTransport + ?Sized> HttpTransport for Arc<T> {
    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse, TransportError> {
        (**self).get(url, timeout).await
    }
}

// ============================================================================
// Production Implementation using reqwest
// ============================================================================

/// Production transport backed by a shared `reqwest::Client`.
#[derive(Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    #[tracing::instrument(skip(self), fields(timeout_ms = timeout.as_millis() as u64))]
    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse, TransportError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify)?;

        tracing::debug!(status, response_len = body.len(), "Relay request completed");
        Ok(HttpResponse { status, body })
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connection(err.to_string())
    }
}

// ============================================================================
// Test/Mock Implementation
// ============================================================================

/// Scripted reply for [`MockTransport`].
#[derive(Debug, Clone)]
pub enum MockReply {
    Respond(HttpResponse),
    Fail(TransportError),
    /// Never completes; the caller's timeout has to fire.
    Hang,
}

/// Mock transport for tests.
///
/// Replies are keyed by URL prefix (typically the relay template) and served
/// FIFO. When a prefix runs out of scripted replies its last reply repeats.
/// URLs matching no prefix fail with a connection error.
#[derive(Clone, Default)]
pub struct MockTransport {
    replies: Arc<Mutex<HashMap<String, VecDeque<MockReply>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for requests whose URL starts with `prefix`.
    pub fn push(&self, prefix: &str, reply: MockReply) {
        self.replies
            .lock()
            .entry(prefix.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Queue a 200 response with a JSON body.
    pub fn push_json(&self, prefix: &str, body: serde_json::Value) {
        self.push(prefix, MockReply::Respond(HttpResponse::ok(body.to_string())));
    }

    /// URLs requested so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn next_reply(&self, url: &str) -> Option<MockReply> {
        let mut replies = self.replies.lock();
        let prefix = replies
            .keys()
            .filter(|prefix| url.starts_with(prefix.as_str()))
            .max_by_key(|prefix| prefix.len())
            .cloned()?;
        let queue = replies.get_mut(&prefix)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn get(&self, url: &str, _timeout: Duration) -> Result<HttpResponse, TransportError> {
        self.calls.lock().push(url.to_string());
        match self.next_reply(url) {
            Some(MockReply::Respond(response)) => Ok(response),
            Some(MockReply::Fail(err)) => Err(err),
            Some(MockReply::Hang) => futures::future::pending().await,
            None => Err(TransportError::Connection(format!("no mock reply for {}", url))),
        }
    }
}
