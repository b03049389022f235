//! Notification sinks for detected status changes.
//!
//! Every sink implements [`Notifier`] from `parcel-common`:
//! - [`LogNotifier`]: structured log line per change (default when no webhook is configured)
//! - [`DiscordWebhookNotifier`]: one embed per change, POSTed to a Discord webhook
//! - [`FanoutNotifier`]: delivers to several sinks, attempting all of them

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Local, Offset, Utc};
use serde::Serialize;

use parcel_common::error::{AppError, Result};
use parcel_common::notify::Notifier;
use parcel_common::types::ChangeEvent;

// ============================================================
// Log
// ============================================================

/// Writes each change as a structured `info` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &ChangeEvent) -> Result<()> {
        tracing::info!(
            code = %event.code,
            note = %event.note,
            status = %event.raw_status_id,
            previous_status = %event.previous_status_id,
            description = %event.description,
            status_timestamp = ?event.status_timestamp,
            "Shipment status changed"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

// ============================================================
// Discord webhook
// ============================================================

pub const EMBED_TITLE: &str = "📦 Shipment status update";
pub const EMBED_COLOR: u32 = 5_814_783;

/// Same budget as a relay lookup.
pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Serialize)]
pub struct WebhookPayload {
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Serialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub color: u32,
    pub timestamp: String,
}

/// Posts changes to a Discord webhook.
pub struct DiscordWebhookNotifier {
    client: reqwest::Client,
    webhook_url: String,
    utc_offset: FixedOffset,
}

impl DiscordWebhookNotifier {
    /// Status times are rendered in the host's local offset.
    pub fn new(webhook_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(webhook_url, DEFAULT_WEBHOOK_TIMEOUT)
    }

    /// Every POST gives up after `timeout`.
    pub fn with_timeout(webhook_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            webhook_url: webhook_url.into(),
            utc_offset: Local::now().offset().fix(),
        })
    }

    pub fn with_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.utc_offset = offset;
        self
    }

    pub fn build_payload(&self, event: &ChangeEvent, sent_at: DateTime<Utc>) -> WebhookPayload {
        WebhookPayload {
            embeds: vec![Embed {
                title: EMBED_TITLE.to_string(),
                description: format_message(event, &self.utc_offset),
                color: EMBED_COLOR,
                timestamp: sent_at.to_rfc3339(),
            }],
        }
    }
}

/// Markdown body of one change.
pub fn format_message(event: &ChangeEvent, offset: &FixedOffset) -> String {
    let note = if event.note.is_empty() {
        String::new()
    } else {
        format!(" ({})", event.note)
    };
    let time = event
        .status_timestamp
        .map(|ts| format_status_time(ts, offset))
        .unwrap_or_default();
    let previous = if event.previous_status_id.is_empty() {
        "N/A"
    } else {
        event.previous_status_id.as_str()
    };

    format!(
        "**{}**{}\n🔄 Status code: {}\n📝 Details: {}\n⏰ Time: {}\n📍 Previous status: {}",
        event.code, note, event.raw_status_id, event.description, time, previous
    )
}

/// `dd/mm/yyyy HH:MM` in the given offset; empty for an out-of-range timestamp.
pub fn format_status_time(timestamp: i64, offset: &FixedOffset) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.with_timezone(offset).format("%d/%m/%Y %H:%M").to_string())
        .unwrap_or_default()
}

#[async_trait]
impl Notifier for DiscordWebhookNotifier {
    async fn notify(&self, event: &ChangeEvent) -> Result<()> {
        let payload = self.build_payload(event, Utc::now());

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Notification(format!(
                "discord webhook returned HTTP {}",
                status.as_u16()
            )));
        }

        tracing::info!(code = %event.code, status = status.as_u16(), "Discord notification sent");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "discord"
    }
}

// ============================================================
// Fan-out
// ============================================================

/// Delivers every event to all inner sinks; returns the first error after trying them all.
#[derive(Clone, Default)]
pub struct FanoutNotifier {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(sinks: Vec<Arc<dyn Notifier>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn Notifier>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn notify(&self, event: &ChangeEvent) -> Result<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.notify(event).await {
                tracing::warn!(sink = sink.name(), code = %event.code, error = %e, "Sink failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn name(&self) -> &'static str {
        "fanout"
    }
}
