//! Notification capability injected into the polling engine.
//!
//! The engine only knows this trait; concrete sinks (log, webhook, ...) live in
//! `parcel-notifier`.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::ChangeEvent;

/// Receives one call per detected status change.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a change event. Errors are logged by the caller and never abort a cycle.
    async fn notify(&self, event: &ChangeEvent) -> Result<()>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}
