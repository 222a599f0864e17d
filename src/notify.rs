//! Post-commit hand-off of new totals to the quota subsystem.
//!
//! Notification happens after the ledger transaction commits and is
//! best-effort: a failure is logged by the caller and never undoes the
//! committed total.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::model::LedgerUpdate;

/// Resource name the quota subsystem tracks CPU hours under.
pub const CPU_HOURS_RESOURCE: &str = "cpu.hours";

/// Receives the new total after each committed ledger update.
#[async_trait]
pub trait QuotaNotifier: Send + Sync {
    async fn notify(&self, update: &LedgerUpdate) -> Result<()>;
}

/// Wire form of a usage update as the quota subsystem consumes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageMessage {
    pub username: String,
    pub resource_name: String,
    pub usage_value: Decimal,
    /// Always "SET": the message carries the absolute total, not a delta.
    pub update_type: String,
    pub effective_date: DateTime<Utc>,
}

impl From<&LedgerUpdate> for UsageMessage {
    fn from(update: &LedgerUpdate) -> Self {
        Self {
            username: update.username.clone(),
            resource_name: CPU_HOURS_RESOURCE.to_string(),
            usage_value: update.new_total,
            update_type: "SET".to_string(),
            effective_date: update.effective_start,
        }
    }
}

/// Logs each usage message. Used when no quota transport is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl QuotaNotifier for LogNotifier {
    async fn notify(&self, update: &LedgerUpdate) -> Result<()> {
        let message = UsageMessage::from(update);
        let body = serde_json::to_string(&message)
            .map_err(|e| Error::Notify(format!("serialize usage message: {e}")))?;
        tracing::info!(user = %message.username, %body, "quota usage update");
        Ok(())
    }
}

/// Forwards usage messages to a channel, typically drained by a transport
/// task that publishes them to the message bus.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<UsageMessage>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UsageMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl QuotaNotifier for ChannelNotifier {
    async fn notify(&self, update: &LedgerUpdate) -> Result<()> {
        self.tx
            .send(UsageMessage::from(update))
            .map_err(|_| Error::Notify("usage message receiver dropped".to_string()))
    }
}
