//! Component contracts for the reconciliation pipeline + third-party API adapters.

use async_trait::async_trait;
use bizsync_core::{SyncRecord, UpsertOutcome};
use bizsync_storage::{ApiError, LedgerError};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub mod a8;
pub mod keepa;
pub mod ledger;
pub mod notify;
pub mod notion;
pub mod stripe;

pub use a8::{A8Client, A8ReportSource, SampleA8Source};
pub use keepa::KeepaClient;
pub use ledger::LedgerSink;
pub use notify::{LineNotifier, LogNotifier, SlackWebhookNotifier};
pub use notion::{NotionA8Sink, NotionClient, NotionPaymentLinkSink, NotionProductSource};
pub use stripe::{StripeClient, StripeLinkExecutor};

pub const CRATE_NAME: &str = "bizsync-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Reads the records of one run. An empty result is not an error.
#[async_trait]
pub trait RecordSource<R: SyncRecord>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn read(&self) -> Result<Vec<R>, AdapterError>;
}

/// Performs the single external side effect for a selected record.
#[async_trait]
pub trait ActionExecutor<R: SyncRecord>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, record: &R) -> Result<R, AdapterError>;
}

/// Keyed insert-or-overwrite into a downstream store.
#[async_trait]
pub trait RecordSink<R: SyncRecord>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn upsert(&self, record: &R) -> Result<UpsertOutcome, AdapterError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn notify(&self, message: &str) -> Result<(), AdapterError>;
}

/// Whether an upstream value counts as present: null, false, zero and empty values do not.
pub(crate) fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(a) => !a.is_empty(),
        JsonValue::Object(o) => !o.is_empty(),
    }
}

pub(crate) fn json_to_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

pub(crate) fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
