//! CSV ledger sink: keyed upserts into a flat file, saved after every change.

use std::marker::PhantomData;

use async_trait::async_trait;
use bizsync_core::{RecordStatus, SyncRecord, UpsertOutcome};
use bizsync_storage::{Ledger, LedgerStore};
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{AdapterError, RecordSink};

pub const SYNC_STATUS_COLUMN: &str = "sync_status";
pub const SYNCED_AT_COLUMN: &str = "synced_at";

pub struct LedgerSink<R> {
    store: LedgerStore,
    ledger: Mutex<Ledger>,
    _record: PhantomData<fn() -> R>,
}

impl<R: SyncRecord> LedgerSink<R> {
    pub async fn open(store: LedgerStore, key_column: &str) -> anyhow::Result<Self> {
        let ledger = store.load(key_column).await?;
        debug!(path = %store.path().display(), rows = ledger.len(), "opened ledger");
        Ok(Self {
            store,
            ledger: Mutex::new(ledger),
            _record: PhantomData,
        })
    }

    pub async fn snapshot(&self) -> Ledger {
        self.ledger.lock().await.clone()
    }
}

#[async_trait]
impl<R: SyncRecord> RecordSink<R> for LedgerSink<R> {
    fn name(&self) -> &'static str {
        "csv-ledger"
    }

    async fn upsert(&self, record: &R) -> Result<UpsertOutcome, AdapterError> {
        let mut fields: Vec<(&str, String)> = record.ledger_fields();
        fields.push((SYNC_STATUS_COLUMN, RecordStatus::Ok.as_str().to_string()));

        let mut ledger = self.ledger.lock().await;
        let outcome = ledger.upsert(&fields)?;
        if outcome.changed() {
            let key = record.natural_key();
            // The key column value is whatever the record put in that column.
            let key_value = fields
                .iter()
                .find(|(column, _)| *column == ledger.key_column())
                .map(|(_, value)| value.clone())
                .unwrap_or_else(|| key.to_string());
            ledger.set(&key_value, SYNCED_AT_COLUMN, Utc::now().to_rfc3339())?;
            self.store.save(&ledger).await?;
        }
        Ok(outcome)
    }
}
