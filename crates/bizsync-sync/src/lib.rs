//! Reconciliation pipeline orchestration: read → select → execute → upsert → notify.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bizsync_adapters::{
    ActionExecutor, AdapterError, LogNotifier, Notifier, RecordSink, RecordSource,
};
use bizsync_core::{A8Report, NaturalKey, Product, RecordStatus, SyncRecord, Tracked, UpsertOutcome};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod config;
pub mod jobs;

pub const CRATE_NAME: &str = "bizsync-sync";

/// Changed records listed individually in a notification before the rest is summarized.
pub const NOTIFY_PREVIEW_LIMIT: usize = 5;

/// Pure "needs action" predicate over a freshly read record.
pub trait Selector<R>: Send + Sync {
    fn name(&self) -> &'static str;

    fn needs_action(&self, record: &R) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SelectAll;

impl<R> Selector<R> for SelectAll {
    fn name(&self) -> &'static str {
        "all"
    }

    fn needs_action(&self, _record: &R) -> bool {
        true
    }
}

/// Active products (missing status counts as active) without a payment link.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeedsPaymentLink;

impl Selector<Product> for NeedsPaymentLink {
    fn name(&self) -> &'static str {
        "needs-payment-link"
    }

    fn needs_action(&self, record: &Product) -> bool {
        record.needs_link()
    }
}

/// Reports dated inside `[start, end]`.
#[derive(Debug, Clone, Copy)]
pub struct WithinWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Selector<A8Report> for WithinWindow {
    fn name(&self) -> &'static str {
        "within-window"
    }

    fn needs_action(&self, record: &A8Report) -> bool {
        (self.start..=self.end).contains(&record.report_date)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughExecutor;

#[async_trait]
impl<R: SyncRecord> ActionExecutor<R> for PassThroughExecutor {
    fn name(&self) -> &'static str {
        "pass-through"
    }

    async fn execute(&self, record: &R) -> Result<R, AdapterError> {
        Ok(record.clone())
    }
}

/// Logs the write it would have made.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunSink;

#[async_trait]
impl<R: SyncRecord> RecordSink<R> for DryRunSink {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    async fn upsert(&self, record: &R) -> Result<UpsertOutcome, AdapterError> {
        info!(key = %record.natural_key(), summary = %record.summary(), "[dry-run] would upsert");
        Ok(UpsertOutcome::Created)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Clean,
    CompletedWithErrors,
}

impl RunStatus {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Clean => 0,
            Self::CompletedWithErrors => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary<R> {
    pub run_id: Uuid,
    pub job: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub read: usize,
    pub selected: usize,
    pub outcomes: Vec<Tracked<R>>,
    pub notified: bool,
}

impl<R: SyncRecord> RunSummary<R> {
    fn count_status(&self, status: RecordStatus) -> usize {
        self.outcomes.iter().filter(|t| t.status == status).count()
    }

    fn count_upserts(&self, outcome: UpsertOutcome) -> usize {
        self.outcomes
            .iter()
            .filter(|t| t.upsert == Some(outcome))
            .count()
    }

    pub fn ok_count(&self) -> usize {
        self.count_status(RecordStatus::Ok)
    }

    pub fn error_count(&self) -> usize {
        self.count_status(RecordStatus::Error)
    }

    pub fn created(&self) -> usize {
        self.count_upserts(UpsertOutcome::Created)
    }

    pub fn updated(&self) -> usize {
        self.count_upserts(UpsertOutcome::Updated)
    }

    pub fn unchanged(&self) -> usize {
        self.count_upserts(UpsertOutcome::Unchanged)
    }

    pub fn changed_records(&self) -> Vec<R> {
        self.outcomes
            .iter()
            .filter(|t| t.upsert.is_some_and(|o| o.changed()))
            .map(|t| t.record.clone())
            .collect()
    }

    pub fn failures(&self) -> Vec<(NaturalKey, String)> {
        self.outcomes
            .iter()
            .filter(|t| t.status == RecordStatus::Error)
            .map(|t| {
                (
                    t.record.natural_key(),
                    t.error.clone().unwrap_or_default(),
                )
            })
            .collect()
    }

    pub fn status(&self) -> RunStatus {
        if self.error_count() > 0 {
            RunStatus::CompletedWithErrors
        } else {
            RunStatus::Clean
        }
    }

    /// Quiet when nothing was selected, or every write was a no-op and nothing failed.
    pub fn should_notify(&self) -> bool {
        self.selected > 0 && (self.error_count() > 0 || self.created() + self.updated() > 0)
    }

    pub fn render_message(&self, title: &str) -> String {
        let changed = self.changed_records();
        let mut lines = vec![
            title.to_string(),
            format!("{} ok / {} error", self.ok_count(), self.error_count()),
            format!(
                "created {} / updated {} / unchanged {}",
                self.created(),
                self.updated(),
                self.unchanged()
            ),
        ];
        if !changed.is_empty() {
            lines.extend(R::digest(&changed));
        }
        for record in changed.iter().take(NOTIFY_PREVIEW_LIMIT) {
            lines.push(format!("- {}", record.summary()));
        }
        if changed.len() > NOTIFY_PREVIEW_LIMIT {
            lines.push(format!("…and {} more", changed.len() - NOTIFY_PREVIEW_LIMIT));
        }
        let failures = self.failures();
        if !failures.is_empty() {
            lines.push("errors:".to_string());
            for (key, error) in failures.iter().take(NOTIFY_PREVIEW_LIMIT) {
                lines.push(format!("- {key}: {error}"));
            }
            if failures.len() > NOTIFY_PREVIEW_LIMIT {
                lines.push(format!("…and {} more", failures.len() - NOTIFY_PREVIEW_LIMIT));
            }
        }
        lines.join("\n")
    }
}

pub struct Reconciler<R: SyncRecord> {
    job: &'static str,
    title: String,
    source: Box<dyn RecordSource<R>>,
    selector: Box<dyn Selector<R>>,
    executor: Box<dyn ActionExecutor<R>>,
    sink: Box<dyn RecordSink<R>>,
    notifier: Box<dyn Notifier>,
}

impl<R: SyncRecord> Reconciler<R> {
    pub fn new(
        job: &'static str,
        source: Box<dyn RecordSource<R>>,
        sink: Box<dyn RecordSink<R>>,
    ) -> Self {
        Self {
            job,
            title: job.to_string(),
            source,
            selector: Box::new(SelectAll),
            executor: Box::new(PassThroughExecutor),
            sink,
            notifier: Box::new(LogNotifier),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_selector(mut self, selector: Box<dyn Selector<R>>) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_executor(mut self, executor: Box<dyn ActionExecutor<R>>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// One run. Only a failed source read is fatal; per-record and notifier failures are not.
    pub async fn run_once(&self) -> Result<RunSummary<R>> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id, job = self.job);
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid) -> Result<RunSummary<R>> {
        let started_at = Utc::now();
        info!(
            source = self.source.name(),
            selector = self.selector.name(),
            executor = self.executor.name(),
            sink = self.sink.name(),
            notifier = self.notifier.name(),
            "run started"
        );

        let records = self
            .source
            .read()
            .await
            .with_context(|| format!("reading records from {}", self.source.name()))?;
        let read = records.len();

        let mut outcomes: Vec<Tracked<R>> = records
            .into_iter()
            .filter(|record| self.selector.needs_action(record))
            .map(Tracked::pending)
            .collect();
        let selected = outcomes.len();
        info!(read, selected, skipped = read - selected, "records selected");

        for tracked in &mut outcomes {
            let key = tracked.record.natural_key();
            let updated = match self.executor.execute(&tracked.record).await {
                Ok(updated) => updated,
                Err(err) => {
                    warn!(%key, error = %err, "action failed");
                    tracked.mark_error(format!("{}: {err}", self.executor.name()));
                    continue;
                }
            };

            match self.sink.upsert(&updated).await {
                Ok(outcome) => {
                    info!(%key, ?outcome, "record upserted");
                    tracked.mark_ok(updated, outcome);
                }
                Err(err) => {
                    warn!(%key, error = %err, "upsert failed");
                    tracked.record = updated;
                    tracked.mark_error(format!("{}: {err}", self.sink.name()));
                }
            }
        }

        let mut summary = RunSummary {
            run_id,
            job: self.job.to_string(),
            started_at,
            finished_at: Utc::now(),
            read,
            selected,
            outcomes,
            notified: false,
        };

        if summary.should_notify() {
            let message = summary.render_message(&self.title);
            match self.notifier.notify(&message).await {
                Ok(()) => summary.notified = true,
                Err(err) => warn!(notifier = self.notifier.name(), error = %err, "notification failed"),
            }
        } else {
            info!("nothing changed; notification skipped");
        }

        summary.finished_at = Utc::now();
        info!(
            ok = summary.ok_count(),
            errors = summary.error_count(),
            created = summary.created(),
            updated = summary.updated(),
            "run finished"
        );
        Ok(summary)
    }
}
