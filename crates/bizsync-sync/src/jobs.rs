//! The three scheduled jobs, wired from config into reconcilers.

use std::path::PathBuf;

use anyhow::{Context, Result};
use bizsync_adapters::keepa::{connectivity_message, product_title, KEEPA_API_BASE};
use bizsync_adapters::notify::LINE_NOTIFY_URL;
use bizsync_adapters::notion::NOTION_API_BASE;
use bizsync_adapters::stripe::STRIPE_API_BASE;
use bizsync_adapters::{
    A8Client, A8ReportSource, KeepaClient, LedgerSink, LineNotifier, LogNotifier,
    NotionA8Sink, NotionClient, NotionPaymentLinkSink, NotionProductSource, Notifier,
    RecordSink, RecordSource, SampleA8Source, SlackWebhookNotifier, StripeClient,
    StripeLinkExecutor,
};
use bizsync_core::{A8Report, Product};
use bizsync_storage::{ApiClient, LedgerStore};
use chrono::{Days, NaiveDate};
use tracing::{info, warn};

use crate::config::{A8Needs, A8SyncConfig, ConfigError, KeepaCheckConfig, StripeLinksConfig};
use crate::{DryRunSink, NeedsPaymentLink, Reconciler, RunSummary, WithinWindow};

pub const STRIPE_LINKS_JOB: &str = "stripe-links";
pub const A8_SYNC_JOB: &str = "a8-sync";
pub const KEEPA_CHECK_JOB: &str = "keepa-check";

/// Ledger rows are keyed by the A8 report's natural key column.
pub const A8_LEDGER_KEY_COLUMN: &str = "key";

/// Base URLs of the upstream services; overridden in tests.
#[derive(Debug, Clone)]
pub struct ApiEndpoints {
    pub notion: String,
    pub stripe: String,
    pub keepa: String,
    pub line_notify: String,
}

impl Default for ApiEndpoints {
    fn default() -> Self {
        Self {
            notion: NOTION_API_BASE.to_string(),
            stripe: STRIPE_API_BASE.to_string(),
            keepa: KEEPA_API_BASE.to_string(),
            line_notify: LINE_NOTIFY_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StripeLinksOptions {
    pub dry_run: bool,
}

pub async fn run_stripe_links(
    config: &StripeLinksConfig,
    options: StripeLinksOptions,
    endpoints: &ApiEndpoints,
) -> Result<RunSummary<Product>> {
    let api = ApiClient::new(config.http.client_config())?;
    let notion = NotionClient::new(api.clone(), &config.notion_token).with_base_url(&endpoints.notion);
    let source = NotionProductSource::new(notion.clone(), &config.notion_db_id);

    let reconciler = if options.dry_run {
        info!("dry run: no payment links are created and nothing is written back");
        Reconciler::new(STRIPE_LINKS_JOB, Box::new(source), Box::new(DryRunSink))
    } else {
        let secret_key = config
            .stripe_secret_key
            .as_deref()
            .ok_or(ConfigError::Missing("STRIPE_SECRET_KEY"))?;
        let stripe = StripeClient::new(api.clone(), secret_key).with_base_url(&endpoints.stripe);
        let notifier: Box<dyn Notifier> = match &config.slack_webhook_url {
            Some(url) => Box::new(SlackWebhookNotifier::new(api.clone(), url)),
            None => Box::new(LogNotifier),
        };
        Reconciler::new(
            STRIPE_LINKS_JOB,
            Box::new(source),
            Box::new(NotionPaymentLinkSink::new(notion)),
        )
        .with_executor(Box::new(StripeLinkExecutor::new(stripe)))
        .with_notifier(notifier)
    };

    reconciler
        .with_selector(Box::new(NeedsPaymentLink))
        .with_title("Stripe payment links")
        .run_once()
        .await
}

#[derive(Debug, Clone)]
pub struct A8SyncOptions {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub use_sample_data: bool,
    pub skip_notion: bool,
    pub skip_line: bool,
    pub self_test: bool,
    pub dry_run: bool,
    pub ledger: Option<PathBuf>,
    pub today: NaiveDate,
}

impl A8SyncOptions {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            start: None,
            end: None,
            use_sample_data: false,
            skip_notion: false,
            skip_line: false,
            self_test: false,
            dry_run: false,
            ledger: None,
            today,
        }
    }

    pub fn sample_data(&self) -> bool {
        self.use_sample_data || self.self_test
    }

    pub fn writes_notion(&self) -> bool {
        !(self.skip_notion || self.self_test || self.dry_run) && self.ledger.is_none()
    }

    /// Dry runs never write, not even to a ledger file.
    pub fn ledger_path(&self) -> Option<&PathBuf> {
        self.ledger.as_ref().filter(|_| !self.dry_run)
    }

    pub fn sends_line(&self) -> bool {
        !(self.skip_line || self.self_test || self.dry_run)
    }

    pub fn needs(&self) -> A8Needs {
        A8Needs {
            live_source: !self.sample_data(),
            notion: self.writes_notion(),
            line: self.sends_line(),
        }
    }

    /// `[today - lookback, today]` unless overridden; an inverted window is rejected.
    pub fn window(&self, lookback_days: u32) -> Result<(NaiveDate, NaiveDate), ConfigError> {
        let end = self.end.unwrap_or(self.today);
        let start = match self.start {
            Some(start) => start,
            None => self
                .today
                .checked_sub_days(Days::new(u64::from(lookback_days)))
                .ok_or_else(|| ConfigError::Invalid {
                    key: "A8_LOOKBACK_DAYS",
                    message: format!("{lookback_days} days reaches before the calendar start"),
                })?,
        };
        if start > end {
            return Err(ConfigError::Invalid {
                key: "--start",
                message: format!("start date {start} is after end date {end}"),
            });
        }
        Ok((start, end))
    }
}

pub async fn run_a8_sync(
    config: &A8SyncConfig,
    options: &A8SyncOptions,
    endpoints: &ApiEndpoints,
) -> Result<RunSummary<A8Report>> {
    let (start, end) = options.window(config.lookback_days)?;
    let api = ApiClient::new(config.http.client_config())?;
    info!(%start, %end, sample = options.sample_data(), "A8 sync window");

    let source: Box<dyn RecordSource<A8Report>> = if options.sample_data() {
        // Samples are anchored on the window end so an explicit window still selects them.
        Box::new(SampleA8Source::new(end))
    } else {
        let key = config
            .a8_api_key
            .as_deref()
            .ok_or(ConfigError::Missing("A8_API_KEY"))?;
        let client = A8Client::new(api.clone(), key, &config.a8_api_url);
        Box::new(A8ReportSource::new(client, start, end))
    };

    let sink: Box<dyn RecordSink<A8Report>> = if let Some(path) = options.ledger_path() {
        let sink = LedgerSink::<A8Report>::open(LedgerStore::new(path), A8_LEDGER_KEY_COLUMN)
            .await
            .with_context(|| format!("opening ledger {}", path.display()))?;
        Box::new(sink)
    } else if options.writes_notion() {
        let token = config
            .notion_token
            .as_deref()
            .ok_or(ConfigError::Missing("NOTION_TOKEN"))?;
        let database_id = config
            .notion_a8_db_id
            .as_deref()
            .ok_or(ConfigError::Missing("NOTION_A8_DB_ID"))?;
        let notion = NotionClient::new(api.clone(), token).with_base_url(&endpoints.notion);
        Box::new(NotionA8Sink::new(notion, database_id))
    } else {
        Box::new(DryRunSink)
    };

    let notifier: Box<dyn Notifier> = if options.sends_line() {
        let token = config
            .line_token
            .as_deref()
            .ok_or(ConfigError::Missing("LINE_TOKEN"))?;
        Box::new(LineNotifier::new(api.clone(), token).with_endpoint(&endpoints.line_notify))
    } else {
        Box::new(LogNotifier)
    };

    Reconciler::new(A8_SYNC_JOB, source, sink)
        .with_selector(Box::new(WithinWindow { start, end }))
        .with_notifier(notifier)
        .with_title(format!("A8 report {start} - {end}"))
        .run_once()
        .await
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepaCheckReport {
    pub asin: String,
    pub title: Option<String>,
    pub notified: bool,
}

/// A failed lookup is fatal; a failed Slack post is only logged.
pub async fn run_keepa_check(
    config: &KeepaCheckConfig,
    asin: Option<&str>,
    endpoints: &ApiEndpoints,
) -> Result<KeepaCheckReport> {
    let asin = asin.unwrap_or(&config.test_asin).to_string();
    let api = ApiClient::new(config.http.client_config())?;
    let keepa = KeepaClient::new(api.clone(), &config.keepa_api_key, config.domain)
        .with_base_url(&endpoints.keepa);

    let payload = keepa
        .fetch_product(&asin)
        .await
        .with_context(|| format!("keepa lookup for {asin}"))?;
    let title = product_title(&payload).map(str::to_string);
    info!(%asin, title = title.as_deref().unwrap_or("-"), "keepa reachable");

    let slack = SlackWebhookNotifier::new(api, &config.slack_webhook_url);
    let notified = match slack.notify(&connectivity_message(&asin, &payload)).await {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, "slack notification failed");
            false
        }
    };

    Ok(KeepaCheckReport {
        asin,
        title,
        notified,
    })
}
