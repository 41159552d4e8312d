//! Core record model for the bizsync reconciliation jobs.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const CRATE_NAME: &str = "bizsync-core";

pub const DEFAULT_PRODUCT_STATUS: &str = "Active";
pub const DEFAULT_CURRENCY: &str = "JPY";
pub const DEFAULT_PROGRAM: &str = "Unknown Program";
pub const DEFAULT_REPORT_STATUS: &str = "pending";

/// Currencies whose Stripe amounts are expressed without minor units.
pub const ZERO_DECIMAL_CURRENCIES: &[&str] = &[
    "BIF", "CLP", "DJF", "GNF", "JPY", "KMF", "KRW", "MGA", "PYG", "RWF", "UGX", "VND", "VUV",
    "XAF", "XOF", "XPF",
];

pub fn is_zero_decimal(currency: &str) -> bool {
    let upper = currency.trim().to_ascii_uppercase();
    ZERO_DECIMAL_CURRENCIES.contains(&upper.as_str())
}

/// External identifier that determines a record across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NaturalKey(String);

impl NaturalKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pipeline state of a record within one run. `Pending` moves to exactly one of the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordStatus {
    #[default]
    Pending,
    Ok,
    Error,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Ok => "OK",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a keyed write did to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

impl UpsertOutcome {
    pub fn changed(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Contract every reconciled record type fulfils.
pub trait SyncRecord: Clone + Send + Sync + 'static {
    fn natural_key(&self) -> NaturalKey;

    /// One-line human summary used in logs and notifications.
    fn summary(&self) -> String;

    /// Flat column/value pairs for ledger sinks. The natural key column comes first.
    fn ledger_fields(&self) -> Vec<(&'static str, String)>;

    /// Extra run-level summary lines computed over the changed records.
    fn digest(_records: &[Self]) -> Vec<String> {
        Vec::new()
    }
}

/// A record as it moves through one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tracked<R> {
    pub record: R,
    pub status: RecordStatus,
    pub error: Option<String>,
    pub upsert: Option<UpsertOutcome>,
}

impl<R> Tracked<R> {
    pub fn pending(record: R) -> Self {
        Self {
            record,
            status: RecordStatus::Pending,
            error: None,
            upsert: None,
        }
    }

    pub fn mark_ok(&mut self, record: R, outcome: UpsertOutcome) {
        self.record = record;
        self.status = RecordStatus::Ok;
        self.error = None;
        self.upsert = Some(outcome);
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = RecordStatus::Error;
        self.error = Some(message.into());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProductType {
    #[default]
    OneTime,
    Subscription,
}

impl ProductType {
    pub const ONE_TIME_LABEL: &'static str = "単発";
    pub const SUBSCRIPTION_LABEL: &'static str = "サブスク";

    /// Unknown or missing labels fall back to a one-time purchase.
    pub fn from_label(label: Option<&str>) -> Self {
        match label.map(str::trim) {
            Some(Self::SUBSCRIPTION_LABEL) => Self::Subscription,
            _ => Self::OneTime,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::OneTime => Self::ONE_TIME_LABEL,
            Self::Subscription => Self::SUBSCRIPTION_LABEL,
        }
    }
}

/// A row of the products database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub page_id: String,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub currency: String,
    pub product_type: ProductType,
    pub payment_link: Option<String>,
    pub status: Option<String>,
}

impl Product {
    /// Status with the documented default applied when the field is missing.
    pub fn effective_status(&self) -> &str {
        self.status
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_PRODUCT_STATUS)
    }

    pub fn is_active(&self) -> bool {
        self.effective_status() == DEFAULT_PRODUCT_STATUS
    }

    pub fn has_payment_link(&self) -> bool {
        self.payment_link
            .as_deref()
            .is_some_and(|link| !link.trim().is_empty())
    }

    pub fn needs_link(&self) -> bool {
        self.is_active() && !self.has_payment_link()
    }

    pub fn price_label(&self) -> String {
        let code = self.currency.trim().to_ascii_uppercase();
        let symbol = match code.as_str() {
            "JPY" => "¥",
            "USD" => "$",
            other => other,
        };
        let amount = if is_zero_decimal(&code) {
            group_thousands(&format!("{}", self.price.round() as i64))
        } else {
            group_thousands(&format!("{:.2}", self.price))
        };
        format!("{symbol}{amount}")
    }
}

impl SyncRecord for Product {
    fn natural_key(&self) -> NaturalKey {
        NaturalKey::new(self.page_id.clone())
    }

    fn summary(&self) -> String {
        format!(
            "{} ({}) -> {}",
            self.name,
            self.price_label(),
            self.payment_link.as_deref().unwrap_or("-")
        )
    }

    fn ledger_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("page_id", self.page_id.clone()),
            ("name", self.name.clone()),
            ("price", self.price.to_string()),
            ("currency", self.currency.clone()),
            ("product_type", self.product_type.label().to_string()),
            ("payment_link", self.payment_link.clone().unwrap_or_default()),
            ("status", self.effective_status().to_string()),
        ]
    }
}

/// One line of the affiliate network's result report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct A8Report {
    pub report_date: NaiveDate,
    pub program: String,
    pub status: String,
    pub reward: f64,
    pub result: String,
    pub raw: JsonValue,
}

impl A8Report {
    pub fn reward_label(&self) -> String {
        format_amount(self.reward)
    }
}

impl SyncRecord for A8Report {
    fn natural_key(&self) -> NaturalKey {
        NaturalKey::new(format!("{}:{}", self.report_date.format("%Y-%m-%d"), self.program))
    }

    fn summary(&self) -> String {
        format!(
            "{} {} / {} / reward {}",
            self.report_date.format("%Y-%m-%d"),
            self.program,
            self.status,
            self.reward_label()
        )
    }

    fn ledger_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("key", self.natural_key().to_string()),
            ("date", self.report_date.format("%Y-%m-%d").to_string()),
            ("program", self.program.clone()),
            ("status", self.status.clone()),
            ("reward", self.reward.to_string()),
            ("result", self.result.clone()),
        ]
    }

    fn digest(records: &[Self]) -> Vec<String> {
        let total: f64 = records.iter().map(|r| r.reward).sum();
        vec![format!("reward total: {}", group_thousands(&format!("{}", total.round() as i64)))]
    }
}

/// Whole amounts print without decimals, fractional ones with two.
pub fn format_amount(amount: f64) -> String {
    if amount.fract() == 0.0 {
        group_thousands(&format!("{}", amount as i64))
    } else {
        group_thousands(&format!("{amount:.2}"))
    }
}

fn group_thousands(number: &str) -> String {
    let (sign, unsigned) = match number.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", number),
    };
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };
    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (idx, ch) in int_part.chars().enumerate() {
        if idx > 0 && (int_part.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    match frac_part {
        Some(frac) => format!("{sign}{grouped}.{frac}"),
        None => format!("{sign}{grouped}"),
    }
}
