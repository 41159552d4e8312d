//! A8.net result reports: fetching and normalization of loosely shaped rows.

use async_trait::async_trait;
use bizsync_core::{A8Report, DEFAULT_PROGRAM, DEFAULT_REPORT_STATUS};
use bizsync_storage::ApiClient;
use chrono::{Days, NaiveDate};
use reqwest::Method;
use serde_json::{json, Map, Value as JsonValue};
use tracing::{info, warn};

use crate::{is_truthy, json_to_text, AdapterError, RecordSource};

pub const DEFAULT_A8_API_URL: &str = "https://api.a8.net/asp/v1/report";

const RECORD_LIST_KEYS: &[&str] = &["reports", "data", "results", "items", "list"];
const DATE_KEYS: &[&str] = &["date", "report_date", "ymd"];
const PROGRAM_KEYS: &[&str] = &["program", "program_name", "advertiser", "programName"];
const STATUS_KEYS: &[&str] = &["status", "state", "approval_status"];
const REWARD_KEYS: &[&str] = &["reward", "reward_amount", "commission", "price"];
const RESULT_KEYS: &[&str] = &["result", "action", "summary", "description"];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"];

pub type RawRecord = Map<String, JsonValue>;

fn first_truthy<'a>(record: &'a RawRecord, keys: &[&str]) -> Option<&'a JsonValue> {
    keys.iter()
        .filter_map(|key| record.get(*key))
        .find(|value| is_truthy(value))
}

/// Amounts arrive as numbers or as strings like `"¥1,200"`. Anything else counts as zero.
pub fn parse_reward(value: Option<&JsonValue>) -> f64 {
    match value {
        None | Some(JsonValue::Null) => 0.0,
        Some(JsonValue::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(JsonValue::String(s)) => {
            let cleaned = s.replace([',', '¥'], "");
            match cleaned.trim().parse::<f64>() {
                Ok(v) => v,
                Err(_) => {
                    warn!(value = %s, "could not parse reward value; defaulting to 0");
                    0.0
                }
            }
        }
        Some(other) => {
            warn!(value = %other, "unexpected reward value; defaulting to 0");
            0.0
        }
    }
}

/// Accepts the first ten characters in any of the known layouts; otherwise `fallback`.
pub fn parse_date(value: Option<&JsonValue>, fallback: NaiveDate) -> NaiveDate {
    let Some(JsonValue::String(text)) = value else {
        return fallback;
    };
    let head: String = text.chars().take(10).collect();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&head, fmt).ok())
        .unwrap_or(fallback)
}

pub fn parse_date_arg(text: &str) -> Option<NaiveDate> {
    let head: String = text.trim().chars().take(10).collect();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&head, fmt).ok())
}

/// Rows without a usable date are dated `fallback_date`.
pub fn normalize_record(record: &RawRecord, fallback_date: NaiveDate) -> A8Report {
    let program = first_truthy(record, PROGRAM_KEYS)
        .map(json_to_text)
        .unwrap_or_else(|| DEFAULT_PROGRAM.to_string());
    let status = first_truthy(record, STATUS_KEYS)
        .map(json_to_text)
        .unwrap_or_else(|| DEFAULT_REPORT_STATUS.to_string());
    let result = first_truthy(record, RESULT_KEYS)
        .map(json_to_text)
        .unwrap_or_default();

    A8Report {
        report_date: parse_date(first_truthy(record, DATE_KEYS), fallback_date),
        program,
        status,
        reward: parse_reward(first_truthy(record, REWARD_KEYS)),
        result,
        raw: JsonValue::Object(record.clone()),
    }
}

/// Locates the row list inside the known payload envelopes.
pub fn extract_records(payload: &JsonValue) -> Vec<RawRecord> {
    let list = match payload {
        JsonValue::Array(items) => Some(items),
        JsonValue::Object(obj) => RECORD_LIST_KEYS
            .iter()
            .find_map(|key| obj.get(*key).and_then(JsonValue::as_array)),
        _ => None,
    };
    match list {
        Some(items) => items
            .iter()
            .filter_map(|item| item.as_object().cloned())
            .collect(),
        None => {
            warn!("unrecognized A8 payload shape; treating as empty");
            Vec::new()
        }
    }
}

pub fn parse_csv_records(text: &str) -> Result<Vec<RawRecord>, AdapterError> {
    let mut reader = csv::Reader::from_reader(text.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| AdapterError::Message(format!("reading A8 csv header: {e}")))?
        .clone();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| AdapterError::Message(format!("reading A8 csv row: {e}")))?;
        rows.push(
            headers
                .iter()
                .zip(record.iter())
                .map(|(h, v)| (h.to_string(), JsonValue::String(v.to_string())))
                .collect(),
        );
    }
    Ok(rows)
}

/// Two canned rows for self-tests: one for today, one for yesterday.
pub fn sample_reports(today: NaiveDate) -> Vec<A8Report> {
    let yesterday = today.checked_sub_days(Days::new(1)).unwrap_or(today);
    let rows = [
        json!({
            "report_date": today.format("%Y-%m-%d").to_string(),
            "program": "Sample Shop A",
            "status": "approved",
            "reward": "1,200",
            "result": "order #1234",
        }),
        json!({
            "report_date": yesterday.format("%Y-%m-%d").to_string(),
            "program": "Test Campaign B",
            "status": "pending",
            "reward": 450,
            "result": "25 clicks",
        }),
    ];
    rows.iter()
        .filter_map(JsonValue::as_object)
        .map(|row| normalize_record(row, today))
        .collect()
}

#[derive(Debug, Clone)]
pub struct A8Client {
    api: ApiClient,
    api_key: String,
    url: String,
}

impl A8Client {
    pub fn new(api: ApiClient, api_key: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            api,
            api_key: api_key.into(),
            url: url.into(),
        }
    }

    /// Undated rows are dated `end` so they always fall inside the requested window.
    pub async fn fetch_reports(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<A8Report>, AdapterError> {
        info!(%start, %end, "fetching A8 reports");
        let request = self
            .api
            .request(Method::GET, &self.url)
            .bearer_auth(&self.api_key)
            .query(&[
                ("start_date", start.format("%Y-%m-%d").to_string()),
                ("end_date", end.format("%Y-%m-%d").to_string()),
            ]);
        let resp = self.api.send(request).await?;

        let records = if resp.is_json() {
            extract_records(&resp.json::<JsonValue>()?)
        } else {
            parse_csv_records(&resp.text())?
        };
        let reports: Vec<A8Report> = records
            .iter()
            .map(|record| normalize_record(record, end))
            .collect();
        info!(rows = reports.len(), "received A8 report rows");
        Ok(reports)
    }
}

#[derive(Debug, Clone)]
pub struct A8ReportSource {
    client: A8Client,
    start: NaiveDate,
    end: NaiveDate,
}

impl A8ReportSource {
    pub fn new(client: A8Client, start: NaiveDate, end: NaiveDate) -> Self {
        Self { client, start, end }
    }
}

#[async_trait]
impl RecordSource<A8Report> for A8ReportSource {
    fn name(&self) -> &'static str {
        "a8-api"
    }

    async fn read(&self) -> Result<Vec<A8Report>, AdapterError> {
        self.client
            .fetch_reports(self.start, self.end)
            .await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SampleA8Source {
    today: NaiveDate,
}

impl SampleA8Source {
    pub fn new(today: NaiveDate) -> Self {
        Self { today }
    }
}

#[async_trait]
impl RecordSource<A8Report> for SampleA8Source {
    fn name(&self) -> &'static str {
        "a8-sample"
    }

    async fn read(&self) -> Result<Vec<A8Report>, AdapterError> {
        Ok(sample_reports(self.today))
    }
}
