//! HTTP API client + flat-file ledger storage for bizsync.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use bizsync_core::UpsertOutcome;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "bizsync-storage";

/// Upstream error bodies are cut to this many characters before they reach logs.
pub const ERROR_BODY_PREVIEW_CHARS: usize = 400;

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn is_json(&self) -> bool {
        self.content_type.to_ascii_lowercase().contains("json")
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body).map_err(|source| ApiError::Decode {
            url: strip_query(&self.final_url),
            source,
        })
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("http status {status} for {url}: {body}")]
    HttpStatus {
        status: u16,
        url: String,
        body: String,
    },
    #[error("decoding response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

// Transport errors embed the full request URL, query string included.
impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        Self::Request(err.without_url())
    }
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            Self::Request(err) => err.status().map(|s| s.as_u16()),
            Self::Decode { .. } => None,
        }
    }
}

/// Thin wrapper over a shared reqwest client. Every call is attempted exactly once.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url)
    }

    pub async fn send(&self, request: RequestBuilder) -> Result<ApiResponse, ApiError> {
        let request = request.build()?;
        // Query strings may carry API keys, so only host and path are recorded.
        let span = info_span!(
            "api_call",
            method = %request.method(),
            host = request.url().host_str().unwrap_or_default(),
            path = request.url().path(),
        );

        async move {
            let resp = self.client.execute(request).await?;
            let status = resp.status();
            let final_url = resp.url().to_string();
            let content_type = resp
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let body = resp.bytes().await?.to_vec();

            if !status.is_success() {
                let preview: String = String::from_utf8_lossy(&body)
                    .chars()
                    .take(ERROR_BODY_PREVIEW_CHARS)
                    .collect();
                return Err(ApiError::HttpStatus {
                    status: status.as_u16(),
                    url: strip_query(&final_url),
                    body: preview,
                });
            }

            Ok(ApiResponse {
                status,
                final_url,
                content_type,
                body,
            })
        }
        .instrument(span)
        .await
    }

    pub async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        self.send(request).await?.json()
    }
}

fn strip_query(url: &str) -> String {
    url.split('?').next().unwrap_or(url).to_string()
}

pub type LedgerRow = BTreeMap<String, String>;

/// In-memory view of a CSV ledger: one row per natural key, columns in first-seen order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    key_column: String,
    columns: Vec<String>,
    rows: Vec<LedgerRow>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("ledger row is missing key column `{0}`")]
    MissingKey(String),
    #[error("ledger has no row keyed `{0}`")]
    UnknownKey(String),
}

impl Ledger {
    pub fn new(key_column: impl Into<String>) -> Self {
        let key_column = key_column.into();
        Self {
            columns: vec![key_column.clone()],
            key_column,
            rows: Vec::new(),
        }
    }

    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[LedgerRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&LedgerRow> {
        self.position(key).map(|idx| &self.rows[idx])
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.rows
            .iter()
            .position(|row| row.get(&self.key_column).map(String::as_str) == Some(key))
    }

    fn ensure_column(&mut self, column: &str) {
        if !self.columns.iter().any(|c| c == column) {
            self.columns.push(column.to_string());
        }
    }

    /// Insert-or-overwrite by the key column. Only the given fields are compared and written.
    pub fn upsert<S: AsRef<str>>(&mut self, fields: &[(S, String)]) -> Result<UpsertOutcome, LedgerError> {
        let key = fields
            .iter()
            .find(|(column, _)| column.as_ref() == self.key_column)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| LedgerError::MissingKey(self.key_column.clone()))?;

        for (column, _) in fields {
            self.ensure_column(column.as_ref());
        }

        match self.position(&key) {
            Some(idx) => {
                let row = &mut self.rows[idx];
                let unchanged = fields
                    .iter()
                    .all(|(column, value)| row.get(column.as_ref()) == Some(value));
                if unchanged {
                    return Ok(UpsertOutcome::Unchanged);
                }
                for (column, value) in fields {
                    row.insert(column.as_ref().to_string(), value.clone());
                }
                Ok(UpsertOutcome::Updated)
            }
            None => {
                let row = fields
                    .iter()
                    .map(|(column, value)| (column.as_ref().to_string(), value.clone()))
                    .collect();
                self.rows.push(row);
                Ok(UpsertOutcome::Created)
            }
        }
    }

    pub fn set(&mut self, key: &str, column: &str, value: impl Into<String>) -> Result<(), LedgerError> {
        let idx = self
            .position(key)
            .ok_or_else(|| LedgerError::UnknownKey(key.to_string()))?;
        self.ensure_column(column);
        self.rows[idx].insert(column.to_string(), value.into());
        Ok(())
    }

    /// Parse CSV with a header row. A key seen twice keeps one row, later values winning.
    pub fn from_csv(key_column: &str, bytes: &[u8]) -> anyhow::Result<Self> {
        let mut ledger = Self::new(key_column);
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(ledger);
        }

        let mut reader = csv::Reader::from_reader(bytes);
        let headers = reader.headers().context("reading ledger header")?.clone();
        if !headers.iter().any(|h| h == key_column) {
            anyhow::bail!("ledger header has no `{key_column}` column");
        }
        for header in headers.iter() {
            ledger.ensure_column(header);
        }

        for (line, record) in reader.records().enumerate() {
            let record = record.with_context(|| format!("reading ledger row {}", line + 1))?;
            let fields: Vec<(&str, String)> = headers
                .iter()
                .zip(record.iter())
                .map(|(h, v)| (h, v.to_string()))
                .collect();
            ledger.upsert(&fields)?;
        }
        Ok(ledger)
    }

    pub fn to_csv(&self) -> anyhow::Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(&self.columns)
            .context("writing ledger header")?;
        for row in &self.rows {
            writer
                .write_record(
                    self.columns
                        .iter()
                        .map(|c| row.get(c).map(String::as_str).unwrap_or_default()),
                )
                .context("writing ledger row")?;
        }
        writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("flushing ledger csv: {e}"))
    }
}

#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty ledger.
    pub async fn load(&self, key_column: &str) -> anyhow::Result<Ledger> {
        if !fs::try_exists(&self.path)
            .await
            .with_context(|| format!("checking ledger path {}", self.path.display()))?
        {
            return Ok(Ledger::new(key_column));
        }
        let bytes = fs::read(&self.path)
            .await
            .with_context(|| format!("reading ledger {}", self.path.display()))?;
        Ledger::from_csv(key_column, &bytes)
            .with_context(|| format!("parsing ledger {}", self.path.display()))
    }

    /// Replace the ledger file atomically via a temp file in the same directory.
    pub async fn save(&self, ledger: &Ledger) -> anyhow::Result<()> {
        let bytes = ledger.to_csv()?;
        let parent = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating ledger directory {}", parent.display()))?;

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp ledger file {}", temp_path.display()))?;
        file.write_all(&bytes)
            .await
            .with_context(|| format!("writing temp ledger file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp ledger file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming temp ledger {} -> {}",
                    temp_path.display(),
                    self.path.display()
                )
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn row(key: &str, status: &str) -> Vec<(&'static str, String)> {
        vec![("key", key.to_string()), ("status", status.to_string())]
    }

    #[test]
    fn upsert_by_existing_key_never_grows_the_ledger() {
        let mut ledger = Ledger::new("key");
        assert_eq!(ledger.upsert(&row("a", "pending")).unwrap(), UpsertOutcome::Created);
        assert_eq!(ledger.upsert(&row("b", "pending")).unwrap(), UpsertOutcome::Created);
        assert_eq!(ledger.len(), 2);

        assert_eq!(ledger.upsert(&row("a", "approved")).unwrap(), UpsertOutcome::Updated);
        assert_eq!(ledger.upsert(&row("a", "approved")).unwrap(), UpsertOutcome::Unchanged);
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.get("a").unwrap()["status"], "approved");
    }

    #[test]
    fn upsert_without_key_column_is_rejected() {
        let mut ledger = Ledger::new("key");
        let err = ledger
            .upsert(&[("status", "ok".to_string())])
            .unwrap_err();
        assert_eq!(err, LedgerError::MissingKey("key".into()));
        assert!(ledger.is_empty());
    }

    #[test]
    fn csv_with_duplicate_keys_collapses_to_one_row() {
        let csv = b"key,status\na,pending\nb,ok\na,approved\n";
        let ledger = Ledger::from_csv("key", csv).unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.get("a").unwrap()["status"], "approved");
    }

    #[test]
    fn csv_without_key_header_fails() {
        assert!(Ledger::from_csv("key", b"id,status\n1,ok\n").is_err());
    }

    #[tokio::test]
    async fn ledger_store_saves_and_reloads_atomically() {
        let dir = tempdir().expect("tempdir");
        let store = LedgerStore::new(dir.path().join("nested").join("ledger.csv"));

        let empty = store.load("key").await.expect("missing file loads empty");
        assert!(empty.is_empty());

        let mut ledger = Ledger::new("key");
        ledger.upsert(&row("2026-03-01:Shop, A", "approved")).unwrap();
        ledger.set("2026-03-01:Shop, A", "synced_at", "2026-03-02T00:00:00Z").unwrap();
        store.save(&ledger).await.expect("save");
        store.save(&ledger).await.expect("second save replaces");

        let reloaded = store.load("key").await.expect("reload");
        assert_eq!(reloaded, ledger);

        let leftovers = std::fs::read_dir(dir.path().join("nested"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn non_success_status_carries_truncated_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/thing"))
            .respond_with(ResponseTemplate::new(402).set_body_string("x".repeat(1000)))
            .mount(&server)
            .await;

        let client = ApiClient::new(HttpClientConfig::default()).unwrap();
        let url = format!("{}/v1/thing?key=secret", server.uri());
        let err = client
            .send(client.request(Method::GET, &url))
            .await
            .unwrap_err();

        match err {
            ApiError::HttpStatus { status, url, body } => {
                assert_eq!(status, 402);
                assert!(!url.contains("secret"));
                assert_eq!(body.len(), ERROR_BODY_PREVIEW_CHARS);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn transport_errors_do_not_echo_query_strings() {
        let client = ApiClient::new(HttpClientConfig::default()).unwrap();
        let err = client
            .send(client.request(Method::GET, "http://127.0.0.1:1/product?key=SUPERSECRETKEY&asin=B000TEST"))
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Request(_)));
        let chain = anyhow::Error::from(err);
        assert!(!format!("{chain:#}").contains("SUPERSECRETKEY"));
        assert!(!format!("{chain:?}").contains("SUPERSECRETKEY"));
    }

    #[tokio::test]
    async fn decode_errors_do_not_echo_query_strings() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/html"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let client = ApiClient::new(HttpClientConfig::default()).unwrap();
        let url = format!("{}/html?key=SUPERSECRETKEY", server.uri());
        let err = client
            .send_json::<serde_json::Value>(client.request(Method::GET, &url))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Decode { .. }));
        assert!(!err.to_string().contains("SUPERSECRETKEY"));
    }

    #[tokio::test]
    async fn json_responses_decode() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"n": 3})))
            .mount(&server)
            .await;

        let client = ApiClient::new(HttpClientConfig::default()).unwrap();
        let value: serde_json::Value = client
            .send_json(client.request(Method::GET, &format!("{}/ok", server.uri())))
            .await
            .unwrap();
        assert_eq!(value["n"], 3);
    }
}
