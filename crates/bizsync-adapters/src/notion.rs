//! Notion database access: product reads, payment-link writes and A8 report upserts.

use async_trait::async_trait;
use bizsync_core::{A8Report, Product, ProductType, UpsertOutcome, DEFAULT_CURRENCY};
use bizsync_storage::{ApiClient, ApiError};
use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info};

use crate::{truncate_chars, AdapterError, RecordSink, RecordSource};

pub const NOTION_API_BASE: &str = "https://api.notion.com";
pub const NOTION_VERSION: &str = "2022-06-28";
pub const QUERY_PAGE_SIZE: u32 = 100;
/// Notion rejects title and rich_text content longer than this.
pub const TEXT_LIMIT_CHARS: usize = 2000;

/// Property names of the products database.
pub mod product_props {
    pub const NAME: &str = "商品名";
    pub const DESCRIPTION: &str = "商品説明";
    pub const PRICE: &str = "価格";
    pub const CURRENCY: &str = "通貨";
    pub const TYPE: &str = "タイプ";
    pub const PAYMENT_LINK: &str = "payment_link";
    pub const STATUS: &str = "ステータス";
}

/// Property names of the A8 report database.
pub mod a8_props {
    pub const PROGRAM: &str = "Program";
    pub const DATE: &str = "Date";
    pub const STATUS: &str = "Status";
    pub const REWARD: &str = "Reward";
    pub const RESULT: &str = "Result";
    pub const PAYLOAD: &str = "Payload";
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<JsonValue>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NotionClient {
    api: ApiClient,
    token: String,
    base_url: String,
}

impl NotionClient {
    pub fn new(api: ApiClient, token: impl Into<String>) -> Self {
        Self {
            api,
            token: token.into(),
            base_url: NOTION_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.api
            .request(method, &format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
    }

    /// Every page of a database query, following `next_cursor` until exhausted.
    pub async fn query_all(
        &self,
        database_id: &str,
        filter: Option<&JsonValue>,
    ) -> Result<Vec<JsonValue>, ApiError> {
        let path = format!("/v1/databases/{database_id}/query");
        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut body = json!({ "page_size": QUERY_PAGE_SIZE });
            if let Some(filter) = filter {
                body["filter"] = filter.clone();
            }
            if let Some(cursor) = &cursor {
                body["start_cursor"] = json!(cursor);
            }

            let resp: QueryResponse = self
                .api
                .send_json(self.request(Method::POST, &path).json(&body))
                .await?;
            debug!(database_id, batch = resp.results.len(), "notion query page");
            pages.extend(resp.results);

            match (resp.has_more, resp.next_cursor) {
                (true, Some(next)) => cursor = Some(next),
                _ => break,
            }
        }

        Ok(pages)
    }

    pub async fn query_first(
        &self,
        database_id: &str,
        filter: &JsonValue,
    ) -> Result<Option<JsonValue>, ApiError> {
        let path = format!("/v1/databases/{database_id}/query");
        let body = json!({ "filter": filter, "page_size": 1 });
        let resp: QueryResponse = self
            .api
            .send_json(self.request(Method::POST, &path).json(&body))
            .await?;
        Ok(resp.results.into_iter().next())
    }

    pub async fn create_page(
        &self,
        database_id: &str,
        properties: JsonValue,
    ) -> Result<JsonValue, ApiError> {
        let body = json!({
            "parent": { "database_id": database_id },
            "properties": properties,
        });
        self.api
            .send_json(self.request(Method::POST, "/v1/pages").json(&body))
            .await
    }

    pub async fn update_page(
        &self,
        page_id: &str,
        properties: JsonValue,
    ) -> Result<JsonValue, ApiError> {
        let body = json!({ "properties": properties });
        self.api
            .send_json(
                self.request(Method::PATCH, &format!("/v1/pages/{page_id}"))
                    .json(&body),
            )
            .await
    }
}

fn properties(entries: Vec<(&str, JsonValue)>) -> JsonValue {
    JsonValue::Object(
        entries
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect(),
    )
}

fn plain_text(prop: Option<&JsonValue>, kind: &str) -> String {
    prop.and_then(|p| p.get(kind))
        .and_then(JsonValue::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("plain_text").and_then(JsonValue::as_str))
                .collect::<String>()
        })
        .unwrap_or_default()
}

fn option_name(prop: Option<&JsonValue>, kind: &str) -> Option<String> {
    prop.and_then(|p| p.get(kind))
        .and_then(|option| option.get("name"))
        .and_then(JsonValue::as_str)
        .map(str::to_string)
}

fn number(prop: Option<&JsonValue>) -> Option<f64> {
    prop.and_then(|p| p.get("number")).and_then(JsonValue::as_f64)
}

fn url(prop: Option<&JsonValue>) -> Option<String> {
    prop.and_then(|p| p.get("url"))
        .and_then(JsonValue::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

/// Typed view of a products page. Pages without an id or a name yield `None`.
pub fn product_from_page(page: &JsonValue) -> Option<Product> {
    let page_id = page.get("id").and_then(JsonValue::as_str)?;
    let props = page.get("properties");
    let prop = |name: &str| props.and_then(|p| p.get(name));

    let name = plain_text(prop(product_props::NAME), "title");
    if name.trim().is_empty() {
        return None;
    }

    Some(Product {
        page_id: page_id.to_string(),
        name,
        description: plain_text(prop(product_props::DESCRIPTION), "rich_text"),
        price: number(prop(product_props::PRICE)).unwrap_or(0.0),
        currency: option_name(prop(product_props::CURRENCY), "select")
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        product_type: ProductType::from_label(
            option_name(prop(product_props::TYPE), "select").as_deref(),
        ),
        payment_link: url(prop(product_props::PAYMENT_LINK)),
        status: option_name(prop(product_props::STATUS), "status"),
    })
}

#[derive(Debug, Clone)]
pub struct NotionProductSource {
    client: NotionClient,
    database_id: String,
}

impl NotionProductSource {
    pub fn new(client: NotionClient, database_id: impl Into<String>) -> Self {
        Self {
            client,
            database_id: database_id.into(),
        }
    }
}

#[async_trait]
impl RecordSource<Product> for NotionProductSource {
    fn name(&self) -> &'static str {
        "notion-products"
    }

    async fn read(&self) -> Result<Vec<Product>, AdapterError> {
        let pages = self.client.query_all(&self.database_id, None).await?;
        let total = pages.len();
        let products: Vec<Product> = pages.iter().filter_map(product_from_page).collect();
        info!(pages = total, products = products.len(), "loaded notion products");
        Ok(products)
    }
}

/// Writes a product's payment link back onto its own page.
#[derive(Debug, Clone)]
pub struct NotionPaymentLinkSink {
    client: NotionClient,
}

impl NotionPaymentLinkSink {
    pub fn new(client: NotionClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RecordSink<Product> for NotionPaymentLinkSink {
    fn name(&self) -> &'static str {
        "notion-payment-link"
    }

    async fn upsert(&self, record: &Product) -> Result<UpsertOutcome, AdapterError> {
        let link = record.payment_link.as_deref().ok_or_else(|| {
            AdapterError::Message(format!("product {} has no payment link to write", record.page_id))
        })?;
        self.client
            .update_page(
                &record.page_id,
                properties(vec![(product_props::PAYMENT_LINK, json!({ "url": link }))]),
            )
            .await?;
        info!(page_id = %record.page_id, "updated notion page");
        Ok(UpsertOutcome::Updated)
    }
}

pub fn a8_report_filter(report: &A8Report) -> JsonValue {
    json!({
        "and": [
            { "property": a8_props::DATE, "date": { "equals": report.report_date.format("%Y-%m-%d").to_string() } },
            { "property": a8_props::PROGRAM, "title": { "equals": program_title(report) } },
        ]
    })
}

/// Stored titles are truncated, so lookups must use the same truncated form.
fn program_title(report: &A8Report) -> String {
    truncate_chars(&report.program, TEXT_LIMIT_CHARS)
}

fn result_text(report: &A8Report) -> String {
    if report.result.is_empty() {
        "-".to_string()
    } else {
        truncate_chars(&report.result, TEXT_LIMIT_CHARS)
    }
}

pub fn a8_report_properties(report: &A8Report) -> JsonValue {
    let payload = serde_json::to_string(&report.raw).unwrap_or_default();
    properties(vec![
        (a8_props::PROGRAM, json!({ "title": [{ "text": { "content": program_title(report) } }] })),
        (
            a8_props::DATE,
            json!({ "date": { "start": report.report_date.format("%Y-%m-%d").to_string() } }),
        ),
        (a8_props::STATUS, json!({ "status": { "name": report.status } })),
        (a8_props::REWARD, json!({ "number": report.reward })),
        (
            a8_props::RESULT,
            json!({ "rich_text": [{ "text": { "content": result_text(report) } }] }),
        ),
        (
            a8_props::PAYLOAD,
            json!({ "rich_text": [{ "text": { "content": truncate_chars(&payload, TEXT_LIMIT_CHARS) } }] }),
        ),
    ])
}

/// True when the stored page already carries the report's mutable fields.
pub fn a8_page_matches(page: &JsonValue, report: &A8Report) -> bool {
    let props = page.get("properties");
    let prop = |name: &str| props.and_then(|p| p.get(name));
    option_name(prop(a8_props::STATUS), "status").as_deref() == Some(report.status.as_str())
        && number(prop(a8_props::REWARD)) == Some(report.reward)
        && plain_text(prop(a8_props::RESULT), "rich_text") == result_text(report)
}

/// Upserts A8 reports keyed by (Date, Program).
#[derive(Debug, Clone)]
pub struct NotionA8Sink {
    client: NotionClient,
    database_id: String,
}

impl NotionA8Sink {
    pub fn new(client: NotionClient, database_id: impl Into<String>) -> Self {
        Self {
            client,
            database_id: database_id.into(),
        }
    }
}

#[async_trait]
impl RecordSink<A8Report> for NotionA8Sink {
    fn name(&self) -> &'static str {
        "notion-a8"
    }

    async fn upsert(&self, record: &A8Report) -> Result<UpsertOutcome, AdapterError> {
        // A failed lookup aborts this record; creating blindly could duplicate the key.
        let existing = self
            .client
            .query_first(&self.database_id, &a8_report_filter(record))
            .await?;

        match existing {
            Some(page) => {
                if a8_page_matches(&page, record) {
                    return Ok(UpsertOutcome::Unchanged);
                }
                let page_id = page.get("id").and_then(JsonValue::as_str).ok_or_else(|| {
                    AdapterError::Message("notion query returned a page without id".into())
                })?;
                self.client
                    .update_page(page_id, a8_report_properties(record))
                    .await?;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                self.client
                    .create_page(&self.database_id, a8_report_properties(record))
                    .await?;
                Ok(UpsertOutcome::Created)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bizsync_storage::HttpClientConfig;
    use chrono::NaiveDate;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> NotionClient {
        NotionClient::new(ApiClient::new(HttpClientConfig::default()).unwrap(), "secret")
            .with_base_url(server.uri())
    }

    fn product_page(id: &str, name: &str, link: Option<&str>) -> JsonValue {
        json!({
            "id": id,
            "properties": {
                "商品名": { "title": [{ "plain_text": name }] },
                "価格": { "number": 1200 },
                "タイプ": { "select": { "name": "サブスク" } },
                "payment_link": { "url": link },
                "ステータス": { "status": null },
            }
        })
    }

    fn report() -> A8Report {
        A8Report {
            report_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            program: "Shop A".into(),
            status: "approved".into(),
            reward: 1200.0,
            result: String::new(),
            raw: json!({"program": "Shop A"}),
        }
    }

    #[test]
    fn product_pages_apply_documented_defaults() {
        let product = product_from_page(&product_page("p1", "Kit", None)).unwrap();
        assert_eq!(product.currency, "JPY");
        assert_eq!(product.description, "");
        assert_eq!(product.product_type, ProductType::Subscription);
        assert_eq!(product.status, None);
        assert!(product.needs_link());

        assert!(product_from_page(&product_page("p2", "", None)).is_none());
    }

    #[tokio::test]
    async fn product_source_follows_pagination() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/databases/db1/query"))
            .and(header("Notion-Version", NOTION_VERSION))
            .and(body_partial_json(json!({ "start_cursor": "c2" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [product_page("p3", "Third", None)],
                "has_more": false,
                "next_cursor": null,
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/databases/db1/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    product_page("p1", "First", Some("https://buy.stripe.com/a")),
                    product_page("p2", "", None),
                ],
                "has_more": true,
                "next_cursor": "c2",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let source = NotionProductSource::new(client(&server), "db1");
        let products = source.read().await.unwrap();
        let ids: Vec<_> = products.iter().map(|p| p.page_id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p3"]);
    }

    #[tokio::test]
    async fn empty_database_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/databases/db1/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
            .mount(&server)
            .await;

        let products = NotionProductSource::new(client(&server), "db1").read().await.unwrap();
        assert!(products.is_empty());
    }

    #[test]
    fn long_program_and_result_are_cut_to_notion_limits() {
        let mut long = report();
        long.program = "P".repeat(2100);
        long.result = "r".repeat(2500);

        let props = a8_report_properties(&long);
        let content = |name: &str, kind: &str| {
            props[name][kind][0]["text"]["content"]
                .as_str()
                .unwrap()
                .chars()
                .count()
        };
        assert_eq!(content("Program", "title"), TEXT_LIMIT_CHARS);
        assert_eq!(content("Result", "rich_text"), TEXT_LIMIT_CHARS);

        let filter = a8_report_filter(&long);
        assert_eq!(
            filter["and"][1]["title"]["equals"].as_str().unwrap().chars().count(),
            TEXT_LIMIT_CHARS
        );

        let stored = json!({
            "properties": {
                "Status": { "status": { "name": "approved" } },
                "Reward": { "number": 1200.0 },
                "Result": { "rich_text": [{ "plain_text": "r".repeat(TEXT_LIMIT_CHARS) }] },
            }
        });
        assert!(a8_page_matches(&stored, &long));
    }

    #[tokio::test]
    async fn a8_sink_creates_when_missing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/databases/a8db/query"))
            .and(body_partial_json(json!({ "page_size": 1 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/pages"))
            .and(body_partial_json(json!({
                "parent": { "database_id": "a8db" },
                "properties": { "Result": { "rich_text": [{ "text": { "content": "-" } }] } },
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "new" })))
            .expect(1)
            .mount(&server)
            .await;

        let sink = NotionA8Sink::new(client(&server), "a8db");
        assert_eq!(sink.upsert(&report()).await.unwrap(), UpsertOutcome::Created);
    }

    #[tokio::test]
    async fn a8_sink_skips_matching_pages_and_updates_stale_ones() {
        let server = MockServer::start().await;
        let stored = json!({
            "id": "page-9",
            "properties": {
                "Status": { "status": { "name": "pending" } },
                "Reward": { "number": 1200.0 },
                "Result": { "rich_text": [{ "plain_text": "-" }] },
            }
        });
        Mock::given(method("POST"))
            .and(path("/v1/databases/a8db/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [stored] })))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/v1/pages/page-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "page-9" })))
            .expect(1)
            .mount(&server)
            .await;

        let sink = NotionA8Sink::new(client(&server), "a8db");
        assert_eq!(sink.upsert(&report()).await.unwrap(), UpsertOutcome::Updated);

        let mut pending = report();
        pending.status = "pending".into();
        assert_eq!(sink.upsert(&pending).await.unwrap(), UpsertOutcome::Unchanged);
    }

    #[tokio::test]
    async fn failed_lookup_does_not_create() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/databases/a8db/query"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/pages"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let sink = NotionA8Sink::new(client(&server), "a8db");
        assert!(sink.upsert(&report()).await.is_err());
    }

    #[tokio::test]
    async fn payment_link_sink_patches_the_product_page() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/v1/pages/p1"))
            .and(body_partial_json(json!({
                "properties": { "payment_link": { "url": "https://buy.stripe.com/x" } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "p1" })))
            .expect(1)
            .mount(&server)
            .await;

        let mut product = product_from_page(&product_page("p1", "Kit", None)).unwrap();
        let sink = NotionPaymentLinkSink::new(client(&server));
        assert!(sink.upsert(&product).await.is_err());

        product.payment_link = Some("https://buy.stripe.com/x".into());
        assert_eq!(sink.upsert(&product).await.unwrap(), UpsertOutcome::Updated);
    }
}
