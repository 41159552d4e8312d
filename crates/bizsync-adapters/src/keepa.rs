//! Keepa product lookups.

use bizsync_storage::ApiClient;
use reqwest::Method;
use serde_json::Value as JsonValue;
use tracing::info;

use crate::AdapterError;

pub const KEEPA_API_BASE: &str = "https://api.keepa.com";

#[derive(Debug, Clone)]
pub struct KeepaClient {
    api: ApiClient,
    api_key: String,
    domain: u32,
    base_url: String,
}

impl KeepaClient {
    pub fn new(api: ApiClient, api_key: impl Into<String>, domain: u32) -> Self {
        Self {
            api,
            api_key: api_key.into(),
            domain,
            base_url: KEEPA_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// One product without price history.
    pub async fn fetch_product(&self, asin: &str) -> Result<JsonValue, AdapterError> {
        info!(asin, domain = self.domain, "fetching keepa product");
        let request = self
            .api
            .request(Method::GET, &format!("{}/product", self.base_url))
            .query(&[
                ("key", self.api_key.as_str()),
                ("domain", &self.domain.to_string()),
                ("asin", asin),
                ("history", "0"),
            ]);
        Ok(self.api.send_json(request).await?)
    }
}

pub fn product_title(payload: &JsonValue) -> Option<&str> {
    payload
        .get("products")
        .and_then(JsonValue::as_array)
        .and_then(|products| products.first())
        .and_then(|product| product.get("title"))
        .and_then(JsonValue::as_str)
        .filter(|title| !title.is_empty())
}

pub fn connectivity_message(asin: &str, payload: &JsonValue) -> String {
    let mut message = format!(
        "Keepa API reachable\nTest ASIN: {asin}\nhttps://www.amazon.co.jp/dp/{asin}"
    );
    if let Some(title) = product_title(payload) {
        message.push_str(&format!("\nProduct: {title}"));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use bizsync_storage::HttpClientConfig;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn message_includes_title_when_present() {
        let payload = json!({ "products": [{ "title": "Echo Dot" }] });
        let message = connectivity_message("B000TEST", &payload);
        assert!(message.contains("https://www.amazon.co.jp/dp/B000TEST"));
        assert!(message.ends_with("Product: Echo Dot"));

        let bare = connectivity_message("B000TEST", &json!({ "products": [] }));
        assert!(!bare.contains("Product:"));
    }

    #[tokio::test]
    async fn product_request_disables_history() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/product"))
            .and(query_param("asin", "B000TEST"))
            .and(query_param("domain", "6"))
            .and(query_param("history", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "products": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let api = ApiClient::new(HttpClientConfig::default()).unwrap();
        let client = KeepaClient::new(api, "key", 6).with_base_url(server.uri());
        let payload = client.fetch_product("B000TEST").await.unwrap();
        assert!(product_title(&payload).is_none());
    }

    #[tokio::test]
    async fn unreachable_host_error_hides_api_key() {
        let api = ApiClient::new(HttpClientConfig::default()).unwrap();
        let client = KeepaClient::new(api, "SUPERSECRETKEY", 6).with_base_url("http://127.0.0.1:1");
        let err = client.fetch_product("B000TEST").await.unwrap_err();
        let text = format!("{:#}", anyhow::Error::from(err));
        assert!(text.contains("request failed"));
        assert!(!text.contains("SUPERSECRETKEY"));
    }

    #[tokio::test]
    async fn non_200_surfaces_body_preview() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).set_body_string("token quota exhausted"))
            .mount(&server)
            .await;

        let api = ApiClient::new(HttpClientConfig::default()).unwrap();
        let client = KeepaClient::new(api, "key", 6).with_base_url(server.uri());
        let err = client.fetch_product("B000TEST").await.unwrap_err();
        assert!(err.to_string().contains("token quota exhausted"));
    }
}
