//! Stripe payment links for products.

use async_trait::async_trait;
use bizsync_core::{is_zero_decimal, Product, ProductType};
use bizsync_storage::ApiClient;
use reqwest::Method;
use serde::Deserialize;
use tracing::info;

use crate::{truncate_chars, ActionExecutor, AdapterError};

pub const STRIPE_API_BASE: &str = "https://api.stripe.com";
pub const DESCRIPTION_LIMIT_CHARS: usize = 500;

/// Halves round to even.
pub fn amount_to_minor_units(amount: f64, currency: &str) -> i64 {
    if is_zero_decimal(currency) {
        amount.round_ties_even() as i64
    } else {
        (amount * 100.0).round_ties_even() as i64
    }
}

/// Form fields of a single-item payment link with inline price data.
pub fn payment_link_form(product: &Product) -> Vec<(String, String)> {
    let item = "line_items[0]";
    let mut form = vec![
        (
            format!("{item}[price_data][currency]"),
            product.currency.trim().to_ascii_lowercase(),
        ),
        (
            format!("{item}[price_data][product_data][name]"),
            product.name.clone(),
        ),
        (
            format!("{item}[price_data][unit_amount]"),
            amount_to_minor_units(product.price, &product.currency).to_string(),
        ),
        (format!("{item}[quantity]"), "1".to_string()),
        (
            "metadata[notion_page_id]".to_string(),
            product.page_id.clone(),
        ),
    ];
    // Stripe rejects empty strings, so a blank description is left out entirely.
    if !product.description.trim().is_empty() {
        form.push((
            format!("{item}[price_data][product_data][description]"),
            truncate_chars(&product.description, DESCRIPTION_LIMIT_CHARS),
        ));
    }
    if product.product_type == ProductType::Subscription {
        form.push((
            format!("{item}[price_data][recurring][interval]"),
            "month".to_string(),
        ));
    }
    form
}

#[derive(Debug, Deserialize)]
struct PaymentLinkResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StripeClient {
    api: ApiClient,
    secret_key: String,
    base_url: String,
}

impl StripeClient {
    pub fn new(api: ApiClient, secret_key: impl Into<String>) -> Self {
        Self {
            api,
            secret_key: secret_key.into(),
            base_url: STRIPE_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub async fn create_payment_link(&self, product: &Product) -> Result<String, AdapterError> {
        let request = self
            .api
            .request(Method::POST, &format!("{}/v1/payment_links", self.base_url))
            .bearer_auth(&self.secret_key)
            .form(&payment_link_form(product));
        let resp: PaymentLinkResponse = self.api.send_json(request).await?;
        let url = resp.url.filter(|u| !u.is_empty()).ok_or_else(|| {
            AdapterError::Message(format!(
                "stripe returned payment link {} without url",
                resp.id.as_deref().unwrap_or("<unknown>")
            ))
        })?;
        info!(page_id = %product.page_id, %url, "created stripe payment link");
        Ok(url)
    }
}

#[derive(Debug, Clone)]
pub struct StripeLinkExecutor {
    client: StripeClient,
}

impl StripeLinkExecutor {
    pub fn new(client: StripeClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ActionExecutor<Product> for StripeLinkExecutor {
    fn name(&self) -> &'static str {
        "stripe-payment-link"
    }

    async fn execute(&self, record: &Product) -> Result<Product, AdapterError> {
        let url = self.client.create_payment_link(record).await?;
        Ok(Product {
            payment_link: Some(url),
            ..record.clone()
        })
    }
}
