//! Messaging webhooks used for run summaries.

use async_trait::async_trait;
use bizsync_storage::ApiClient;
use reqwest::Method;
use serde_json::json;
use tracing::info;

use crate::{AdapterError, Notifier};

pub const LINE_NOTIFY_URL: &str = "https://notify-api.line.me/api/notify";

#[derive(Debug, Clone)]
pub struct SlackWebhookNotifier {
    api: ApiClient,
    webhook_url: String,
}

impl SlackWebhookNotifier {
    pub fn new(api: ApiClient, webhook_url: impl Into<String>) -> Self {
        Self {
            api,
            webhook_url: webhook_url.into(),
        }
    }
}

#[async_trait]
impl Notifier for SlackWebhookNotifier {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn notify(&self, message: &str) -> Result<(), AdapterError> {
        info!(chars = message.chars().count(), "sending slack notification");
        let request = self
            .api
            .request(Method::POST, &self.webhook_url)
            .json(&json!({ "text": message }));
        self.api.send(request).await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct LineNotifier {
    api: ApiClient,
    token: String,
    endpoint: String,
}

impl LineNotifier {
    pub fn new(api: ApiClient, token: impl Into<String>) -> Self {
        Self {
            api,
            token: token.into(),
            endpoint: LINE_NOTIFY_URL.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl Notifier for LineNotifier {
    fn name(&self) -> &'static str {
        "line"
    }

    async fn notify(&self, message: &str) -> Result<(), AdapterError> {
        info!(chars = message.chars().count(), "sending LINE notification");
        let request = self
            .api
            .request(Method::POST, &self.endpoint)
            .bearer_auth(&self.token)
            .form(&[("message", message)]);
        self.api.send(request).await?;
        Ok(())
    }
}

/// Stand-in for skipped or unconfigured webhooks.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn notify(&self, message: &str) -> Result<(), AdapterError> {
        info!(%message, "notification skipped; message logged only");
        Ok(())
    }
}
