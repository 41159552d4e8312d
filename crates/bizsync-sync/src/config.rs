//! Job configuration read once from the environment.

use std::time::Duration;

pub use bizsync_adapters::a8::DEFAULT_A8_API_URL;
use bizsync_storage::HttpClientConfig;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_LOOKBACK_DAYS: u32 = 1;
pub const DEFAULT_KEEPA_TEST_ASIN: &str = "B08N5WRNW";
pub const DEFAULT_KEEPA_DOMAIN: u32 = 6;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_USER_AGENT: &str = "bizsync/0.1";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Blank values count as unset.
struct Vars<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Vars<'_> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn require(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn require_if(&self, needed: bool, key: &'static str) -> Result<Option<String>, ConfigError> {
        match self.get(key) {
            None if needed => Err(ConfigError::Missing(key)),
            value => Ok(value),
        }
    }
}

fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Falls back to one day, with a warning, when the value is not a non-negative integer.
pub fn parse_lookback_days(raw: Option<&str>) -> u32 {
    match raw {
        None => DEFAULT_LOOKBACK_DAYS,
        Some(text) => text.trim().parse().unwrap_or_else(|_| {
            warn!(value = text, fallback = DEFAULT_LOOKBACK_DAYS, "A8_LOOKBACK_DAYS is not a day count");
            DEFAULT_LOOKBACK_DAYS
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl HttpSettings {
    fn from_vars(vars: &Vars<'_>) -> Result<Self, ConfigError> {
        let timeout_secs = match vars.get("BIZSYNC_HTTP_TIMEOUT_SECS") {
            None => DEFAULT_HTTP_TIMEOUT_SECS,
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "BIZSYNC_HTTP_TIMEOUT_SECS",
                        message: format!("expected a positive number of seconds, got {raw:?}"),
                    })
                }
            },
        };
        Ok(Self {
            timeout_secs,
            user_agent: vars
                .get("BIZSYNC_USER_AGENT")
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
        })
    }

    pub fn client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            user_agent: Some(self.user_agent.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StripeLinksConfig {
    pub http: HttpSettings,
    pub notion_token: String,
    pub notion_db_id: String,
    /// Unset only in dry runs.
    pub stripe_secret_key: Option<String>,
    pub slack_webhook_url: Option<String>,
}

impl StripeLinksConfig {
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        dry_run: bool,
    ) -> Result<Self, ConfigError> {
        let vars = Vars(&lookup);
        Ok(Self {
            http: HttpSettings::from_vars(&vars)?,
            notion_token: vars.require("NOTION_TOKEN")?,
            notion_db_id: vars.require("NOTION_DB_ID")?,
            stripe_secret_key: vars.require_if(!dry_run, "STRIPE_SECRET_KEY")?,
            slack_webhook_url: vars.get("SLACK_WEBHOOK_URL"),
        })
    }

    pub fn from_env(dry_run: bool) -> Result<Self, ConfigError> {
        Self::from_lookup(process_env, dry_run)
    }
}

/// Which downstream systems an A8 run will actually touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct A8Needs {
    pub live_source: bool,
    pub notion: bool,
    pub line: bool,
}

#[derive(Debug, Clone)]
pub struct A8SyncConfig {
    pub http: HttpSettings,
    pub a8_api_key: Option<String>,
    pub a8_api_url: String,
    pub lookback_days: u32,
    pub notion_token: Option<String>,
    pub notion_a8_db_id: Option<String>,
    pub line_token: Option<String>,
}

impl A8SyncConfig {
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        needs: A8Needs,
    ) -> Result<Self, ConfigError> {
        let vars = Vars(&lookup);
        Ok(Self {
            http: HttpSettings::from_vars(&vars)?,
            a8_api_key: vars.require_if(needs.live_source, "A8_API_KEY")?,
            a8_api_url: vars
                .get("A8_API_URL")
                .unwrap_or_else(|| DEFAULT_A8_API_URL.to_string()),
            lookback_days: parse_lookback_days(vars.get("A8_LOOKBACK_DAYS").as_deref()),
            notion_token: vars.require_if(needs.notion, "NOTION_TOKEN")?,
            notion_a8_db_id: vars.require_if(needs.notion, "NOTION_A8_DB_ID")?,
            line_token: vars.require_if(needs.line, "LINE_TOKEN")?,
        })
    }

    pub fn from_env(needs: A8Needs) -> Result<Self, ConfigError> {
        Self::from_lookup(process_env, needs)
    }
}

#[derive(Debug, Clone)]
pub struct KeepaCheckConfig {
    pub http: HttpSettings,
    pub keepa_api_key: String,
    pub test_asin: String,
    pub domain: u32,
    pub slack_webhook_url: String,
}

impl KeepaCheckConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars(&lookup);
        let domain = match vars.get("KEEPA_DOMAIN") {
            None => DEFAULT_KEEPA_DOMAIN,
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                key: "KEEPA_DOMAIN",
                message: format!("expected a numeric marketplace id, got {raw:?}"),
            })?,
        };
        Ok(Self {
            http: HttpSettings::from_vars(&vars)?,
            keepa_api_key: vars.require("KEEPA_API_KEY")?,
            test_asin: vars
                .get("KEEPA_TEST_ASIN")
                .unwrap_or_else(|| DEFAULT_KEEPA_TEST_ASIN.to_string()),
            domain,
            slack_webhook_url: vars.require("SLACK_WEBHOOK_URL")?,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(process_env)
    }
}
