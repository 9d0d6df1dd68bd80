use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use url::Url;
use validator::Validate;

use crate::models::{DeliveryTarget, Filter};
use crate::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    #[serde(default)]
    pub thread_id: Option<i64>,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_retry_buffer_secs")]
    pub retry_buffer_secs: u64,
    #[serde(default = "default_retry_after_secs")]
    pub default_retry_after_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default = "default_filter_delay_ms")]
    pub filter_delay_ms: u64,
    #[serde(default = "default_listing_delay_ms")]
    pub listing_delay_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_accept_language")]
    pub accept_language: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FilterConfig {
    #[validate(length(min = 1, message = "filter name must not be empty"))]
    pub name: String,
    #[validate(url(message = "filter url must be an absolute URL"))]
    pub url: String,
    #[serde(default)]
    pub telegram_chat_id: Option<String>,
    #[serde(default)]
    pub telegram_thread_id: Option<i64>,
}

fn default_api_base_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_min_delay_ms() -> u64 {
    2000
}

fn default_retry_buffer_secs() -> u64 {
    5
}

fn default_retry_after_secs() -> u64 {
    35
}

fn default_database_path() -> String {
    "data/ads.db".to_string()
}

fn default_max_connections() -> u32 {
    1
}

fn default_interval_minutes() -> u64 {
    5
}

fn default_filter_delay_ms() -> u64 {
    3000
}

fn default_listing_delay_ms() -> u64 {
    1000
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".to_string()
}

fn default_accept_language() -> String {
    "de-DE,de;q=0.9,en-US;q=0.8,en;q=0.7".to_string()
}

fn default_base_url() -> String {
    "https://www.kleinanzeigen.de".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            filter_delay_ms: default_filter_delay_ms(),
            listing_delay_ms: default_listing_delay_ms(),
            user_agent: default_user_agent(),
            accept_language: default_accept_language(),
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ScraperConfig {
    /// Polling interval, never shorter than one minute.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.max(1) * 60)
    }
}

impl AppConfig {
    /// Load the YAML file at `path`, then apply `WATCHER__SECTION__KEY` overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let s = Config::builder()
            .add_source(File::from(path.as_ref()))
            // e.g. WATCHER__TELEGRAM__BOT_TOKEN
            .add_source(Environment::with_prefix("WATCHER").separator("__"))
            .build()?;

        let config: AppConfig = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            return Err(AppError::Validation("telegram.bot_token must not be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(AppError::Validation(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if Url::parse(&self.scraper.base_url).is_err() {
            return Err(AppError::Validation("scraper.base_url is not a valid URL".into()));
        }

        let mut names = HashSet::new();
        for filter in &self.filters {
            filter.validate()?;
            if !names.insert(filter.name.as_str()) {
                return Err(AppError::Validation(format!(
                    "duplicate filter name: {}",
                    filter.name
                )));
            }
        }

        for filter in self.resolved_filters() {
            if filter.target.chat_id.trim().is_empty() {
                return Err(AppError::Validation(format!(
                    "filter {} has no telegram chat id and no default is configured",
                    filter.name
                )));
            }
        }

        Ok(())
    }

    /// Filters with their delivery target resolved against the telegram defaults.
    pub fn resolved_filters(&self) -> Vec<Filter> {
        self.filters
            .iter()
            .map(|filter| {
                let chat_id = filter
                    .telegram_chat_id
                    .as_deref()
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or(&self.telegram.chat_id)
                    .to_string();
                let thread_id = filter
                    .telegram_thread_id
                    .filter(|id| *id != 0)
                    .or(self.telegram.thread_id.filter(|id| *id != 0));

                Filter {
                    name: filter.name.clone(),
                    url: filter.url.clone(),
                    target: DeliveryTarget { chat_id, thread_id },
                }
            })
            .collect()
    }

    pub fn default_target(&self) -> DeliveryTarget {
        DeliveryTarget {
            chat_id: self.telegram.chat_id.clone(),
            thread_id: self.telegram.thread_id.filter(|id| *id != 0),
        }
    }
}
