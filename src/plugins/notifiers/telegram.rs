use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::TelegramConfig;
use crate::models::{DeliveryTarget, Listing};
use crate::plugins::traits::{MessageTransport, Notifier, OutgoingMessage};
use crate::{AppError, Result};

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_thread_id: Option<i64>,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    error_code: Option<u16>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

/// Thin Bot API client: one HTTP call per message.
pub struct TelegramClient {
    client: Client,
    api_url: String,
}

impl TelegramClient {
    pub fn new(api_base_url: &str, bot_token: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_url: format!("{}/bot{}", api_base_url.trim_end_matches('/'), bot_token),
        })
    }
}

#[async_trait]
impl MessageTransport for TelegramClient {
    async fn send_message(&self, message: &OutgoingMessage) -> Result<()> {
        let request = SendMessageRequest {
            chat_id: &message.chat_id,
            text: &message.text,
            parse_mode: "HTML",
            message_thread_id: message.thread_id,
            disable_web_page_preview: false,
        };

        let response = self
            .client
            .post(format!("{}/sendMessage", self.api_url))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = match response.json::<ApiResponse>().await {
            Ok(body) => body,
            Err(e) if status.is_success() => return Err(e.into()),
            // Error replies without a JSON body (proxies, gateways)
            Err(_) => ApiResponse {
                ok: false,
                error_code: Some(status.as_u16()),
                description: None,
                parameters: None,
            },
        };

        if status.is_success() && body.ok {
            return Ok(());
        }

        let code = body.error_code.unwrap_or(status.as_u16());
        if status == StatusCode::TOO_MANY_REQUESTS || code == 429 {
            return Err(AppError::RateLimited {
                retry_after: body.parameters.and_then(|p| p.retry_after),
            });
        }

        Err(AppError::Delivery {
            status: code,
            description: body.description.unwrap_or_else(|| status.to_string()),
        })
    }
}

/// Paced, retrying notifier in front of a [`MessageTransport`].
///
/// Sends are serialized: every call waits until `min_delay` has passed since
/// the previous call returned. A rate-limit reply is retried exactly once
/// after the server's hint plus `retry_buffer`.
pub struct TelegramNotifier<T: MessageTransport = TelegramClient> {
    transport: T,
    last_sent: Mutex<Option<Instant>>,
    min_delay: Duration,
    retry_buffer: Duration,
    default_retry_after: Duration,
}

impl TelegramNotifier<TelegramClient> {
    pub fn from_config(config: &TelegramConfig) -> Result<Self> {
        let client = TelegramClient::new(&config.api_base_url, &config.bot_token)?;
        Ok(Self::new(
            client,
            Duration::from_millis(config.min_delay_ms),
            Duration::from_secs(config.retry_buffer_secs),
            Duration::from_secs(config.default_retry_after_secs),
        ))
    }
}

impl<T: MessageTransport> TelegramNotifier<T> {
    pub fn new(
        transport: T,
        min_delay: Duration,
        retry_buffer: Duration,
        default_retry_after: Duration,
    ) -> Self {
        Self {
            transport,
            last_sent: Mutex::new(None),
            min_delay,
            retry_buffer,
            default_retry_after,
        }
    }

    pub fn format_message(listing: &Listing) -> String {
        let mut message = format!(
            "🆕 <b>{}</b>\n\n📋 {}\n\n📍 {}\n",
            escape_html(&listing.title),
            escape_html(&listing.description),
            escape_html(&listing.location),
        );

        if listing.has_price() {
            message.push_str(&format!("💰 {}\n\n", escape_html(&listing.price)));
        }

        message.push_str(&format!(
            "🔗 <a href=\"{}\">Zur Anzeige</a>",
            escape_html(&listing.url)
        ));
        message
    }

    pub async fn send_test_message(&self, target: &DeliveryTarget) -> Result<()> {
        let message = OutgoingMessage {
            chat_id: target.chat_id.clone(),
            thread_id: target.thread_id,
            text: "🧪 Test message from classifieds-watcher\n\nThe bot can reach this chat.".to_string(),
        };
        self.deliver(&message).await
    }

    async fn deliver(&self, message: &OutgoingMessage) -> Result<()> {
        // Held for the whole send so concurrent callers queue behind it.
        let mut last_sent = self.last_sent.lock().await;

        if let Some(last) = *last_sent {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                let wait = self.min_delay - elapsed;
                tracing::debug!("Rate limiting: waiting {}ms before next message", wait.as_millis());
                tokio::time::sleep(wait).await;
            }
        }

        let result = self.send_with_retry(message).await;
        *last_sent = Some(Instant::now());
        result
    }

    async fn send_with_retry(&self, message: &OutgoingMessage) -> Result<()> {
        match self.transport.send_message(message).await {
            Err(AppError::RateLimited { retry_after }) => {
                let wait = retry_after
                    .map(Duration::from_secs)
                    .unwrap_or(self.default_retry_after)
                    + self.retry_buffer;
                tracing::warn!(
                    chat_id = %message.chat_id,
                    "Rate limited by Telegram, retrying once in {}s",
                    wait.as_secs()
                );
                tokio::time::sleep(wait).await;

                match self.transport.send_message(message).await {
                    Ok(()) => {
                        tracing::info!(chat_id = %message.chat_id, "Message delivered after retry");
                        Ok(())
                    }
                    Err(e) => {
                        tracing::error!(chat_id = %message.chat_id, error = %e, "Retry failed");
                        Err(e)
                    }
                }
            }
            other => other,
        }
    }
}

#[async_trait]
impl<T: MessageTransport> Notifier for TelegramNotifier<T> {
    async fn notify(&self, listing: &Listing, target: &DeliveryTarget) -> Result<()> {
        let message = OutgoingMessage {
            chat_id: target.chat_id.clone(),
            thread_id: target.thread_id,
            text: Self::format_message(listing),
        };
        self.deliver(&message).await
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
