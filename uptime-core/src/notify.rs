//! Down alerts for Telegram and Slack.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::{NotificationChannel, NotificationDetails, SlackDetails, TelegramDetails};
use crate::Result;

pub const DEFAULT_TELEGRAM_API: &str = "https://api.telegram.org";

pub fn down_message(instance_name: &str) -> String {
    format!("Your instance *{instance_name}* is down. Please check it as soon as possible.")
}

/// Delivery is best-effort: implementations log failures and return normally.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, channel: &NotificationChannel, instance_name: &str);
}

#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: Client,
    telegram_api_base: String,
    timeout: Duration,
}

impl HttpNotifier {
    pub fn new(timeout: Duration) -> Self {
        Self::with_client(Client::new(), DEFAULT_TELEGRAM_API, timeout)
    }

    pub fn with_client(client: Client, telegram_api_base: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            telegram_api_base: telegram_api_base.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    async fn send_telegram(&self, details: &TelegramDetails, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.telegram_api_base, details.bot_token);
        self.client
            .post(url)
            .timeout(self.timeout)
            .json(&json!({
                "chat_id": details.chat_id,
                "text": text,
                "parse_mode": "Markdown",
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn send_slack(&self, details: &SlackDetails, text: &str) -> Result<()> {
        let mut body = json!({ "text": text });
        if let Some(channel) = &details.channel_name {
            body["channel"] = json!(channel);
        }
        self.client
            .post(&details.webhook_url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, channel: &NotificationChannel, instance_name: &str) {
        let text = down_message(instance_name);
        let sent = match &channel.details {
            NotificationDetails::Telegram(details) => self.send_telegram(details, &text).await,
            NotificationDetails::Slack(details) => self.send_slack(details, &text).await,
        };

        match sent {
            Ok(()) => debug!(channel_id = %channel.id, kind = ?channel.details.kind(), "Down alert delivered"),
            Err(e) => warn!(
                channel_id = %channel.id,
                channel = %channel.name,
                error = %e,
                "Failed to deliver down alert"
            ),
        }
    }
}
