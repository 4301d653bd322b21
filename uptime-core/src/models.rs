use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "instance_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Online,
    Offline,
}

impl InstanceStatus {
    pub fn from_reachable(reachable: bool) -> Self {
        if reachable { Self::Online } else { Self::Offline }
    }
}

/// A monitored endpoint. `status` and `uptime` stay `None` until the first check lands.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    /// Seconds between checks.
    pub interval: i32,
    pub status: Option<InstanceStatus>,
    pub response_time_ms: Option<i32>,
    pub uptime: Option<f64>,
    pub notification_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// User-editable fields of an instance, used for both registration and edits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInput {
    pub name: String,
    pub url: String,
    pub interval: i32,
    pub notification_id: Option<Uuid>,
}

impl InstanceInput {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::validation("name is required"));
        }
        if self.interval < 1 {
            return Err(Error::validation("interval must be at least 1 second"));
        }
        validate_http_url(&self.url, "url")
    }
}

/// Snapshot written back to the registry after every completed check.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckUpdate {
    pub status: InstanceStatus,
    pub uptime: f64,
    /// `None` keeps the previously recorded response time.
    pub response_time_ms: Option<i32>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CheckRecord {
    pub instance_id: Uuid,
    pub online: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "notification_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Telegram,
    Slack,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TelegramDetails {
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SlackDetails {
    pub webhook_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
}

/// Channel-specific delivery settings. The variant is the type tag, so a
/// telegram channel can never carry slack fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "details", rename_all = "lowercase")]
pub enum NotificationDetails {
    Telegram(TelegramDetails),
    Slack(SlackDetails),
}

impl NotificationDetails {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Self::Telegram(_) => NotificationKind::Telegram,
            Self::Slack(_) => NotificationKind::Slack,
        }
    }

    /// The untagged payload as stored in the `details` column.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let value = match self {
            Self::Telegram(details) => serde_json::to_value(details)?,
            Self::Slack(details) => serde_json::to_value(details)?,
        };
        Ok(value)
    }

    /// Rebuild from the `type` and `details` columns.
    pub fn from_parts(kind: NotificationKind, details: serde_json::Value) -> Result<Self> {
        let parsed = match kind {
            NotificationKind::Telegram => Self::Telegram(serde_json::from_value(details)?),
            NotificationKind::Slack => Self::Slack(serde_json::from_value(details)?),
        };
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Telegram(details) => {
                if details.bot_token.trim().is_empty() {
                    return Err(Error::validation("Bot Token is required"));
                }
                if details.chat_id.trim().is_empty() {
                    return Err(Error::validation("Chat ID is required"));
                }
                Ok(())
            }
            Self::Slack(details) => validate_http_url(&details.webhook_url, "webhookUrl"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationChannel {
    pub id: Uuid,
    pub name: String,
    #[serde(flatten)]
    pub details: NotificationDetails,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Channel as submitted by a writer: the tag and the untyped details blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelInput {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub details: serde_json::Value,
}

impl ChannelInput {
    /// Check the details against the tag and return the typed form.
    pub fn validate(&self) -> Result<NotificationDetails> {
        if self.name.trim().is_empty() {
            return Err(Error::validation("name is required"));
        }
        let details = NotificationDetails::from_parts(self.kind, self.details.clone())
            .map_err(|e| Error::validation(format!("details do not match type: {e}")))?;
        details.validate()?;
        Ok(details)
    }
}

pub(crate) fn validate_http_url(raw: &str, field: &str) -> Result<()> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| Error::validation(format!("{field} is not a valid URL: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(Error::validation(format!(
            "{field} must use http or https, got {other}"
        ))),
    }
}
