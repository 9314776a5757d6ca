//! Operator notification sinks.

use async_trait::async_trait;
use chrono::Utc;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::alerts::SweepAlert;

pub const TELEGRAM_TOKEN_VAR: &str = "TELEGRAM_BOT_TOKEN";
pub const TELEGRAM_CHAT_VAR: &str = "TELEGRAM_CHAT_ID";

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Errors raised while delivering a notification.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("notifier credentials missing: {variable} is not set")]
    MissingCredentials { variable: String },
    #[error("notification transport failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("notification API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("chart rendering failed: {message}")]
    Chart { message: String },
}

/// Result alias for notification operations.
pub type NotifyResult<T> = Result<T, NotifyError>;

/// Somewhere to send operator messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, subject: &str, body: &str, image: Option<&Path>) -> NotifyResult<()>;
}

/// Send an alert, logging instead of propagating delivery failures.
///
/// Returns whether delivery succeeded.
pub async fn dispatch(notifier: &dyn Notifier, alert: &SweepAlert) -> bool {
    let body = alert.body();
    match notifier
        .notify(alert.subject(), &body, alert.image.as_deref())
        .await
    {
        Ok(()) => {
            debug!("Delivered {:?} alert {:?}", alert.severity(), alert.subject());
            true
        }
        Err(e) => {
            warn!("Failed to deliver {:?} notification: {}", alert.subject(), e);
            false
        }
    }
}

/// Escape every MarkdownV2 control character with a backslash.
pub fn escape_markdown_v2(text: &str) -> String {
    const SPECIAL: &[char] = &[
        '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
    ];
    let mut escaped = String::with_capacity(text.len() + text.len() / 8);
    for c in text.chars() {
        if SPECIAL.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Telegram Bot API notifier.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    token: String,
    chat_id: String,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            chat_id: chat_id.into(),
            api_base: TELEGRAM_API_BASE.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Read credentials from `TELEGRAM_BOT_TOKEN` and `TELEGRAM_CHAT_ID`.
    pub fn from_env() -> NotifyResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> NotifyResult<Self> {
        let require = |name: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| NotifyError::MissingCredentials {
                    variable: name.to_string(),
                })
        };
        Ok(Self::new(
            require(TELEGRAM_TOKEN_VAR)?,
            require(TELEGRAM_CHAT_VAR)?,
        ))
    }

    /// Point at a different Bot API host.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    /// Escaped message text: subject, body and a send timestamp.
    pub fn format_message(subject: &str, body: &str) -> String {
        let timestamp = Utc::now().format("%y-%m-%d %I:%M:%S %p UTC");
        escape_markdown_v2(&format!("{}\n\n{}\n\n{}", subject, body, timestamp))
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn check(response: reqwest::Response) -> NotifyResult<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(NotifyError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, subject: &str, body: &str, image: Option<&Path>) -> NotifyResult<()> {
        let message = Self::format_message(subject, body);

        let image = image.filter(|p| p.is_file());
        let response = match image {
            Some(path) => {
                let bytes = tokio::fs::read(path).await?;
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "chart.png".to_string());
                let photo = reqwest::multipart::Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str("image/png")?;
                let form = reqwest::multipart::Form::new()
                    .text("chat_id", self.chat_id.clone())
                    .text("caption", message)
                    .text("parse_mode", "MarkdownV2")
                    .part("photo", photo);
                self.client
                    .post(self.endpoint("sendPhoto"))
                    .multipart(form)
                    .send()
                    .await?
            }
            None => {
                let payload = serde_json::json!({
                    "chat_id": self.chat_id,
                    "text": message,
                    "parse_mode": "MarkdownV2",
                });
                self.client
                    .post(self.endpoint("sendMessage"))
                    .json(&payload)
                    .send()
                    .await?
            }
        };
        Self::check(response).await
    }
}

/// Notifier that only writes to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, subject: &str, body: &str, image: Option<&Path>) -> NotifyResult<()> {
        match image {
            Some(path) => info!("[{}] {} (chart: {})", subject, body, path.display()),
            None => info!("[{}] {}", subject, body),
        }
        Ok(())
    }
}
