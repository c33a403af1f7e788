use anyhow::{anyhow, Context as _, Result};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::{format_html, MentionEvent, Notifier};
use crate::error::FetchError;
use crate::ingest::retry::RetryPolicy;

const ENDPOINT: &str = "telegram sendMessage";

/// Bot API `sendMessage` to every approved recipient.
#[derive(Clone)]
pub struct TelegramNotifier {
    api_base: String,
    token: String,
    recipients: Vec<i64>,
    utc_offset_hours: i32,
    client: Client,
    timeout: Duration,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

impl TelegramNotifier {
    pub fn new(token: String, recipients: Vec<i64>) -> Self {
        Self {
            api_base: "https://api.telegram.org".into(),
            token,
            recipients,
            utc_offset_hours: 0,
            client: Client::new(),
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    pub fn with_utc_offset(mut self, hours: i32) -> Self {
        self.utc_offset_hours = hours;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, attempts: u32) -> Self {
        self.retry.max_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn send_to(&self, chat_id: i64, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_base.trim_end_matches('/'), self.token);
        let payload = SendMessage {
            chat_id,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };
        self.retry
            .run(|_| self.post_once(&url, &payload))
            .await
            .with_context(|| format!("sendMessage to {chat_id}"))
    }

    /// One `sendMessage` call. Errors name the method only; the URL holds the token.
    async fn post_once(&self, url: &str, payload: &SendMessage<'_>) -> Result<(), FetchError> {
        let rsp = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await
            .map_err(|e| FetchError::Network {
                url: ENDPOINT.into(),
                source: e.without_url(),
            })?;
        let status = rsp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = rsp.text().await.unwrap_or_default();
        tracing::debug!(chat_id = payload.chat_id, %status, %body, "sendMessage rejected");
        Err(FetchError::Status {
            url: ENDPOINT.into(),
            status: status.as_u16(),
        })
    }
}

#[async_trait::async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, ev: &MentionEvent) -> Result<()> {
        if self.recipients.is_empty() {
            tracing::debug!("telegram notifier has no approved recipients");
            return Ok(());
        }
        let text = format_html(ev, self.utc_offset_hours);

        let mut failed = 0usize;
        for &user in &self.recipients {
            match self.send_to(user, &text).await {
                Ok(()) => tracing::info!(recipient = user, "notification sent"),
                Err(e) => {
                    failed += 1;
                    tracing::error!(recipient = user, "notification to recipient failed: {e:#}");
                }
            }
        }
        if failed == self.recipients.len() {
            return Err(anyhow!("all {failed} recipients failed"));
        }
        Ok(())
    }
}
