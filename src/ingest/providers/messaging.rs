// src/ingest/providers/messaging.rs
//! Messaging-platform listener (Telegram Bot API `getUpdates` long-poll).
//!
//! Unlike the polled fetchers this is a long-lived subscription: messages are
//! pushed into an `mpsc` channel as they arrive. Cancelling the token drops
//! the in-flight long-poll request, which closes its connection.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument as _;

use crate::error::{FetchError, ParseError, SourceError};
use crate::ingest::retry::RetryPolicy;
use crate::ingest::types::ChatMessage;

#[derive(Debug, Clone)]
pub struct MessagingOptions {
    pub api_base: String,
    pub bot_token: String,
    /// Server-side long-poll wait.
    pub long_poll: Duration,
    /// Backoff between failed polls; `max_attempts` is ignored.
    pub retry: RetryPolicy,
}

impl MessagingOptions {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            api_base: "https://api.telegram.org".into(),
            bot_token: bot_token.into(),
            long_poll: Duration::from_secs(50),
            retry: RetryPolicy::default(),
        }
    }
}

/* ----------------------------
Wire format
---------------------------- */

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    channel_post: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
    #[serde(default)]
    date: i64,
    chat: Chat,
    #[serde(default)]
    from: Option<User>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    reply_to_message: Option<ReplyRef>,
    #[serde(default)]
    forward_origin: Option<ForwardOrigin>,
    #[serde(default)]
    forward_from_chat: Option<Chat>,
    #[serde(default)]
    forward_sender_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReplyRef {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct ForwardOrigin {
    #[serde(default)]
    sender_user: Option<User>,
    #[serde(default)]
    sender_user_name: Option<String>,
    #[serde(default)]
    sender_chat: Option<Chat>,
    #[serde(default)]
    chat: Option<Chat>,
}

fn full_name(first: &str, last: Option<&str>) -> String {
    format!("{first} {}", last.unwrap_or_default()).trim().to_string()
}

impl Chat {
    fn display_name(&self) -> String {
        match &self.title {
            Some(t) => t.clone(),
            None => full_name(self.first_name.as_deref().unwrap_or_default(), self.last_name.as_deref()),
        }
    }
}

impl User {
    fn display_name(&self) -> String {
        full_name(&self.first_name, self.last_name.as_deref())
    }
}

impl Message {
    fn forwarded_from(&self) -> Option<String> {
        if let Some(origin) = &self.forward_origin {
            return origin
                .sender_user
                .as_ref()
                .map(User::display_name)
                .or_else(|| origin.sender_user_name.clone())
                .or_else(|| origin.sender_chat.as_ref().map(Chat::display_name))
                .or_else(|| origin.chat.as_ref().map(Chat::display_name));
        }
        self.forward_from_chat
            .as_ref()
            .map(Chat::display_name)
            .or_else(|| self.forward_sender_name.clone())
    }
}

impl Update {
    /// Text-bearing message or channel post, if any.
    pub fn into_chat_message(self) -> Option<ChatMessage> {
        let msg = self.message.or(self.channel_post)?;
        let forwarded_from = msg.forwarded_from();
        let text = msg.text.or(msg.caption).filter(|t| !t.trim().is_empty())?;
        Some(ChatMessage {
            chat_id: msg.chat.id,
            chat_title: msg.chat.display_name(),
            chat_username: msg.chat.username.clone(),
            message_id: msg.message_id,
            date: msg.date,
            text,
            sender_id: msg.from.as_ref().map(|u| u.id),
            sender_name: msg.from.as_ref().map(User::display_name).unwrap_or_default(),
            sender_username: msg.from.and_then(|u| u.username),
            reply_to_message_id: msg.reply_to_message.map(|r| r.message_id),
            forwarded_from,
        })
    }
}

fn decode_response<T: DeserializeOwned>(source_ref: &str, body: &str) -> Result<T, SourceError> {
    let rsp: ApiResponse<T> =
        serde_json::from_str(body).map_err(|e| ParseError::new(source_ref, e))?;
    if !rsp.ok {
        let code = rsp.error_code.unwrap_or_default();
        let message = rsp.description.unwrap_or_default();
        return Err(if code == 401 || code == 404 {
            FetchError::Auth(message)
        } else {
            FetchError::Api { code, message }
        }
        .into());
    }
    rsp.result
        .ok_or_else(|| ParseError::new(source_ref, "ok response without result").into())
}

pub fn decode_updates(body: &str) -> Result<Vec<Update>, SourceError> {
    decode_response("getUpdates", body)
}

/* ----------------------------
Listener
---------------------------- */

pub struct TelegramListener {
    client: reqwest::Client,
    opts: MessagingOptions,
    span: tracing::Span,
}

impl TelegramListener {
    pub fn new(opts: MessagingOptions) -> Result<Self, FetchError> {
        // Client timeout must outlast the server-side long-poll wait.
        let client = reqwest::Client::builder()
            .timeout(opts.long_poll + Duration::from_secs(10))
            .build()
            .map_err(|e| FetchError::Network {
                url: opts.api_base.clone(),
                source: e,
            })?;
        Ok(Self {
            client,
            opts,
            span: tracing::info_span!("telegram_listener"),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.opts.api_base.trim_end_matches('/'),
            self.opts.bot_token
        )
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let url = self.method_url(method);
        let rsp = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| FetchError::Network {
                url: method.to_string(),
                source: e.without_url(),
            })?;
        // Telegram reports API errors with a JSON body and a 4xx status.
        let status = rsp.status();
        let body = rsp.text().await.map_err(|e| FetchError::Network {
            url: method.to_string(),
            source: e.without_url(),
        })?;
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(FetchError::Status {
                url: method.to_string(),
                status: status.as_u16(),
            }
            .into());
        }
        decode_response(method, &body)
    }

    /// Validate the bot token.
    pub async fn get_me(&self) -> Result<BotUser, FetchError> {
        self.call("getMe", &[]).await.map_err(|e| match e {
            SourceError::Fetch(f) => f,
            SourceError::Parse(p) => FetchError::Auth(p.to_string()),
        })
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, SourceError> {
        let query = [
            ("offset", offset.to_string()),
            ("timeout", self.opts.long_poll.as_secs().to_string()),
            ("allowed_updates", r#"["message","channel_post"]"#.to_string()),
        ];
        self.call("getUpdates", &query).await
    }

    /// Long-poll until `cancel` fires or the receiver is dropped.
    pub async fn run(&self, tx: mpsc::Sender<ChatMessage>, cancel: CancellationToken) {
        let mut offset: i64 = 0;
        let mut failures: u32 = 0;
        tracing::info!("listening for messages");

        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => break,
                res = self.get_updates(offset) => res,
            };

            match polled {
                Ok(updates) => {
                    failures = 0;
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        let Some(msg) = update.into_chat_message() else {
                            continue;
                        };
                        if tx.send(msg).await.is_err() {
                            tracing::info!("message consumer gone; stopping");
                            return;
                        }
                    }
                }
                Err(SourceError::Fetch(FetchError::Auth(msg))) => {
                    tracing::error!(error = %msg, "bot token rejected; listener stopped");
                    return;
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.opts.retry.delay_for(failures);
                    tracing::warn!(error = %e, failures, delay_ms = delay.as_millis() as u64, "getUpdates failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        tracing::info!("listener stopped");
    }

    pub fn spawn(
        self: Arc<Self>,
        tx: mpsc::Sender<ChatMessage>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let span = self.span.clone();
        tokio::spawn(async move { self.run(tx, cancel).await }.instrument(span))
    }
}
