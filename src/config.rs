// src/config.rs
//! Process configuration, read once at startup from TOML.
//!
//! Lookup: `$MENTION_MONITOR_CONFIG`, else `config/monitor.toml`.
//! Secrets written as `"ENV"` are taken from the environment.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::ingest::providers::feed::FeedOptions;
use crate::ingest::providers::messaging::MessagingOptions;
use crate::ingest::providers::social::SocialOptions;
use crate::ingest::retry::RetryPolicy;
use crate::matcher::DEFAULT_AGGREGATOR_HOSTS;

pub const ENV_CONFIG_PATH: &str = "MENTION_MONITOR_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/monitor.toml";

const ENV_MARKER: &str = "ENV";

fn default_database_path() -> String {
    "data/mentions.db".into()
}
fn default_interval_secs() -> u64 {
    300
}
fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_shutdown_grace_secs() -> u64 {
    10
}
fn default_cache_ttl_secs() -> u64 {
    3600
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    8000
}
fn default_api_version() -> String {
    "5.199".into()
}
fn default_social_interval_secs() -> u64 {
    60
}
fn default_social_count() -> u32 {
    100
}
fn default_long_poll_secs() -> u64 {
    50
}
fn default_smtp_port() -> u16 {
    587
}
fn default_bind() -> String {
    "0.0.0.0:8080".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Seeded into the keyword registry on startup.
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub social: Option<SocialConfig>,
    #[serde(default)]
    pub messaging: Option<MessagingConfig>,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default)]
    pub proxy: Option<String>,
    /// Host (and optional path prefix) patterns whose items skip keyword matching.
    #[serde(default = "default_aggregator_hosts")]
    pub aggregator_hosts: Vec<String>,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_aggregator_hosts() -> Vec<String> {
    DEFAULT_AGGREGATOR_HOSTS.iter().map(|s| s.to_string()).collect()
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            cache_ttl_secs: default_cache_ttl_secs(),
            proxy: None,
            aggregator_hosts: default_aggregator_hosts(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SocialConfig {
    pub access_token: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_social_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_social_count")]
    pub count: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagingConfig {
    pub bot_token: String,
    #[serde(default = "default_long_poll_secs")]
    pub long_poll_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub utc_offset_hours: i32,
    #[serde(default)]
    pub telegram: Option<TelegramNotifyConfig>,
    #[serde(default)]
    pub email: Option<EmailConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramNotifyConfig {
    pub bot_token: String,
    #[serde(default)]
    pub approved_users: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub to: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_origins: Vec::new(),
        }
    }
}

fn resolve_secret(value: &mut String, var: &'static str) -> Result<(), ConfigError> {
    if value.trim().eq_ignore_ascii_case(ENV_MARKER) {
        *value = std::env::var(var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingEnv(var))?;
    }
    Ok(())
}

impl AppConfig {
    /// `$MENTION_MONITOR_CONFIG` if set, else the default path.
    pub fn path_from_env() -> PathBuf {
        std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::path_from_env())
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse, resolve `"ENV"` secrets and validate.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let mut cfg: AppConfig = toml::from_str(raw)?;
        cfg.resolve_secrets()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn resolve_secrets(&mut self) -> Result<(), ConfigError> {
        if let Some(s) = self.social.as_mut() {
            resolve_secret(&mut s.access_token, "SOCIAL_ACCESS_TOKEN")?;
        }
        if let Some(m) = self.messaging.as_mut() {
            resolve_secret(&mut m.bot_token, "MESSAGING_BOT_TOKEN")?;
        }
        if let Some(t) = self.notify.telegram.as_mut() {
            resolve_secret(&mut t.bot_token, "NOTIFY_BOT_TOKEN")?;
        }
        if let Some(e) = self.notify.email.as_mut() {
            resolve_secret(&mut e.password, "SMTP_PASS")?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_path.trim().is_empty() {
            return Err(ConfigError::invalid("database_path", "must not be empty"));
        }
        if self.poll.interval_secs == 0 {
            return Err(ConfigError::invalid("poll.interval_secs", "must be positive"));
        }
        if self.poll.fetch_timeout_secs == 0 {
            return Err(ConfigError::invalid("poll.fetch_timeout_secs", "must be positive"));
        }

        for u in &self.feed.urls {
            match url::Url::parse(u) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                _ => return Err(ConfigError::invalid("feed.urls", format!("not an http(s) URL: {u}"))),
            }
        }
        let r = &self.feed.retry;
        if r.max_attempts == 0 {
            return Err(ConfigError::invalid("feed.retry.max_attempts", "must be at least 1"));
        }
        if r.base_delay_ms > r.max_delay_ms {
            return Err(ConfigError::invalid(
                "feed.retry.base_delay_ms",
                "must not exceed max_delay_ms",
            ));
        }

        if let Some(s) = &self.social {
            if s.access_token.trim().is_empty() {
                return Err(ConfigError::invalid("social.access_token", "must not be empty"));
            }
            if s.interval_secs == 0 {
                return Err(ConfigError::invalid("social.interval_secs", "must be positive"));
            }
            if !(1..=100).contains(&s.count) {
                return Err(ConfigError::invalid("social.count", "must be within 1..=100"));
            }
        }
        if let Some(m) = &self.messaging {
            if m.bot_token.trim().is_empty() {
                return Err(ConfigError::invalid("messaging.bot_token", "must not be empty"));
            }
        }

        if !(-12..=14).contains(&self.notify.utc_offset_hours) {
            return Err(ConfigError::invalid("notify.utc_offset_hours", "must be within -12..=14"));
        }
        if let Some(e) = &self.notify.email {
            if e.to.is_empty() {
                return Err(ConfigError::invalid("notify.email.to", "needs at least one recipient"));
            }
        }

        self.api
            .bind
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::invalid("api.bind", e.to_string()))?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll.interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.poll.shutdown_grace_secs)
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.api
            .bind
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::invalid("api.bind", e.to_string()))
    }

    pub fn feed_options(&self) -> FeedOptions {
        FeedOptions {
            timeout: Duration::from_secs(self.poll.fetch_timeout_secs),
            cache_ttl: Duration::from_secs(self.feed.cache_ttl_secs),
            proxy: self.feed.proxy.clone().filter(|p| !p.trim().is_empty()),
            retry: self.feed.retry.policy(),
        }
    }

    pub fn social_options(&self) -> Option<SocialOptions> {
        self.social.as_ref().map(|s| {
            let mut opts = SocialOptions::new(s.access_token.clone());
            opts.api_version = s.api_version.clone();
            opts.count = s.count;
            opts.timeout = Duration::from_secs(self.poll.fetch_timeout_secs);
            opts.retry = self.feed.retry.policy();
            opts
        })
    }

    pub fn messaging_options(&self) -> Option<MessagingOptions> {
        self.messaging.as_ref().map(|m| {
            let mut opts = MessagingOptions::new(m.bot_token.clone());
            opts.long_poll = Duration::from_secs(m.long_poll_secs);
            opts
        })
    }
}
