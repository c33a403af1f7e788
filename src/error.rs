// src/error.rs
//! Error taxonomy for the ingestion pipeline.
//!
//! - [`ValidationError`]: a single malformed mention; the item is rejected, the batch continues.
//! - [`ParseError`]: a malformed payload from a source; the source is skipped for the cycle.
//! - [`FetchError`]: network/auth/API failure; retried per policy, then skipped.
//! - [`StoreError`]: storage failure; propagated to the caller, never fatal to a poll loop.
//! - [`ConfigError`]: fatal at startup only.

use thiserror::Error;

use crate::model::Platform;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("mention is missing occurred_at")]
    MissingOccurredAt,

    #[error("mention is missing a dedup key (permalink)")]
    MissingPermalink,

    #[error("extension fields for {found} cannot be stored as {expected}")]
    PlatformMismatch { expected: Platform, found: Platform },

    #[error("limit must be within 1..=1000, got {0}")]
    LimitOutOfRange(u32),

    #[error("start_time is after end_time")]
    InvertedRange,

    #[error("invalid parameter `{name}`: {message}")]
    Param { name: &'static str, message: String },
}

#[derive(Debug, Error)]
#[error("cannot parse payload from {source_ref}: {message}")]
pub struct ParseError {
    pub source_ref: String,
    pub message: String,
}

impl ParseError {
    pub fn new(source_ref: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self {
            source_ref: source_ref.into(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("api error {code}: {message}")]
    Api { code: i64, message: String },
}

impl FetchError {
    /// Transient failures worth another attempt: transport errors, 5xx and 429.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network { .. } => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Auth(_) | FetchError::Api { .. } => false,
        }
    }
}

/// Failure of one fetch for one source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl SourceError {
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::Fetch(_) => "fetch",
            SourceError::Parse(_) => "parse",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The unique permalink backstop fired: another writer stored it first.
    #[error("{platform} mention {permalink} already stored")]
    Duplicate {
        platform: Platform,
        permalink: String,
    },

    #[error("database error: {0}")]
    Storage(#[from] tokio_rusqlite::Error),

    #[error("corrupt row in {table}: {message}")]
    Decode { table: &'static str, message: String },
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Storage(tokio_rusqlite::Error::Rusqlite(e))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing environment variable {0}")]
    MissingEnv(&'static str),

    #[error("invalid config value `{field}`: {message}")]
    Invalid { field: &'static str, message: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            message: message.into(),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
