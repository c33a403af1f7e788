// src/query.rs
//! Dashboard read model: query-string parsing and the federated mention read.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone as _, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{StoreError, ValidationError};
use crate::model::{Keyword, Mention, MentionFilter, Platform, Source, DEFAULT_LIMIT};
use crate::store::{days_ago, MentionStore};

/// Trailing window used when no start date is given.
pub const DEFAULT_WINDOW_DAYS: i64 = 7;

/// Raw query parameters. Empty strings count as absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DashboardQuery {
    pub platform: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub source_id: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

fn present(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn param(name: &'static str, message: impl Into<String>) -> ValidationError {
    ValidationError::Param {
        name,
        message: message.into(),
    }
}

#[derive(Clone, Copy)]
enum Bound {
    Start,
    End,
}

/// RFC 3339, or a bare `YYYY-MM-DD` taken as the start or end of that UTC day.
fn parse_date(name: &'static str, raw: &str, bound: Bound) -> Result<DateTime<Utc>, ValidationError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let day = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| param(name, format!("expected RFC 3339 or YYYY-MM-DD, got `{raw}`")))?;
    let time = match bound {
        Bound::Start => NaiveTime::MIN,
        Bound::End => NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).unwrap_or(NaiveTime::MIN),
    };
    Ok(Utc.from_utc_datetime(&day.and_time(time)))
}

fn parse_u32(name: &'static str, raw: &str) -> Result<u32, ValidationError> {
    raw.parse()
        .map_err(|_| param(name, format!("expected a non-negative integer, got `{raw}`")))
}

impl DashboardQuery {
    /// Resolve defaults against `now` and validate.
    pub fn into_filter(&self, now: DateTime<Utc>) -> Result<MentionFilter, ValidationError> {
        let platform = present(&self.platform)
            .map(str::parse::<Platform>)
            .transpose()?;

        let end_time = present(&self.end_date)
            .map(|s| parse_date("end_date", s, Bound::End))
            .transpose()?;
        let start_time = match present(&self.start_date) {
            Some(s) => parse_date("start_date", s, Bound::Start)?,
            None => days_ago(end_time.unwrap_or(now), DEFAULT_WINDOW_DAYS),
        };

        let limit = present(&self.limit)
            .map(|s| parse_u32("limit", s))
            .transpose()?
            .unwrap_or(DEFAULT_LIMIT);
        let offset = present(&self.offset)
            .map(|s| parse_u32("offset", s))
            .transpose()?
            .unwrap_or(0);

        let filter = MentionFilter {
            platform,
            start_time: Some(start_time),
            end_time: Some(end_time.unwrap_or(now)),
            source_id: present(&self.source_id).map(str::to_owned),
            limit,
            offset,
        };
        filter.validate()?;
        Ok(filter)
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for QueryError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Validation(v) => QueryError::Invalid(v),
            other => QueryError::Store(other),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DashboardData {
    pub mentions: Vec<Mention>,
    pub sources: Vec<Source>,
    pub keywords: Vec<Keyword>,
    pub filters: MentionFilter,
}

/// One page of mentions plus the registries, all-or-nothing.
pub async fn dashboard_data(
    store: &MentionStore,
    query: &DashboardQuery,
    now: DateTime<Utc>,
) -> Result<DashboardData, QueryError> {
    let filters = query.into_filter(now)?;
    let mentions = store.query_mentions(&filters).await?;
    let sources = store.list_active_sources(filters.platform).await?;
    let keywords = store.list_active_keywords().await?;
    Ok(DashboardData {
        mentions,
        sources,
        keywords,
        filters,
    })
}
