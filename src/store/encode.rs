// src/store/encode.rs
//! Conversions between domain types and the plain SQLite column values.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings
//! (`2024-05-01T10:00:00.000000Z`) so that lexical order equals time order.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{StoreError, StoreResult};
use crate::model::{
    FeedExt, Mention, MentionCore, MentionExt, MessagingExt, Platform, Source, SocialExt,
};

pub fn encode_dt(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(table: &'static str, s: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Decode {
            table,
            message: format!("bad timestamp {s:?}: {e}"),
        })
}

pub fn decode_platform(s: &str) -> StoreResult<Platform> {
    s.parse().map_err(|_| StoreError::Decode {
        table: "sources",
        message: format!("unknown platform {s:?}"),
    })
}

/// `true` when the error is the permalink unique-index backstop.
pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
                && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

// ─── Mention rows ────────────────────────────────────────────────────────────

/// Row exactly as read from a `*_mentions` table, before timestamp decoding.
#[derive(Debug)]
pub struct RawMention {
    pub table: &'static str,
    pub id: i64,
    pub occurred_at: String,
    pub permalink: String,
    pub source_id: String,
    pub source_link: String,
    pub author_id: String,
    pub author_display_name: String,
    pub author_handle: String,
    pub body_text: String,
    pub created_at: String,
    pub ext: MentionExt,
}

impl RawMention {
    /// Read the shared core columns (positions 0..10) plus the platform columns.
    pub fn from_row(platform: Platform, row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let ext = match platform {
            Platform::Feed => MentionExt::Feed(FeedExt {
                feed_url: row.get(10)?,
                entry_title: row.get(11)?,
                entry_summary: row.get(12)?,
            }),
            Platform::Social => MentionExt::Social(SocialExt {
                post_id: row.get(10)?,
                group_id: row.get(11)?,
                likes: row.get(12)?,
                reposts: row.get(13)?,
                comments: row.get(14)?,
                views: row.get(15)?,
            }),
            Platform::Messaging => MentionExt::Messaging(MessagingExt {
                chat_id: row.get(10)?,
                message_id: row.get(11)?,
                reply_to_message_id: row.get(12)?,
                forwarded_from: row.get(13)?,
            }),
        };
        Ok(Self {
            table: platform.table(),
            id: row.get(0)?,
            occurred_at: row.get(1)?,
            permalink: row.get(2)?,
            source_id: row.get(3)?,
            source_link: row.get(4)?,
            author_id: row.get(5)?,
            author_display_name: row.get(6)?,
            author_handle: row.get(7)?,
            body_text: row.get(8)?,
            created_at: row.get(9)?,
            ext,
        })
    }

    pub fn into_mention(self) -> StoreResult<Mention> {
        Ok(Mention {
            id: self.id,
            core: MentionCore {
                occurred_at: decode_dt(self.table, &self.occurred_at)?,
                permalink: self.permalink,
                source_id: self.source_id,
                source_link: self.source_link,
                author_id: self.author_id,
                author_display_name: self.author_display_name,
                author_handle: self.author_handle,
                body_text: self.body_text,
                created_at: decode_dt(self.table, &self.created_at)?,
            },
            ext: self.ext,
        })
    }
}

/// Platform-specific columns appended after [`super::schema::CORE_COLUMNS`].
pub fn ext_columns(platform: Platform) -> &'static str {
    match platform {
        Platform::Feed => "feed_url, entry_title, entry_summary",
        Platform::Social => "post_id, group_id, likes, reposts, comments, views",
        Platform::Messaging => "chat_id, message_id, reply_to_message_id, forwarded_from",
    }
}

// ─── Source rows ─────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct RawSource {
    pub platform: String,
    pub source_id: String,
    pub display_name: String,
    pub link: String,
    pub is_active: bool,
    pub last_checked_at: Option<String>,
}

impl RawSource {
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            platform: row.get(0)?,
            source_id: row.get(1)?,
            display_name: row.get(2)?,
            link: row.get(3)?,
            is_active: row.get(4)?,
            last_checked_at: row.get(5)?,
        })
    }

    pub fn into_source(self) -> StoreResult<Source> {
        Ok(Source {
            platform: decode_platform(&self.platform)?,
            source_id: self.source_id,
            display_name: self.display_name,
            link: self.link,
            is_active: self.is_active,
            last_checked_at: self
                .last_checked_at
                .as_deref()
                .map(|s| decode_dt("sources", s))
                .transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn encoded_timestamps_sort_lexically() {
        let a = Utc.with_ymd_and_hms(2024, 1, 9, 23, 59, 59).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        assert!(encode_dt(a) < encode_dt(b));
        assert_eq!(encode_dt(b), "2024-01-10T00:00:00.000000Z");
        assert_eq!(decode_dt("t", &encode_dt(a)).unwrap(), a);
    }
}
