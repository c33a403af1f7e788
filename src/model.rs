// src/model.rs
//! Platform-agnostic mention model.
//!
//! A [`Mention`] is a shared [`MentionCore`] plus one platform-specific
//! [`MentionExt`]. The platform is derived from the extension variant, so a
//! stored mention can never disagree with its own table.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Feed,
    Social,
    Messaging,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Feed, Platform::Social, Platform::Messaging];

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Feed => "feed",
            Platform::Social => "social",
            Platform::Messaging => "messaging",
        }
    }

    /// Name of the per-platform mention table.
    pub fn table(self) -> &'static str {
        match self {
            Platform::Feed => "rss_mentions",
            Platform::Social => "social_mentions",
            Platform::Messaging => "messaging_mentions",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "feed" | "rss" => Ok(Platform::Feed),
            "social" | "vk" => Ok(Platform::Social),
            "messaging" | "telegram" => Ok(Platform::Messaging),
            other => Err(ValidationError::Param {
                name: "platform",
                message: format!("unknown platform `{other}`"),
            }),
        }
    }
}

/// Fields shared by every platform table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MentionCore {
    pub occurred_at: DateTime<Utc>,
    pub permalink: String,
    pub source_id: String,
    pub source_link: String,
    pub author_id: String,
    pub author_display_name: String,
    pub author_handle: String,
    pub body_text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedExt {
    pub feed_url: String,
    pub entry_title: String,
    pub entry_summary: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SocialExt {
    pub post_id: i64,
    pub group_id: i64,
    pub likes: i64,
    pub reposts: i64,
    pub comments: i64,
    pub views: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagingExt {
    pub chat_id: i64,
    pub message_id: i64,
    pub reply_to_message_id: Option<i64>,
    pub forwarded_from: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "lowercase")]
pub enum MentionExt {
    Feed(FeedExt),
    Social(SocialExt),
    Messaging(MessagingExt),
}

impl MentionExt {
    pub fn platform(&self) -> Platform {
        match self {
            MentionExt::Feed(_) => Platform::Feed,
            MentionExt::Social(_) => Platform::Social,
            MentionExt::Messaging(_) => Platform::Messaging,
        }
    }
}

/// A stored mention, as read back from its platform table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    pub id: i64,
    #[serde(flatten)]
    pub core: MentionCore,
    #[serde(flatten)]
    pub ext: MentionExt,
}

impl Mention {
    pub fn platform(&self) -> Platform {
        self.ext.platform()
    }
}

/// Insert input. `occurred_at` stays optional until the store validates it.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMention {
    pub occurred_at: Option<DateTime<Utc>>,
    pub permalink: String,
    pub source_id: String,
    pub source_link: String,
    pub author_id: String,
    pub author_display_name: String,
    pub author_handle: String,
    pub body_text: String,
    pub ext: MentionExt,
}

impl NewMention {
    /// Check the write-time invariants and stamp the ingestion time.
    pub fn validate(
        self,
        platform: Platform,
        created_at: DateTime<Utc>,
    ) -> Result<(MentionCore, MentionExt), ValidationError> {
        let found = self.ext.platform();
        if found != platform {
            return Err(ValidationError::PlatformMismatch {
                expected: platform,
                found,
            });
        }
        let occurred_at = self.occurred_at.ok_or(ValidationError::MissingOccurredAt)?;
        if self.permalink.trim().is_empty() {
            return Err(ValidationError::MissingPermalink);
        }
        let core = MentionCore {
            occurred_at,
            permalink: self.permalink,
            source_id: self.source_id,
            source_link: self.source_link,
            author_id: self.author_id,
            author_display_name: self.author_display_name,
            author_handle: self.author_handle,
            body_text: self.body_text,
            created_at,
        };
        Ok((core, self.ext))
    }
}

/// Registry entry for one origin (feed URL, group, chat).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub platform: Platform,
    pub source_id: String,
    pub display_name: String,
    pub link: String,
    pub is_active: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    pub text: String,
    pub is_active: bool,
}

/// Federated read filter. `limit` must be 1..=1000.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MentionFilter {
    pub platform: Option<Platform>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub source_id: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

pub const DEFAULT_LIMIT: u32 = 100;
pub const MAX_LIMIT: u32 = 1000;

impl Default for MentionFilter {
    fn default() -> Self {
        Self {
            platform: None,
            start_time: None,
            end_time: None,
            source_id: None,
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

impl MentionFilter {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.limit == 0 || self.limit > MAX_LIMIT {
            return Err(ValidationError::LimitOutOfRange(self.limit));
        }
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if start > end {
                return Err(ValidationError::InvertedRange);
            }
        }
        Ok(())
    }

    pub fn platforms(&self) -> Vec<Platform> {
        match self.platform {
            Some(p) => vec![p],
            None => Platform::ALL.to_vec(),
        }
    }
}
