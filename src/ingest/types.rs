// src/ingest/types.rs
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::matcher::candidate_text;
use crate::model::Platform;

/// One pollable origin handed to [`SourceFetcher::fetch`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceRef {
    pub platform: Platform,
    /// Stable id within the platform (feed URL, group id, chat id).
    pub id: String,
    /// URL used to reach it; also what the aggregator exemption inspects.
    pub url: String,
}

/// Registry metadata learned while fetching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceInfo {
    pub source_id: String,
    pub display_name: String,
    pub link: String,
}

#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub source: Option<SourceInfo>,
    pub items: Vec<RawItem>,
}

/// Polled source adapter. Implementations own their HTTP client, span and cache.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    fn platform(&self) -> Platform;
    fn name(&self) -> &str;
    fn sources(&self) -> Vec<SourceRef>;
    async fn fetch(&self, source: &SourceRef) -> Result<FetchOutcome, SourceError>;
}

/* ----------------------------
Raw items, before normalization
---------------------------- */

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub feed_url: String,
    pub feed_title: String,
    pub feed_link: String,
    pub title: String,
    pub link: String,
    pub published: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SocialPost {
    pub post_id: i64,
    /// Wall owner; negative for communities.
    pub owner_id: i64,
    pub from_id: i64,
    pub date: i64,
    pub text: String,
    pub author_name: String,
    pub author_handle: String,
    pub owner_name: String,
    pub owner_handle: String,
    pub likes: i64,
    pub reposts: i64,
    pub comments: i64,
    pub views: i64,
}

impl SocialPost {
    pub fn permalink(&self) -> String {
        format!("https://vk.com/wall{}_{}", self.owner_id, self.post_id)
    }

    /// Link to the wall owner: community or user page.
    pub fn owner_link(&self) -> String {
        if !self.owner_handle.is_empty() {
            format!("https://vk.com/{}", self.owner_handle)
        } else if self.owner_id < 0 {
            format!("https://vk.com/club{}", -self.owner_id)
        } else {
            format!("https://vk.com/id{}", self.owner_id)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub chat_id: i64,
    pub chat_title: String,
    pub chat_username: Option<String>,
    pub message_id: i64,
    pub date: i64,
    pub text: String,
    pub sender_id: Option<i64>,
    pub sender_name: String,
    pub sender_username: Option<String>,
    pub reply_to_message_id: Option<i64>,
    pub forwarded_from: Option<String>,
}

impl ChatMessage {
    /// `https://t.me/{username}` for public chats, `https://t.me/c/{id}` otherwise.
    pub fn chat_link(&self) -> String {
        match self.chat_username.as_deref().filter(|u| !u.is_empty()) {
            Some(username) => format!("https://t.me/{username}"),
            None => format!("https://t.me/c/{}", internal_chat_id(self.chat_id)),
        }
    }

    pub fn message_link(&self) -> String {
        format!("{}/{}", self.chat_link(), self.message_id)
    }
}

/// Strip the `-100` supergroup prefix; plain group ids just lose their sign.
pub fn internal_chat_id(chat_id: i64) -> String {
    let s = chat_id.to_string();
    match s.strip_prefix("-100") {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => s.trim_start_matches('-').to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RawItem {
    Feed(FeedEntry),
    Social(SocialPost),
    Messaging(ChatMessage),
}

impl RawItem {
    pub fn platform(&self) -> Platform {
        match self {
            RawItem::Feed(_) => Platform::Feed,
            RawItem::Social(_) => Platform::Social,
            RawItem::Messaging(_) => Platform::Messaging,
        }
    }

    /// Every textually relevant field, joined for the matcher.
    pub fn candidate_text(&self) -> String {
        match self {
            RawItem::Feed(e) => candidate_text([
                e.title.as_str(),
                e.summary.as_deref().unwrap_or_default(),
                e.description.as_deref().unwrap_or_default(),
                e.content.as_deref().unwrap_or_default(),
                e.link.as_str(),
            ]),
            RawItem::Social(p) => candidate_text([p.text.as_str()]),
            RawItem::Messaging(m) => candidate_text([m.text.as_str()]),
        }
    }

    /// Registry view of where this item came from.
    pub fn origin(&self) -> SourceInfo {
        match self {
            RawItem::Feed(e) => SourceInfo {
                source_id: e.feed_url.clone(),
                display_name: e.feed_title.clone(),
                link: e.feed_url.clone(),
            },
            RawItem::Social(p) => SourceInfo {
                source_id: p.owner_id.to_string(),
                display_name: p.owner_name.clone(),
                link: p.owner_link(),
            },
            RawItem::Messaging(m) => SourceInfo {
                source_id: m.chat_id.to_string(),
                display_name: m.chat_title.clone(),
                link: m.chat_link(),
            },
        }
    }
}
