// src/normalize.rs
//! Raw source items → [`NewMention`].
//!
//! Pure functions; `now` is passed in so a missing publish time falls back to
//! a known ingestion instant.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use crate::ingest::types::{ChatMessage, FeedEntry, RawItem, SocialPost};
use crate::model::{FeedExt, MentionExt, MessagingExt, NewMention, SocialExt};

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Decode entities, strip tags, collapse whitespace.
pub fn clean_text(s: &str) -> String {
    // Tags first: decoding could otherwise turn `&lt;b&gt;` text into markup.
    let stripped = RE_TAGS.replace_all(s, " ");
    let decoded = html_escape::decode_html_entities(&stripped);
    RE_WS.replace_all(&decoded, " ").trim().to_string()
}

/// RFC 2822, RFC 3339 or unix seconds; `None` when none of them fit.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let odt = OffsetDateTime::parse(raw, &Rfc2822)
        .or_else(|_| OffsetDateTime::parse(raw, &Rfc3339))
        .ok();
    if let Some(odt) = odt {
        return DateTime::from_timestamp(odt.unix_timestamp(), odt.nanosecond());
    }
    raw.parse::<i64>().ok().and_then(from_unix)
}

fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    (secs > 0).then(|| DateTime::from_timestamp(secs, 0)).flatten()
}

fn occurred_or_now(
    parsed: Option<DateTime<Utc>>,
    raw: &str,
    source_id: &str,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    parsed.unwrap_or_else(|| {
        tracing::warn!(source_id, raw, "no usable publish time; using ingestion time");
        now
    })
}

/// Fallback dedup key when a source supplies no permalink.
pub fn composite_key(source_id: &str, occurred_at: DateTime<Utc>, body_text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update(b"|");
    hasher.update(occurred_at.to_rfc3339().as_bytes());
    hasher.update(b"|");
    hasher.update(body_text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(12 + 32);
    out.push_str("urn:mention:");
    for b in digest.iter().take(16) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

fn permalink_or_key(link: &str, source_id: &str, occurred_at: DateTime<Utc>, body: &str) -> String {
    let link = link.trim();
    if link.is_empty() {
        composite_key(source_id, occurred_at, body)
    } else {
        link.to_string()
    }
}

/// Dispatch on the item kind. `exempt` marks aggregator feeds.
pub fn normalize(item: &RawItem, exempt: bool, now: DateTime<Utc>) -> NewMention {
    match item {
        RawItem::Feed(e) => normalize_feed(e, exempt, now),
        RawItem::Social(p) => normalize_social(p, now),
        RawItem::Messaging(m) => normalize_messaging(m, now),
    }
}

fn first_non_empty<'a>(candidates: &[Option<&'a str>]) -> &'a str {
    candidates
        .iter()
        .flatten()
        .find(|s| !s.trim().is_empty())
        .copied()
        .unwrap_or_default()
}

pub fn normalize_feed(entry: &FeedEntry, exempt: bool, now: DateTime<Utc>) -> NewMention {
    let raw_published = entry.published.as_deref().unwrap_or_default();
    let occurred_at = occurred_or_now(parse_timestamp(raw_published), raw_published, &entry.feed_url, now);

    let summary = entry.summary.as_deref();
    let description = entry.description.as_deref();
    let content = entry.content.as_deref();
    // Aggregator summaries are truncated snippets; their content is the full hit.
    let body = if exempt {
        first_non_empty(&[content, summary, description])
    } else {
        first_non_empty(&[summary, description, content])
    };
    let body_text = clean_text(body);
    let entry_summary = clean_text(first_non_empty(&[summary, description]));

    NewMention {
        occurred_at: Some(occurred_at),
        permalink: permalink_or_key(&entry.link, &entry.feed_url, occurred_at, &body_text),
        source_id: entry.feed_url.clone(),
        source_link: if entry.feed_link.is_empty() {
            entry.feed_url.clone()
        } else {
            entry.feed_link.clone()
        },
        author_id: String::new(),
        author_display_name: clean_text(entry.author.as_deref().unwrap_or_default()),
        author_handle: String::new(),
        body_text,
        ext: MentionExt::Feed(FeedExt {
            feed_url: entry.feed_url.clone(),
            entry_title: clean_text(&entry.title),
            entry_summary,
        }),
    }
}

pub fn normalize_social(post: &SocialPost, now: DateTime<Utc>) -> NewMention {
    let source_id = post.owner_id.to_string();
    let occurred_at = occurred_or_now(from_unix(post.date), &post.date.to_string(), &source_id, now);
    let body_text = clean_text(&post.text);
    let permalink = if post.post_id > 0 {
        post.permalink()
    } else {
        composite_key(&source_id, occurred_at, &body_text)
    };

    NewMention {
        occurred_at: Some(occurred_at),
        permalink,
        source_link: post.owner_link(),
        source_id,
        author_id: if post.from_id == 0 {
            String::new()
        } else {
            post.from_id.to_string()
        },
        author_display_name: post.author_name.clone(),
        author_handle: post.author_handle.clone(),
        body_text,
        ext: MentionExt::Social(SocialExt {
            post_id: post.post_id,
            group_id: post.owner_id,
            likes: post.likes,
            reposts: post.reposts,
            comments: post.comments,
            views: post.views,
        }),
    }
}

pub fn normalize_messaging(msg: &ChatMessage, now: DateTime<Utc>) -> NewMention {
    let source_id = msg.chat_id.to_string();
    let occurred_at = occurred_or_now(from_unix(msg.date), &msg.date.to_string(), &source_id, now);
    let body_text = clean_text(&msg.text);
    let permalink = if msg.message_id > 0 {
        msg.message_link()
    } else {
        composite_key(&source_id, occurred_at, &body_text)
    };

    NewMention {
        occurred_at: Some(occurred_at),
        permalink,
        source_link: msg.chat_link(),
        source_id,
        author_id: msg.sender_id.map(|id| id.to_string()).unwrap_or_default(),
        author_display_name: msg.sender_name.clone(),
        author_handle: msg.sender_username.clone().unwrap_or_default(),
        body_text,
        ext: MentionExt::Messaging(MessagingExt {
            chat_id: msg.chat_id,
            message_id: msg.message_id,
            reply_to_message_id: msg.reply_to_message_id,
            forwarded_from: msg.forwarded_from.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn clean_text_strips_markup_and_whitespace() {
        let s = "  <b>Acme</b>&nbsp;&amp; friends\n\n<br/>launch  ";
        assert_eq!(clean_text(s), "Acme & friends launch");
    }

    #[test]
    fn timestamps_in_all_supported_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 4, 30, 8, 15, 0).unwrap();
        assert_eq!(parse_timestamp("Tue, 30 Apr 2024 08:15:00 +0000"), Some(expected));
        assert_eq!(parse_timestamp("2024-04-30T10:15:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp(&expected.timestamp().to_string()), Some(expected));
        assert_eq!(parse_timestamp("yesterday-ish"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn missing_publish_time_falls_back_to_now() {
        let entry = FeedEntry {
            feed_url: "https://feed.test/rss".into(),
            link: "https://feed.test/a".into(),
            title: "A".into(),
            ..Default::default()
        };
        let m = normalize_feed(&entry, false, now());
        assert_eq!(m.occurred_at, Some(now()));
    }

    #[test]
    fn feed_text_precedence_depends_on_exemption() {
        let entry = FeedEntry {
            feed_url: "https://www.google.com/alerts/feeds/1/2".into(),
            link: "https://news.test/a".into(),
            published: Some("2024-04-30T10:00:00Z".into()),
            summary: Some("snippet…".into()),
            description: Some("desc".into()),
            content: Some("<p>full <b>Acme</b> story</p>".into()),
            ..Default::default()
        };
        assert_eq!(normalize_feed(&entry, false, now()).body_text, "snippet…");
        assert_eq!(normalize_feed(&entry, true, now()).body_text, "full Acme story");

        let rss_only = FeedEntry {
            summary: None,
            ..entry.clone()
        };
        assert_eq!(normalize_feed(&rss_only, false, now()).body_text, "desc");
    }

    #[test]
    fn empty_link_gets_composite_key() {
        let entry = FeedEntry {
            feed_url: "https://feed.test/rss".into(),
            published: Some("2024-04-30T10:00:00Z".into()),
            description: Some("Acme news".into()),
            ..Default::default()
        };
        let a = normalize_feed(&entry, false, now());
        let b = normalize_feed(&entry, false, now());
        assert!(a.permalink.starts_with("urn:mention:"));
        assert_eq!(a.permalink.len(), "urn:mention:".len() + 32);
        assert_eq!(a.permalink, b.permalink);
    }

    #[test]
    fn optional_fields_become_empty_strings() {
        let post = SocialPost {
            post_id: 5,
            owner_id: -10,
            date: 1_714_464_000,
            text: "acme".into(),
            ..Default::default()
        };
        let m = normalize_social(&post, now());
        assert_eq!(m.author_id, "");
        assert_eq!(m.author_handle, "");
        assert_eq!(m.permalink, "https://vk.com/wall-10_5");
    }

    #[test]
    fn messaging_uses_message_link() {
        let msg = ChatMessage {
            chat_id: -1009876,
            message_id: 3,
            date: 1_714_464_000,
            text: "hello acme".into(),
            sender_id: Some(11),
            sender_username: Some("bob".into()),
            ..Default::default()
        };
        let m = normalize_messaging(&msg, now());
        assert_eq!(m.permalink, "https://t.me/c/9876/3");
        assert_eq!(m.source_link, "https://t.me/c/9876");
        assert_eq!(m.author_id, "11");
        assert_eq!(m.author_handle, "bob");
    }
}
