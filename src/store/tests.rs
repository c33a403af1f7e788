// src/store/tests.rs
//! Store tests against an in-memory database.

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::error::{StoreError, ValidationError};
use crate::model::{
    FeedExt, MentionExt, MentionFilter, MessagingExt, NewMention, Platform, SocialExt,
};

use super::MentionStore;

async fn store() -> MentionStore {
    MentionStore::open_in_memory().await.expect("in-memory store")
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn mention(ext: MentionExt, permalink: &str, at: DateTime<Utc>) -> NewMention {
    NewMention {
        occurred_at: Some(at),
        permalink: permalink.into(),
        source_id: "src-1".into(),
        source_link: "https://example.test".into(),
        author_id: String::new(),
        author_display_name: String::new(),
        author_handle: String::new(),
        body_text: format!("body of {permalink}"),
        ext,
    }
}

fn feed(permalink: &str, at: DateTime<Utc>) -> NewMention {
    mention(
        MentionExt::Feed(FeedExt {
            feed_url: "https://example.test/rss".into(),
            entry_title: "title".into(),
            entry_summary: "summary".into(),
        }),
        permalink,
        at,
    )
}

fn social(permalink: &str, at: DateTime<Utc>) -> NewMention {
    mention(
        MentionExt::Social(SocialExt {
            post_id: 7,
            group_id: -42,
            likes: 3,
            ..Default::default()
        }),
        permalink,
        at,
    )
}

fn messaging(permalink: &str, at: DateTime<Utc>) -> NewMention {
    mention(
        MentionExt::Messaging(MessagingExt {
            chat_id: -1001234,
            message_id: 55,
            reply_to_message_id: Some(54),
            forwarded_from: None,
        }),
        permalink,
        at,
    )
}

// ─── Schema ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_schema_is_idempotent() {
    let s = store().await;
    s.create_schema().await.unwrap();
    s.create_schema().await.unwrap();
    assert_eq!(s.count_mentions(None).await.unwrap(), 0);
}

// ─── Inserts ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn insert_round_trips_extension_fields() {
    let s = store().await;
    let stored = s
        .insert_mention(Platform::Messaging, messaging("https://t.me/c/1234/55", t0()))
        .await
        .unwrap();
    assert!(stored.id > 0);

    let got = s
        .query_mentions(&MentionFilter {
            platform: Some(Platform::Messaging),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(got, vec![stored]);
}

#[tokio::test]
async fn insert_without_occurred_at_is_rejected() {
    let s = store().await;
    let mut m = feed("https://example.test/a", t0());
    m.occurred_at = None;
    let err = s.insert_mention(Platform::Feed, m).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::Validation(ValidationError::MissingOccurredAt)
    ));
    assert_eq!(s.count_mentions(None).await.unwrap(), 0);
}

#[tokio::test]
async fn insert_into_wrong_table_is_rejected() {
    let s = store().await;
    let err = s
        .insert_mention(Platform::Social, feed("https://example.test/a", t0()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::Validation(ValidationError::PlatformMismatch { .. })
    ));
}

#[tokio::test]
async fn duplicate_permalink_hits_unique_backstop() {
    let s = store().await;
    s.insert_mention(Platform::Feed, feed("https://example.test/a", t0()))
        .await
        .unwrap();
    let err = s
        .insert_mention(Platform::Feed, feed("https://example.test/a", t0()))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Duplicate { .. }));
    assert_eq!(s.count_mentions(Some(Platform::Feed)).await.unwrap(), 1);

    // Same permalink on another platform is a different mention.
    s.insert_mention(Platform::Social, social("https://example.test/a", t0()))
        .await
        .unwrap();
}

#[tokio::test]
async fn mention_exists_is_per_platform() {
    let s = store().await;
    s.insert_mention(Platform::Feed, feed("https://example.test/a", t0()))
        .await
        .unwrap();
    assert!(s.mention_exists(Platform::Feed, "https://example.test/a").await.unwrap());
    assert!(!s.mention_exists(Platform::Social, "https://example.test/a").await.unwrap());
    assert!(!s.mention_exists(Platform::Feed, "https://example.test/b").await.unwrap());
}

// ─── Federated reads ─────────────────────────────────────────────────────────

#[tokio::test]
async fn query_orders_across_platforms_newest_first() {
    let s = store().await;
    let now = t0();
    s.insert_mention(Platform::Feed, feed("f", now - Duration::minutes(10)))
        .await
        .unwrap();
    s.insert_mention(Platform::Messaging, messaging("m", now - Duration::minutes(1)))
        .await
        .unwrap();
    s.insert_mention(Platform::Social, social("s", now - Duration::minutes(5)))
        .await
        .unwrap();

    let got = s.query_mentions(&MentionFilter::default()).await.unwrap();
    let order: Vec<_> = got.iter().map(|m| m.platform()).collect();
    assert_eq!(
        order,
        vec![Platform::Messaging, Platform::Social, Platform::Feed]
    );
}

#[tokio::test]
async fn pagination_is_applied_after_the_merge() {
    let s = store().await;
    let now = t0();
    // Interleave platforms so per-table pagination would give a wrong answer.
    s.insert_mention(Platform::Feed, feed("f1", now - Duration::minutes(1))).await.unwrap();
    s.insert_mention(Platform::Social, social("s1", now - Duration::minutes(2))).await.unwrap();
    s.insert_mention(Platform::Feed, feed("f2", now - Duration::minutes(3))).await.unwrap();
    s.insert_mention(Platform::Messaging, messaging("m1", now - Duration::minutes(4))).await.unwrap();
    s.insert_mention(Platform::Feed, feed("f3", now - Duration::minutes(5))).await.unwrap();

    let page = |offset| MentionFilter {
        limit: 2,
        offset,
        ..Default::default()
    };
    let p1 = s.query_mentions(&page(0)).await.unwrap();
    let p2 = s.query_mentions(&page(2)).await.unwrap();
    let p3 = s.query_mentions(&page(4)).await.unwrap();
    assert_eq!((p1.len(), p2.len(), p3.len()), (2, 2, 1));

    let links: Vec<_> = p1
        .iter()
        .chain(&p2)
        .chain(&p3)
        .map(|m| m.core.permalink.as_str())
        .collect();
    assert_eq!(links, vec!["f1", "s1", "f2", "m1", "f3"]);
}

#[tokio::test]
async fn query_filters_by_range_source_and_platform() {
    let s = store().await;
    let now = t0();
    s.insert_mention(Platform::Feed, feed("old", now - Duration::days(10))).await.unwrap();
    s.insert_mention(Platform::Feed, feed("new", now - Duration::days(1))).await.unwrap();
    let mut other = social("other-source", now - Duration::hours(1));
    other.source_id = "src-2".into();
    s.insert_mention(Platform::Social, other).await.unwrap();

    let ranged = s
        .query_mentions(&MentionFilter {
            start_time: Some(now - Duration::days(7)),
            end_time: Some(now),
            ..Default::default()
        })
        .await
        .unwrap();
    let links: Vec<_> = ranged.iter().map(|m| m.core.permalink.as_str()).collect();
    assert_eq!(links, vec!["other-source", "new"]);

    let by_source = s
        .query_mentions(&MentionFilter {
            source_id: Some("src-2".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_source.len(), 1);
    assert_eq!(by_source[0].platform(), Platform::Social);

    let feed_only = s
        .query_mentions(&MentionFilter {
            platform: Some(Platform::Feed),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(feed_only.len(), 2);
}

#[tokio::test]
async fn query_rejects_out_of_range_limit() {
    let s = store().await;
    let err = s
        .query_mentions(&MentionFilter {
            limit: 5000,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::Validation(ValidationError::LimitOutOfRange(5000))
    ));
}

// ─── Registries ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn upsert_source_is_keyed_by_platform_and_id() {
    let s = store().await;
    s.upsert_source(Platform::Feed, "example.test", "Example", "https://example.test/rss")
        .await
        .unwrap();
    s.upsert_source(Platform::Feed, "example.test", "Example Renamed", "")
        .await
        .unwrap();
    s.upsert_source(Platform::Messaging, "example.test", "Chat", "https://t.me/x")
        .await
        .unwrap();

    let feeds = s.list_active_sources(Some(Platform::Feed)).await.unwrap();
    assert_eq!(feeds.len(), 1);
    assert_eq!(feeds[0].display_name, "Example Renamed");
    assert_eq!(feeds[0].link, "https://example.test/rss");
    assert!(feeds[0].last_checked_at.is_some());

    assert_eq!(s.list_active_sources(None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn deactivated_source_stays_inactive_on_upsert() {
    let s = store().await;
    s.upsert_source(Platform::Social, "-42", "Group", "https://vk.com/club42")
        .await
        .unwrap();
    assert!(s.deactivate_source(Platform::Social, "-42").await.unwrap());
    assert!(s.list_active_sources(None).await.unwrap().is_empty());

    s.upsert_source(Platform::Social, "-42", "Group Renamed", "").await.unwrap();
    assert!(s.list_active_sources(None).await.unwrap().is_empty());

    let inactive = s.inactive_source_ids(Platform::Social).await.unwrap();
    assert!(inactive.contains("-42"));
    assert!(s.inactive_source_ids(Platform::Feed).await.unwrap().is_empty());
}

#[tokio::test]
async fn touch_source_ignores_unknown_sources() {
    let s = store().await;
    s.touch_source(Platform::Feed, "nowhere").await.unwrap();
    assert!(s.list_active_sources(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn add_keyword_is_insert_if_absent() {
    let s = store().await;
    assert!(s.add_keyword("Acme").await.unwrap());
    assert!(!s.add_keyword(" acme ").await.unwrap());
    assert!(s.add_keyword("widget").await.unwrap());
    assert!(s.add_keyword("   ").await.is_err());

    let active = s.list_active_keywords().await.unwrap();
    assert_eq!(active.len(), 2);

    assert!(s.set_keyword_active("ACME", false).await.unwrap());
    let active = s.list_active_keywords().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].text, "widget");
}
