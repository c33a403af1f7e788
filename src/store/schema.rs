// src/store/schema.rs
//! SQL schema for the mention store.
//!
//! Executed on every start; idempotent thanks to `IF NOT EXISTS`.

/// Core columns shared by every `*_mentions` table, in projection order.
pub const CORE_COLUMNS: &str = "id, occurred_at, permalink, source_id, source_link, \
     author_id, author_display_name, author_handle, body_text, created_at";

pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS rss_mentions (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    occurred_at         TEXT NOT NULL,   -- RFC 3339 UTC, fixed width
    permalink           TEXT NOT NULL,
    source_id           TEXT NOT NULL DEFAULT '',
    source_link         TEXT NOT NULL DEFAULT '',
    author_id           TEXT NOT NULL DEFAULT '',
    author_display_name TEXT NOT NULL DEFAULT '',
    author_handle       TEXT NOT NULL DEFAULT '',
    body_text           TEXT NOT NULL DEFAULT '',
    created_at          TEXT NOT NULL,
    feed_url            TEXT NOT NULL DEFAULT '',
    entry_title         TEXT NOT NULL DEFAULT '',
    entry_summary       TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS social_mentions (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    occurred_at         TEXT NOT NULL,
    permalink           TEXT NOT NULL,
    source_id           TEXT NOT NULL DEFAULT '',
    source_link         TEXT NOT NULL DEFAULT '',
    author_id           TEXT NOT NULL DEFAULT '',
    author_display_name TEXT NOT NULL DEFAULT '',
    author_handle       TEXT NOT NULL DEFAULT '',
    body_text           TEXT NOT NULL DEFAULT '',
    created_at          TEXT NOT NULL,
    post_id             INTEGER NOT NULL DEFAULT 0,
    group_id            INTEGER NOT NULL DEFAULT 0,
    likes               INTEGER NOT NULL DEFAULT 0,
    reposts             INTEGER NOT NULL DEFAULT 0,
    comments            INTEGER NOT NULL DEFAULT 0,
    views               INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS messaging_mentions (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    occurred_at         TEXT NOT NULL,
    permalink           TEXT NOT NULL,
    source_id           TEXT NOT NULL DEFAULT '',
    source_link         TEXT NOT NULL DEFAULT '',
    author_id           TEXT NOT NULL DEFAULT '',
    author_display_name TEXT NOT NULL DEFAULT '',
    author_handle       TEXT NOT NULL DEFAULT '',
    body_text           TEXT NOT NULL DEFAULT '',
    created_at          TEXT NOT NULL,
    chat_id             INTEGER NOT NULL DEFAULT 0,
    message_id          INTEGER NOT NULL DEFAULT 0,
    reply_to_message_id INTEGER,
    forwarded_from      TEXT
);

CREATE TABLE IF NOT EXISTS sources (
    platform        TEXT NOT NULL,   -- 'feed' | 'social' | 'messaging'
    source_id       TEXT NOT NULL,
    display_name    TEXT NOT NULL DEFAULT '',
    link            TEXT NOT NULL DEFAULT '',
    is_active       INTEGER NOT NULL DEFAULT 1,
    last_checked_at TEXT,
    created_at      TEXT NOT NULL,
    PRIMARY KEY (platform, source_id)
);

CREATE TABLE IF NOT EXISTS keywords (
    text       TEXT NOT NULL PRIMARY KEY COLLATE NOCASE,
    is_active  INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

-- Backstop for the dedup index; conflicts surface as StoreError::Duplicate.
CREATE UNIQUE INDEX IF NOT EXISTS rss_mentions_permalink_idx       ON rss_mentions(permalink);
CREATE UNIQUE INDEX IF NOT EXISTS social_mentions_permalink_idx    ON social_mentions(permalink);
CREATE UNIQUE INDEX IF NOT EXISTS messaging_mentions_permalink_idx ON messaging_mentions(permalink);

CREATE INDEX IF NOT EXISTS rss_mentions_occurred_idx       ON rss_mentions(occurred_at);
CREATE INDEX IF NOT EXISTS social_mentions_occurred_idx    ON social_mentions(occurred_at);
CREATE INDEX IF NOT EXISTS messaging_mentions_occurred_idx ON messaging_mentions(occurred_at);

CREATE INDEX IF NOT EXISTS rss_mentions_source_idx       ON rss_mentions(source_id);
CREATE INDEX IF NOT EXISTS social_mentions_source_idx    ON social_mentions(source_id);
CREATE INDEX IF NOT EXISTS messaging_mentions_source_idx ON messaging_mentions(source_id);
";
