// src/store/mod.rs
//! [`MentionStore`]: per-platform mention tables plus the source and keyword
//! registries, backed by a single SQLite file.
//!
//! Wraps [`tokio_rusqlite`] so every operation runs on the connection thread;
//! each public method is exactly one `call`, so nothing holds the connection
//! across an await point.

mod encode;
mod schema;

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, SubsecRound as _, Utc};
use rusqlite::OptionalExtension as _;
use rusqlite::ToSql;

use crate::error::{StoreError, StoreResult};
use crate::model::{Keyword, Mention, MentionExt, MentionFilter, NewMention, Platform, Source};

use encode::{encode_dt, ext_columns, is_unique_violation, RawMention, RawSource};
use schema::{CORE_COLUMNS, SCHEMA};

/// Cloning is cheap: the inner connection handle is reference-counted.
#[derive(Clone)]
pub struct MentionStore {
    conn: tokio_rusqlite::Connection,
}

impl MentionStore {
    /// Open (or create) the store at `path` and run [`Self::create_schema`].
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = tokio_rusqlite::Connection::open(path).await?;
        let store = Self { conn };
        store.create_schema().await?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        let store = Self { conn };
        store.create_schema().await?;
        Ok(store)
    }

    /// Idempotent; safe on every process start.
    pub async fn create_schema(&self) -> StoreResult<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // ── Mentions ─────────────────────────────────────────────────────────────

    /// Append one mention to its platform table.
    ///
    /// Does not deduplicate; callers consult the dedup index first. The unique
    /// permalink index still rejects a racing duplicate with
    /// [`StoreError::Duplicate`].
    pub async fn insert_mention(&self, platform: Platform, new: NewMention) -> StoreResult<Mention> {
        // Stored with microsecond precision; trim now so the returned value
        // equals what a later read produces.
        let created_at = Utc::now().trunc_subsecs(6);
        let (mut core, ext) = new.validate(platform, created_at)?;
        core.occurred_at = core.occurred_at.trunc_subsecs(6);

        let occurred_at = encode_dt(core.occurred_at);
        let created = encode_dt(core.created_at);
        let row = (
            occurred_at,
            core.permalink.clone(),
            core.source_id.clone(),
            core.source_link.clone(),
            core.author_id.clone(),
            core.author_display_name.clone(),
            core.author_handle.clone(),
            core.body_text.clone(),
            created,
        );
        let ext_row = ext.clone();

        let id: Option<i64> = self
            .conn
            .call(move |conn| {
                let (sql, ext_params): (String, Vec<Box<dyn ToSql>>) = insert_sql(&ext_row);
                let mut params: Vec<&dyn ToSql> = vec![
                    &row.0, &row.1, &row.2, &row.3, &row.4, &row.5, &row.6, &row.7, &row.8,
                ];
                params.extend(ext_params.iter().map(|b| b.as_ref()));
                match conn.execute(&sql, params.as_slice()) {
                    Ok(_) => Ok(Some(conn.last_insert_rowid())),
                    Err(e) if is_unique_violation(&e) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await?;

        match id {
            Some(id) => Ok(Mention { id, core, ext }),
            None => Err(StoreError::Duplicate {
                platform,
                permalink: core.permalink,
            }),
        }
    }

    /// Point lookup by permalink within one platform table.
    pub async fn mention_exists(&self, platform: Platform, permalink: &str) -> StoreResult<bool> {
        let sql = format!("SELECT 1 FROM {} WHERE permalink = ?1 LIMIT 1", platform.table());
        let key = permalink.to_owned();
        let found = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(&sql, [key], |_| Ok(true))
                    .optional()?
                    .unwrap_or(false))
            })
            .await?;
        Ok(found)
    }

    /// Federated, time-ordered read across the selected platform tables.
    ///
    /// One sub-query per table with the same core projection and predicate,
    /// each bounded to `offset + limit` rows; the merge, global ordering and
    /// pagination happen here rather than in SQL.
    pub async fn query_mentions(&self, filter: &MentionFilter) -> StoreResult<Vec<Mention>> {
        filter.validate()?;

        let window = filter.offset as usize + filter.limit as usize;
        let start = filter.start_time.map(encode_dt);
        let end = filter.end_time.map(encode_dt);
        let source_id = filter.source_id.clone();
        let platforms = filter.platforms();

        let raws: Vec<RawMention> = self
            .conn
            .call(move |conn| {
                let mut out = Vec::new();
                for platform in platforms {
                    let (predicate, args) =
                        mention_predicate(start.as_deref(), end.as_deref(), source_id.as_deref());
                    let sql = format!(
                        "SELECT {CORE_COLUMNS}, {} FROM {}{predicate} \
                         ORDER BY occurred_at DESC, id DESC LIMIT {window}",
                        ext_columns(platform),
                        platform.table(),
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt
                        .query_map(rusqlite::params_from_iter(args.iter()), |row| {
                            RawMention::from_row(platform, row)
                        })?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    out.extend(rows);
                }
                Ok(out)
            })
            .await?;

        let mut merged = raws
            .into_iter()
            .map(RawMention::into_mention)
            .collect::<StoreResult<Vec<_>>>()?;
        sort_newest_first(&mut merged);

        Ok(merged
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .collect())
    }

    pub async fn count_mentions(&self, platform: Option<Platform>) -> StoreResult<u64> {
        let platforms = platform.map(|p| vec![p]).unwrap_or_else(|| Platform::ALL.to_vec());
        let n = self
            .conn
            .call(move |conn| {
                let mut total: i64 = 0;
                for p in platforms {
                    let sql = format!("SELECT COUNT(*) FROM {}", p.table());
                    total += conn.query_row(&sql, [], |r| r.get::<_, i64>(0))?;
                }
                Ok(total)
            })
            .await?;
        Ok(n.max(0) as u64)
    }

    // ── Sources ──────────────────────────────────────────────────────────────

    /// Insert a new (active) source or refresh an existing one's name, link and
    /// check time. `is_active` is left as the operator set it.
    pub async fn upsert_source(
        &self,
        platform: Platform,
        source_id: &str,
        name: &str,
        link: &str,
    ) -> StoreResult<()> {
        let now = encode_dt(Utc::now());
        let args = (
            platform.as_str(),
            source_id.to_owned(),
            name.to_owned(),
            link.to_owned(),
            now,
        );
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO sources
                       (platform, source_id, display_name, link, is_active, last_checked_at, created_at)
                     VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)
                     ON CONFLICT (platform, source_id) DO UPDATE SET
                       display_name    = CASE WHEN excluded.display_name = ''
                                              THEN sources.display_name
                                              ELSE excluded.display_name END,
                       link            = CASE WHEN excluded.link = ''
                                              THEN sources.link
                                              ELSE excluded.link END,
                       last_checked_at = excluded.last_checked_at",
                    rusqlite::params![args.0, args.1, args.2, args.3, args.4],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Record a poll attempt. No-op for sources not yet registered.
    pub async fn touch_source(&self, platform: Platform, source_id: &str) -> StoreResult<()> {
        let now = encode_dt(Utc::now());
        let id = source_id.to_owned();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE sources SET last_checked_at = ?3 WHERE platform = ?1 AND source_id = ?2",
                    rusqlite::params![platform.as_str(), id, now],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Operator action; returns whether a row changed.
    pub async fn deactivate_source(&self, platform: Platform, source_id: &str) -> StoreResult<bool> {
        let id = source_id.to_owned();
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE sources SET is_active = 0 WHERE platform = ?1 AND source_id = ?2",
                    rusqlite::params![platform.as_str(), id],
                )?)
            })
            .await?;
        Ok(changed > 0)
    }

    /// Ids of sources an operator has deactivated on `platform`.
    pub async fn inactive_source_ids(&self, platform: Platform) -> StoreResult<HashSet<String>> {
        let ids = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT source_id FROM sources WHERE platform = ?1 AND is_active = 0",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![platform.as_str()], |r| r.get::<_, String>(0))?
                    .collect::<rusqlite::Result<HashSet<_>>>()?;
                Ok(rows)
            })
            .await?;
        Ok(ids)
    }

    pub async fn list_active_sources(&self, platform: Option<Platform>) -> StoreResult<Vec<Source>> {
        let platform = platform.map(Platform::as_str);
        let raws: Vec<RawSource> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT platform, source_id, display_name, link, is_active, last_checked_at
                       FROM sources
                      WHERE is_active = 1 AND (?1 IS NULL OR platform = ?1)
                      ORDER BY platform, display_name, source_id",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![platform], RawSource::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        raws.into_iter().map(RawSource::into_source).collect()
    }

    // ── Keywords ─────────────────────────────────────────────────────────────

    /// Insert-if-absent (case-insensitive). Returns `true` when a row was added.
    pub async fn add_keyword(&self, text: &str) -> StoreResult<bool> {
        let text = text.trim().to_owned();
        if text.is_empty() {
            return Err(crate::error::ValidationError::Param {
                name: "keyword",
                message: "keyword is empty".into(),
            }
            .into());
        }
        let now = encode_dt(Utc::now());
        let added = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "INSERT OR IGNORE INTO keywords (text, is_active, created_at) VALUES (?1, 1, ?2)",
                    rusqlite::params![text, now],
                )?)
            })
            .await?;
        Ok(added > 0)
    }

    /// Operator action; keywords are never deleted.
    pub async fn set_keyword_active(&self, text: &str, active: bool) -> StoreResult<bool> {
        let text = text.trim().to_owned();
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE keywords SET is_active = ?2 WHERE text = ?1",
                    rusqlite::params![text, active],
                )?)
            })
            .await?;
        Ok(changed > 0)
    }

    pub async fn list_active_keywords(&self) -> StoreResult<Vec<Keyword>> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT text, is_active FROM keywords WHERE is_active = 1 ORDER BY text")?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(Keyword {
                            text: row.get(0)?,
                            is_active: row.get(1)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }
}

/// Build the INSERT statement for one platform table; core values are bound
/// as `?1..?9`, extension values follow.
fn insert_sql(ext: &MentionExt) -> (String, Vec<Box<dyn ToSql>>) {
    let (ext_params, count): (Vec<Box<dyn ToSql>>, usize) = match ext {
        MentionExt::Feed(f) => (
            vec![
                Box::new(f.feed_url.clone()),
                Box::new(f.entry_title.clone()),
                Box::new(f.entry_summary.clone()),
            ],
            3,
        ),
        MentionExt::Social(s) => (
            vec![
                Box::new(s.post_id),
                Box::new(s.group_id),
                Box::new(s.likes),
                Box::new(s.reposts),
                Box::new(s.comments),
                Box::new(s.views),
            ],
            6,
        ),
        MentionExt::Messaging(m) => (
            vec![
                Box::new(m.chat_id),
                Box::new(m.message_id),
                Box::new(m.reply_to_message_id),
                Box::new(m.forwarded_from.clone()),
            ],
            4,
        ),
    };
    let platform = ext.platform();
    let placeholders = (1..=9 + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {} (occurred_at, permalink, source_id, source_link, author_id, \
         author_display_name, author_handle, body_text, created_at, {}) VALUES ({placeholders})",
        platform.table(),
        ext_columns(platform),
    );
    (sql, ext_params)
}

/// Shared WHERE clause for every per-table sub-query.
fn mention_predicate(
    start: Option<&str>,
    end: Option<&str>,
    source_id: Option<&str>,
) -> (String, Vec<String>) {
    let mut clauses = Vec::new();
    let mut args = Vec::new();
    if let Some(s) = start {
        args.push(s.to_owned());
        clauses.push(format!("occurred_at >= ?{}", args.len()));
    }
    if let Some(e) = end {
        args.push(e.to_owned());
        clauses.push(format!("occurred_at <= ?{}", args.len()));
    }
    if let Some(id) = source_id {
        args.push(id.to_owned());
        clauses.push(format!("source_id = ?{}", args.len()));
    }
    if clauses.is_empty() {
        (String::new(), args)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), args)
    }
}

/// Global order: `occurred_at` descending, ties broken by platform then id.
fn sort_newest_first(mentions: &mut [Mention]) {
    mentions.sort_by(|a, b| {
        b.core
            .occurred_at
            .cmp(&a.core.occurred_at)
            .then_with(|| a.platform().cmp(&b.platform()))
            .then_with(|| b.id.cmp(&a.id))
    });
}

/// Convenience for callers that only need "now minus N days".
pub fn days_ago(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    now - chrono::Duration::days(days)
}

#[cfg(test)]
mod tests;
