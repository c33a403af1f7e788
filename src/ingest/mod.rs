// src/ingest/mod.rs
//! Ingestion pipeline: match → normalize → dedup → store → notify.
//!
//! A batch is whatever one fetch produced for one source (or a single pushed
//! message). Item-level failures are counted in the [`BatchReport`] and never
//! abort the rest of the batch.

pub mod cache;
pub mod providers;
pub mod retry;
pub mod scheduler;
pub mod types;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::sync::mpsc;
use tracing::Instrument as _;

use crate::dedup::DedupIndex;
use crate::error::StoreError;
use crate::ingest::cache::CacheWithTTL;
use crate::ingest::types::{FetchOutcome, RawItem, SourceInfo, SourceRef};
use crate::matcher::{AggregatorExemption, KeywordMatcher};
use crate::model::{NewMention, Platform};
use crate::normalize::normalize;
use crate::notify::MentionEvent;
use crate::store::MentionStore;

/// How long a compiled keyword set is reused before re-reading the registry.
pub const KEYWORD_REFRESH: Duration = Duration::from_secs(60);

/// Per-batch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub items: usize,
    pub matched: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub failed: usize,
}

impl BatchReport {
    pub fn absorb(&mut self, other: BatchReport) {
        self.items += other.items;
        self.matched += other.matched;
        self.inserted += other.inserted;
        self.duplicates += other.duplicates;
        self.rejected += other.rejected;
        self.failed += other.failed;
    }
}

/// Items that survived matching, already normalized.
#[derive(Debug, Default)]
pub struct Selection {
    pub platform: Option<Platform>,
    pub items: usize,
    pub candidates: Vec<(NewMention, SourceInfo)>,
}

pub struct IngestPipeline {
    store: MentionStore,
    dedup: DedupIndex,
    exemption: AggregatorExemption,
    keywords: CacheWithTTL<(), Arc<KeywordMatcher>>,
    events: Option<mpsc::Sender<MentionEvent>>,
    span: tracing::Span,
}

impl IngestPipeline {
    pub fn new(store: MentionStore, exemption: AggregatorExemption) -> Self {
        Self {
            dedup: DedupIndex::new(store.clone()),
            store,
            exemption,
            keywords: CacheWithTTL::new(KEYWORD_REFRESH),
            events: None,
            span: tracing::info_span!("pipeline"),
        }
    }

    /// Emit a [`MentionEvent`] for every newly inserted mention.
    pub fn with_events(mut self, tx: mpsc::Sender<MentionEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn with_keyword_refresh(mut self, ttl: Duration) -> Self {
        self.keywords = CacheWithTTL::new(ttl);
        self
    }

    pub fn store(&self) -> &MentionStore {
        &self.store
    }

    /// Active keywords, compiled; cached for [`KEYWORD_REFRESH`].
    pub async fn matcher(&self) -> Result<Arc<KeywordMatcher>, StoreError> {
        if let Some(m) = self.keywords.get(&()) {
            return Ok(m);
        }
        let rows = self.store.list_active_keywords().await?;
        let m = Arc::new(KeywordMatcher::from_active(&rows));
        self.keywords.insert((), m.clone());
        Ok(m)
    }

    /// Drop the compiled keyword set so the next batch re-reads the registry.
    pub fn invalidate_keywords(&self) {
        self.keywords.clear();
    }

    /// Upsert the registry entry a fetcher reported for its source.
    pub async fn register_source(&self, platform: Platform, info: &SourceInfo) {
        if let Err(e) = self
            .store
            .upsert_source(platform, &info.source_id, &info.display_name, &info.link)
            .await
        {
            tracing::error!(parent: &self.span, %platform, source_id = %info.source_id, error = %e, "source upsert failed");
        }
    }

    /// Source ids an operator deactivated. A failed lookup is logged and
    /// treated as "none", like the dedup check.
    pub async fn inactive_sources(&self, platform: Platform) -> HashSet<String> {
        match self.store.inactive_source_ids(platform).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(parent: &self.span, %platform, error = %e, "inactive source lookup failed");
                HashSet::new()
            }
        }
    }

    /// Matching stage. The aggregator exemption is decided once for the batch;
    /// items whose origin was deactivated are dropped before matching.
    pub async fn select(
        &self,
        source: &SourceRef,
        items: Vec<RawItem>,
        now: DateTime<Utc>,
    ) -> Result<Selection, StoreError> {
        let platform = source.platform;
        let total = items.len();
        counter!("ingest_items_total", "platform" => platform.as_str()).increment(total as u64);

        let exempt = self.exemption.is_exempt(&source.url);
        let matcher = if exempt { None } else { Some(self.matcher().await?) };
        let inactive = self.inactive_sources(platform).await;

        let mut muted = 0usize;
        let candidates: Vec<(NewMention, SourceInfo)> = items
            .iter()
            .map(|item| (item, item.origin()))
            .filter(|(_, origin)| {
                let keep = !inactive.contains(&origin.source_id);
                muted += usize::from(!keep);
                keep
            })
            .filter(|(item, _)| match &matcher {
                None => true,
                Some(m) => m.is_match(&item.candidate_text()),
            })
            .map(|(item, origin)| (normalize(item, exempt, now), origin))
            .collect();

        counter!("ingest_matched_total", "platform" => platform.as_str())
            .increment(candidates.len() as u64);
        tracing::debug!(
            parent: &self.span,
            source_id = %source.id,
            exempt,
            items = total,
            inactive = muted,
            matched = candidates.len(),
            "batch matched"
        );

        Ok(Selection {
            platform: Some(platform),
            items: total,
            candidates,
        })
    }

    /// Write stage: dedup under a per-key lock, insert, register origins, notify.
    pub async fn write(&self, selection: Selection) -> BatchReport {
        let mut report = BatchReport {
            items: selection.items,
            matched: selection.candidates.len(),
            ..Default::default()
        };
        let Some(platform) = selection.platform else {
            return report;
        };
        let mut origins: HashMap<String, SourceInfo> = HashMap::new();

        for (new, origin) in selection.candidates {
            let key = new.permalink.clone();
            let _guard = self.dedup.lock(platform, &key).await;
            if self.dedup.exists(platform, &key).await {
                report.duplicates += 1;
                continue;
            }
            match self.store.insert_mention(platform, new).await {
                Ok(stored) => {
                    report.inserted += 1;
                    tracing::info!(%platform, permalink = %stored.core.permalink, source_id = %stored.core.source_id, "mention stored");
                    origins.entry(origin.source_id.clone()).or_insert(origin);
                    self.emit(MentionEvent::from_mention(&stored));
                }
                Err(StoreError::Duplicate { .. }) => report.duplicates += 1,
                Err(StoreError::Validation(e)) => {
                    report.rejected += 1;
                    tracing::warn!(%platform, permalink = %key, error = %e, "mention rejected");
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(%platform, permalink = %key, error = %e, "mention insert failed");
                }
            }
        }

        for info in origins.values() {
            self.register_source(platform, info).await;
        }

        let p = platform.as_str();
        counter!("ingest_inserted_total", "platform" => p).increment(report.inserted as u64);
        counter!("ingest_duplicates_total", "platform" => p).increment(report.duplicates as u64);
        counter!("ingest_rejected_total", "platform" => p).increment(report.rejected as u64);
        report
    }

    fn emit(&self, ev: MentionEvent) {
        let Some(tx) = &self.events else {
            return;
        };
        if let Err(e) = tx.try_send(ev) {
            tracing::warn!(error = %e, "notification queue unavailable; event dropped");
        }
    }

    /// Full pipeline for one fetch result.
    pub async fn process_batch(&self, source: &SourceRef, outcome: FetchOutcome) -> BatchReport {
        async {
            if let Some(info) = &outcome.source {
                self.register_source(source.platform, info).await;
            }
            let items = outcome.items.len();
            match self.select(source, outcome.items, Utc::now()).await {
                Ok(selection) => self.write(selection).await,
                Err(e) => {
                    tracing::error!(source_id = %source.id, error = %e, "keyword load failed; batch skipped");
                    BatchReport {
                        items,
                        failed: items,
                        ..Default::default()
                    }
                }
            }
        }
        .instrument(self.span.clone())
        .await
    }
}
