// src/ingest/scheduler.rs
//! Poll loops, the messaging subscription, and coordinated shutdown.
//!
//! Two regimes share one [`CancellationToken`]:
//! - polled fetchers run ticks on an interval ([`spawn_poll_loop`]);
//! - the messaging listener pushes events as they arrive ([`spawn_subscription`]).
//!
//! Cancellation is only observed between ticks, so a tick that has started
//! always finishes its fetches and writes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, gauge, histogram};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument as _;

use crate::error::SourceError;
use crate::ingest::providers::messaging::TelegramListener;
use crate::ingest::types::{ChatMessage, FetchOutcome, RawItem, SourceFetcher, SourceRef};
use crate::ingest::{BatchReport, IngestPipeline};
use crate::model::Platform;

#[derive(Clone, Copy, Debug)]
pub struct PollConfig {
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Fetching,
    Matching,
    Writing,
    Draining,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    pub source_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub sources: usize,
    /// Deactivated sources left out of this tick.
    pub skipped: usize,
    pub succeeded: usize,
    pub failures: Vec<SourceFailure>,
    pub batch: BatchReport,
}

pub struct PollHandle {
    pub join: JoinHandle<()>,
    pub state: watch::Receiver<PollState>,
    pub ticks: watch::Receiver<u64>,
}

type FetchResult = (SourceRef, Result<Result<FetchOutcome, SourceError>, String>, Duration);

/// Fetch every active source concurrently, then match and write the results.
pub async fn run_tick(
    fetcher: &Arc<dyn SourceFetcher>,
    pipeline: &Arc<IngestPipeline>,
    state: &watch::Sender<PollState>,
) -> TickReport {
    let platform = fetcher.platform();
    let inactive = pipeline.inactive_sources(platform).await;
    let (sources, skipped): (Vec<SourceRef>, Vec<SourceRef>) = fetcher
        .sources()
        .into_iter()
        .partition(|s| !inactive.contains(&s.id));
    for s in &skipped {
        tracing::debug!(source_id = %s.id, "source deactivated; not polled");
    }
    let mut report = TickReport {
        sources: sources.len(),
        skipped: skipped.len(),
        ..Default::default()
    };

    state.send_replace(PollState::Fetching);
    let mut set: JoinSet<FetchResult> = JoinSet::new();
    for source in sources {
        let f = fetcher.clone();
        set.spawn(async move {
            let started = Instant::now();
            // Inner task so a panicking fetcher still reports its source.
            let src = source.clone();
            let res = tokio::spawn(async move { f.fetch(&src).await })
                .await
                .map_err(|e| format!("fetch task failed: {e}"));
            (source, res, started.elapsed())
        });
    }

    let mut fetched = Vec::new();
    while let Some(joined) = set.join_next().await {
        let Ok((source, res, elapsed)) = joined else {
            continue;
        };
        counter!("ingest_fetch_total", "platform" => platform.as_str()).increment(1);
        histogram!("ingest_fetch_ms", "platform" => platform.as_str())
            .record(elapsed.as_secs_f64() * 1_000.0);

        if let Err(e) = pipeline.store().touch_source(platform, &source.id).await {
            tracing::warn!(source_id = %source.id, error = %e, "touch_source failed");
        }

        let error = match res {
            Ok(Ok(outcome)) => {
                report.succeeded += 1;
                fetched.push((source, outcome));
                continue;
            }
            Ok(Err(e)) => {
                counter!("ingest_fetch_errors_total", "platform" => platform.as_str(), "kind" => e.kind())
                    .increment(1);
                e.to_string()
            }
            Err(panic) => {
                counter!("ingest_fetch_errors_total", "platform" => platform.as_str(), "kind" => "panic")
                    .increment(1);
                panic
            }
        };
        tracing::warn!(source_id = %source.id, error = %error, "source skipped this cycle");
        report.failures.push(SourceFailure {
            source_id: source.id,
            error,
        });
    }

    for (source, outcome) in fetched {
        if let Some(info) = &outcome.source {
            pipeline.register_source(platform, info).await;
        }
        state.send_replace(PollState::Matching);
        let items = outcome.items.len();
        let selection = match pipeline.select(&source, outcome.items, Utc::now()).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(source_id = %source.id, error = %e, "keyword load failed; batch skipped");
                report.batch.items += items;
                report.batch.failed += items;
                continue;
            }
        };
        state.send_replace(PollState::Writing);
        report.batch.absorb(pipeline.write(selection).await);
    }

    gauge!("ingest_last_tick_ts", "platform" => platform.as_str()).set(Utc::now().timestamp() as f64);
    report
}

/// Run `fetcher` every `cfg.interval` until `cancel` fires.
pub fn spawn_poll_loop(
    fetcher: Arc<dyn SourceFetcher>,
    pipeline: Arc<IngestPipeline>,
    cfg: PollConfig,
    cancel: CancellationToken,
) -> PollHandle {
    let (state_tx, state_rx) = watch::channel(PollState::Idle);
    let (ticks_tx, ticks_rx) = watch::channel(0u64);
    let span = tracing::info_span!("poll_loop", fetcher = fetcher.name());

    let join = tokio::spawn(
        async move {
            let mut ticks: u64 = 0;
            while !cancel.is_cancelled() {
                let report = run_tick(&fetcher, &pipeline, &state_tx).await;
                ticks += 1;
                state_tx.send_replace(PollState::Idle);
                ticks_tx.send_replace(ticks);
                tracing::info!(
                    tick = ticks,
                    sources = report.sources,
                    skipped_sources = report.skipped,
                    failed_sources = report.failures.len(),
                    items = report.batch.items,
                    matched = report.batch.matched,
                    inserted = report.batch.inserted,
                    duplicates = report.batch.duplicates,
                    "poll tick"
                );

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(cfg.interval) => {}
                }
            }
            state_tx.send_replace(PollState::Draining);
            tracing::info!("poll loop stopped");
        }
        .instrument(span),
    );

    PollHandle {
        join,
        state: state_rx,
        ticks: ticks_rx,
    }
}

/// Registry key for a pushed chat message.
fn chat_source(msg: &ChatMessage) -> SourceRef {
    SourceRef {
        platform: Platform::Messaging,
        id: msg.chat_id.to_string(),
        url: msg.chat_link(),
    }
}

/// Consume pushed messages; each one is processed in its own tracked task so
/// a slow write never stalls delivery.
pub fn spawn_consumer(
    mut rx: mpsc::Receiver<ChatMessage>,
    pipeline: Arc<IngestPipeline>,
    tracker: TaskTracker,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            while let Some(msg) = rx.recv().await {
                let p = pipeline.clone();
                tracker.spawn(async move {
                    let source = chat_source(&msg);
                    let outcome = FetchOutcome {
                        source: None,
                        items: vec![RawItem::Messaging(msg)],
                    };
                    p.process_batch(&source, outcome).await;
                });
            }
            tracing::debug!("message consumer finished");
        }
        .instrument(tracing::info_span!("subscription")),
    )
}

pub struct SubscriptionHandle {
    pub listener: JoinHandle<()>,
    pub consumer: JoinHandle<()>,
}

/// Start the long-lived messaging subscription.
pub fn spawn_subscription(
    listener: Arc<TelegramListener>,
    pipeline: Arc<IngestPipeline>,
    cancel: CancellationToken,
    tracker: TaskTracker,
) -> SubscriptionHandle {
    let (tx, rx) = mpsc::channel(256);
    SubscriptionHandle {
        listener: listener.spawn(tx, cancel),
        consumer: spawn_consumer(rx, pipeline, tracker),
    }
}

/// Owns the shutdown token and every long-running task.
#[derive(Default)]
pub struct Supervisor {
    cancel: CancellationToken,
    tracker: TaskTracker,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn tracker(&self) -> TaskTracker {
        self.tracker.clone()
    }

    pub fn track(&mut self, name: impl Into<String>, handle: JoinHandle<()>) {
        self.tasks.push((name.into(), handle));
    }

    /// Cancel, wait up to `grace` for everything to finish, then abort what is
    /// left. Returns `true` when nothing had to be aborted.
    pub async fn shutdown(self, grace: Duration) -> bool {
        tracing::info!(tasks = self.tasks.len(), grace_secs = grace.as_secs(), "shutting down");
        self.cancel.cancel();
        self.tracker.close();

        let deadline = tokio::time::Instant::now() + grace;
        let mut clean = true;
        for (name, mut handle) in self.tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => tracing::debug!(task = %name, "task stopped"),
                Ok(Err(e)) => tracing::error!(task = %name, error = %e, "task ended abnormally"),
                Err(_) => {
                    tracing::warn!(task = %name, "task still running after grace period; aborting");
                    handle.abort();
                    clean = false;
                }
            }
        }
        if tokio::time::timeout_at(deadline, self.tracker.wait()).await.is_err() {
            tracing::warn!(
                in_flight = self.tracker.len(),
                "message handlers still running after grace period"
            );
            clean = false;
        }
        clean
    }
}
