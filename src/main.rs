//! mention-monitor binary entrypoint.
//! Loads config, opens the store, starts the fetch loops, the notifier and
//! the HTTP server, then waits for Ctrl-C / SIGTERM.

use std::sync::Arc;

use anyhow::Context as _;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mention_monitor::api::{self, AppState};
use mention_monitor::config::AppConfig;
use mention_monitor::ingest::providers::feed::FeedFetcher;
use mention_monitor::ingest::providers::messaging::TelegramListener;
use mention_monitor::ingest::providers::social::SocialFetcher;
use mention_monitor::ingest::scheduler::{spawn_poll_loop, spawn_subscription, PollConfig, Supervisor};
use mention_monitor::ingest::types::SourceFetcher;
use mention_monitor::ingest::IngestPipeline;
use mention_monitor::matcher::AggregatorExemption;
use mention_monitor::metrics::Metrics;
use mention_monitor::notify::email::EmailNotifier;
use mention_monitor::notify::telegram::TelegramNotifier;
use mention_monitor::notify::{spawn_notifier, NotifierMux};
use mention_monitor::store::MentionStore;
use mention_monitor::telemetry;

/// Queue between the pipeline and the notifier task.
const EVENT_QUEUE: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    telemetry::init_tracing();

    let cfg = AppConfig::load().context("load configuration")?;
    let metrics = Metrics::init()?;

    if let Some(dir) = std::path::Path::new(&cfg.database_path).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create database directory {}", dir.display()))?;
        }
    }
    let store = MentionStore::open(&cfg.database_path)
        .await
        .with_context(|| format!("open store {}", cfg.database_path))?;
    for kw in &cfg.keywords {
        if store.add_keyword(kw).await.context("seed keywords")? {
            tracing::info!(keyword = %kw, "keyword added");
        }
    }

    let mut supervisor = Supervisor::new();
    let cancel = supervisor.token();

    // --- Notifications ---
    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
    let mux = build_notifiers(&cfg)?;
    let mut pipeline = IngestPipeline::new(
        store.clone(),
        AggregatorExemption::new(&cfg.feed.aggregator_hosts),
    );
    // Not supervised: the queue closes when the last pipeline handle drops.
    let mut notifier = None;
    if mux.is_empty() {
        tracing::info!("no notifiers configured");
    } else {
        notifier = Some(spawn_notifier(events_rx, mux));
        pipeline = pipeline.with_events(events_tx);
    }
    let pipeline = Arc::new(pipeline);

    // --- Fetchers ---
    if cfg.feed.urls.is_empty() {
        tracing::warn!("no feed urls configured");
    } else {
        let feed: Arc<dyn SourceFetcher> = Arc::new(
            FeedFetcher::new(cfg.feed.urls.clone(), cfg.feed_options()).context("build feed client")?,
        );
        let poll = PollConfig {
            interval: cfg.poll_interval(),
        };
        let h = spawn_poll_loop(feed, pipeline.clone(), poll, cancel.clone());
        supervisor.track("feed_poll", h.join);
    }

    if let (Some(opts), Some(social_cfg)) = (cfg.social_options(), cfg.social.as_ref()) {
        let social = SocialFetcher::new(opts).context("build social client")?;
        match social.authenticate().await {
            Ok(user) => {
                tracing::info!(user_id = user.id, "social fetcher enabled");
                let poll = PollConfig {
                    interval: std::time::Duration::from_secs(social_cfg.interval_secs),
                };
                let social: Arc<dyn SourceFetcher> = Arc::new(social);
                let h = spawn_poll_loop(social, pipeline.clone(), poll, cancel.clone());
                supervisor.track("social_poll", h.join);
            }
            Err(e) => tracing::error!(error = %e, "social authentication failed; social fetcher disabled"),
        }
    }

    if let Some(opts) = cfg.messaging_options() {
        let listener = TelegramListener::new(opts).context("build messaging client")?;
        match listener.get_me().await {
            Ok(bot) => {
                tracing::info!(bot_id = bot.id, username = ?bot.username, "messaging listener enabled");
                let sub = spawn_subscription(
                    Arc::new(listener),
                    pipeline.clone(),
                    cancel.clone(),
                    supervisor.tracker(),
                );
                supervisor.track("messaging_listener", sub.listener);
                supervisor.track("messaging_consumer", sub.consumer);
            }
            Err(e) => tracing::error!(error = %e, "bot token rejected; messaging listener disabled"),
        }
    }

    // --- HTTP ---
    let addr = cfg.bind_addr()?;
    let app = api::router(AppState::new(store).with_metrics(metrics.handle), &cfg.api.cors_origins);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(%addr, "http server listening");
    let http_cancel = cancel.clone();
    supervisor.track(
        "http",
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(http_cancel.cancelled_owned())
                .await
            {
                tracing::error!(error = %e, "http server failed");
            }
        }),
    );

    wait_for_signal(&cancel).await;
    let grace = cfg.shutdown_grace();
    if !supervisor.shutdown(grace).await {
        tracing::warn!("shutdown finished with aborted tasks");
    }

    // Loops and message handlers are joined; this was the last event sender.
    drop(pipeline);
    if let Some(mut handle) = notifier {
        match tokio::time::timeout(grace, &mut handle).await {
            Ok(Ok(())) => tracing::debug!("notifier stopped"),
            Ok(Err(e)) => tracing::error!(error = %e, "notifier ended abnormally"),
            Err(_) => {
                tracing::warn!("notifier still sending after grace period; aborting");
                handle.abort();
            }
        }
    }
    tracing::info!("bye");
    Ok(())
}

fn build_notifiers(cfg: &AppConfig) -> anyhow::Result<NotifierMux> {
    let mut mux = NotifierMux::new();
    let offset = cfg.notify.utc_offset_hours;
    if let Some(t) = &cfg.notify.telegram {
        mux = mux.with(
            TelegramNotifier::new(t.bot_token.clone(), t.approved_users.clone()).with_utc_offset(offset),
        );
    }
    if let Some(e) = &cfg.notify.email {
        mux = mux.with(EmailNotifier::new(e, offset).context("build email notifier")?);
    }
    Ok(mux)
}

/// Resolves on Ctrl-C, SIGTERM, or an internal cancel.
async fn wait_for_signal(cancel: &CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "ctrl-c handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("ctrl-c received"),
        _ = terminate => tracing::info!("SIGTERM received"),
        _ = cancel.cancelled() => {}
    }
}
