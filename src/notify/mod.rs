// src/notify/mod.rs
//! Outbound notifications for newly stored mentions.
//!
//! The pipeline emits one [`MentionEvent`] per inserted mention over an
//! `mpsc` channel; [`spawn_notifier`] drains it into a [`NotifierMux`].
//! Delivery is best effort: failures are logged and never reach ingestion.

pub mod email;
pub mod telegram;

use anyhow::Result;
use chrono::{DateTime, FixedOffset, Offset as _, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::model::{Mention, MentionExt, Platform};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MentionEvent {
    pub platform: Platform,
    pub occurred_at: DateTime<Utc>,
    pub permalink: String,
    pub source_link: String,
    pub author_id: String,
    pub author_handle: String,
    pub author_name: String,
    pub body_text: String,
    /// Entry title for feed mentions, empty otherwise.
    pub title: String,
}

impl MentionEvent {
    pub fn from_mention(m: &Mention) -> Self {
        let title = match &m.ext {
            MentionExt::Feed(f) => f.entry_title.clone(),
            _ => String::new(),
        };
        Self {
            platform: m.platform(),
            occurred_at: m.core.occurred_at,
            permalink: m.core.permalink.clone(),
            source_link: m.core.source_link.clone(),
            author_id: m.core.author_id.clone(),
            author_handle: m.core.author_handle.clone(),
            author_name: m.core.author_display_name.clone(),
            body_text: m.core.body_text.clone(),
            title,
        }
    }
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;
    async fn send(&self, ev: &MentionEvent) -> Result<()>;
}

/// Local wall-clock rendering used in every message body.
pub fn local_time(ts: DateTime<Utc>, utc_offset_hours: i32) -> String {
    let offset = FixedOffset::east_opt(utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix());
    let sign = if utc_offset_hours < 0 { '-' } else { '+' };
    format!(
        "{} (UTC{sign}{})",
        ts.with_timezone(&offset).format("%d.%m.%Y %H:%M:%S"),
        utc_offset_hours.abs()
    )
}

fn esc(s: &str) -> String {
    html_escape::encode_text(s).to_string()
}

fn link(url: &str) -> String {
    let u = html_escape::encode_double_quoted_attribute(url);
    format!("<a href=\"{u}\">{}</a>", esc(url))
}

fn or_dash(s: &str) -> &str {
    if s.trim().is_empty() {
        "—"
    } else {
        s
    }
}

/// Telegram-flavoured HTML body, one layout per platform.
pub fn format_html(ev: &MentionEvent, utc_offset_hours: i32) -> String {
    let when = local_time(ev.occurred_at, utc_offset_hours);
    match ev.platform {
        Platform::Feed => format!(
            "📰 <b>New mention in an RSS feed</b>\n\
             ⌚ <b>Time:</b> {when}\n\
             ✏ <b>Title:</b> {}\n\
             📄 <b>Text:</b> {}\n\
             🔗 <b>Link:</b> {}",
            esc(or_dash(&ev.title)),
            esc(or_dash(&ev.body_text)),
            link(&ev.permalink),
        ),
        Platform::Social => format!(
            "🚾 <b>New mention on the social network</b>\n\
             ⌚ <b>Time:</b> {when}\n\
             🛈 <b>Source:</b> {}\n\
             ⛓ <b>Link:</b> {}\n\
             👤 <b>User:</b> @{} ({})\n\
             💬 <b>Text:</b> {}",
            link(&ev.source_link),
            link(&ev.permalink),
            esc(or_dash(&ev.author_handle)),
            esc(or_dash(&ev.author_name)),
            esc(or_dash(&ev.body_text)),
        ),
        Platform::Messaging => format!(
            "➤ <b>New mention in a chat</b>\n\
             ⌚ <b>Time:</b> {when}\n\
             ⛓ <b>Chat:</b> {}\n\
             🔗 <b>Message:</b> {}\n\
             👤 <b>User ID:</b> <code>{}</code>\n\
             🪪 <b>Username:</b> @{}\n\
             📛 <b>Name:</b> {}\n\
             💬 <b>Text:</b> {}",
            link(&ev.source_link),
            link(&ev.permalink),
            esc(or_dash(&ev.author_id)),
            esc(or_dash(&ev.author_handle)),
            esc(or_dash(&ev.author_name)),
            esc(or_dash(&ev.body_text)),
        ),
    }
}

/// Plain-text body for e-mail.
pub fn format_plain(ev: &MentionEvent, utc_offset_hours: i32) -> String {
    let mut out = format!(
        "Platform: {}\nTime: {}\nLink: {}\nSource: {}\n",
        ev.platform,
        local_time(ev.occurred_at, utc_offset_hours),
        ev.permalink,
        or_dash(&ev.source_link),
    );
    if !ev.title.is_empty() {
        out.push_str(&format!("Title: {}\n", ev.title));
    }
    if !ev.author_handle.is_empty() || !ev.author_name.is_empty() {
        out.push_str(&format!("Author: @{} ({})\n", or_dash(&ev.author_handle), or_dash(&ev.author_name)));
    }
    out.push_str(&format!("\n{}\n", ev.body_text));
    out
}

/// Fan-out over every configured channel.
#[derive(Default)]
pub struct NotifierMux {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl NotifierMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, n: impl Notifier + 'static) -> Self {
        self.notifiers.push(Box::new(n));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    /// Send to all channels; returns how many succeeded.
    pub async fn notify(&self, ev: &MentionEvent) -> usize {
        let mut ok = 0;
        for n in &self.notifiers {
            match n.send(ev).await {
                Ok(()) => ok += 1,
                Err(e) => tracing::error!(
                    channel = n.name(),
                    permalink = %ev.permalink,
                    "notification failed: {e:#}"
                ),
            }
        }
        ok
    }
}

/// Drain `rx` into `mux` until every sender is dropped.
///
/// There is no cancel input: the queue closes only once the last pipeline
/// handle is gone, so events from a tick that is still draining at shutdown
/// are delivered too. Callers bound the wait themselves.
pub fn spawn_notifier(mut rx: mpsc::Receiver<MentionEvent>, mux: NotifierMux) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut delivered = 0u64;
        while let Some(ev) = rx.recv().await {
            mux.notify(&ev).await;
            delivered += 1;
        }
        tracing::debug!(delivered, "notifier drained");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn event(platform: Platform) -> MentionEvent {
        MentionEvent {
            platform,
            occurred_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap(),
            permalink: "https://t.me/c/1234/55".into(),
            source_link: "https://t.me/c/1234".into(),
            author_id: "11".into(),
            author_handle: "ipetrov".into(),
            author_name: "Ivan Petrov".into(),
            body_text: "Acme <rocks> & rolls".into(),
            title: String::new(),
        }
    }

    #[test]
    fn local_time_applies_offset() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 22, 0, 0).unwrap();
        assert_eq!(local_time(ts, 3), "02.05.2024 01:00:00 (UTC+3)");
        assert_eq!(local_time(ts, -5), "01.05.2024 17:00:00 (UTC-5)");
    }

    #[test]
    fn html_body_escapes_text() {
        let html = format_html(&event(Platform::Messaging), 3);
        assert!(html.contains("12:30:00 (UTC+3)"));
        assert!(html.contains("Acme &lt;rocks&gt; &amp; rolls"));
        assert!(html.contains("<a href=\"https://t.me/c/1234/55\">"));
        assert!(html.contains("<code>11</code>"));
    }

    #[test]
    fn feed_body_uses_title() {
        let mut ev = event(Platform::Feed);
        ev.title = "Acme ships".into();
        let html = format_html(&ev, 0);
        assert!(html.contains("<b>Title:</b> Acme ships"));
        assert!(format_plain(&ev, 0).contains("Title: Acme ships"));
    }

    struct Counting(Arc<AtomicUsize>, bool);

    #[async_trait::async_trait]
    impl Notifier for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }
        async fn send(&self, _ev: &MentionEvent) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            if self.1 {
                anyhow::bail!("channel down")
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn mux_continues_past_failures() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mux = NotifierMux::new()
            .with(Counting(hits.clone(), true))
            .with(Counting(hits.clone(), false));
        assert_eq!(mux.notify(&event(Platform::Social)).await, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn notifier_runs_until_last_sender_drops() {
        let hits = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel(8);
        let late = tx.clone();
        let h = spawn_notifier(rx, NotifierMux::new().with(Counting(hits.clone(), false)));
        for _ in 0..3 {
            tx.send(event(Platform::Feed)).await.unwrap();
        }
        drop(tx);

        // One sender is still alive, so the queue stays open.
        late.send(event(Platform::Social)).await.unwrap();
        drop(late);
        h.await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }
}
