// src/ingest/providers/feed.rs
//! RSS 2.0 / Atom fetcher.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quick_xml::de::from_str;
use serde::Deserialize;
use tracing::Instrument as _;

use crate::error::{FetchError, ParseError, SourceError};
use crate::ingest::cache::CacheWithTTL;
use crate::ingest::retry::RetryPolicy;
use crate::ingest::types::{FeedEntry, FetchOutcome, RawItem, SourceFetcher, SourceInfo, SourceRef};
use crate::model::Platform;

/* ----------------------------
Wire format (quick-xml serde)
---------------------------- */

/// Element text, ignoring attributes such as Atom's `type="html"`.
#[derive(Debug, Default, Deserialize)]
struct Text {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(default)]
    title: Option<Text>,
    #[serde(default)]
    link: Option<Text>,
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    #[serde(default)]
    title: Option<Text>,
    #[serde(default)]
    link: Option<Text>,
    #[serde(default)]
    guid: Option<Text>,
    #[serde(rename = "pubDate", default)]
    pub_date: Option<Text>,
    #[serde(default)]
    description: Option<Text>,
    #[serde(rename = "encoded", alias = "content:encoded", default)]
    content: Option<Text>,
    #[serde(rename = "author", alias = "creator", alias = "dc:creator", default)]
    author: Option<Text>,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(default)]
    title: Option<Text>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href", default)]
    href: String,
    #[serde(rename = "@rel", default)]
    rel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    #[serde(default)]
    title: Option<Text>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    #[serde(default)]
    published: Option<Text>,
    #[serde(default)]
    updated: Option<Text>,
    #[serde(default)]
    summary: Option<Text>,
    #[serde(default)]
    content: Option<Text>,
    #[serde(default)]
    author: Option<AtomAuthor>,
}

#[derive(Debug, Deserialize)]
struct AtomAuthor {
    #[serde(default)]
    name: Option<Text>,
}

fn text(t: Option<Text>) -> Option<String> {
    t.map(|t| t.value.trim().to_string()).filter(|s| !s.is_empty())
}

/// Prefer `rel="alternate"` (or no rel), else the first link.
fn pick_link(links: &[AtomLink]) -> String {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .map(|l| l.href.trim().to_string())
        .unwrap_or_default()
}

/// Parsed feed as held in the fetch cache.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFeed {
    pub title: String,
    pub link: String,
    pub entries: Vec<FeedEntry>,
}

/// HTML entities that are not valid XML but appear in real feeds.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", "&#160;")
        .replace("&ndash;", "&#8211;")
        .replace("&mdash;", "&#8212;")
        .replace("&laquo;", "&#171;")
        .replace("&raquo;", "&#187;")
        .replace("&ldquo;", "&#8220;")
        .replace("&rdquo;", "&#8221;")
        .replace("&lsquo;", "&#8216;")
        .replace("&rsquo;", "&#8217;")
        .replace("&hellip;", "&#8230;")
}

/// Parse an RSS 2.0 or Atom document fetched from `feed_url`.
pub fn parse_feed(feed_url: &str, body: &str) -> Result<ParsedFeed, ParseError> {
    let xml = scrub_html_entities_for_xml(body);
    let head: String = xml.chars().take(1024).collect::<String>().to_ascii_lowercase();

    if head.contains("<rss") {
        let rss: Rss = from_str(&xml).map_err(|e| ParseError::new(feed_url, e))?;
        let title = text(rss.channel.title).unwrap_or_default();
        let link = text(rss.channel.link).unwrap_or_default();
        let entries = rss
            .channel
            .items
            .into_iter()
            .map(|it| {
                let guid = text(it.guid).filter(|g| g.starts_with("http"));
                FeedEntry {
                    feed_url: feed_url.to_string(),
                    feed_title: title.clone(),
                    feed_link: link.clone(),
                    title: text(it.title).unwrap_or_default(),
                    link: text(it.link).or(guid).unwrap_or_default(),
                    published: text(it.pub_date),
                    summary: None,
                    description: text(it.description),
                    content: text(it.content),
                    author: text(it.author),
                }
            })
            .collect();
        Ok(ParsedFeed {
            title,
            link,
            entries,
        })
    } else if head.contains("<feed") {
        let atom: AtomFeed = from_str(&xml).map_err(|e| ParseError::new(feed_url, e))?;
        let title = text(atom.title).unwrap_or_default();
        let link = pick_link(&atom.links);
        let entries = atom
            .entries
            .into_iter()
            .map(|e| FeedEntry {
                feed_url: feed_url.to_string(),
                feed_title: title.clone(),
                feed_link: link.clone(),
                title: text(e.title).unwrap_or_default(),
                link: pick_link(&e.links),
                published: text(e.published).or_else(|| text(e.updated)),
                summary: text(e.summary),
                description: None,
                content: text(e.content),
                author: e.author.and_then(|a| text(a.name)),
            })
            .collect();
        Ok(ParsedFeed {
            title,
            link,
            entries,
        })
    } else {
        Err(ParseError::new(feed_url, "neither an RSS nor an Atom document"))
    }
}

/* ----------------------------
Fetcher
---------------------------- */

#[derive(Debug, Clone)]
pub struct FeedOptions {
    pub timeout: Duration,
    pub cache_ttl: Duration,
    pub proxy: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(3600),
            proxy: None,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct FeedFetcher {
    client: reqwest::Client,
    urls: Vec<String>,
    cache: CacheWithTTL<String, Arc<ParsedFeed>>,
    retry: RetryPolicy,
    span: tracing::Span,
}

impl FeedFetcher {
    pub fn new(urls: Vec<String>, opts: FeedOptions) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder().timeout(opts.timeout);
        if let Some(proxy) = opts.proxy.as_deref().filter(|p| !p.is_empty()) {
            let proxy_cfg = reqwest::Proxy::all(proxy).map_err(|e| FetchError::Network {
                url: proxy.to_string(),
                source: e,
            })?;
            builder = builder.proxy(proxy_cfg);
        }
        let client = builder.build().map_err(|e| FetchError::Network {
            url: String::new(),
            source: e,
        })?;

        Ok(Self {
            client,
            urls,
            cache: CacheWithTTL::new(opts.cache_ttl),
            retry: opts.retry,
            span: tracing::info_span!("feed_fetcher"),
        })
    }

    async fn get_body(&self, url: &str) -> Result<String, FetchError> {
        let rsp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network {
                url: url.to_string(),
                source: e,
            })?;
        let status = rsp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        rsp.text().await.map_err(|e| FetchError::Network {
            url: url.to_string(),
            source: e,
        })
    }

    async fn load(&self, url: &str) -> Result<Arc<ParsedFeed>, SourceError> {
        if let Some(hit) = self.cache.get(&url.to_string()) {
            tracing::debug!(url, "feed cache hit");
            return Ok(hit);
        }
        let body = self.retry.run(|_| self.get_body(url)).await?;
        let parsed = Arc::new(parse_feed(url, &body)?);
        self.cache.insert(url.to_string(), parsed.clone());
        tracing::debug!(url, entries = parsed.entries.len(), "feed fetched");
        Ok(parsed)
    }
}

#[async_trait]
impl SourceFetcher for FeedFetcher {
    fn platform(&self) -> Platform {
        Platform::Feed
    }

    fn name(&self) -> &str {
        "feed"
    }

    fn sources(&self) -> Vec<SourceRef> {
        self.urls
            .iter()
            .map(|u| SourceRef {
                platform: Platform::Feed,
                id: u.clone(),
                url: u.clone(),
            })
            .collect()
    }

    async fn fetch(&self, source: &SourceRef) -> Result<FetchOutcome, SourceError> {
        let feed = self
            .load(&source.url)
            .instrument(self.span.clone())
            .await?;
        Ok(FetchOutcome {
            source: Some(SourceInfo {
                source_id: source.id.clone(),
                display_name: feed.title.clone(),
                link: if feed.link.is_empty() {
                    source.url.clone()
                } else {
                    feed.link.clone()
                },
            }),
            items: feed.entries.iter().cloned().map(RawItem::Feed).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
  <channel>
    <title>Acme Blog</title>
    <link>https://blog.test/</link>
    <item>
      <title>Acme&nbsp;ships widgets</title>
      <link>https://blog.test/p/1</link>
      <pubDate>Tue, 30 Apr 2024 08:15:00 +0000</pubDate>
      <description><![CDATA[<p>Short <b>desc</b></p>]]></description>
    </item>
    <item>
      <title>No link</title>
      <guid isPermaLink="true">https://blog.test/p/2</guid>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Google Alert - acme</title>
  <link href="https://www.google.com/alerts/feeds/1/2" rel="self"/>
  <entry>
    <title type="html">&lt;b&gt;Acme&lt;/b&gt; raises prices</title>
    <link href="https://news.test/a"/>
    <published>2024-04-30T10:00:00Z</published>
    <summary type="html">snippet</summary>
    <content type="html">Full &lt;b&gt;Acme&lt;/b&gt; story</content>
  </entry>
</feed>"#;

    #[test]
    fn parses_rss_items() {
        let feed = parse_feed("https://blog.test/rss", RSS).unwrap();
        assert_eq!(feed.title, "Acme Blog");
        assert_eq!(feed.entries.len(), 2);
        let first = &feed.entries[0];
        assert_eq!(first.link, "https://blog.test/p/1");
        assert_eq!(first.published.as_deref(), Some("Tue, 30 Apr 2024 08:15:00 +0000"));
        assert!(first.description.as_deref().unwrap().contains("<b>desc</b>"));
        assert_eq!(feed.entries[1].link, "https://blog.test/p/2");
    }

    #[test]
    fn parses_atom_entries() {
        let feed = parse_feed("https://www.google.com/alerts/feeds/1/2", ATOM).unwrap();
        assert_eq!(feed.title, "Google Alert - acme");
        let e = &feed.entries[0];
        assert_eq!(e.link, "https://news.test/a");
        assert_eq!(e.summary.as_deref(), Some("snippet"));
        assert_eq!(e.content.as_deref(), Some("Full <b>Acme</b> story"));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = parse_feed("https://x.test/rss", "<html><body>hi</body></html>").unwrap_err();
        assert_eq!(err.source_ref, "https://x.test/rss");
        assert!(parse_feed("https://x.test/rss", "not xml at all").is_err());
    }
}
