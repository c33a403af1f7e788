// src/matcher.rs
//! Keyword matcher and aggregator exemption.
//!
//! Matching is case-insensitive and whole-word: a keyword only counts when it
//! is bounded by non-word characters (or the text edges), so `cat` hits
//! "cat sighting" but not "category report". Unicode word characters are
//! honoured, which matters for Cyrillic keywords.

use regex::{Regex, RegexBuilder};
use url::Url;

use crate::model::Keyword;

/// Separator placed between candidate fields before matching.
pub const FIELD_SEPARATOR: &str = " \n ";

/// Compiled-program budget for the keyword alternation. Unicode `\W` makes
/// each alternative costly, so large registries need more than the regex default.
pub const PATTERN_SIZE_LIMIT: usize = 64 * (1 << 20);

/// Compiled active keyword set.
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    re: Option<Regex>,
    keywords: Vec<String>,
    compile_error: Option<String>,
}

impl KeywordMatcher {
    /// Build from raw keyword texts; blanks are ignored, duplicates collapsed.
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::with_size_limit(keywords, PATTERN_SIZE_LIMIT)
    }

    /// As [`KeywordMatcher::new`] with an explicit compiled-size budget. A set
    /// that does not fit is kept but matches nothing; see [`Self::compile_error`].
    pub fn with_size_limit<I, S>(keywords: I, size_limit: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut words: Vec<String> = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        words.sort_by_key(|w| w.to_lowercase());
        words.dedup_by(|a, b| a.to_lowercase() == b.to_lowercase());

        if words.is_empty() {
            return Self {
                re: None,
                keywords: words,
                compile_error: None,
            };
        }

        // Longest first so overlapping keywords prefer the most specific one.
        let mut alternatives: Vec<String> = words.iter().map(|w| regex::escape(w)).collect();
        alternatives.sort_by_key(|a| std::cmp::Reverse(a.len()));
        let pattern = format!(r"(?iu)(?:^|\W)(?:{})(?:\W|$)", alternatives.join("|"));
        // Alternatives are escaped; only the size budget can reject the pattern.
        match RegexBuilder::new(&pattern).size_limit(size_limit).build() {
            Ok(re) => Self {
                re: Some(re),
                keywords: words,
                compile_error: None,
            },
            Err(e) => {
                tracing::warn!(
                    keywords = words.len(),
                    error = %e,
                    "keyword set failed to compile; nothing will match until it changes"
                );
                Self {
                    re: None,
                    keywords: words,
                    compile_error: Some(e.to_string()),
                }
            }
        }
    }

    /// Build from registry rows, keeping only active keywords.
    pub fn from_active(keywords: &[Keyword]) -> Self {
        Self::new(keywords.iter().filter(|k| k.is_active).map(|k| k.text.as_str()))
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.re.as_ref().is_some_and(|re| re.is_match(text))
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Why a non-empty keyword set has no compiled pattern.
    pub fn compile_error(&self) -> Option<&str> {
        self.compile_error.as_deref()
    }
}

/// One-shot form: compile `active_keywords` and test `candidate_text`.
pub fn matches<S: AsRef<str>>(candidate_text: &str, active_keywords: &[S]) -> bool {
    KeywordMatcher::new(active_keywords.iter().map(|k| k.as_ref())).is_match(candidate_text)
}

/// Join every textually relevant field of a candidate, skipping empties.
pub fn candidate_text<'a, I>(parts: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(FIELD_SEPARATOR)
}

/* ----------------------------
Aggregator exemption
---------------------------- */

pub const DEFAULT_AGGREGATOR_HOSTS: [&str; 2] = ["alerts.google.com", "google.com/alerts"];

#[derive(Debug, Clone, PartialEq, Eq)]
struct HostPattern {
    host: String,
    path_prefix: Option<String>,
}

impl HostPattern {
    fn parse(raw: &str) -> Option<Self> {
        let raw = raw
            .trim()
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .to_ascii_lowercase();
        let (host, path) = match raw.split_once('/') {
            Some((h, p)) => (h.to_string(), Some(format!("/{}", p.trim_end_matches('/')))),
            None => (raw, None),
        };
        if host.is_empty() {
            return None;
        }
        Some(Self {
            host,
            path_prefix: path.filter(|p| p != "/"),
        })
    }

    fn matches(&self, host: &str, path: &str) -> bool {
        let host_ok = host == self.host || host.ends_with(&format!(".{}", self.host));
        host_ok
            && self
                .path_prefix
                .as_deref()
                .map_or(true, |prefix| path_has_prefix(&path.to_ascii_lowercase(), prefix))
    }
}

/// `prefix` matched on whole path segments: `/alerts` covers `/alerts` and
/// `/alerts/feeds`, not `/alertsfoo`.
fn path_has_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Sources that already filter by the same keywords upstream bypass the
/// matcher. Decided from the source URL's host (and optional path prefix).
#[derive(Debug, Clone)]
pub struct AggregatorExemption {
    patterns: Vec<HostPattern>,
}

impl Default for AggregatorExemption {
    fn default() -> Self {
        Self::new(DEFAULT_AGGREGATOR_HOSTS)
    }
}

impl AggregatorExemption {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .filter_map(|p| HostPattern::parse(p.as_ref()))
                .collect(),
        }
    }

    pub fn is_exempt(&self, source_url: &str) -> bool {
        let Ok(url) = Url::parse(source_url) else {
            return false;
        };
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        self.patterns.iter().any(|p| p.matches(&host, url.path()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_word_only() {
        let m = KeywordMatcher::new(["cat"]);
        assert!(m.is_match("cat sighting"));
        assert!(m.is_match("a black cat."));
        assert!(!m.is_match("category report"));
        assert!(!m.is_match("concatenate"));
    }

    #[test]
    fn case_insensitive_both_ways() {
        assert!(matches("cat", &["CAT"]));
        assert!(matches("CAT alert", &["cat"]));
    }

    #[test]
    fn cyrillic_word_boundaries() {
        let m = KeywordMatcher::new(["рубль"]);
        assert!(m.is_match("Курс: Рубль укрепился"));
        assert!(!m.is_match("рубльовка"));
    }

    #[test]
    fn keywords_with_punctuation_are_literal() {
        let m = KeywordMatcher::new(["c++", "acme inc."]);
        assert!(m.is_match("we use c++ daily"));
        assert!(m.is_match("(acme inc.) said"));
        assert!(!m.is_match("we use c daily"));
    }

    #[test]
    fn empty_set_matches_nothing() {
        let m = KeywordMatcher::new(Vec::<String>::new());
        assert!(m.is_empty());
        assert!(!m.is_match("anything at all"));
        let blanks = KeywordMatcher::new(["  ", ""]);
        assert!(blanks.is_empty());
    }

    #[test]
    fn inactive_keywords_are_ignored() {
        let rows = vec![
            Keyword { text: "acme".into(), is_active: true },
            Keyword { text: "widget".into(), is_active: false },
        ];
        let m = KeywordMatcher::from_active(&rows);
        assert!(m.is_match("acme ships"));
        assert!(!m.is_match("widget ships"));
    }

    #[test]
    fn candidate_text_joins_fields() {
        let text = candidate_text(["Title", "", "  summary ", "https://x.test/cat"]);
        assert_eq!(text, "Title \n summary \n https://x.test/cat");
        // A keyword in the link is still whole-word bounded by '/'.
        assert!(matches(&text, &["cat"]));
    }

    #[test]
    fn google_alerts_are_exempt() {
        let ex = AggregatorExemption::default();
        assert!(ex.is_exempt("https://www.google.com/alerts/feeds/0123/4567"));
        assert!(ex.is_exempt("https://alerts.google.com/feeds/abc"));
        assert!(!ex.is_exempt("https://www.google.com/news/rss"));
        assert!(!ex.is_exempt("https://example.test/alerts"));
        assert!(!ex.is_exempt("not a url"));
    }

    #[test]
    fn exempt_path_prefix_stops_at_segment_boundary() {
        let ex = AggregatorExemption::default();
        assert!(ex.is_exempt("https://www.google.com/alerts"));
        assert!(ex.is_exempt("https://www.google.com/alerts/"));
        assert!(ex.is_exempt("https://www.google.com/Alerts/feeds/1/2"));
        assert!(!ex.is_exempt("https://www.google.com/alertsfoo"));
        assert!(!ex.is_exempt("https://www.google.com/alerts-digest/feeds/1"));

        let custom = AggregatorExemption::new(["news.test/digest/"]);
        assert!(custom.is_exempt("https://news.test/digest/today"));
        assert!(!custom.is_exempt("https://news.test/digests/today"));
    }

    #[test]
    fn oversized_keyword_set_reports_compile_error() {
        let m = KeywordMatcher::with_size_limit(["acme", "widget"], 16);
        assert!(!m.is_empty());
        assert!(m.compile_error().is_some());
        assert!(!m.is_match("acme ships"));

        let ok = KeywordMatcher::new(["acme", "widget"]);
        assert!(ok.compile_error().is_none());
        assert!(ok.is_match("acme ships"));
    }
}
