//! RSS/Atom feed fetching and parsing

use crate::error::{Error, Result};
use crate::feeds::FeedSource;
use crate::models::Article;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Articles older than this are dropped at parse time
pub const RETENTION_DAYS: i64 = 180;

/// User-Agent for feed requests
const USER_AGENT: &str = concat!("Briefwire/", env!("CARGO_PKG_VERSION"));

/// Concurrent feed fetcher with a bounded worker pool.
pub struct FeedFetcher {
    client: reqwest::Client,
    semaphore: Arc<Semaphore>,
}

impl FeedFetcher {
    /// `timeout_secs` bounds one feed's total HTTP time; `max_concurrent`
    /// bounds the pool width.
    pub fn new(timeout_secs: u64, max_concurrent: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::Fetch(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        })
    }

    /// Fetch every enabled feed and return the deduplicated-by-URL article
    /// set, newest entries within the retention window only. A feed that
    /// times out or returns non-2xx contributes zero articles; the others
    /// are unaffected.
    pub async fn fetch_all(&self, feeds: &[FeedSource]) -> Vec<Article> {
        let enabled: Vec<&FeedSource> = feeds.iter().filter(|f| f.enabled).collect();
        tracing::info!(count = enabled.len(), "Fetching feeds");

        let mut handles = Vec::with_capacity(enabled.len());
        for feed in enabled {
            let client = self.client.clone();
            let semaphore = self.semaphore.clone();
            let feed = feed.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                fetch_feed(&client, &feed).await
            }));
        }

        let mut articles = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(mut batch) => articles.append(&mut batch),
                Err(e) => tracing::error!(error = %e, "Feed task panicked"),
            }
        }

        // Dedup by URL, first seen wins
        let mut seen: HashSet<String> = HashSet::new();
        let total = articles.len();
        articles.retain(|a| seen.insert(a.url.clone()));

        tracing::info!(
            total = articles.len(),
            duplicates = total - articles.len(),
            "Fetch complete"
        );
        articles
    }
}

async fn fetch_feed(client: &reqwest::Client, feed: &FeedSource) -> Vec<Article> {
    let response = match client.get(&feed.url).send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(feed = %feed.name, error = %e, "Feed fetch failed");
            return Vec::new();
        }
    };
    if !response.status().is_success() {
        tracing::warn!(feed = %feed.name, status = %response.status(), "Feed returned non-2xx");
        return Vec::new();
    }
    let body = match response.bytes().await {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(feed = %feed.name, error = %e, "Feed body read failed");
            return Vec::new();
        }
    };

    let articles = parse_feed(&body, feed, Utc::now());
    tracing::info!(feed = %feed.name, count = articles.len(), "Feed fetched");
    articles
}

/// Parse a feed body (RSS or Atom, auto-detected) into articles. Per-entry
/// errors are isolated; entries missing a URL or title are dropped, as are
/// entries older than the retention window.
pub fn parse_feed(body: &[u8], feed: &FeedSource, now: DateTime<Utc>) -> Vec<Article> {
    let parsed = match feed_rs::parser::parse(body) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(feed = %feed.name, error = %e, "Feed parse failed");
            return Vec::new();
        }
    };

    let cutoff = now - Duration::days(RETENTION_DAYS);
    let mut articles = Vec::new();
    for entry in parsed.entries {
        match entry_to_article(entry, feed, now) {
            Some(article) => {
                // Entries at exactly the cutoff are included
                if let Some(published) = article.published_at {
                    if published < cutoff {
                        continue;
                    }
                }
                articles.push(article);
            }
            None => continue,
        }
    }
    articles
}

fn entry_to_article(
    entry: feed_rs::model::Entry,
    feed: &FeedSource,
    now: DateTime<Utc>,
) -> Option<Article> {
    let url = entry.links.first().map(|l| l.href.clone())?;
    if url.trim().is_empty() {
        return None;
    }
    let title = entry.title.as_ref().map(|t| t.content.trim().to_string())?;
    if title.is_empty() {
        return None;
    }

    // feed-rs normalizes timestamps to UTC; first of {published, updated}
    let published_at = entry.published.or(entry.updated);

    let summary = entry
        .summary
        .as_ref()
        .map(|s| s.content.clone())
        .unwrap_or_default();
    let content = entry
        .content
        .as_ref()
        .and_then(|c| c.body.clone())
        .filter(|body| !body.is_empty())
        .unwrap_or_else(|| summary.clone());

    let author = entry
        .authors
        .first()
        .map(|a| a.name.clone())
        .unwrap_or_default();

    Some(Article {
        url,
        title,
        content,
        summary,
        source: feed.name.clone(),
        category: feed.category.clone(),
        author,
        published_at,
        fetched_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_source() -> FeedSource {
        FeedSource {
            name: "Test Feed".to_string(),
            url: "https://example.com/rss".to_string(),
            category: "tech".to_string(),
            enabled: true,
        }
    }

    fn rss_with_entries(entries: &str) -> Vec<u8> {
        format!(
            r#"<?xml version="1.0"?>
            <rss version="2.0"><channel>
            <title>Test</title><link>https://example.com</link><description>d</description>
            {}
            </channel></rss>"#,
            entries
        )
        .into_bytes()
    }

    fn item(url: &str, title: &str, pub_date: &str) -> String {
        format!(
            "<item><link>{}</link><title>{}</title><description>sum</description><pubDate>{}</pubDate></item>",
            url, title, pub_date
        )
    }

    #[test]
    fn test_retention_filter() {
        let now = Utc::now();
        let fmt = "%a, %d %b %Y %H:%M:%S GMT";
        let fresh = (now - Duration::days(10)).format(fmt).to_string();
        let mid = (now - Duration::days(100)).format(fmt).to_string();
        let stale = (now - Duration::days(200)).format(fmt).to_string();

        let body = rss_with_entries(&format!(
            "{}{}{}",
            item("https://example.com/a", "Fresh", &fresh),
            item("https://example.com/b", "Mid", &mid),
            item("https://example.com/c", "Stale", &stale),
        ));
        let articles = parse_feed(&body, &feed_source(), now);
        assert_eq!(articles.len(), 2);
        assert!(articles.iter().all(|a| a.title != "Stale"));
    }

    #[test]
    fn test_entry_at_exact_cutoff_is_included() {
        let now = Utc::now();
        let fmt = "%a, %d %b %Y %H:%M:%S GMT";
        let boundary = (now - Duration::days(RETENTION_DAYS)).format(fmt).to_string();
        let body = rss_with_entries(&item("https://example.com/a", "Boundary", &boundary));
        let articles = parse_feed(&body, &feed_source(), now);
        assert_eq!(articles.len(), 1);
    }

    #[test]
    fn test_missing_url_or_title_drops_entry() {
        let body = rss_with_entries(
            "<item><title>No link</title></item>\
             <item><link>https://example.com/x</link></item>\
             <item><link>https://example.com/ok</link><title>Ok</title></item>",
        );
        let articles = parse_feed(&body, &feed_source(), Utc::now());
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].title, "Ok");
    }

    #[test]
    fn test_summary_copied_into_content_when_absent() {
        let body = rss_with_entries(&item("https://example.com/a", "T", "Mon, 01 Jan 2120 00:00:00 GMT"));
        // Future-dated entries are within retention
        let articles = parse_feed(&body, &feed_source(), Utc::now());
        assert_eq!(articles[0].summary, "sum");
        assert_eq!(articles[0].content, "sum");
    }

    #[test]
    fn test_atom_feed_parses() {
        let now = Utc::now();
        let updated = now.to_rfc3339();
        let body = format!(
            r#"<?xml version="1.0"?>
            <feed xmlns="http://www.w3.org/2005/Atom">
              <title>Atom Test</title><id>urn:1</id><updated>{updated}</updated>
              <entry>
                <title>Atom Entry</title>
                <id>urn:e1</id>
                <link href="https://example.com/atom-entry"/>
                <updated>{updated}</updated>
                <content>Full body text</content>
              </entry>
            </feed>"#
        );
        let articles = parse_feed(body.as_bytes(), &feed_source(), now);
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].content, "Full body text");
        assert!(articles[0].published_at.is_some());
    }

    #[test]
    fn test_zero_entries_is_not_an_error() {
        let body = rss_with_entries("");
        assert!(parse_feed(&body, &feed_source(), Utc::now()).is_empty());
    }

    #[test]
    fn test_malformed_feed_yields_nothing() {
        assert!(parse_feed(b"this is not xml", &feed_source(), Utc::now()).is_empty());
    }

    #[test]
    fn test_duplicate_urls_within_one_feed_survive_to_global_dedup() {
        // parse_feed itself keeps both; fetch_all dedups globally
        let now = Utc::now();
        let fmt = "%a, %d %b %Y %H:%M:%S GMT";
        let fresh = (now - Duration::days(1)).format(fmt).to_string();
        let body = rss_with_entries(&format!(
            "{}{}",
            item("https://example.com/same", "One", &fresh),
            item("https://example.com/same", "Two", &fresh),
        ));
        let articles = parse_feed(&body, &feed_source(), now);
        assert_eq!(articles.len(), 2);

        let mut seen = HashSet::new();
        let deduped: Vec<_> = articles
            .into_iter()
            .filter(|a| seen.insert(a.url.clone()))
            .collect();
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].title, "One");
    }
}
