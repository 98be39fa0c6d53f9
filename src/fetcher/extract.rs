//! Full-text content extraction
//!
//! Feeds often carry only a teaser. For articles whose content is short,
//! fetch the page and pull the main text with readability heuristics.
//! Parsing is CPU-bound, so it runs on the blocking pool instead of
//! starving the reactor. Any failure falls back to the feed-provided
//! content silently.

use crate::error::{Error, Result};
use crate::models::Article;
use scraper::{Html, Selector};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Articles with more content than this skip extraction
const SKIP_EXTRACTION_LEN: usize = 500;

pub struct ContentExtractor {
    client: reqwest::Client,
    semaphore: Arc<Semaphore>,
}

impl ContentExtractor {
    pub fn new(timeout_secs: u64, max_concurrent: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("Briefwire/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::Fetch(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        })
    }

    /// Enrich each article with extracted page text where worthwhile.
    /// Never fails an article: extraction errors keep the feed content.
    pub async fn extract_all(&self, articles: Vec<Article>) -> Vec<Article> {
        tracing::info!(count = articles.len(), "Extracting content");

        let mut handles = Vec::with_capacity(articles.len());
        for article in articles {
            let client = self.client.clone();
            let semaphore = self.semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                extract_article(&client, article).await
            }));
        }

        let mut extracted = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(article) => extracted.push(article),
                Err(e) => tracing::error!(error = %e, "Extraction task panicked"),
            }
        }
        extracted
    }
}

async fn extract_article(client: &reqwest::Client, mut article: Article) -> Article {
    if article.content.len() > SKIP_EXTRACTION_LEN {
        return article;
    }

    let html = match fetch_page(client, &article.url).await {
        Some(html) => html,
        None => return article,
    };

    // scraper's DOM walk is CPU-bound on large pages
    let text = tokio::task::spawn_blocking(move || extract_main_text(&html))
        .await
        .ok()
        .flatten();

    if let Some(text) = text {
        if !text.trim().is_empty() {
            article.content = text;
        }
    }
    article
}

async fn fetch_page(client: &reqwest::Client, url: &str) -> Option<String> {
    let response = match client.get(url).send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!(url, error = %e, "Page fetch failed");
            return None;
        }
    };
    if !response.status().is_success() {
        tracing::debug!(url, status = %response.status(), "Page returned non-2xx");
        return None;
    }
    response.text().await.ok()
}

/// Readability heuristics: prefer `<article>`, `<main>`, `[role=main]`,
/// then common content-div classes, finally the body with chrome removed.
pub fn extract_main_text(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);

    let candidates = [
        "article",
        "main",
        r#"[role="main"]"#,
        ".article-content",
        ".post-content",
        ".entry-content",
        ".content",
    ];
    for selector_str in candidates {
        let selector = Selector::parse(selector_str).ok()?;
        if let Some(element) = doc.select(&selector).next() {
            let text = collect_text(element);
            if text.len() > 200 {
                return Some(text);
            }
        }
    }

    let body = Selector::parse("body").ok()?;
    doc.select(&body).next().map(collect_text)
}

fn collect_text(element: scraper::ElementRef<'_>) -> String {
    let skip = ["script", "style", "nav", "header", "footer", "aside", "form"];
    let mut out = String::new();
    collect_into(element, &skip, &mut out);
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn collect_into(element: scraper::ElementRef<'_>, skip: &[&str], out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
            out.push(' ');
        } else if let Some(child_el) = scraper::ElementRef::wrap(child) {
            if !skip.contains(&child_el.value().name()) {
                collect_into(child_el, skip, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_article_element() {
        let html = format!(
            r#"<html><body>
            <nav>Navigation junk everywhere</nav>
            <article>{}</article>
            <footer>Footer text</footer>
            </body></html>"#,
            "The actual article body sentence. ".repeat(20)
        );
        let text = extract_main_text(&html).unwrap();
        assert!(text.contains("actual article body"));
        assert!(!text.contains("Navigation junk"));
        assert!(!text.contains("Footer text"));
    }

    #[test]
    fn test_falls_back_to_body_without_landmarks() {
        let html = "<html><body><p>Short page.</p><script>var x = 1;</script></body></html>";
        let text = extract_main_text(html).unwrap();
        assert_eq!(text, "Short page.");
    }

    #[test]
    fn test_skips_script_and_style_text() {
        let html = format!(
            r#"<html><body><main>
            <style>.a {{ color: red }}</style>
            <script>console.log("nope")</script>
            {}
            </main></body></html>"#,
            "Visible content sentence. ".repeat(20)
        );
        let text = extract_main_text(&html).unwrap();
        assert!(text.contains("Visible content"));
        assert!(!text.contains("console.log"));
        assert!(!text.contains("color: red"));
    }

    #[test]
    fn test_whitespace_is_collapsed() {
        let html = "<html><body><p>a\n\n   b\t c</p></body></html>";
        assert_eq!(extract_main_text(html).unwrap(), "a b c");
    }
}
