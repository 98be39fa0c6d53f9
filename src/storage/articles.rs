//! Article store
//!
//! URL-keyed article persistence. `upsert` is idempotent: re-presenting an
//! article refreshes its content fields but never duplicates the row or
//! clears its analysis/sent state.

use super::db::Database;
use crate::error::Result;
use crate::models::{Article, EnrichedArticle};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Row};

/// Row returned by the unsent/sent queries
#[derive(Debug, Clone)]
pub struct StoredArticle {
    pub article: Article,
    pub overall_score: Option<f64>,
    pub ai_summary: Option<String>,
    pub is_top_pick: bool,
    pub reasoning: Option<String>,
    pub tags: Vec<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct ArticleStore {
    db: Database,
}

impl ArticleStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn exists(&self, url: &str) -> Result<bool> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT 1 FROM articles WHERE url = ?1 LIMIT 1")?;
            stmt.exists(params![url])
        })
    }

    /// Insert or refresh an article row, keyed on URL.
    pub fn upsert(&self, article: &Article) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO articles
                 (url, title, content, summary, source, category, author, published_at, fetched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(url) DO UPDATE SET
                    title = excluded.title,
                    content = excluded.content,
                    summary = excluded.summary,
                    source = excluded.source,
                    category = excluded.category,
                    author = excluded.author,
                    published_at = excluded.published_at",
                params![
                    article.url,
                    article.title,
                    article.content,
                    article.summary,
                    article.source,
                    article.category,
                    article.author,
                    article.published_at.map(|t| t.to_rfc3339()),
                    article.fetched_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    /// Attach the Editor's enrichment to the article row.
    pub fn save_analysis(&self, enriched: &EnrichedArticle) -> Result<()> {
        let tags = serde_json::to_string(&enriched.tags).unwrap_or_else(|_| "[]".to_string());
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE articles SET
                    overall_score = ?2,
                    ai_summary = ?3,
                    is_top_pick = ?4,
                    reasoning = ?5,
                    tags = ?6,
                    analyzed_at = ?7
                 WHERE url = ?1",
                params![
                    enriched.url,
                    enriched.overall_score,
                    enriched.ai_summary,
                    enriched.is_top_pick as i64,
                    enriched.score_reasoning,
                    tags,
                    enriched.analyzed_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    /// Articles not yet included in a digest, newest first.
    pub fn get_unsent(&self, limit: usize) -> Result<Vec<StoredArticle>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM articles
                 WHERE sent_at IS NULL
                 ORDER BY fetched_at DESC
                 LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], row_to_stored)?;
            rows.collect()
        })
    }

    /// Mark a batch of articles as sent with a shared timestamp.
    pub fn mark_sent(&self, urls: &[String]) -> Result<()> {
        if urls.is_empty() {
            return Ok(());
        }
        let now = Utc::now().to_rfc3339();
        self.db.with_tx(|tx| {
            let mut stmt = tx.prepare("UPDATE articles SET sent_at = ?1 WHERE url = ?2")?;
            for url in urls {
                stmt.execute(params![now, url])?;
            }
            Ok(())
        })
    }

    /// Recently sent articles for the curator's history-avoidance window.
    pub fn get_recent_sent(&self, days: i64, limit: usize) -> Result<Vec<StoredArticle>> {
        let cutoff = (Utc::now() - Duration::days(days)).to_rfc3339();
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM articles
                 WHERE sent_at IS NOT NULL AND sent_at >= ?1
                 ORDER BY sent_at DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![cutoff, limit as i64], row_to_stored)?;
            rows.collect()
        })
    }

    /// Delete articles fetched more than `retention_days` ago.
    pub fn cleanup(&self, retention_days: i64) -> Result<usize> {
        let cutoff = (Utc::now() - Duration::days(retention_days)).to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM articles WHERE fetched_at < ?1", params![cutoff])
        })
    }

    /// Delete one article by URL. Returns whether a row was removed.
    pub fn delete(&self, url: &str) -> Result<bool> {
        let deleted = self
            .db
            .with_conn(|conn| conn.execute("DELETE FROM articles WHERE url = ?1", params![url]))?;
        Ok(deleted > 0)
    }

    /// Recent articles for the admin listing, newest first.
    pub fn list(&self, limit: usize, offset: usize) -> Result<Vec<StoredArticle>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM articles
                 ORDER BY fetched_at DESC
                 LIMIT ?1 OFFSET ?2",
            )?;
            let rows = stmt.query_map(params![limit as i64, offset as i64], row_to_stored)?;
            rows.collect()
        })
    }

    pub fn count(&self) -> Result<i64> {
        self.db
            .with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM articles", [], |r| r.get(0)))
    }
}

fn row_to_stored(row: &Row<'_>) -> rusqlite::Result<StoredArticle> {
    let parse_time = |s: Option<String>| {
        s.and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
            .map(|t| t.with_timezone(&Utc))
    };
    let tags: Vec<String> = row
        .get::<_, Option<String>>("tags")?
        .and_then(|t| serde_json::from_str(&t).ok())
        .unwrap_or_default();

    Ok(StoredArticle {
        article: Article {
            url: row.get("url")?,
            title: row.get("title")?,
            content: row.get::<_, Option<String>>("content")?.unwrap_or_default(),
            summary: row.get::<_, Option<String>>("summary")?.unwrap_or_default(),
            source: row.get::<_, Option<String>>("source")?.unwrap_or_default(),
            category: row
                .get::<_, Option<String>>("category")?
                .unwrap_or_default(),
            author: row.get::<_, Option<String>>("author")?.unwrap_or_default(),
            published_at: parse_time(row.get("published_at")?),
            fetched_at: parse_time(row.get("fetched_at")?).unwrap_or_else(Utc::now),
        },
        overall_score: row.get("overall_score")?,
        ai_summary: row.get("ai_summary")?,
        is_top_pick: row.get::<_, Option<i64>>("is_top_pick")?.unwrap_or(0) != 0,
        reasoning: row.get("reasoning")?,
        tags,
        sent_at: parse_time(row.get("sent_at")?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ArticleStore {
        ArticleStore::new(Database::open_in_memory().unwrap())
    }

    fn article(url: &str) -> Article {
        Article {
            url: url.to_string(),
            title: "Title".to_string(),
            content: "Content".to_string(),
            summary: "Summary".to_string(),
            source: "Feed".to_string(),
            category: "tech".to_string(),
            author: String::new(),
            published_at: Some(Utc::now()),
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let store = store();
        let a = article("https://example.com/1");
        store.upsert(&a).unwrap();
        store.upsert(&a).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        assert!(store.exists("https://example.com/1").unwrap());
        assert!(!store.exists("https://example.com/2").unwrap());
    }

    #[test]
    fn test_upsert_preserves_sent_state() {
        let store = store();
        let a = article("https://example.com/1");
        store.upsert(&a).unwrap();
        store.mark_sent(&[a.url.clone()]).unwrap();
        store.upsert(&a).unwrap();
        assert!(store.get_unsent(10).unwrap().is_empty());
    }

    #[test]
    fn test_mark_sent_excludes_from_unsent() {
        let store = store();
        store.upsert(&article("https://example.com/1")).unwrap();
        store.upsert(&article("https://example.com/2")).unwrap();
        assert_eq!(store.get_unsent(10).unwrap().len(), 2);

        store
            .mark_sent(&["https://example.com/1".to_string()])
            .unwrap();
        let unsent = store.get_unsent(10).unwrap();
        assert_eq!(unsent.len(), 1);
        assert_eq!(unsent[0].article.url, "https://example.com/2");

        let sent = store.get_recent_sent(1, 10).unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].article.url, "https://example.com/1");
    }

    #[test]
    fn test_cleanup_removes_old_rows() {
        let store = store();
        let mut old = article("https://example.com/old");
        old.fetched_at = Utc::now() - Duration::days(90);
        store.upsert(&old).unwrap();
        store.upsert(&article("https://example.com/new")).unwrap();

        let deleted = store.cleanup(30).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_save_analysis_round_trip() {
        let store = store();
        let a = article("https://example.com/1");
        store.upsert(&a).unwrap();

        let mut enriched = EnrichedArticle::from_article(&a);
        enriched.overall_score = 8.4;
        enriched.is_top_pick = true;
        enriched.tags = vec!["ai".to_string()];
        store.save_analysis(&enriched).unwrap();

        let rows = store.get_unsent(10).unwrap();
        assert_eq!(rows[0].overall_score, Some(8.4));
        assert!(rows[0].is_top_pick);
        assert_eq!(rows[0].tags, vec!["ai"]);
    }
}
