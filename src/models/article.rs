//! Article models
//!
//! An article's identity is its canonical URL: two articles with the same
//! URL are the same article. Publish times are normalized to UTC at parse
//! time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Analysis depth for the article-centric pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    /// Collector only: fast score and summary
    Quick,
    /// Collector + Librarian + Editor
    Standard,
    /// Full pipeline with the parallel analyst team
    Deep,
}

impl AnalysisMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::Quick => "quick",
            AnalysisMode::Standard => "standard",
            AnalysisMode::Deep => "deep",
        }
    }
}

impl std::str::FromStr for AnalysisMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "quick" => Ok(AnalysisMode::Quick),
            "standard" => Ok(AnalysisMode::Standard),
            "deep" => Ok(AnalysisMode::Deep),
            other => Err(crate::Error::Config(format!(
                "unknown analysis mode: {}",
                other
            ))),
        }
    }
}

/// A fetched article, keyed by URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    /// Canonical URL (identity)
    pub url: String,
    pub title: String,
    /// Feed-provided or extracted body text
    pub content: String,
    /// Feed-provided summary/description
    pub summary: String,
    /// Source feed name
    pub source: String,
    /// Source feed category
    pub category: String,
    pub author: String,
    /// Publish time, normalized to UTC (None when the feed omits it)
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
}

/// The Editor's final product on the article-centric path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedArticle {
    pub url: String,
    pub title: String,
    pub summary: String,
    pub source: String,
    pub category: String,

    // 5W1H
    pub who: Vec<String>,
    pub what: String,
    pub when: String,
    pub r#where: String,
    pub why: String,
    pub how: String,

    /// One-line AI summary
    pub ai_summary: String,
    /// Executive summary (DEEP/STANDARD modes)
    pub executive_summary: String,
    pub key_insights: Vec<String>,
    pub tags: Vec<String>,

    /// Overall score in [0, 10]
    pub overall_score: f64,
    pub score_reasoning: String,
    pub is_top_pick: bool,

    pub analysis_mode: AnalysisMode,
    pub analyzed_at: DateTime<Utc>,
}

impl EnrichedArticle {
    /// Degraded result used when the pipeline fails outright: carries the
    /// article through with a neutral score and no analysis layers.
    pub fn from_article(article: &Article) -> Self {
        Self {
            url: article.url.clone(),
            title: article.title.clone(),
            summary: article.summary.clone(),
            source: article.source.clone(),
            category: article.category.clone(),
            who: Vec::new(),
            what: article.title.clone(),
            when: String::new(),
            r#where: String::new(),
            why: String::new(),
            how: String::new(),
            ai_summary: truncate_chars(&article.summary, 100),
            executive_summary: String::new(),
            key_insights: Vec::new(),
            tags: if article.category.is_empty() {
                Vec::new()
            } else {
                vec![article.category.clone()]
            },
            overall_score: 5.0,
            score_reasoning: String::new(),
            is_top_pick: false,
            analysis_mode: AnalysisMode::Quick,
            analyzed_at: Utc::now(),
        }
    }
}

/// Truncate to at most `max` characters on a char boundary.
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_article() -> Article {
        Article {
            url: "https://example.com/a".to_string(),
            title: "Title".to_string(),
            content: "Body".to_string(),
            summary: "Summary".to_string(),
            source: "Example".to_string(),
            category: "tech".to_string(),
            author: String::new(),
            published_at: None,
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn test_mode_round_trip() {
        for mode in ["quick", "standard", "deep"] {
            let parsed: AnalysisMode = mode.parse().unwrap();
            assert_eq!(parsed.as_str(), mode);
        }
        assert!("turbo".parse::<AnalysisMode>().is_err());
    }

    #[test]
    fn test_degraded_enrichment_carries_article() {
        let enriched = EnrichedArticle::from_article(&sample_article());
        assert_eq!(enriched.url, "https://example.com/a");
        assert_eq!(enriched.overall_score, 5.0);
        assert!(!enriched.is_top_pick);
        assert_eq!(enriched.tags, vec!["tech"]);
    }
}
