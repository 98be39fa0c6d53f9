//! Librarian agent — the RAG step
//!
//! Searches the vector index for historically related articles, asks the
//! model to synthesize background context and an entity relationship
//! sketch, and (after analysis) writes the current article into the index
//! so future articles can find it.

use super::{AgentOutput, AgentTrace, AnalysisContext, RelatedArticle};
use crate::llm::context::CallContext;
use crate::llm::{build_messages, LlmClient};
use crate::vector::VectorIndex;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

const AGENT_NAME: &str = "Librarian";

const SYSTEM_PROMPT: &str = "You are a research librarian who supplies the background a reader \
needs to understand a news story.

Your tasks:
1. Add background on the key entities in the story.
2. Recall related prior events from the supplied archive material.
3. Sketch the relationships between the entities.

State facts only; make no judgments.";

const RESEARCH_PROMPT: &str = r#"Provide background for this article.

[TITLE]
{title}

[CORE CONTENT]
{summary}

[IDENTIFIED ENTITIES]
{entities}

[RELATED ARCHIVE MATERIAL]
{related}

Return strictly this JSON shape:
```json
{
  "entity_backgrounds": [
    {"entity": "name", "background": "description", "key_facts": ["fact 1", "fact 2"]}
  ],
  "historical_context": "two or three paragraphs of historical background",
  "knowledge_graph": {
    "nodes": [{"id": "n1", "name": "entity", "type": "COMPANY"}],
    "edges": [{"source": "n1", "target": "n2", "relation": "description"}]
  },
  "key_context_for_reader": "the single paragraph a reader most needs"
}
```"#;

/// The Librarian's structured output
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibrarianReport {
    #[serde(default)]
    pub entity_backgrounds: Vec<serde_json::Value>,
    #[serde(default)]
    pub historical_context: String,
    #[serde(default)]
    pub knowledge_graph: Option<serde_json::Value>,
    #[serde(default, rename = "key_context_for_reader")]
    pub key_context: String,
}

pub struct Librarian {
    llm: Arc<LlmClient>,
    index: Arc<dyn VectorIndex>,
}

impl Librarian {
    pub fn new(llm: Arc<LlmClient>, index: Arc<dyn VectorIndex>) -> Self {
        Self { llm, index }
    }

    pub async fn process(&self, context: &mut AnalysisContext) -> AgentOutput<LibrarianReport> {
        let started = Instant::now();
        let article = context.article.clone();
        tracing::info!(title = %truncate(&article.title, 60), "Librarian started");

        // RAG: query with title + the first five entity names
        let entities = context
            .collector
            .as_ref()
            .map(|c| c.entities.clone())
            .unwrap_or_default();
        let entity_names: Vec<&str> = entities.iter().take(5).map(|e| e.name.as_str()).collect();
        let query = format!("{} {}", article.title, entity_names.join(" "));

        let related = match self.index.search(query.trim(), 5).await {
            Ok(hits) => hits
                .into_iter()
                .map(|h| RelatedArticle {
                    id: h.id,
                    title: h.title,
                    content: h.content,
                    score: h.score,
                })
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Vector search failed");
                Vec::new()
            }
        };
        context.related_articles = related.clone();

        let entities_text = if entities.is_empty() {
            "none identified".to_string()
        } else {
            entities
                .iter()
                .take(10)
                .map(|e| format!("- {} ({}): {}", e.name, e.r#type, e.description))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let related_text = if related.is_empty() {
            "no related archive material".to_string()
        } else {
            related
                .iter()
                .map(|r| format!("- {}\n  {}", r.title, truncate(&r.content, 200)))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let prompt = RESEARCH_PROMPT
            .replace("{title}", &article.title)
            .replace("{summary}", &context.core_summary())
            .replace("{entities}", &entities_text)
            .replace("{related}", &related_text);
        let messages = build_messages(SYSTEM_PROMPT, &prompt, None);

        let llm = self.llm.clone();
        let result = CallContext::with_agent(AGENT_NAME, async move {
            llm.chat_json(&messages, Some(2000), Some(0.3), None).await
        })
        .await;

        let duration_ms = started.elapsed().as_millis() as i64;
        let (report, usage) = match result {
            Ok((Some(value), usage)) => {
                let report: LibrarianReport =
                    serde_json::from_value(value).unwrap_or_default();
                (report, usage)
            }
            Ok((None, usage)) => (LibrarianReport::default(), usage),
            Err(e) => {
                return AgentOutput::failed(
                    LibrarianReport::default(),
                    AGENT_NAME,
                    e.to_string(),
                    duration_ms,
                );
            }
        };

        context.historical_context = report.historical_context.clone();
        context.knowledge_graph = report.knowledge_graph.clone();

        let mut trace = AgentTrace::new(AGENT_NAME);
        trace.input_summary = format!(
            "Article: {}, {} entities",
            truncate(&article.title, 80),
            entities.len()
        );
        trace.output_summary = format!(
            "Background researched, {} related articles",
            related.len()
        );
        trace.duration_ms = duration_ms;
        trace.token_usage = usage;

        tracing::info!(duration_ms, related = related.len(), "Librarian completed");
        AgentOutput::ok(report, trace)
    }

    /// Index the article for future retrieval. Best-effort.
    pub async fn store_article(&self, context: &AnalysisContext) {
        let article = &context.article;
        let article_id = format!("{:x}", Md5::digest(article.url.as_bytes()));
        let mut metadata = serde_json::Map::new();
        metadata.insert("source".to_string(), article.source.clone().into());
        metadata.insert("category".to_string(), article.category.clone().into());
        metadata.insert("url".to_string(), article.url.clone().into());

        if let Err(e) = self
            .index
            .add(&article_id, &article.title, &article.content, Some(metadata))
            .await
        {
            tracing::warn!(error = %e, "Failed to index article");
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_defaults() {
        let report: LibrarianReport = serde_json::from_value(serde_json::json!({
            "historical_context": "some history"
        }))
        .unwrap();
        assert_eq!(report.historical_context, "some history");
        assert!(report.knowledge_graph.is_none());
        assert!(report.entity_backgrounds.is_empty());
    }

    #[test]
    fn test_key_context_rename() {
        let report: LibrarianReport = serde_json::from_value(serde_json::json!({
            "key_context_for_reader": "the key paragraph"
        }))
        .unwrap();
        assert_eq!(report.key_context, "the key paragraph");
    }
}
