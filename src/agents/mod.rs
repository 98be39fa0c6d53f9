//! The multi-agent analysis pipeline
//!
//! Every agent is a stateless function over (input, shared context) that
//! produces a structured output plus a trace. Agents call the model only
//! through the LLM gateway, inside an ambient agent-name scope so
//! telemetry attributes the call. The orchestrator composes the context
//! and owns both pipelines: the article-centric mode selector and the
//! information-centric extract → dedup → merge → knowledge-graph flow.

mod analysts;
mod backfill;
mod collector;
mod curator;
mod editor;
mod extractor;
mod librarian;
mod merger;
mod orchestrator;
mod trace;

pub use analysts::{AnalystKind, AnalystTeam};
pub use backfill::EntityBackfill;
pub use collector::{clean_content, Collector, CollectorReport, SimpleEntity, TimelineEvent};
pub use curator::{Curator, HISTORY_WINDOW};
pub use editor::{Editor, TOP_PICK_THRESHOLD};
pub use extractor::Extractor;
pub use librarian::{Librarian, LibrarianReport};
pub use merger::merge_units;
pub use orchestrator::{Orchestrator, SEMANTIC_DEDUP_THRESHOLD, SEMANTIC_DEDUP_TOP_K};
pub use trace::TraceManager;

use crate::models::{AnalysisMode, Article, TokenUsage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-agent execution trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTrace {
    pub agent_name: String,
    pub timestamp: DateTime<Utc>,
    pub input_summary: String,
    pub output_summary: String,
    pub duration_ms: i64,
    pub token_usage: TokenUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentTrace {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            timestamp: Utc::now(),
            input_summary: String::new(),
            output_summary: String::new(),
            duration_ms: 0,
            token_usage: TokenUsage::default(),
            error: None,
        }
    }
}

/// An agent's result: the output (possibly a typed default on failure),
/// its trace, and whether it succeeded.
#[derive(Debug, Clone)]
pub struct AgentOutput<T> {
    pub success: bool,
    pub data: T,
    pub trace: AgentTrace,
    pub error: Option<String>,
}

impl<T> AgentOutput<T> {
    pub fn ok(data: T, trace: AgentTrace) -> Self {
        Self {
            success: true,
            data,
            trace,
            error: None,
        }
    }

    pub fn failed(data: T, agent_name: &str, error: String, duration_ms: i64) -> Self {
        let mut trace = AgentTrace::new(agent_name);
        trace.duration_ms = duration_ms;
        trace.error = Some(error.clone());
        Self {
            success: false,
            data,
            trace,
            error: Some(error),
        }
    }
}

/// Mutable context threaded through one article's analysis. Never
/// persisted; it exists only for the duration of the pipeline run.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    pub article: Article,
    pub mode: AnalysisMode,

    // Collector output
    pub cleaned_content: String,
    pub collector: Option<CollectorReport>,

    // Librarian output
    pub historical_context: String,
    pub knowledge_graph: Option<serde_json::Value>,
    pub related_articles: Vec<RelatedArticle>,

    // Analyst team output, keyed by analyst name
    pub analyst_reports: HashMap<String, serde_json::Value>,

    pub traces: Vec<AgentTrace>,
}

/// A vector-index hit carried in the context for the Librarian prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedArticle {
    pub id: String,
    pub title: String,
    pub content: String,
    pub score: f64,
}

impl AnalysisContext {
    pub fn new(article: Article, mode: AnalysisMode) -> Self {
        Self {
            article,
            mode,
            cleaned_content: String::new(),
            collector: None,
            historical_context: String::new(),
            knowledge_graph: None,
            related_articles: Vec::new(),
            analyst_reports: HashMap::new(),
            traces: Vec::new(),
        }
    }

    pub fn add_trace(&mut self, trace: AgentTrace) {
        self.traces.push(trace);
    }

    pub fn total_tokens(&self) -> TokenUsage {
        let mut total = TokenUsage::default();
        for trace in &self.traces {
            total.add(trace.token_usage);
        }
        total
    }

    /// The best available short summary for downstream prompts.
    pub fn core_summary(&self) -> String {
        self.collector
            .as_ref()
            .filter(|c| !c.core_summary.is_empty())
            .map(|c| c.core_summary.clone())
            .unwrap_or_else(|| self.article.summary.chars().take(500).collect())
    }
}
