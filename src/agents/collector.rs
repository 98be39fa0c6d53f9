//! Collector agent — content cleaning, 5W1H extraction, entity spotting
//!
//! The first agent in every mode. Cleans the article body (HTML tags,
//! boilerplate, whitespace), then asks the model for the structured
//! skeleton the rest of the pipeline builds on. A JSON failure degrades to
//! empty defaults with a warning trace rather than failing the article.

use super::{AgentOutput, AgentTrace, AnalysisContext};
use crate::llm::context::CallContext;
use crate::llm::{build_messages, LlmClient};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

const AGENT_NAME: &str = "Collector";

const SYSTEM_PROMPT: &str = "You are a newsroom assistant handling first-pass analysis of an article.

Your tasks:
1. Extract the 5W1H (Who, What, When, Where, Why, How).
2. Identify the key entities (people, companies, products, locations).
3. If the article spans multiple points in time, lay out the timeline.
4. Write a one-sentence core summary.

Be accurate and objective; extract, never editorialize.";

const EXTRACT_PROMPT: &str = r#"Analyze this article and extract structured information.

[TITLE]
{title}

[SOURCE]
{source}

[CONTENT]
{content}

Return strictly this JSON shape:
```json
{
  "who": ["people or organizations involved"],
  "what": "what happened, one sentence",
  "when": "date or period, or \"unspecified\"",
  "where": "location, or \"unspecified\"",
  "why": "cause or background",
  "how": "mechanism or process",
  "core_summary": "one-sentence summary, at most 50 words",
  "entities": [
    {"name": "entity name", "type": "PERSON/COMPANY/PRODUCT/LOCATION/ORG/EVENT/CONCEPT", "description": "short description"}
  ],
  "timeline": [
    {"time": "point in time", "event": "what happened", "importance": "high/normal/low"}
  ],
  "tags": ["tag1", "tag2", "tag3"]
}
```

Notes:
1. `entities` should cover every significant entity; `type` must be one of the listed values.
2. `timeline` only when the article spans multiple points in time, else an empty array.
3. `tags` are 2-4 labels from broad to narrow, e.g. ["technology", "AI", "large language models"]."#;

/// One spotted entity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimpleEntity {
    pub name: String,
    #[serde(default)]
    pub r#type: String,
    #[serde(default)]
    pub description: String,
}

/// One timeline row
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub time: String,
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub importance: String,
}

/// The Collector's structured output; missing fields default to empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectorReport {
    #[serde(default)]
    pub who: Vec<String>,
    #[serde(default)]
    pub what: String,
    #[serde(default)]
    pub when: String,
    #[serde(default)]
    pub r#where: String,
    #[serde(default)]
    pub why: String,
    #[serde(default)]
    pub how: String,
    #[serde(default)]
    pub core_summary: String,
    #[serde(default)]
    pub entities: Vec<SimpleEntity>,
    #[serde(default)]
    pub timeline: Vec<TimelineEvent>,
    #[serde(default)]
    pub tags: Vec<String>,
}

pub struct Collector {
    llm: Arc<LlmClient>,
}

impl Collector {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn process(&self, context: &mut AnalysisContext) -> AgentOutput<CollectorReport> {
        let started = Instant::now();
        let article = context.article.clone();
        tracing::info!(title = %truncate(&article.title, 60), "Collector started");

        let cleaned = clean_content(&article.content);
        context.cleaned_content = cleaned.clone();

        let prompt = EXTRACT_PROMPT
            .replace("{title}", &article.title)
            .replace("{source}", &article.source)
            .replace("{content}", &truncate(&cleaned, 3000));
        let messages = build_messages(SYSTEM_PROMPT, &prompt, None);

        let llm = self.llm.clone();
        let result = CallContext::with_agent(AGENT_NAME, async move {
            llm.chat_json(&messages, Some(2000), Some(0.2), None).await
        })
        .await;

        let duration_ms = started.elapsed().as_millis() as i64;
        let (report, usage, warning) = match result {
            Ok((Some(value), usage)) => {
                let report: CollectorReport =
                    serde_json::from_value(value).unwrap_or_default();
                (report, usage, None)
            }
            Ok((None, usage)) => (
                fallback_report(&article),
                usage,
                Some("JSON recovery failed; using fallback extraction".to_string()),
            ),
            Err(e) => {
                return AgentOutput::failed(
                    fallback_report(&article),
                    AGENT_NAME,
                    e.to_string(),
                    duration_ms,
                );
            }
        };

        let mut trace = AgentTrace::new(AGENT_NAME);
        trace.input_summary = format!("Article: {}", truncate(&article.title, 100));
        trace.output_summary = format!(
            "5W1H extracted, {} entities, {} tags",
            report.entities.len(),
            report.tags.len()
        );
        trace.duration_ms = duration_ms;
        trace.token_usage = usage;
        trace.error = warning;

        context.collector = Some(report.clone());
        tracing::info!(
            duration_ms,
            entities = report.entities.len(),
            "Collector completed"
        );
        AgentOutput::ok(report, trace)
    }
}

/// Degraded extraction when the model output is unusable: the title stands
/// in for "what", the category seeds the tags.
fn fallback_report(article: &crate::models::Article) -> CollectorReport {
    CollectorReport {
        what: article.title.clone(),
        core_summary: if article.summary.is_empty() {
            article.title.clone()
        } else {
            truncate(&article.summary, 100)
        },
        tags: if article.category.is_empty() {
            Vec::new()
        } else {
            vec![article.category.clone()]
        },
        ..Default::default()
    }
}

/// Strip HTML tags, collapse whitespace, drop known boilerplate tails.
pub fn clean_content(content: &str) -> String {
    if content.is_empty() {
        return String::new();
    }

    let tags = Regex::new(r"<[^>]+>").expect("static regex");
    let cleaned = tags.replace_all(content, " ");

    let noise = Regex::new(
        r"(?i)(click (here )?to read more.*|read the full (story|article).*|follow us on.*|subscribe to our newsletter.*|share (this|on).*|sign up for.*|the post .* appeared first on.*)",
    )
    .expect("static regex");
    let cleaned = noise.replace_all(&cleaned, "");

    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
