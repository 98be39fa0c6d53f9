//! Editor agent — final synthesis on the article-centric path
//!
//! Merges the Collector/Librarian/analyst layers into one EnrichedArticle,
//! scoring it in [0, 10]. Articles at or above the top-pick threshold are
//! flagged for the digest's featured section.

use super::{AgentOutput, AgentTrace, AnalysisContext};
use crate::llm::context::CallContext;
use crate::llm::{build_messages, LlmClient};
use crate::models::EnrichedArticle;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

const AGENT_NAME: &str = "Editor";

/// Articles scoring at or above this are top picks
pub const TOP_PICK_THRESHOLD: f64 = 8.0;

const SYSTEM_PROMPT: &str = "You are a senior editor who integrates the reports of several \
analysts into a final news assessment.

Your duties:
1. Synthesize the perspectives into one coherent analysis.
2. Resolve contradictions between analysts, stating your judgment.
3. Cut anything without evidence behind it.
4. Score the article's overall importance and quality.

Be both macro and micro; separate fact from inference; keep it tight.";

const SYNTHESIS_PROMPT: &str = r#"Integrate these reports into a final assessment.

[ARTICLE]
Title: {title}
Source: {source}
Core content: {summary}

[COLLECTOR]
5W1H: {five_w}
Entities: {entities}

[LIBRARIAN]
Historical context: {history}

[ANALYST REPORTS]
{analysts}

Return strictly this JSON shape:
```json
{
  "overall_score": 8.5,
  "score_reasoning": "why this score",
  "ai_summary": "one-sentence summary, at most 50 words",
  "executive_summary": "two or three paragraphs covering the most important findings",
  "key_insights": ["insight 1", "insight 2", "insight 3"],
  "final_tags": ["tag1", "tag2"]
}
```

Scoring guide: scores range 1-10; 7+ is recommendable; 8+ is featured-worthy."#;

pub struct Editor {
    llm: Arc<LlmClient>,
}

impl Editor {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }

    /// Synthesize the context into an EnrichedArticle. Model failure
    /// degrades to a heuristic assembly of whatever layers succeeded.
    pub async fn process(&self, context: &mut AnalysisContext) -> AgentOutput<EnrichedArticle> {
        let started = Instant::now();
        let article = context.article.clone();
        tracing::info!(title = %truncate(&article.title, 60), "Editor started");

        let collector = context.collector.clone().unwrap_or_default();
        let five_w = serde_json::json!({
            "who": collector.who,
            "what": collector.what,
            "when": collector.when,
            "where": collector.r#where,
            "why": collector.why,
            "how": collector.how,
        });
        let entities = collector
            .entities
            .iter()
            .map(|e| e.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let analysts = if context.analyst_reports.is_empty() {
            "none (standard mode)".to_string()
        } else {
            context
                .analyst_reports
                .iter()
                .map(|(name, report)| {
                    format!(
                        "[{}]\n{}",
                        name,
                        truncate(&report.to_string(), 1500)
                    )
                })
                .collect::<Vec<_>>()
                .join("\n\n")
        };

        let prompt = SYNTHESIS_PROMPT
            .replace("{title}", &article.title)
            .replace("{source}", &article.source)
            .replace("{summary}", &context.core_summary())
            .replace("{five_w}", &five_w.to_string())
            .replace("{entities}", &entities)
            .replace(
                "{history}",
                if context.historical_context.is_empty() {
                    "none"
                } else {
                    &context.historical_context
                },
            )
            .replace("{analysts}", &analysts);
        let messages = build_messages(SYSTEM_PROMPT, &prompt, None);

        let llm = self.llm.clone();
        let result = CallContext::with_agent(AGENT_NAME, async move {
            llm.chat_json(&messages, Some(2500), Some(0.3), None).await
        })
        .await;

        let duration_ms = started.elapsed().as_millis() as i64;
        let mut enriched = assemble_base(&article, &collector, context);

        let (usage, failed) = match result {
            Ok((Some(value), usage)) => {
                if let Some(score) = value["overall_score"].as_f64() {
                    enriched.overall_score = score.clamp(0.0, 10.0);
                }
                if let Some(reasoning) = value["score_reasoning"].as_str() {
                    enriched.score_reasoning = reasoning.to_string();
                }
                if let Some(summary) = value["ai_summary"].as_str() {
                    enriched.ai_summary = summary.to_string();
                }
                if let Some(exec) = value["executive_summary"].as_str() {
                    enriched.executive_summary = exec.to_string();
                }
                if let Some(insights) = value["key_insights"].as_array() {
                    enriched.key_insights = insights
                        .iter()
                        .filter_map(|i| i.as_str().map(str::to_string))
                        .collect();
                }
                if let Some(tags) = value["final_tags"].as_array() {
                    let parsed: Vec<String> = tags
                        .iter()
                        .filter_map(|t| t.as_str().map(str::to_string))
                        .collect();
                    if !parsed.is_empty() {
                        enriched.tags = parsed;
                    }
                }
                (usage, false)
            }
            Ok((None, usage)) => (usage, false),
            Err(e) => {
                tracing::warn!(error = %e, "Editor synthesis failed, using heuristic score");
                (Default::default(), true)
            }
        };

        enriched.is_top_pick = enriched.overall_score >= TOP_PICK_THRESHOLD;
        enriched.analysis_mode = context.mode;
        enriched.analyzed_at = Utc::now();

        let mut trace = AgentTrace::new(AGENT_NAME);
        trace.input_summary = format!(
            "{} analyst reports, mode {}",
            context.analyst_reports.len(),
            context.mode.as_str()
        );
        trace.output_summary = format!(
            "score {:.1}, top_pick {}",
            enriched.overall_score, enriched.is_top_pick
        );
        trace.duration_ms = duration_ms;
        trace.token_usage = usage;
        if failed {
            trace.error = Some("synthesis call failed".to_string());
        }

        tracing::info!(
            duration_ms,
            score = enriched.overall_score,
            top_pick = enriched.is_top_pick,
            "Editor completed"
        );
        AgentOutput::ok(enriched, trace)
    }
}

/// The pre-synthesis assembly: everything deterministic layers provide.
fn assemble_base(
    article: &crate::models::Article,
    collector: &super::CollectorReport,
    context: &AnalysisContext,
) -> EnrichedArticle {
    let mut enriched = EnrichedArticle::from_article(article);
    enriched.who = collector.who.clone();
    enriched.what = collector.what.clone();
    enriched.when = collector.when.clone();
    enriched.r#where = collector.r#where.clone();
    enriched.why = collector.why.clone();
    enriched.how = collector.how.clone();
    if !collector.core_summary.is_empty() {
        enriched.ai_summary = collector.core_summary.clone();
    }
    if !collector.tags.is_empty() {
        enriched.tags = collector.tags.clone();
    }
    enriched.analysis_mode = context.mode;
    enriched
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
