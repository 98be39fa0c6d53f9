//! The analyst team — Skeptic, Economist, Detective
//!
//! Three perspectives run in parallel during DEEP analysis. Each emits its
//! own JSON report; a failing analyst leaves an empty report in its slot
//! and never takes the pipeline down with it.

use super::{AgentOutput, AgentTrace, AnalysisContext};
use crate::llm::context::CallContext;
use crate::llm::{build_messages, LlmClient};
use std::sync::Arc;
use std::time::Instant;

/// Which analyst to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalystKind {
    Skeptic,
    Economist,
    Detective,
}

impl AnalystKind {
    pub const ALL: [AnalystKind; 3] = [
        AnalystKind::Skeptic,
        AnalystKind::Economist,
        AnalystKind::Detective,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AnalystKind::Skeptic => "Skeptic",
            AnalystKind::Economist => "Economist",
            AnalystKind::Detective => "Detective",
        }
    }

    /// Key used in `analyst_reports`
    pub fn key(&self) -> &'static str {
        match self {
            AnalystKind::Skeptic => "skeptic",
            AnalystKind::Economist => "economist",
            AnalystKind::Detective => "detective",
        }
    }

    fn system_prompt(&self) -> &'static str {
        match self {
            AnalystKind::Skeptic => SKEPTIC_SYSTEM,
            AnalystKind::Economist => ECONOMIST_SYSTEM,
            AnalystKind::Detective => DETECTIVE_SYSTEM,
        }
    }

    fn analysis_prompt(&self) -> &'static str {
        match self {
            AnalystKind::Skeptic => SKEPTIC_PROMPT,
            AnalystKind::Economist => ECONOMIST_PROMPT,
            AnalystKind::Detective => DETECTIVE_PROMPT,
        }
    }
}

const SKEPTIC_SYSTEM: &str = "You are a rigorous news auditor who hunts for problems and bias in \
reporting. Assess source credibility, check whether claims carry evidence, detect loaded \
language, and flag clickbait. Stay skeptical but grounded: only call out problems you can point \
to in the text.";

const SKEPTIC_PROMPT: &str = r#"Critically review this article.

[TITLE]
{title}

[SOURCE]
{source}

[CONTENT]
{content}

[BACKGROUND]
{background}

Return strictly this JSON shape:
```json
{
  "source_credibility": {
    "credibility_score": 7.5,
    "tier": "mainstream/official/trade/blog/unknown",
    "known_biases": ["bias"],
    "reasoning": "why"
  },
  "bias_analysis": {
    "emotional_tone": "objective/sensational/fear-mongering/optimistic/pessimistic",
    "bias_indicators": ["loaded phrase"],
    "objectivity_score": 7.0
  },
  "clickbait_analysis": {
    "is_clickbait": false,
    "clickbait_score": 0.2,
    "title_accuracy": "how well the title matches the content"
  },
  "logical_issues": [
    {"issue": "description", "severity": "low/medium/high", "evidence": "supporting text"}
  ],
  "overall_assessment": {
    "trust_score": 7.5,
    "key_concerns": ["concern"],
    "recommendation": "reading guidance"
  }
}
```"#;

const ECONOMIST_SYSTEM: &str = "You are a market analyst who maps news to economic consequences. \
Identify who is directly affected, trace second-order effects along supply chains and capital \
flows, read the market mood, and flag risks. Quantify where the article gives you numbers; say \
so when it does not.";

const ECONOMIST_PROMPT: &str = r#"Analyze the economic implications of this article.

[TITLE]
{title}

[SOURCE]
{source}

[CONTENT]
{content}

[BACKGROUND]
{background}

Return strictly this JSON shape:
```json
{
  "direct_impact": [
    {"affected": "entity or sector", "direction": "positive/negative/mixed", "magnitude": "small/moderate/large", "reasoning": "why"}
  ],
  "second_order_effects": [
    {"chain": "A -> B -> C", "description": "the transmission path", "confidence": 0.6}
  ],
  "market_sentiment": {
    "overall": "bullish/bearish/neutral/divided",
    "drivers": ["driver"]
  },
  "risk_warnings": [
    {"risk": "description", "probability": "low/medium/high", "horizon": "near/medium/long"}
  ],
  "recommendations": {
    "investor": ["suggestion"],
    "business": ["suggestion"]
  }
}
```"#;

const DETECTIVE_SYSTEM: &str = "You are a relationship detective who uncovers the network behind \
a story: who is connected to whom, who benefits, who loses, and what incentives drive the \
actors. Build the relationship map the article implies and state the interests plainly.";

const DETECTIVE_PROMPT: &str = r#"Investigate the relationships and interests behind this article.

[TITLE]
{title}

[SOURCE]
{source}

[CONTENT]
{content}

[BACKGROUND]
{background}

Return strictly this JSON shape:
```json
{
  "entity_relationships": [
    {"source": "A", "target": "B", "relation": "competitor/partner/supplier/customer/investor/ceo_of/founder_of/parent_of/subsidiary_of/peer/employee_of", "evidence": "supporting text"}
  ],
  "stakeholder_analysis": [
    {"stakeholder": "who", "interest": "what they want", "position": "winner/loser/neutral"}
  ],
  "hidden_connections": ["non-obvious link worth noting"],
  "investigation_summary": "two or three sentences of synthesis"
}
```"#;

pub struct AnalystTeam {
    llm: Arc<LlmClient>,
}

impl AnalystTeam {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }

    /// Run one analyst. Failure yields an empty (null) report.
    pub async fn run_one(
        &self,
        kind: AnalystKind,
        context: &AnalysisContext,
    ) -> AgentOutput<serde_json::Value> {
        let started = Instant::now();
        let article = &context.article;
        tracing::info!(analyst = kind.name(), "Analyst started");

        let prompt = kind
            .analysis_prompt()
            .replace("{title}", &article.title)
            .replace("{source}", &article.source)
            .replace(
                "{content}",
                &context
                    .cleaned_content
                    .chars()
                    .take(3000)
                    .collect::<String>(),
            )
            .replace(
                "{background}",
                if context.historical_context.is_empty() {
                    "none available"
                } else {
                    &context.historical_context
                },
            );
        let messages = build_messages(kind.system_prompt(), &prompt, None);

        let llm = self.llm.clone();
        let result = CallContext::with_agent(kind.name(), async move {
            llm.chat_json(&messages, Some(2500), Some(0.4), None).await
        })
        .await;

        let duration_ms = started.elapsed().as_millis() as i64;
        match result {
            Ok((parsed, usage)) => {
                let report = parsed.unwrap_or(serde_json::Value::Null);
                let mut trace = AgentTrace::new(kind.name());
                trace.input_summary = format!("Article: {}", article.title.chars().take(80).collect::<String>());
                trace.output_summary = if report.is_null() {
                    "empty report (JSON recovery failed)".to_string()
                } else {
                    "report produced".to_string()
                };
                trace.duration_ms = duration_ms;
                trace.token_usage = usage;
                tracing::info!(analyst = kind.name(), duration_ms, "Analyst completed");
                AgentOutput::ok(report, trace)
            }
            Err(e) => {
                tracing::warn!(analyst = kind.name(), error = %e, "Analyst failed");
                AgentOutput::failed(serde_json::Value::Null, kind.name(), e.to_string(), duration_ms)
            }
        }
    }

    /// Run all three analysts concurrently and attach their reports to the
    /// context. A failed analyst contributes a null report; the join never
    /// fails.
    pub async fn run_all(&self, context: &mut AnalysisContext) {
        let snapshot = context.clone();
        let outputs = futures::future::join_all(
            AnalystKind::ALL
                .iter()
                .map(|kind| self.run_one(*kind, &snapshot)),
        )
        .await;

        for (kind, output) in AnalystKind::ALL.iter().zip(outputs) {
            context
                .analyst_reports
                .insert(kind.key().to_string(), output.data.clone());
            context.add_trace(output.trace);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyst_names_and_keys() {
        assert_eq!(AnalystKind::ALL.len(), 3);
        for kind in AnalystKind::ALL {
            assert_eq!(kind.key(), kind.name().to_lowercase());
        }
    }

    #[test]
    fn test_prompts_carry_placeholders() {
        for kind in AnalystKind::ALL {
            let prompt = kind.analysis_prompt();
            for placeholder in ["{title}", "{source}", "{content}", "{background}"] {
                assert!(
                    prompt.contains(placeholder),
                    "{} prompt missing {}",
                    kind.name(),
                    placeholder
                );
            }
        }
    }

    #[tokio::test]
    async fn test_failed_analyst_leaves_empty_slot() {
        // Endpoint that refuses connections: every analyst call fails, the
        // fan-out still completes with null reports in every slot.
        let config = crate::config::AiConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            api_key: "test".to_string(),
            request_timeout_secs: 1,
            ..Default::default()
        };
        let llm = Arc::new(
            LlmClient::new(config, crate::telemetry::TelemetryRecorder::disabled()).unwrap(),
        );
        let team = AnalystTeam::new(llm);

        let article = crate::models::Article {
            url: "https://example.com/a".to_string(),
            title: "T".to_string(),
            content: "C".to_string(),
            summary: "S".to_string(),
            source: "Src".to_string(),
            category: String::new(),
            author: String::new(),
            published_at: None,
            fetched_at: chrono::Utc::now(),
        };
        let mut context =
            super::super::AnalysisContext::new(article, crate::models::AnalysisMode::Deep);

        team.run_all(&mut context).await;

        assert_eq!(context.analyst_reports.len(), 3);
        for kind in AnalystKind::ALL {
            assert!(context.analyst_reports[kind.key()].is_null());
        }
        // Every analyst left a trace carrying its error
        assert_eq!(context.traces.len(), 3);
        assert!(context.traces.iter().all(|t| t.error.is_some()));
    }
}
