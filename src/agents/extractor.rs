//! Extractor agent — article to information units
//!
//! Decomposes one article into atomic, independently valuable information
//! units: typed, time-stamped, scored on four value dimensions, classified
//! on the HEX state-change axis, and anchored into the three-tier entity
//! hierarchy. Also emits raw entity/relation payloads for the
//! knowledge-graph write path.
//!
//! Unit identity is the content fingerprint; all score and enum repair
//! rules live in the parsing layer so a sloppy model response still yields
//! valid units.

use super::{AgentOutput, AgentTrace, AnalysisContext};
use crate::llm::context::CallContext;
use crate::llm::{build_messages, LlmClient};
use crate::models::{
    normalize_score, resolve_root_category, unit_fingerprint, unit_id, validate_state_change_type,
    EntityAnchor, ExtractedEntity, ExtractedRelation, InformationType, InformationUnit,
    SourceReference,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

const AGENT_NAME: &str = "Extractor";

const SYSTEM_PROMPT: &str = r#"You are an intelligence analyst who decomposes a news article into independent, high-value "information units".

## What is an information unit?
The smallest unit worth delivering to a reader: one atomic fact, event, opinion, or data point, with analysis attached.

## Your tasks
1. Atomic decomposition: identify each independent fact, event, or claim.
2. Time annotation: state when each event happened.
3. State classification: identify which kind of state change it asserts.
4. Entity anchoring: place the protagonist entities into the preset hierarchy.
5. Value scoring: rate each unit on four dimensions.

## Output: a JSON array of units, each with

### Core fields
- `type`: fact, opinion, event, or data
- `title`: concise headline (under 15 words)
- `content`: detailed content (~100 words)
- `summary`: one-sentence summary

### Time fields
- `event_time`: when the event happened (e.g. "2026-01-15")
- `time_sensitivity`: urgent / normal / evergreen

### Value scores (1-10 each)
- `information_gain`: 10 = overturns consensus, 5 = as expected, 2 = noise
- `actionability`: 10 = concrete parameters/dates, 5 = useful reference, 2 = pure mood
- `scarcity`: 10 = primary source, 5 = authoritative citation, 2 = secondhand retelling
- `impact_magnitude`: 10 = core players, 5 = industry leaders, 2 = fringe

### HEX state classification (required)
Pick exactly one `state_change_type` from:
- `TECH`: technology/product change (launch, iteration, breakthrough, patent)
- `CAPITAL`: capital/market change (funding, earnings, M&A, stock moves)
- `REGULATION`: rules/policy change (law, sanctions, antitrust, compliance)
- `ORG`: organization/people change (executives, layoffs, restructuring)
- `RISK`: risk/crisis event (breach, outage, scandal, accident)
- `SENTIMENT`: consensus/mood change (ratings, opinion reversals, key statements)
Plus `state_change_subtypes`, a list like ["product launch"].

### Three-tier entity anchoring (required)
For each protagonist entity add to `entity_hierarchy`:
- `l3_root`: MUST come from the preset list below
- `l2_sector`: free-form sector within that root (e.g. "foundation models")
- `l1_name`: the concrete entity named in the article
- `l1_role`: protagonist / supporting / mentioned
- `confidence`: 0-1
An entity spanning several roots gets one record per root.

Preset l3_root list: {roots}

### Knowledge-graph payload
- `entities_mentioned`: [{"name": "...", "aliases": ["..."], "type": "COMPANY/PERSON/PRODUCT/ORG/CONCEPT/LOCATION/EVENT", "role": "protagonist", "state_change": {"dimension": "TECH", "delta": "what changed"}}]
- `entity_relations`: [{"source": "A", "target": "B", "relation": "competitor/partner/supplier/customer/investor/ceo_of/founder_of/parent_of/subsidiary_of/peer/employee_of", "evidence": "supporting text"}]

### 5W1H and metadata
- `who`, `what`, `when`, `where`, `why`, `how`
- `key_insights`: 3-5 short insights
- `analysis_content`: 50-100 words of interpretation
- `extraction_confidence`: 0-1
- `sentiment`: positive / neutral / negative
- `tags`: 2-4 labels

## Notes
- Forum posts and Q&A content score low (≤4) on all four value dimensions.
- Keep analysis substantive; no filler."#;

pub struct Extractor {
    llm: Arc<LlmClient>,
    roots: Vec<String>,
}

impl Extractor {
    pub fn new(llm: Arc<LlmClient>, roots: Vec<String>) -> Self {
        Self { llm, roots }
    }

    pub async fn process(
        &self,
        context: &AnalysisContext,
    ) -> AgentOutput<Vec<InformationUnit>> {
        let started = Instant::now();
        let article = &context.article;
        tracing::info!(title = %truncate(&article.title, 60), "Extractor started");

        let mut user_prompt = format!(
            "Decompose this article into information units.\n\n\
             Title: {}\nSource: {}\nPublished: {}\n\nContent:\n{}",
            article.title,
            article.source,
            article
                .published_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string()),
            truncate(&article.content, 6000),
        );
        if !context.analyst_reports.is_empty() {
            let consultants = context
                .analyst_reports
                .iter()
                .filter(|(_, report)| !report.is_null())
                .map(|(name, report)| format!("[{}]\n{}", name, truncate(&report.to_string(), 1200)))
                .collect::<Vec<_>>()
                .join("\n\n");
            if !consultants.is_empty() {
                user_prompt.push_str("\n\nConsultant perspectives to draw on:\n");
                user_prompt.push_str(&consultants);
            }
        }

        let system = SYSTEM_PROMPT.replace("{roots}", &self.roots.join(", "));
        let messages = build_messages(&system, &user_prompt, None);

        let llm = self.llm.clone();
        let result = CallContext::with_agent(AGENT_NAME, async move {
            llm.chat_json(&messages, Some(4000), Some(0.3), None).await
        })
        .await;

        let duration_ms = started.elapsed().as_millis() as i64;
        let (units, usage) = match result {
            Ok((Some(serde_json::Value::Array(items)), usage)) => {
                let mut units = Vec::new();
                for item in items {
                    match self.parse_unit(&item, article) {
                        Some(unit) => units.push(unit),
                        None => {
                            tracing::warn!(
                                preview = %truncate(&item.to_string(), 120),
                                "Unit parsing failed"
                            );
                        }
                    }
                }
                (units, usage)
            }
            Ok((_, usage)) => (Vec::new(), usage),
            Err(e) => {
                return AgentOutput::failed(Vec::new(), AGENT_NAME, e.to_string(), duration_ms);
            }
        };

        let mut trace = AgentTrace::new(AGENT_NAME);
        trace.input_summary = format!("Article: {}", truncate(&article.title, 100));
        trace.output_summary = format!("Extracted {} units", units.len());
        trace.duration_ms = duration_ms;
        trace.token_usage = usage;

        tracing::info!(duration_ms, count = units.len(), "Extractor completed");
        AgentOutput::ok(units, trace)
    }

    /// Turn one model-emitted object into a validated InformationUnit.
    /// Returns None only when both title and content are absent.
    pub fn parse_unit(
        &self,
        item: &serde_json::Value,
        article: &crate::models::Article,
    ) -> Option<InformationUnit> {
        let get_str =
            |key: &str| item[key].as_str().map(str::trim).unwrap_or_default().to_string();

        let title = {
            let t = get_str("title");
            if t.is_empty() {
                article.title.clone()
            } else {
                t
            }
        };
        let content = {
            let c = get_str("content");
            if c.is_empty() {
                article.content.clone()
            } else {
                c
            }
        };
        if title.is_empty() && content.is_empty() {
            return None;
        }

        let fingerprint = unit_fingerprint(&title, &content);
        let id = unit_id(&fingerprint);

        let entity_hierarchy = item["entity_hierarchy"]
            .as_array()
            .map(|anchors| {
                anchors
                    .iter()
                    .filter_map(|anchor| {
                        let l1_name = anchor["l1_name"].as_str()?.trim().to_string();
                        if l1_name.is_empty() {
                            return None;
                        }
                        Some(EntityAnchor {
                            l1_name,
                            l1_role: anchor["l1_role"]
                                .as_str()
                                .unwrap_or("protagonist")
                                .to_string(),
                            l2_sector: anchor["l2_sector"].as_str().unwrap_or_default().to_string(),
                            l3_root: resolve_root_category(
                                anchor["l3_root"].as_str().unwrap_or_default(),
                                &self.roots,
                            ),
                            confidence: anchor["confidence"].as_f64().unwrap_or(0.8),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let extracted_entities: Vec<ExtractedEntity> = item["entities_mentioned"]
            .as_array()
            .or_else(|| item["extracted_entities"].as_array())
            .map(|entities| {
                entities
                    .iter()
                    .filter_map(|e| serde_json::from_value(e.clone()).ok())
                    .filter(|e: &ExtractedEntity| !e.name.trim().is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let extracted_relations: Vec<ExtractedRelation> = item["entity_relations"]
            .as_array()
            .or_else(|| item["extracted_relations"].as_array())
            .map(|relations| {
                relations
                    .iter()
                    .filter_map(|r| serde_json::from_value(r.clone()).ok())
                    .filter(|r: &ExtractedRelation| !r.source.trim().is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let string_list = |key: &str| -> Vec<String> {
            item[key]
                .as_array()
                .map(|a| {
                    a.iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default()
        };
        // `who` tolerates both a list and a bare string
        let who = match &item["who"] {
            serde_json::Value::Array(_) => string_list("who"),
            serde_json::Value::String(s) if !s.is_empty() => vec![s.clone()],
            _ => Vec::new(),
        };

        let source_ref = SourceReference {
            url: article.url.clone(),
            title: article.title.clone(),
            source_name: article.source.clone(),
            published_at: article.published_at,
            excerpt: article.summary.chars().take(200).collect(),
            credibility_tier: "unknown".to_string(),
        };

        Some(InformationUnit {
            id,
            fingerprint,
            r#type: InformationType::parse(item["type"].as_str().unwrap_or("fact")),
            title,
            content,
            summary: get_str("summary"),
            event_time: item["event_time"]
                .as_str()
                .or_else(|| item["when"].as_str())
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string),
            report_time: article.published_at,
            time_sensitivity: {
                let raw = get_str("time_sensitivity");
                if raw.is_empty() {
                    "normal".to_string()
                } else {
                    raw
                }
            },
            analysis_content: get_str("analysis_content"),
            key_insights: string_list("key_insights"),
            information_gain: normalize_score(item["information_gain"].as_f64(), 5.0),
            actionability: normalize_score(item["actionability"].as_f64(), 5.0),
            scarcity: normalize_score(item["scarcity"].as_f64(), 5.0),
            impact_magnitude: normalize_score(item["impact_magnitude"].as_f64(), 5.0),
            state_change_type: validate_state_change_type(
                item["state_change_type"].as_str().unwrap_or_default(),
            ),
            state_change_subtypes: string_list("state_change_subtypes"),
            entity_hierarchy,
            who,
            what: get_str("what"),
            when: get_str("when"),
            r#where: get_str("where"),
            why: get_str("why"),
            how: get_str("how"),
            sources: vec![source_ref],
            primary_source: article.url.clone(),
            extraction_confidence: item["extraction_confidence"].as_f64().unwrap_or(0.8),
            sentiment: {
                let raw = get_str("sentiment");
                if raw.is_empty() {
                    "neutral".to_string()
                } else {
                    raw
                }
            },
            tags: string_list("tags"),
            extracted_entities,
            extracted_relations,
            created_at: article.fetched_at,
            updated_at: Utc::now(),
            merged_count: 1,
            is_sent: false,
            entity_processed: false,
        })
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
