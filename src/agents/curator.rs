//! Curator — select and rank units for a digest window
//!
//! Selection is deterministic: filter low-value noise, rank by the
//! four-dimension value score, take top picks above the featured
//! threshold (with an L3-diversity preference on ties), then quick reads
//! above the floor. The model contributes two optional passes — a daily
//! summary paragraph over the top picks and a near-duplicate exclusion
//! against recently sent items — both with deterministic fallbacks.

use super::AgentTrace;
use crate::llm::context::CallContext;
use crate::llm::{build_messages, LlmClient};
use crate::models::{Digest, DigestItem, DigestTotals, InformationUnit};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

const AGENT_NAME: &str = "Curator";

/// Featured threshold on the aggregate value score
pub const TOP_PICK_SCORE: f64 = 8.0;

/// Top picks are bounded to this range when the threshold yields enough
const TOP_PICK_MIN: usize = 3;
const TOP_PICK_MAX: usize = 10;

/// Quick-read cap
const QUICK_READ_MAX: usize = 20;

/// Recently-sent titles considered for near-duplicate exclusion
pub const HISTORY_WINDOW: usize = 20;

const SUMMARY_SYSTEM: &str = "You are the editor-in-chief of an intelligence digest. Given \
today's featured items, write a single-sentence overview (at most 30 words) capturing the day's \
through-line. Plain text only.";

const HISTORY_SYSTEM: &str = "You deduplicate a digest against recently delivered items. Given \
candidate items and recently sent titles, list the ids of candidates that substantially repeat \
something already sent. Return strictly {\"exclude_ids\": [\"id\", ...]}; an empty list when \
nothing repeats.";

/// Sources and title markers that flag forum/Q&A noise
const LOW_QUALITY_SOURCES: [&str; 4] = ["reddit.com/r/", "news.ycombinator", "stackoverflow", "stackexchange"];
const LOW_QUALITY_TITLE_MARKERS: [&str; 6] =
    ["ask hn", "how do i", "help with", "question about", "eli5", "showerthought"];

pub struct Curator {
    llm: Arc<LlmClient>,
    top_pick_count: usize,
    min_score: f64,
}

impl Curator {
    pub fn new(llm: Arc<LlmClient>, top_pick_count: usize, min_score: f64) -> Self {
        Self {
            llm,
            top_pick_count: top_pick_count.max(1),
            min_score,
        }
    }

    /// Curate a digest from the unsent units. `recent_sent_titles` feeds
    /// the history-avoidance pass; `totals` are the cycle counters shown
    /// in the digest header.
    pub async fn curate(
        &self,
        units: &[InformationUnit],
        recent_sent_titles: &[String],
        totals: DigestTotals,
    ) -> (Digest, AgentTrace) {
        let started = Instant::now();
        tracing::info!(candidates = units.len(), "Curator started");
        let mut trace = AgentTrace::new(AGENT_NAME);
        trace.input_summary = format!("{} candidate units", units.len());

        let mut candidates: Vec<&InformationUnit> =
            units.iter().filter(|u| !is_low_quality(u)).collect();

        // History avoidance: ask the model which candidates repeat recent
        // sends; on failure keep everything (plain top-K fallback).
        if !recent_sent_titles.is_empty() && !candidates.is_empty() {
            let excluded = self
                .history_exclusions(&candidates, recent_sent_titles, &mut trace)
                .await;
            if !excluded.is_empty() {
                tracing::info!(count = excluded.len(), "History pass excluded repeats");
                candidates.retain(|u| !excluded.contains(&u.id));
            }
        }

        candidates.sort_by(|a, b| {
            b.value_score()
                .partial_cmp(&a.value_score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let top_picks = select_top_picks(&candidates, self.top_pick_count);
        let top_ids: HashSet<&str> = top_picks.iter().map(|u| u.id.as_str()).collect();

        let quick_reads: Vec<&InformationUnit> = candidates
            .iter()
            .filter(|u| !top_ids.contains(u.id.as_str()))
            .filter(|u| u.value_score() >= self.min_score)
            .take(QUICK_READ_MAX)
            .copied()
            .collect();

        let selected: HashSet<&str> = top_ids
            .iter()
            .copied()
            .chain(quick_reads.iter().map(|u| u.id.as_str()))
            .collect();
        let excluded: Vec<String> = units
            .iter()
            .filter(|u| !selected.contains(u.id.as_str()))
            .map(|u| u.id.clone())
            .collect();

        let daily_summary = self.daily_summary(&top_picks, &mut trace).await;

        let digest = Digest {
            date: Utc::now(),
            daily_summary,
            top_picks: top_picks.iter().map(|u| to_item(u)).collect(),
            quick_reads: quick_reads.iter().map(|u| to_item(u)).collect(),
            excluded,
            trends: Vec::new(),
            totals,
        };

        trace.duration_ms = started.elapsed().as_millis() as i64;
        trace.output_summary = format!(
            "{} top picks, {} quick reads, {} excluded",
            digest.top_picks.len(),
            digest.quick_reads.len(),
            digest.excluded.len()
        );
        tracing::info!(
            top_picks = digest.top_picks.len(),
            quick_reads = digest.quick_reads.len(),
            "Curator completed"
        );
        (digest, trace)
    }

    async fn history_exclusions(
        &self,
        candidates: &[&InformationUnit],
        recent_titles: &[String],
        trace: &mut AgentTrace,
    ) -> HashSet<String> {
        let candidate_lines = candidates
            .iter()
            .take(50)
            .map(|u| format!("- {} | {} | {}", u.id, u.title, truncate(&u.summary, 120)))
            .collect::<Vec<_>>()
            .join("\n");
        let history_lines = recent_titles
            .iter()
            .take(HISTORY_WINDOW)
            .map(|t| format!("- {}", t))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Candidates:\n{}\n\nRecently sent:\n{}",
            candidate_lines, history_lines
        );
        let messages = build_messages(HISTORY_SYSTEM, &prompt, None);

        let llm = self.llm.clone();
        let result = CallContext::with_agent(AGENT_NAME, async move {
            llm.chat_json(&messages, Some(800), Some(0.1), None).await
        })
        .await;

        match result {
            Ok((Some(value), usage)) => {
                trace.token_usage.add(usage);
                value["exclude_ids"]
                    .as_array()
                    .map(|ids| {
                        ids.iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default()
            }
            Ok((None, usage)) => {
                trace.token_usage.add(usage);
                HashSet::new()
            }
            Err(e) => {
                tracing::warn!(error = %e, "History pass failed, keeping all candidates");
                HashSet::new()
            }
        }
    }

    async fn daily_summary(
        &self,
        top_picks: &[&InformationUnit],
        trace: &mut AgentTrace,
    ) -> String {
        if top_picks.is_empty() {
            return String::new();
        }
        let fallback = || {
            format!(
                "{} featured items today, led by: {}",
                top_picks.len(),
                top_picks[0].title
            )
        };

        let lines = top_picks
            .iter()
            .map(|u| format!("- {} ({})", u.title, truncate(&u.summary, 100)))
            .collect::<Vec<_>>()
            .join("\n");
        let messages = build_messages(SUMMARY_SYSTEM, &lines, None);

        let llm = self.llm.clone();
        let result = CallContext::with_agent(AGENT_NAME, async move {
            llm.chat(&messages, Some(200), Some(0.4), None).await
        })
        .await;

        match result {
            Ok((text, usage)) => {
                trace.token_usage.add(usage);
                let text = text.trim().to_string();
                if text.is_empty() {
                    fallback()
                } else {
                    text
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Daily summary failed, using fallback");
                fallback()
            }
        }
    }
}

/// Top-pick selection: items at or above the featured threshold, clamped
/// to [3, 10], chosen greedily with a preference for unrepresented L3
/// roots among equal scores. When fewer than the minimum clear the
/// threshold, fall back to plain top-K by score (K = configured count).
fn select_top_picks<'a>(
    sorted: &[&'a InformationUnit],
    configured_count: usize,
) -> Vec<&'a InformationUnit> {
    let above: Vec<&InformationUnit> = sorted
        .iter()
        .filter(|u| u.value_score() >= TOP_PICK_SCORE)
        .copied()
        .collect();

    if above.len() < TOP_PICK_MIN {
        return sorted.iter().take(configured_count).copied().collect();
    }

    let limit = above.len().min(TOP_PICK_MAX);
    let mut picks: Vec<&InformationUnit> = Vec::with_capacity(limit);
    let mut used_roots: HashSet<String> = HashSet::new();
    let mut remaining: Vec<&InformationUnit> = above;

    while picks.len() < limit && !remaining.is_empty() {
        let best_score = remaining[0].value_score();
        // Among the equal-score head, prefer a unit whose root is new
        let head_len = remaining
            .iter()
            .take_while(|u| (u.value_score() - best_score).abs() < 1e-9)
            .count();
        let choice = remaining[..head_len]
            .iter()
            .position(|u| !used_roots.contains(&root_of(u)))
            .unwrap_or(0);

        let picked = remaining.remove(choice);
        used_roots.insert(root_of(picked));
        picks.push(picked);
    }
    picks
}

fn root_of(unit: &InformationUnit) -> String {
    unit.entity_hierarchy
        .first()
        .map(|a| a.l3_root.clone())
        .unwrap_or_default()
}

fn is_low_quality(unit: &InformationUnit) -> bool {
    let source = unit.primary_source.to_lowercase();
    if LOW_QUALITY_SOURCES.iter().any(|s| source.contains(s)) {
        return true;
    }
    let title = unit.title.to_lowercase();
    LOW_QUALITY_TITLE_MARKERS.iter().any(|m| title.contains(m))
}

fn to_item(unit: &InformationUnit) -> DigestItem {
    DigestItem {
        unit_id: unit.id.clone(),
        title: unit.title.clone(),
        summary: if unit.summary.is_empty() {
            truncate(&unit.content, 200)
        } else {
            unit.summary.clone()
        },
        analysis: unit.analysis_content.clone(),
        source_name: unit
            .sources
            .first()
            .map(|s| s.source_name.clone())
            .unwrap_or_else(|| domain_of(&unit.primary_source)),
        url: unit.primary_source.clone(),
        event_time: unit.event_time.clone().unwrap_or_else(|| unit.when.clone()),
        score: (unit.value_score() * 10.0).round() / 10.0,
        reasoning: top_dimension(unit),
        l3_root: root_of(unit),
        tags: unit.tags.clone(),
    }
}

/// One-line selection rationale naming the strongest dimension.
fn top_dimension(unit: &InformationUnit) -> String {
    let dims = [
        ("information gain", unit.information_gain),
        ("actionability", unit.actionability),
        ("scarcity", unit.scarcity),
        ("impact", unit.impact_magnitude),
    ];
    let (name, value) = dims
        .iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .copied()
        .unwrap_or(("score", 0.0));
    format!("strongest on {} ({:.1})", name, value)
}

fn domain_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        .unwrap_or_else(|| "unknown source".to_string())
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{unit_fingerprint, unit_id, EntityAnchor, InformationType};

    fn unit(title: &str, scores: [f64; 4], root: &str) -> InformationUnit {
        let fingerprint = unit_fingerprint(title, title);
        InformationUnit {
            id: unit_id(&fingerprint),
            fingerprint,
            r#type: InformationType::Fact,
            title: title.to_string(),
            content: format!("{} content.", title),
            summary: format!("{} summary", title),
            event_time: None,
            report_time: None,
            time_sensitivity: "normal".to_string(),
            analysis_content: String::new(),
            key_insights: Vec::new(),
            information_gain: scores[0],
            actionability: scores[1],
            scarcity: scores[2],
            impact_magnitude: scores[3],
            state_change_type: String::new(),
            state_change_subtypes: Vec::new(),
            entity_hierarchy: if root.is_empty() {
                Vec::new()
            } else {
                vec![EntityAnchor {
                    l1_name: "X".to_string(),
                    l1_role: "protagonist".to_string(),
                    l2_sector: String::new(),
                    l3_root: root.to_string(),
                    confidence: 0.9,
                }]
            },
            who: Vec::new(),
            what: String::new(),
            when: String::new(),
            r#where: String::new(),
            why: String::new(),
            how: String::new(),
            sources: Vec::new(),
            primary_source: "https://news.example/a".to_string(),
            extraction_confidence: 0.8,
            sentiment: "neutral".to_string(),
            tags: Vec::new(),
            extracted_entities: Vec::new(),
            extracted_relations: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            merged_count: 1,
            is_sent: false,
            entity_processed: false,
        }
    }

    fn sorted_refs(units: &[InformationUnit]) -> Vec<&InformationUnit> {
        let mut refs: Vec<&InformationUnit> = units.iter().collect();
        refs.sort_by(|a, b| {
            b.value_score()
                .partial_cmp(&a.value_score())
                .unwrap()
        });
        refs
    }

    #[test]
    fn test_top_picks_respect_threshold() {
        let units = vec![
            unit("high1", [9.0, 9.0, 9.0, 9.0], "AI"),
            unit("high2", [8.5, 8.5, 8.5, 8.5], "Semiconductors"),
            unit("high3", [8.2, 8.2, 8.2, 8.2], "Geopolitics"),
            unit("mid", [6.0, 6.0, 6.0, 6.0], "AI"),
            unit("low", [2.0, 2.0, 2.0, 2.0], "AI"),
        ];
        let picks = select_top_picks(&sorted_refs(&units), 5);
        assert_eq!(picks.len(), 3);
        assert!(picks.iter().all(|u| u.value_score() >= TOP_PICK_SCORE));
    }

    #[test]
    fn test_too_few_above_threshold_falls_back_to_top_k() {
        let units = vec![
            unit("a", [9.0, 9.0, 9.0, 9.0], "AI"),
            unit("b", [6.0, 6.0, 6.0, 6.0], "AI"),
            unit("c", [5.0, 5.0, 5.0, 5.0], "AI"),
            unit("d", [4.0, 4.0, 4.0, 4.0], "AI"),
        ];
        let picks = select_top_picks(&sorted_refs(&units), 3);
        assert_eq!(picks.len(), 3);
        assert_eq!(picks[0].title, "a");
        assert_eq!(picks[2].title, "c");
    }

    #[test]
    fn test_diversity_prefers_unrepresented_root_on_ties() {
        let units = vec![
            unit("ai1", [9.0, 9.0, 9.0, 9.0], "AI"),
            unit("ai2", [8.5, 8.5, 8.5, 8.5], "AI"),
            unit("chips", [8.5, 8.5, 8.5, 8.5], "Semiconductors"),
            unit("geo", [8.2, 8.2, 8.2, 8.2], "Geopolitics"),
        ];
        let picks = select_top_picks(&sorted_refs(&units), 5);
        // On the 8.5 tie, the unrepresented root wins the second slot
        assert_eq!(picks[0].title, "ai1");
        assert_eq!(picks[1].title, "chips");
        assert_eq!(picks[2].title, "ai2");
    }

    #[test]
    fn test_low_quality_filter() {
        let mut forum = unit("Ask HN: how to parse feeds?", [9.0; 4], "AI");
        forum.primary_source = "https://news.ycombinator.com/item?id=1".to_string();
        assert!(is_low_quality(&forum));

        let wire = unit("Earnings beat expectations", [9.0; 4], "AI");
        assert!(!is_low_quality(&wire));
    }

    #[test]
    fn test_digest_item_mapping() {
        let u = unit("Title", [9.0, 5.0, 7.0, 6.0], "AI");
        let item = to_item(&u);
        assert_eq!(item.unit_id, u.id);
        assert_eq!(item.l3_root, "AI");
        assert!(item.reasoning.contains("information gain"));
        let expected = (u.value_score() * 10.0).round() / 10.0;
        assert!((item.score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_domain_fallback_for_source_name() {
        let u = unit("Title", [5.0; 4], "");
        let item = to_item(&u);
        assert_eq!(item.source_name, "news.example");
    }
}
