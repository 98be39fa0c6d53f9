//! Merger — combine duplicate information units into one
//!
//! The first input is the retained identity; the rest fold into it. The
//! rules are deterministic:
//!
//! - id and fingerprint come from the base unit;
//! - content is the order-insensitive union of sentences (first occurrence
//!   kept);
//! - key insights union, deduplicated;
//! - information_gain and actionability are scarcity-weighted means, so a
//!   primary source outvotes a retelling;
//! - scarcity and impact_magnitude take the max;
//! - sources union by URL; `merged_count` is the unique-source count,
//!   never a sum of prior counts;
//! - `updated_at` is refreshed.

use crate::models::InformationUnit;
use chrono::Utc;
use std::collections::HashSet;

/// Merge `units` into the first one. A single-element slice returns that
/// unit unchanged (apart from a refreshed `updated_at`).
///
/// # Panics
/// Panics on an empty slice; callers always merge at least one unit.
pub fn merge_units(units: &[InformationUnit]) -> InformationUnit {
    assert!(!units.is_empty(), "merge_units requires at least one unit");

    let base = &units[0];
    let mut merged = base.clone();

    if units.len() > 1 {
        merged.content = merge_sentences(units.iter().map(|u| u.content.as_str()));
        merged.key_insights = union_strings(units.iter().flat_map(|u| u.key_insights.iter()));
        merged.tags = union_strings(units.iter().flat_map(|u| u.tags.iter()));
        merged.who = union_strings(units.iter().flat_map(|u| u.who.iter()));

        merged.information_gain =
            scarcity_weighted_mean(units, |u| u.information_gain);
        merged.actionability = scarcity_weighted_mean(units, |u| u.actionability);
        merged.scarcity = units
            .iter()
            .map(|u| u.scarcity)
            .fold(f64::MIN, f64::max);
        merged.impact_magnitude = units
            .iter()
            .map(|u| u.impact_magnitude)
            .fold(f64::MIN, f64::max);

        // Anchors union on the (l1, l3) pair
        let mut seen_anchors = HashSet::new();
        merged.entity_hierarchy = units
            .iter()
            .flat_map(|u| u.entity_hierarchy.iter())
            .filter(|a| seen_anchors.insert((a.l1_name.clone(), a.l3_root.clone())))
            .cloned()
            .collect();

        // Knowledge-graph payloads union too, so a merge never loses an
        // entity that only one source mentioned
        let mut seen_entities = HashSet::new();
        merged.extracted_entities = units
            .iter()
            .flat_map(|u| u.extracted_entities.iter())
            .filter(|e| seen_entities.insert(e.name.to_lowercase()))
            .cloned()
            .collect();
        let mut seen_relations = HashSet::new();
        merged.extracted_relations = units
            .iter()
            .flat_map(|u| u.extracted_relations.iter())
            .filter(|r| {
                seen_relations.insert((
                    r.source.to_lowercase(),
                    r.target.to_lowercase(),
                    r.relation.to_lowercase(),
                ))
            })
            .cloned()
            .collect();
    }

    // Sources union by URL, from every input
    merged.sources = base.sources.clone();
    merged.merged_count = merged.sources.len();
    for unit in &units[1..] {
        for source in &unit.sources {
            merged.merge_source(source.clone());
        }
    }

    merged.updated_at = Utc::now();
    merged
}

/// Order-insensitive sentence union: sentences are compared trimmed, the
/// first occurrence is kept, and the result joins them in encounter order.
fn merge_sentences<'a>(contents: impl Iterator<Item = &'a str>) -> String {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out: Vec<String> = Vec::new();

    for content in contents {
        for sentence in split_sentences(content) {
            let key = sentence.trim().to_lowercase();
            if key.is_empty() {
                continue;
            }
            if seen.insert(key) {
                out.push(sentence.trim().to_string());
            }
        }
    }
    out.join(" ")
}

/// Split on sentence terminators, keeping the terminator with its
/// sentence.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if matches!(c, '.' | '!' | '?' | '\n') {
            if !current.trim().is_empty() {
                sentences.push(current.trim().to_string());
            }
            current.clear();
        }
    }
    if !current.trim().is_empty() {
        sentences.push(current.trim().to_string());
    }
    sentences
}

fn union_strings<'a>(items: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .filter(|s| !s.trim().is_empty() && seen.insert(s.trim().to_lowercase()))
        .map(|s| s.trim().to_string())
        .collect()
}

/// Mean of `value` weighted by each unit's scarcity, so better-sourced
/// inputs count for more. Falls back to a plain mean when all scarcities
/// are zero.
fn scarcity_weighted_mean(
    units: &[InformationUnit],
    value: impl Fn(&InformationUnit) -> f64,
) -> f64 {
    let weight_sum: f64 = units.iter().map(|u| u.scarcity).sum();
    if weight_sum <= 0.0 {
        return units.iter().map(&value).sum::<f64>() / units.len() as f64;
    }
    units.iter().map(|u| value(u) * u.scarcity).sum::<f64>() / weight_sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{unit_fingerprint, unit_id, InformationType, SourceReference};

    fn unit(title: &str, content: &str, source_url: &str) -> InformationUnit {
        let fingerprint = unit_fingerprint(title, content);
        InformationUnit {
            id: unit_id(&fingerprint),
            fingerprint,
            r#type: InformationType::Fact,
            title: title.to_string(),
            content: content.to_string(),
            summary: String::new(),
            event_time: None,
            report_time: None,
            time_sensitivity: "normal".to_string(),
            analysis_content: String::new(),
            key_insights: Vec::new(),
            information_gain: 5.0,
            actionability: 5.0,
            scarcity: 5.0,
            impact_magnitude: 5.0,
            state_change_type: String::new(),
            state_change_subtypes: Vec::new(),
            entity_hierarchy: Vec::new(),
            who: Vec::new(),
            what: String::new(),
            when: String::new(),
            r#where: String::new(),
            why: String::new(),
            how: String::new(),
            sources: vec![SourceReference {
                url: source_url.to_string(),
                title: title.to_string(),
                source_name: "src".to_string(),
                published_at: None,
                excerpt: String::new(),
                credibility_tier: "unknown".to_string(),
            }],
            primary_source: source_url.to_string(),
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

    #[test]
    fn test_single_unit_passes_through() {
        let u = unit("T", "Content here.", "https://a.example/1");
        let merged = merge_units(std::slice::from_ref(&u));
        assert_eq!(merged.id, u.id);
        assert_eq!(merged.content, u.content);
        assert_eq!(merged.merged_count, 1);
    }

    #[test]
    fn test_identity_comes_from_base() {
        let a = unit("A", "Sentence one.", "https://a.example/1");
        let b = unit("B", "Sentence two.", "https://b.example/2");
        let merged = merge_units(&[a.clone(), b]);
        assert_eq!(merged.id, a.id);
        assert_eq!(merged.fingerprint, a.fingerprint);
        assert_eq!(merged.title, "A");
    }

    #[test]
    fn test_content_is_sentence_union() {
        let a = unit("T", "The deal closed. Terms were not disclosed.", "https://a.example/1");
        let b = unit(
            "T2",
            "The deal closed. The price was 2 billion dollars.",
            "https://b.example/2",
        );
        let merged = merge_units(&[a, b]);
        assert_eq!(
            merged.content,
            "The deal closed. Terms were not disclosed. The price was 2 billion dollars."
        );
    }

    #[test]
    fn test_score_aggregation_rules() {
        let mut a = unit("A", "One.", "https://a.example/1");
        a.information_gain = 8.0;
        a.actionability = 6.0;
        a.scarcity = 10.0;
        a.impact_magnitude = 4.0;
        let mut b = unit("B", "Two.", "https://b.example/2");
        b.information_gain = 4.0;
        b.actionability = 8.0;
        b.scarcity = 5.0;
        b.impact_magnitude = 9.0;

        let merged = merge_units(&[a, b]);
        // Scarcity-weighted means
        let expected_gain = (8.0 * 10.0 + 4.0 * 5.0) / 15.0;
        let expected_action = (6.0 * 10.0 + 8.0 * 5.0) / 15.0;
        assert!((merged.information_gain - expected_gain).abs() < 1e-9);
        assert!((merged.actionability - expected_action).abs() < 1e-9);
        // Max rules
        assert!((merged.scarcity - 10.0).abs() < 1e-9);
        assert!((merged.impact_magnitude - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_merged_count_is_unique_source_count() {
        let mut a = unit("A", "One.", "https://a.example/1");
        a.merged_count = 7; // stale prior count must not be summed
        let b = unit("B", "Two.", "https://b.example/2");
        let c = unit("C", "Three.", "https://a.example/1"); // duplicate URL

        let merged = merge_units(&[a, b, c]);
        assert_eq!(merged.sources.len(), 2);
        assert_eq!(merged.merged_count, 2);
    }

    #[test]
    fn test_insights_and_tags_union() {
        let mut a = unit("A", "One.", "https://a.example/1");
        a.key_insights = vec!["x".to_string(), "y".to_string()];
        a.tags = vec!["ai".to_string()];
        let mut b = unit("B", "Two.", "https://b.example/2");
        b.key_insights = vec!["Y".to_string(), "z".to_string()];
        b.tags = vec!["AI".to_string(), "chips".to_string()];

        let merged = merge_units(&[a, b]);
        assert_eq!(merged.key_insights, vec!["x", "y", "z"]);
        assert_eq!(merged.tags, vec!["ai", "chips"]);
    }

    #[test]
    fn test_merge_is_idempotent_on_sources() {
        let a = unit("A", "One.", "https://a.example/1");
        let b = unit("B", "Two.", "https://b.example/2");
        let first = merge_units(&[a, b.clone()]);
        let second = merge_units(&[first.clone(), b]);
        assert_eq!(second.merged_count, first.merged_count);
        assert_eq!(second.sources.len(), 2);
    }

    #[test]
    fn test_sentence_split() {
        let sentences = split_sentences("One. Two! Three? Four");
        assert_eq!(sentences, vec!["One.", "Two!", "Three?", "Four"]);
    }
}
