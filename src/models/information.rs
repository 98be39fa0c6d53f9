//! Information unit models
//!
//! An information unit is the atomic assertion extracted from an article:
//! the unit of deduplication, merging, scoring, and curation. Its identity
//! is a content fingerprint over the normalized title and content.

use super::entity::{ExtractedEntity, ExtractedRelation};
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

/// Information unit type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InformationType {
    /// Announcements, statements, regulations
    Fact,
    /// Analysis, forecasts, commentary
    Opinion,
    /// Deals, launches, partnerships
    Event,
    /// Financials, market statistics
    Data,
}

impl InformationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InformationType::Fact => "fact",
            InformationType::Opinion => "opinion",
            InformationType::Event => "event",
            InformationType::Data => "data",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "opinion" => InformationType::Opinion,
            "event" => InformationType::Event,
            "data" => InformationType::Data,
            _ => InformationType::Fact,
        }
    }
}

/// The six-way HEX classification of the state change a unit asserts
pub const HEX_STATE_TYPES: [&str; 6] =
    ["TECH", "CAPITAL", "REGULATION", "ORG", "RISK", "SENTIMENT"];

/// Preset L3 root categories; unknown roots map to [`OTHER_ROOT`].
///
/// Externally overridable via `[filter] root_categories` in the config —
/// this slice is the single built-in source of truth.
pub const DEFAULT_ROOT_CATEGORIES: [&str; 18] = [
    "AI",
    "Semiconductors",
    "Consumer Electronics",
    "Cloud & Data Centers",
    "Software & Dev Tools",
    "Blockchain & Crypto",
    "Cybersecurity",
    "E-commerce & Retail",
    "Social Media",
    "Gaming & Entertainment",
    "Content & Streaming",
    "Finance & Banking",
    "Automotive & Mobility",
    "Energy & Environment",
    "Healthcare & Biotech",
    "Manufacturing & Industry",
    "Macroeconomics",
    "Geopolitics",
];

/// Fallback root category
pub const OTHER_ROOT: &str = "Other";

/// A source citation; equality and hashing are by URL only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceReference {
    pub url: String,
    pub title: String,
    pub source_name: String,
    pub published_at: Option<DateTime<Utc>>,
    pub excerpt: String,
    pub credibility_tier: String,
}

impl PartialEq for SourceReference {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for SourceReference {}

impl std::hash::Hash for SourceReference {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.url.hash(state);
    }
}

/// Three-tier entity anchor: L1 leaf name, L2 sector, L3 root category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityAnchor {
    pub l1_name: String,
    pub l1_role: String,
    pub l2_sector: String,
    pub l3_root: String,
    pub confidence: f64,
}

/// An atomic information unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InformationUnit {
    /// `"iu_" + fingerprint[..16]`
    pub id: String,
    /// md5 over the normalized title + content (identity)
    pub fingerprint: String,

    pub r#type: InformationType,
    pub title: String,
    pub content: String,
    pub summary: String,

    /// Event time as reported (may be relative, e.g. "next Tuesday")
    pub event_time: Option<String>,
    /// Publish time of the reporting article
    pub report_time: Option<DateTime<Utc>>,
    /// urgent / normal / evergreen
    pub time_sensitivity: String,

    pub analysis_content: String,
    pub key_insights: Vec<String>,

    // Four value dimensions, each clamped to [1, 10]
    pub information_gain: f64,
    pub actionability: f64,
    pub scarcity: f64,
    pub impact_magnitude: f64,

    /// HEX state classification, or empty when none applies
    pub state_change_type: String,
    pub state_change_subtypes: Vec<String>,
    pub entity_hierarchy: Vec<EntityAnchor>,

    // 5W1H
    pub who: Vec<String>,
    pub what: String,
    pub when: String,
    pub r#where: String,
    pub why: String,
    pub how: String,

    pub sources: Vec<SourceReference>,
    pub primary_source: String,
    pub extraction_confidence: f64,

    pub sentiment: String,
    pub tags: Vec<String>,

    /// Raw extracted entities/relations for the knowledge-graph write path
    pub extracted_entities: Vec<ExtractedEntity>,
    pub extracted_relations: Vec<ExtractedRelation>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Always equals the number of unique-by-URL sources
    pub merged_count: usize,
    pub is_sent: bool,
    /// Set once the knowledge-graph step has run (even with zero entities)
    pub entity_processed: bool,
}

impl InformationUnit {
    /// Aggregate value score in [0, 10] (derived, not stored):
    /// 0.30·gain + 0.25·actionability + 0.20·scarcity + 0.25·impact.
    pub fn value_score(&self) -> f64 {
        self.information_gain * 0.30
            + self.actionability * 0.25
            + self.scarcity * 0.20
            + self.impact_magnitude * 0.25
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Append a source unless one with the same URL is already present.
    pub fn merge_source(&mut self, source: SourceReference) {
        if !self.sources.iter().any(|s| s.url == source.url) {
            self.sources.push(source);
        }
        self.merged_count = self.sources.len();
    }

    /// Text used for semantic-similarity indexing:
    /// title + summary + first three key insights.
    pub fn similarity_text(&self) -> String {
        let insights = self
            .key_insights
            .iter()
            .take(3)
            .cloned()
            .collect::<Vec<_>>()
            .join(" ");
        format!("{} {} {}", self.title, self.summary, insights)
            .trim()
            .to_string()
    }
}

/// Normalization applied before fingerprinting: trim, lowercase, collapse
/// internal whitespace.
pub fn normalize_for_fingerprint(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Content fingerprint: md5 hex over the normalized title + content.
pub fn unit_fingerprint(title: &str, content: &str) -> String {
    let normalized = format!(
        "{}{}",
        normalize_for_fingerprint(title),
        normalize_for_fingerprint(content)
    );
    format!("{:x}", Md5::digest(normalized.as_bytes()))
}

/// Unit id derived from a fingerprint.
pub fn unit_id(fingerprint: &str) -> String {
    format!("iu_{}", &fingerprint[..16.min(fingerprint.len())])
}

/// Resolve a raw L3 root against the configured preset list: exact match,
/// then case-insensitive substring match in either direction, else "Other".
pub fn resolve_root_category(raw: &str, roots: &[String]) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return OTHER_ROOT.to_string();
    }
    let lower = trimmed.to_lowercase();
    for root in roots {
        if root.to_lowercase() == lower {
            return root.clone();
        }
    }
    for root in roots {
        let root_lower = root.to_lowercase();
        if root_lower.contains(&lower) || lower.contains(&root_lower) {
            return root.clone();
        }
    }
    OTHER_ROOT.to_string()
}

/// Normalize a raw value score: ratios in (0, 1] are rescaled ×10, then the
/// result is clamped to [1, 10]. Absent or non-finite values fall back to
/// the default.
pub fn normalize_score(raw: Option<f64>, default: f64) -> f64 {
    let mut score = match raw {
        Some(v) if v.is_finite() => v,
        _ => return default,
    };
    if score > 0.0 && score <= 1.0 {
        score *= 10.0;
    }
    score.clamp(1.0, 10.0)
}

/// Validate a HEX state-change type; anything outside the set maps to "".
pub fn validate_state_change_type(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();
    if HEX_STATE_TYPES.contains(&upper.as_str()) {
        upper
    } else {
        String::new()
    }
}
