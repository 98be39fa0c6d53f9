//! Entity knowledge-graph models
//!
//! Entities are nodes, relations are plain edges keyed by the unique
//! (source, target, type) triple, and mentions tie entities to information
//! units. Aliases are case-folded; canonical names are unique per type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Entity type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityType {
    #[serde(rename = "COMPANY")]
    Company,
    #[serde(rename = "PERSON")]
    Person,
    #[serde(rename = "PRODUCT")]
    Product,
    #[serde(rename = "ORG")]
    Org,
    #[serde(rename = "CONCEPT")]
    Concept,
    #[serde(rename = "LOCATION")]
    Location,
    #[serde(rename = "EVENT")]
    Event,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Company => "COMPANY",
            EntityType::Person => "PERSON",
            EntityType::Product => "PRODUCT",
            EntityType::Org => "ORG",
            EntityType::Concept => "CONCEPT",
            EntityType::Location => "LOCATION",
            EntityType::Event => "EVENT",
        }
    }

    /// Lenient parse; unknown types default to COMPANY, matching the
    /// extraction pipeline's bias toward corporate actors.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "PERSON" => EntityType::Person,
            "PRODUCT" => EntityType::Product,
            "ORG" => EntityType::Org,
            "CONCEPT" => EntityType::Concept,
            "LOCATION" => EntityType::Location,
            "EVENT" => EntityType::Event,
            _ => EntityType::Company,
        }
    }
}

/// Typed relation between two entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    // Hierarchy
    ParentOf,
    SubsidiaryOf,
    // Peers
    Competitor,
    Partner,
    Peer,
    // Dependencies
    Supplier,
    Customer,
    Investor,
    // People
    CeoOf,
    FounderOf,
    EmployeeOf,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::ParentOf => "parent_of",
            RelationType::SubsidiaryOf => "subsidiary_of",
            RelationType::Competitor => "competitor",
            RelationType::Partner => "partner",
            RelationType::Peer => "peer",
            RelationType::Supplier => "supplier",
            RelationType::Customer => "customer",
            RelationType::Investor => "investor",
            RelationType::CeoOf => "ceo_of",
            RelationType::FounderOf => "founder_of",
            RelationType::EmployeeOf => "employee_of",
        }
    }

    /// Strict parse; relations outside the set are dropped by the caller.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "parent_of" => Some(RelationType::ParentOf),
            "subsidiary_of" => Some(RelationType::SubsidiaryOf),
            "competitor" => Some(RelationType::Competitor),
            "partner" => Some(RelationType::Partner),
            "peer" => Some(RelationType::Peer),
            "supplier" => Some(RelationType::Supplier),
            "customer" => Some(RelationType::Customer),
            "investor" => Some(RelationType::Investor),
            "ceo_of" => Some(RelationType::CeoOf),
            "founder_of" => Some(RelationType::FounderOf),
            "employee_of" => Some(RelationType::EmployeeOf),
            _ => None,
        }
    }
}

/// A knowledge-graph node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub canonical_name: String,
    pub r#type: EntityType,
    pub l3_root: String,
    pub l2_sector: String,
    pub attributes: serde_json::Map<String, serde_json::Value>,
    pub mention_count: i64,
    pub first_mentioned: Option<DateTime<Utc>>,
    pub last_mentioned: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Entity {
    pub fn new(canonical_name: impl Into<String>, r#type: EntityType) -> Self {
        Self {
            id: format!("entity_{}", &Uuid::new_v4().simple().to_string()[..12]),
            canonical_name: canonical_name.into(),
            r#type,
            l3_root: String::new(),
            l2_sector: String::new(),
            attributes: serde_json::Map::new(),
            mention_count: 0,
            first_mentioned: None,
            last_mentioned: None,
            created_at: Utc::now(),
        }
    }
}

/// Alias row: a case-folded, trimmed name pointing at an entity.
/// At most one primary alias per entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityAlias {
    pub alias: String,
    pub entity_id: String,
    pub is_primary: bool,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

/// A mention ties an entity to an information unit; unique per
/// (entity, unit), duplicates collapse by last write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMention {
    pub id: String,
    pub entity_id: String,
    pub unit_id: String,
    /// protagonist / supporting / mentioned
    pub role: String,
    /// positive / neutral / negative
    pub sentiment: String,
    /// HEX dimension of the asserted state change
    pub state_dimension: String,
    pub state_delta: String,
    pub event_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl EntityMention {
    pub fn new(entity_id: impl Into<String>, unit_id: impl Into<String>) -> Self {
        Self {
            id: format!("mention_{}", &Uuid::new_v4().simple().to_string()[..12]),
            entity_id: entity_id.into(),
            unit_id: unit_id.into(),
            role: "protagonist".to_string(),
            sentiment: "neutral".to_string(),
            state_dimension: String::new(),
            state_delta: String::new(),
            event_time: None,
            created_at: Utc::now(),
        }
    }
}

/// A knowledge-graph edge; the (source, target, type) triple is unique.
/// Upserts union evidence and take the max of strength/confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRelation {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub relation_type: RelationType,
    pub strength: f64,
    pub confidence: f64,
    pub evidence_unit_ids: Vec<String>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl EntityRelation {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relation_type: RelationType,
    ) -> Self {
        Self {
            id: format!("rel_{}", &Uuid::new_v4().simple().to_string()[..12]),
            source_id: source_id.into(),
            target_id: target_id.into(),
            relation_type,
            strength: 1.0,
            confidence: 0.8,
            evidence_unit_ids: Vec::new(),
            valid_from: None,
            valid_to: None,
            created_at: Utc::now(),
        }
    }
}

/// Entity payload emitted by the extraction prompts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub r#type: String,
    #[serde(default)]
    pub role: String,
    /// `{ "dimension": "TECH", "delta": "..." }` when a state change applies
    #[serde(default)]
    pub state_change: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Relation payload emitted by the extraction prompts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedRelation {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub relation: String,
    #[serde(default)]
    pub evidence: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_parse_defaults_to_company() {
        assert_eq!(EntityType::parse("PERSON"), EntityType::Person);
        assert_eq!(EntityType::parse("person"), EntityType::Person);
        assert_eq!(EntityType::parse("ALIEN"), EntityType::Company);
    }

    #[test]
    fn test_relation_type_round_trip() {
        for raw in [
            "parent_of",
            "subsidiary_of",
            "competitor",
            "partner",
            "peer",
            "supplier",
            "customer",
            "investor",
            "ceo_of",
            "founder_of",
            "employee_of",
        ] {
            let parsed = RelationType::parse(raw).unwrap();
            assert_eq!(parsed.as_str(), raw);
        }
        assert!(RelationType::parse("nemesis_of").is_none());
    }

    #[test]
    fn test_id_prefixes() {
        let entity = Entity::new("OpenAI", EntityType::Company);
        assert!(entity.id.starts_with("entity_"));
        let mention = EntityMention::new(&entity.id, "iu_abc");
        assert!(mention.id.starts_with("mention_"));
        assert_eq!(mention.role, "protagonist");
        let relation = EntityRelation::new("a", "b", RelationType::Competitor);
        assert!(relation.id.starts_with("rel_"));
    }
}
