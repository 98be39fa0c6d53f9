//! Core data models
//!
//! Articles are the fetch-side unit; information units are the
//! analysis-side unit; entities form the knowledge graph; digests are the
//! delivery-side product.

mod article;
mod digest;
mod entity;
mod information;
mod telemetry;

pub use article::{AnalysisMode, Article, EnrichedArticle};
pub use digest::{Digest, DigestItem, DigestTotals, DigestTrend};
pub use entity::{
    Entity, EntityAlias, EntityMention, EntityRelation, EntityType, ExtractedEntity,
    ExtractedRelation, RelationType,
};
pub use information::{
    normalize_for_fingerprint, normalize_score, resolve_root_category, unit_fingerprint, unit_id,
    validate_state_change_type, EntityAnchor, InformationType, InformationUnit, SourceReference,
    DEFAULT_ROOT_CATEGORIES, HEX_STATE_TYPES, OTHER_ROOT,
};
pub use telemetry::{AiCallRecord, ChatMessage, TelemetryAggregate, TokenUsage};
