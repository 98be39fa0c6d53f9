//! Entity knowledge-graph store
//!
//! Three tiers: canonical entities, case-folded aliases, and per-unit
//! mentions, plus typed relations keyed by the unique
//! (source, target, type) triple. `process_extracted` is the single write
//! path used by the extraction pipeline and the backfill sweep; applying it
//! twice with the same input changes nothing.

use super::db::Database;
use crate::error::Result;
use crate::models::{
    Entity, EntityMention, EntityRelation, EntityType, ExtractedEntity, ExtractedRelation,
    RelationType,
};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;

/// A hot entity with its mention trend against the prior window
#[derive(Debug, Clone, serde::Serialize)]
pub struct HotEntity {
    pub entity: Entity,
    pub recent_count: i64,
    pub previous_count: i64,
    /// up / down / stable / new
    pub trend: String,
    pub change_pct: f64,
}

/// One row of an entity timeline
#[derive(Debug, Clone, serde::Serialize)]
pub struct TimelineEntry {
    pub mention_id: String,
    pub unit_id: String,
    pub unit_title: String,
    pub unit_summary: String,
    pub state_dimension: String,
    pub state_delta: String,
    pub event_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// BFS ego-network around an entity
#[derive(Debug, Clone, serde::Serialize)]
pub struct EntityNetwork {
    pub center: Entity,
    pub entities: Vec<Entity>,
    pub relations: Vec<EntityRelation>,
}

#[derive(Clone)]
pub struct EntityStore {
    db: Database,
}

impl EntityStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // ==================== entities & aliases ====================

    pub fn get(&self, entity_id: &str) -> Result<Option<Entity>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM entities WHERE id = ?1",
                params![entity_id],
                row_to_entity,
            )
            .optional()
        })
    }

    /// Resolve a name through the alias table: case-folded, trimmed,
    /// exact match. Idempotent by construction.
    pub fn resolve_alias(&self, name: &str) -> Result<Option<String>> {
        let normalized = normalize_alias(name);
        if normalized.is_empty() {
            return Ok(None);
        }
        self.db.with_conn(|conn| resolve_alias_tx(conn, &normalized))
    }

    pub fn get_by_name(&self, name: &str) -> Result<Option<Entity>> {
        match self.resolve_alias(name)? {
            Some(id) => self.get(&id),
            None => Ok(None),
        }
    }

    pub fn aliases_of(&self, entity_id: &str) -> Result<Vec<String>> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT alias FROM entity_aliases WHERE entity_id = ?1")?;
            let rows = stmt.query_map(params![entity_id], |row| row.get(0))?;
            rows.collect()
        })
    }

    // ==================== the extraction write path ====================

    /// Process one unit's extracted entities and relations atomically:
    /// resolve-or-create each entity, register aliases, record the mention
    /// (unique per entity+unit, last write wins for its attributes), then
    /// upsert relations with evidence union and max strength/confidence.
    ///
    /// Returns the extracted-name → entity-id map.
    pub fn process_extracted(
        &self,
        unit_id: &str,
        entities: &[ExtractedEntity],
        relations: &[ExtractedRelation],
        event_time: Option<DateTime<Utc>>,
    ) -> Result<HashMap<String, String>> {
        self.db.with_tx(|tx| {
            let mut id_map: HashMap<String, String> = HashMap::new();
            let seeded = event_time.unwrap_or_else(Utc::now);

            for extracted in entities {
                let name = extracted.name.trim();
                if name.is_empty() {
                    continue;
                }

                let entity_id = match resolve_alias_tx(tx, &normalize_alias(name))? {
                    Some(id) => id,
                    None => {
                        let entity_type = EntityType::parse(&extracted.r#type);
                        let entity = Entity::new(name, entity_type);
                        tx.execute(
                            "INSERT INTO entities
                             (id, canonical_name, type, l3_root, l2_sector, attributes,
                              mention_count, first_mentioned, last_mentioned, created_at)
                             VALUES (?1, ?2, ?3, '', '', '{}', 0, ?4, ?4, ?5)",
                            params![
                                entity.id,
                                entity.canonical_name,
                                entity_type.as_str(),
                                seeded.to_rfc3339(),
                                entity.created_at.to_rfc3339(),
                            ],
                        )?;
                        // The extracted name becomes the primary alias;
                        // declared aliases follow as secondary.
                        add_alias_tx(tx, name, &entity.id, true)?;
                        for alias in &extracted.aliases {
                            add_alias_tx(tx, alias, &entity.id, false)?;
                        }
                        entity.id
                    }
                };
                id_map.insert(name.to_string(), entity_id.clone());

                let (dimension, delta) = extracted
                    .state_change
                    .as_ref()
                    .map(|sc| {
                        let get = |k: &str| {
                            sc.get(k)
                                .and_then(|v| v.as_str())
                                .unwrap_or_default()
                                .to_string()
                        };
                        (get("dimension"), get("delta"))
                    })
                    .unwrap_or_default();

                let mut mention = EntityMention::new(&entity_id, unit_id);
                if !extracted.role.trim().is_empty() {
                    mention.role = extracted.role.trim().to_string();
                }
                mention.state_dimension = dimension;
                mention.state_delta = delta;
                mention.event_time = event_time;
                record_mention_tx(tx, &mention)?;
            }

            for relation in relations {
                let Some(relation_type) = RelationType::parse(&relation.relation) else {
                    continue;
                };
                let source_id = match lookup_or_map(tx, &id_map, &relation.source)? {
                    Some(id) => id,
                    None => continue,
                };
                let target_id = match lookup_or_map(tx, &id_map, &relation.target)? {
                    Some(id) => id,
                    None => continue,
                };
                let mut edge = EntityRelation::new(source_id, target_id, relation_type);
                edge.evidence_unit_ids = vec![unit_id.to_string()];
                upsert_relation_tx(tx, &edge)?;
            }

            Ok(id_map)
        })
    }

    /// Upsert a relation on its unique triple: evidence lists are unioned,
    /// strength/confidence take the max of existing vs new.
    pub fn upsert_relation(&self, relation: &EntityRelation) -> Result<()> {
        self.db.with_tx(|tx| upsert_relation_tx(tx, relation))
    }

    pub fn relations_of(&self, entity_id: &str) -> Result<Vec<EntityRelation>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM entity_relations WHERE source_id = ?1 OR target_id = ?1",
            )?;
            let rows = stmt.query_map(params![entity_id], row_to_relation)?;
            rows.collect()
        })
    }

    pub fn mentions_of_unit(&self, unit_id: &str) -> Result<Vec<EntityMention>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM entity_mentions WHERE unit_id = ?1")?;
            let rows = stmt.query_map(params![unit_id], row_to_mention)?;
            rows.collect()
        })
    }

    // ==================== advanced reads ====================

    /// Top entities by mention count in the window, with a trend computed
    /// against the prior equal-length window.
    pub fn get_hot_entities(&self, days: i64, limit: usize) -> Result<Vec<HotEntity>> {
        let now = Utc::now();
        let recent_start = (now - Duration::days(days)).to_rfc3339();
        let previous_start = (now - Duration::days(days * 2)).to_rfc3339();

        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT e.id, COUNT(m.id) AS recent_count
                 FROM entities e
                 JOIN entity_mentions m ON e.id = m.entity_id
                 WHERE m.created_at >= ?1
                 GROUP BY e.id
                 ORDER BY recent_count DESC
                 LIMIT ?2",
            )?;
            let heads: Vec<(String, i64)> = stmt
                .query_map(params![recent_start, limit as i64], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<rusqlite::Result<_>>()?;

            let mut hot = Vec::with_capacity(heads.len());
            for (entity_id, recent_count) in heads {
                let previous_count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM entity_mentions
                     WHERE entity_id = ?1 AND created_at >= ?2 AND created_at < ?3",
                    params![entity_id, previous_start, recent_start],
                    |r| r.get(0),
                )?;

                let (trend, change_pct) = if previous_count == 0 {
                    if recent_count > 0 {
                        ("new".to_string(), 100.0)
                    } else {
                        ("stable".to_string(), 0.0)
                    }
                } else {
                    let pct =
                        ((recent_count - previous_count) as f64 / previous_count as f64) * 100.0;
                    let trend = if pct > 20.0 {
                        "up"
                    } else if pct < -20.0 {
                        "down"
                    } else {
                        "stable"
                    };
                    (trend.to_string(), (pct * 10.0).round() / 10.0)
                };

                let entity = conn.query_row(
                    "SELECT * FROM entities WHERE id = ?1",
                    params![entity_id],
                    row_to_entity,
                )?;
                hot.push(HotEntity {
                    entity,
                    recent_count,
                    previous_count,
                    trend,
                    change_pct,
                });
            }
            Ok(hot)
        })
    }

    /// Chronologically ordered mentions of an entity, optionally filtered
    /// by window and state dimensions.
    pub fn get_entity_timeline(
        &self,
        entity_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        dimensions: &[String],
        limit: usize,
    ) -> Result<Vec<TimelineEntry>> {
        self.db.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT m.id, m.unit_id, m.state_dimension, m.state_delta, m.event_time,
                        m.created_at, u.title, u.summary
                 FROM entity_mentions m
                 JOIN information_units u ON m.unit_id = u.id
                 WHERE m.entity_id = ?1",
            );
            let mut args: Vec<Box<dyn rusqlite::ToSql>> =
                vec![Box::new(entity_id.to_string())];

            if let Some(start) = start {
                sql.push_str(&format!(" AND m.event_time >= ?{}", args.len() + 1));
                args.push(Box::new(start.to_rfc3339()));
            }
            if let Some(end) = end {
                sql.push_str(&format!(" AND m.event_time <= ?{}", args.len() + 1));
                args.push(Box::new(end.to_rfc3339()));
            }
            if !dimensions.is_empty() {
                let placeholders = (0..dimensions.len())
                    .map(|i| format!("?{}", args.len() + 1 + i))
                    .collect::<Vec<_>>()
                    .join(",");
                sql.push_str(&format!(" AND m.state_dimension IN ({})", placeholders));
                for dim in dimensions {
                    args.push(Box::new(dim.clone()));
                }
            }
            sql.push_str(&format!(
                " ORDER BY COALESCE(m.event_time, m.created_at) DESC LIMIT ?{}",
                args.len() + 1
            ));
            args.push(Box::new(limit as i64));

            let mut stmt = conn.prepare(&sql)?;
            let params_ref: Vec<&dyn rusqlite::ToSql> =
                args.iter().map(|b| b.as_ref()).collect();
            let rows = stmt.query_map(params_ref.as_slice(), |row| {
                Ok(TimelineEntry {
                    mention_id: row.get(0)?,
                    unit_id: row.get(1)?,
                    state_dimension: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    state_delta: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    event_time: parse_time(row.get(4)?),
                    created_at: parse_time(row.get(5)?).unwrap_or_else(Utc::now),
                    unit_title: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                    unit_summary: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
                })
            })?;
            rows.collect()
        })
    }

    /// BFS ego-network to `depth` hops over the relation edges.
    pub fn get_entity_network(&self, entity_id: &str, depth: usize) -> Result<EntityNetwork> {
        let center = self
            .get(entity_id)?
            .ok_or_else(|| crate::Error::Storage(format!("entity {} not found", entity_id)))?;

        let mut visited: std::collections::HashSet<String> =
            std::collections::HashSet::from([entity_id.to_string()]);
        let mut frontier = vec![entity_id.to_string()];
        let mut relations: Vec<EntityRelation> = Vec::new();
        let mut seen_edges: std::collections::HashSet<(String, String, String)> =
            std::collections::HashSet::new();

        for _ in 0..depth.max(1) {
            let mut next_frontier = Vec::new();
            for id in &frontier {
                for relation in self.relations_of(id)? {
                    let key = (
                        relation.source_id.clone(),
                        relation.target_id.clone(),
                        relation.relation_type.as_str().to_string(),
                    );
                    if seen_edges.insert(key) {
                        for neighbor in [&relation.source_id, &relation.target_id] {
                            if visited.insert(neighbor.clone()) {
                                next_frontier.push(neighbor.clone());
                            }
                        }
                        relations.push(relation);
                    }
                }
            }
            if next_frontier.is_empty() {
                break;
            }
            frontier = next_frontier;
        }

        let mut entities = Vec::new();
        for id in visited {
            if id != entity_id {
                if let Some(entity) = self.get(&id)? {
                    entities.push(entity);
                }
            }
        }

        Ok(EntityNetwork {
            center,
            entities,
            relations,
        })
    }

    pub fn stats(&self) -> Result<HashMap<String, i64>> {
        self.db.with_conn(|conn| {
            let mut stats = HashMap::new();
            for (key, table) in [
                ("entities", "entities"),
                ("aliases", "entity_aliases"),
                ("mentions", "entity_mentions"),
                ("relations", "entity_relations"),
            ] {
                let count: i64 = conn.query_row(
                    &format!("SELECT COUNT(*) FROM {}", table),
                    [],
                    |r| r.get(0),
                )?;
                stats.insert(key.to_string(), count);
            }
            Ok(stats)
        })
    }
}

// ==================== transaction helpers ====================

fn normalize_alias(name: &str) -> String {
    name.trim().to_lowercase()
}

fn resolve_alias_tx(conn: &Connection, normalized: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT entity_id FROM entity_aliases WHERE alias = ?1",
        params![normalized],
        |row| row.get(0),
    )
    .optional()
}

fn add_alias_tx(
    conn: &Connection,
    alias: &str,
    entity_id: &str,
    is_primary: bool,
) -> rusqlite::Result<()> {
    let normalized = normalize_alias(alias);
    if normalized.is_empty() {
        return Ok(());
    }
    // First writer wins: an alias already pointing elsewhere is left alone
    conn.execute(
        "INSERT OR IGNORE INTO entity_aliases (alias, entity_id, is_primary, source, created_at)
         VALUES (?1, ?2, ?3, 'ai', ?4)",
        params![
            normalized,
            entity_id,
            is_primary as i64,
            Utc::now().to_rfc3339()
        ],
    )?;
    Ok(())
}

/// Insert a mention, unique per (entity, unit). A fresh mention bumps the
/// entity's mention_count and advances last_mentioned to
/// max(existing, event_time); a duplicate only refreshes the mention's own
/// attributes (last write wins) and never double-increments.
fn record_mention_tx(conn: &Connection, mention: &EntityMention) -> rusqlite::Result<()> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO entity_mentions
         (id, entity_id, unit_id, role, sentiment, state_dimension, state_delta,
          event_time, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            mention.id,
            mention.entity_id,
            mention.unit_id,
            mention.role,
            mention.sentiment,
            mention.state_dimension,
            mention.state_delta,
            mention.event_time.map(|t| t.to_rfc3339()),
            mention.created_at.to_rfc3339(),
        ],
    )?;

    if inserted == 1 {
        let observed = mention.event_time.unwrap_or_else(Utc::now).to_rfc3339();
        conn.execute(
            "UPDATE entities SET
                mention_count = mention_count + 1,
                last_mentioned = MAX(COALESCE(last_mentioned, ?2), ?2),
                first_mentioned = COALESCE(first_mentioned, ?2)
             WHERE id = ?1",
            params![mention.entity_id, observed],
        )?;
    } else {
        conn.execute(
            "UPDATE entity_mentions SET
                role = ?3, sentiment = ?4, state_dimension = ?5, state_delta = ?6,
                event_time = ?7
             WHERE entity_id = ?1 AND unit_id = ?2",
            params![
                mention.entity_id,
                mention.unit_id,
                mention.role,
                mention.sentiment,
                mention.state_dimension,
                mention.state_delta,
                mention.event_time.map(|t| t.to_rfc3339()),
            ],
        )?;
    }
    Ok(())
}

fn upsert_relation_tx(conn: &Connection, relation: &EntityRelation) -> rusqlite::Result<()> {
    let existing: Option<(String, f64, f64)> = conn
        .query_row(
            "SELECT evidence_unit_ids, strength, confidence FROM entity_relations
             WHERE source_id = ?1 AND target_id = ?2 AND relation_type = ?3",
            params![
                relation.source_id,
                relation.target_id,
                relation.relation_type.as_str()
            ],
            |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    row.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
                    row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                ))
            },
        )
        .optional()?;

    match existing {
        Some((evidence_json, strength, confidence)) => {
            let mut evidence: Vec<String> =
                serde_json::from_str(&evidence_json).unwrap_or_default();
            for unit_id in &relation.evidence_unit_ids {
                if !evidence.contains(unit_id) {
                    evidence.push(unit_id.clone());
                }
            }
            conn.execute(
                "UPDATE entity_relations SET
                    evidence_unit_ids = ?4,
                    strength = ?5,
                    confidence = ?6
                 WHERE source_id = ?1 AND target_id = ?2 AND relation_type = ?3",
                params![
                    relation.source_id,
                    relation.target_id,
                    relation.relation_type.as_str(),
                    serde_json::to_string(&evidence).unwrap_or_default(),
                    strength.max(relation.strength),
                    confidence.max(relation.confidence),
                ],
            )?;
        }
        None => {
            conn.execute(
                "INSERT OR IGNORE INTO entity_relations
                 (id, source_id, target_id, relation_type, strength, confidence,
                  evidence_unit_ids, valid_from, valid_to, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    relation.id,
                    relation.source_id,
                    relation.target_id,
                    relation.relation_type.as_str(),
                    relation.strength,
                    relation.confidence,
                    serde_json::to_string(&relation.evidence_unit_ids).unwrap_or_default(),
                    relation.valid_from.map(|t| t.to_rfc3339()),
                    relation.valid_to.map(|t| t.to_rfc3339()),
                    relation.created_at.to_rfc3339(),
                ],
            )?;
        }
    }
    Ok(())
}

fn lookup_or_map(
    conn: &Connection,
    id_map: &HashMap<String, String>,
    name: &str,
) -> rusqlite::Result<Option<String>> {
    if let Some(id) = id_map.get(name.trim()) {
        return Ok(Some(id.clone()));
    }
    resolve_alias_tx(conn, &normalize_alias(name))
}

// ==================== row mappers ====================

fn parse_time(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn row_to_entity(row: &Row<'_>) -> rusqlite::Result<Entity> {
    Ok(Entity {
        id: row.get("id")?,
        canonical_name: row.get("canonical_name")?,
        r#type: EntityType::parse(&row.get::<_, String>("type")?),
        l3_root: row.get::<_, Option<String>>("l3_root")?.unwrap_or_default(),
        l2_sector: row
            .get::<_, Option<String>>("l2_sector")?
            .unwrap_or_default(),
        attributes: row
            .get::<_, Option<String>>("attributes")?
            .and_then(|a| serde_json::from_str(&a).ok())
            .unwrap_or_default(),
        mention_count: row.get::<_, Option<i64>>("mention_count")?.unwrap_or(0),
        first_mentioned: parse_time(row.get("first_mentioned")?),
        last_mentioned: parse_time(row.get("last_mentioned")?),
        created_at: parse_time(row.get("created_at")?).unwrap_or_else(Utc::now),
    })
}

fn row_to_mention(row: &Row<'_>) -> rusqlite::Result<EntityMention> {
    Ok(EntityMention {
        id: row.get("id")?,
        entity_id: row.get("entity_id")?,
        unit_id: row.get("unit_id")?,
        role: row
            .get::<_, Option<String>>("role")?
            .unwrap_or_else(|| "protagonist".to_string()),
        sentiment: row
            .get::<_, Option<String>>("sentiment")?
            .unwrap_or_else(|| "neutral".to_string()),
        state_dimension: row
            .get::<_, Option<String>>("state_dimension")?
            .unwrap_or_default(),
        state_delta: row
            .get::<_, Option<String>>("state_delta")?
            .unwrap_or_default(),
        event_time: parse_time(row.get("event_time")?),
        created_at: parse_time(row.get("created_at")?).unwrap_or_else(Utc::now),
    })
}

fn row_to_relation(row: &Row<'_>) -> rusqlite::Result<EntityRelation> {
    Ok(EntityRelation {
        id: row.get("id")?,
        source_id: row.get("source_id")?,
        target_id: row.get("target_id")?,
        relation_type: RelationType::parse(&row.get::<_, String>("relation_type")?)
            .unwrap_or(RelationType::Peer),
        strength: row.get::<_, Option<f64>>("strength")?.unwrap_or(1.0),
        confidence: row.get::<_, Option<f64>>("confidence")?.unwrap_or(0.8),
        evidence_unit_ids: row
            .get::<_, Option<String>>("evidence_unit_ids")?
            .and_then(|e| serde_json::from_str(&e).ok())
            .unwrap_or_default(),
        valid_from: parse_time(row.get("valid_from")?),
        valid_to: parse_time(row.get("valid_to")?),
        created_at: parse_time(row.get("created_at")?).unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> EntityStore {
        EntityStore::new(Database::open_in_memory().unwrap())
    }

    fn extracted(name: &str) -> ExtractedEntity {
        ExtractedEntity {
            name: name.to_string(),
            aliases: Vec::new(),
            r#type: "COMPANY".to_string(),
            role: "protagonist".to_string(),
            state_change: None,
        }
    }

    #[test]
    fn test_process_extracted_creates_and_resolves() {
        let store = store();
        let map = store
            .process_extracted("iu_1", &[extracted("NVIDIA")], &[], None)
            .unwrap();
        let id = map.get("NVIDIA").unwrap().clone();

        // Alias resolution is case-insensitive and trimmed
        assert_eq!(store.resolve_alias("  nvidia ").unwrap(), Some(id.clone()));
        let entity = store.get(&id).unwrap().unwrap();
        assert_eq!(entity.canonical_name, "NVIDIA");
        assert_eq!(entity.mention_count, 1);
        assert!(entity.first_mentioned.is_some());
    }

    #[test]
    fn test_process_extracted_is_idempotent() {
        let store = store();
        let mut entity = extracted("OpenAI");
        entity.aliases = vec!["Open AI".to_string()];
        let relations = vec![ExtractedRelation {
            source: "OpenAI".to_string(),
            target: "Anthropic".to_string(),
            relation: "competitor".to_string(),
            evidence: "they compete".to_string(),
        }];
        let all = [entity, extracted("Anthropic")];

        store
            .process_extracted("iu_1", &all, &relations, None)
            .unwrap();
        let before = store.stats().unwrap();

        store
            .process_extracted("iu_1", &all, &relations, None)
            .unwrap();
        let after = store.stats().unwrap();

        assert_eq!(before, after);
        let openai = store.get_by_name("OpenAI").unwrap().unwrap();
        assert_eq!(openai.mention_count, 1);
    }

    #[test]
    fn test_mention_count_increments_per_unit() {
        let store = store();
        store
            .process_extracted("iu_1", &[extracted("NVIDIA")], &[], None)
            .unwrap();
        store
            .process_extracted("iu_2", &[extracted("nvidia")], &[], None)
            .unwrap();

        let entity = store.get_by_name("NVIDIA").unwrap().unwrap();
        assert_eq!(entity.mention_count, 2);
        // Resolution reused the first entity
        assert_eq!(store.stats().unwrap()["entities"], 1);
    }

    #[test]
    fn test_last_mentioned_never_moves_backwards() {
        let store = store();
        let recent = Utc::now();
        let older = recent - Duration::days(30);

        store
            .process_extracted("iu_1", &[extracted("NVIDIA")], &[], Some(recent))
            .unwrap();
        store
            .process_extracted("iu_2", &[extracted("NVIDIA")], &[], Some(older))
            .unwrap();

        let entity = store.get_by_name("NVIDIA").unwrap().unwrap();
        let last = entity.last_mentioned.unwrap();
        assert!((last - recent).num_seconds().abs() < 2);
    }

    #[test]
    fn test_relation_upsert_unions_evidence_and_maxes_scores() {
        let store = store();
        store
            .process_extracted("iu_x", &[extracted("A"), extracted("B")], &[], None)
            .unwrap();
        let a = store.resolve_alias("A").unwrap().unwrap();
        let b = store.resolve_alias("B").unwrap().unwrap();

        let mut first = EntityRelation::new(&a, &b, RelationType::Competitor);
        first.strength = 0.4;
        first.confidence = 0.9;
        first.evidence_unit_ids = vec!["iu_1".to_string()];
        store.upsert_relation(&first).unwrap();

        let mut second = EntityRelation::new(&a, &b, RelationType::Competitor);
        second.strength = 0.8;
        second.confidence = 0.5;
        second.evidence_unit_ids = vec!["iu_1".to_string(), "iu_2".to_string()];
        store.upsert_relation(&second).unwrap();

        let relations = store.relations_of(&a).unwrap();
        assert_eq!(relations.len(), 1);
        let merged = &relations[0];
        assert_eq!(merged.evidence_unit_ids, vec!["iu_1", "iu_2"]);
        assert!((merged.strength - 0.8).abs() < 1e-9);
        assert!((merged.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_relation_type_is_dropped() {
        let store = store();
        let relations = vec![ExtractedRelation {
            source: "A".to_string(),
            target: "B".to_string(),
            relation: "nemesis_of".to_string(),
            evidence: String::new(),
        }];
        store
            .process_extracted("iu_1", &[extracted("A"), extracted("B")], &relations, None)
            .unwrap();
        assert_eq!(store.stats().unwrap()["relations"], 0);
    }

    #[test]
    fn test_hot_entities_trend() {
        let store = store();
        // Three fresh mentions for A, one for B
        store
            .process_extracted("iu_1", &[extracted("A")], &[], None)
            .unwrap();
        store
            .process_extracted("iu_2", &[extracted("A")], &[], None)
            .unwrap();
        store
            .process_extracted("iu_3", &[extracted("A"), extracted("B")], &[], None)
            .unwrap();

        let hot = store.get_hot_entities(7, 10).unwrap();
        assert_eq!(hot.len(), 2);
        assert_eq!(hot[0].entity.canonical_name, "A");
        assert_eq!(hot[0].recent_count, 3);
        // Nothing in the prior window, so everything trends "new"
        assert_eq!(hot[0].trend, "new");
    }

    #[test]
    fn test_ego_network_bfs_depth() {
        let store = store();
        store
            .process_extracted(
                "iu_1",
                &[extracted("A"), extracted("B"), extracted("C")],
                &[
                    ExtractedRelation {
                        source: "A".to_string(),
                        target: "B".to_string(),
                        relation: "partner".to_string(),
                        evidence: String::new(),
                    },
                    ExtractedRelation {
                        source: "B".to_string(),
                        target: "C".to_string(),
                        relation: "supplier".to_string(),
                        evidence: String::new(),
                    },
                ],
                None,
            )
            .unwrap();
        let a = store.resolve_alias("A").unwrap().unwrap();

        let shallow = store.get_entity_network(&a, 1).unwrap();
        assert_eq!(shallow.relations.len(), 1);
        assert_eq!(shallow.entities.len(), 1);

        let deep = store.get_entity_network(&a, 2).unwrap();
        assert_eq!(deep.relations.len(), 2);
        assert_eq!(deep.entities.len(), 2);
    }

    #[test]
    fn test_cyclic_relations_terminate() {
        let store = store();
        store
            .process_extracted(
                "iu_1",
                &[extracted("A"), extracted("B")],
                &[
                    ExtractedRelation {
                        source: "A".to_string(),
                        target: "B".to_string(),
                        relation: "competitor".to_string(),
                        evidence: String::new(),
                    },
                    ExtractedRelation {
                        source: "B".to_string(),
                        target: "A".to_string(),
                        relation: "competitor".to_string(),
                        evidence: String::new(),
                    },
                ],
                None,
            )
            .unwrap();
        let a = store.resolve_alias("A").unwrap().unwrap();
        let network = store.get_entity_network(&a, 5).unwrap();
        assert_eq!(network.relations.len(), 2);
        assert_eq!(network.entities.len(), 1);
    }
}
