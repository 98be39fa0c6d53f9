//! Shared database handle

use crate::error::Result;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;

/// Cloneable handle over a single SQLite connection.
///
/// Store methods take the lock for the duration of one logical operation,
/// which makes multi-statement writes (unit + sources, relation
/// read-merge-write) atomic with respect to other stores on the same
/// handle.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        // WAL + perf; ignored quietly where unsupported (e.g. in-memory)
        let _ = conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            "#,
        );

        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        Ok(f(&conn)?)
    }

    /// Run `f` inside a transaction; rolled back on error.
    pub fn with_tx<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS articles (
    url TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    content TEXT,
    summary TEXT,
    source TEXT,
    category TEXT,
    author TEXT,
    published_at TEXT,
    fetched_at TEXT NOT NULL,
    overall_score REAL,
    ai_summary TEXT,
    is_top_pick INTEGER DEFAULT 0,
    reasoning TEXT,
    tags TEXT,
    analyzed_at TEXT,
    sent_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_articles_fetched_at ON articles(fetched_at);
CREATE INDEX IF NOT EXISTS idx_articles_sent_at ON articles(sent_at);

CREATE TABLE IF NOT EXISTS information_units (
    id TEXT PRIMARY KEY,
    fingerprint TEXT UNIQUE NOT NULL,
    type TEXT NOT NULL,
    title TEXT NOT NULL,
    content TEXT,
    summary TEXT,
    event_time TEXT,
    report_time TEXT,
    time_sensitivity TEXT DEFAULT 'normal',
    analysis_content TEXT,
    key_insights TEXT,
    information_gain REAL DEFAULT 5.0,
    actionability REAL DEFAULT 5.0,
    scarcity REAL DEFAULT 5.0,
    impact_magnitude REAL DEFAULT 5.0,
    state_change_type TEXT DEFAULT '',
    state_change_subtypes TEXT,
    entity_hierarchy TEXT,
    who TEXT,
    what TEXT,
    when_time TEXT,
    where_place TEXT,
    why TEXT,
    how TEXT,
    primary_source TEXT,
    extraction_confidence REAL DEFAULT 0,
    sentiment TEXT DEFAULT 'neutral',
    tags TEXT,
    extracted_entities TEXT,
    extracted_relations TEXT,
    merged_count INTEGER DEFAULT 1,
    is_sent INTEGER DEFAULT 0,
    entity_processed INTEGER DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_units_fingerprint ON information_units(fingerprint);
CREATE INDEX IF NOT EXISTS idx_units_created_at ON information_units(created_at);
CREATE INDEX IF NOT EXISTS idx_units_event_time ON information_units(event_time);
CREATE INDEX IF NOT EXISTS idx_units_is_sent ON information_units(is_sent);

CREATE TABLE IF NOT EXISTS source_references (
    unit_fingerprint TEXT NOT NULL,
    url TEXT NOT NULL,
    title TEXT,
    source_name TEXT,
    published_at TEXT,
    excerpt TEXT,
    credibility_tier TEXT,
    PRIMARY KEY (unit_fingerprint, url)
);

CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY,
    canonical_name TEXT NOT NULL,
    type TEXT NOT NULL,
    l3_root TEXT DEFAULT '',
    l2_sector TEXT DEFAULT '',
    attributes TEXT,
    mention_count INTEGER DEFAULT 0,
    first_mentioned TEXT,
    last_mentioned TEXT,
    created_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_entities_name_type
    ON entities(lower(canonical_name), type);

CREATE TABLE IF NOT EXISTS entity_aliases (
    alias TEXT PRIMARY KEY,
    entity_id TEXT NOT NULL,
    is_primary INTEGER DEFAULT 0,
    source TEXT DEFAULT 'ai',
    created_at TEXT NOT NULL,
    FOREIGN KEY(entity_id) REFERENCES entities(id)
);
CREATE INDEX IF NOT EXISTS idx_aliases_entity ON entity_aliases(entity_id);

CREATE TABLE IF NOT EXISTS entity_mentions (
    id TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    unit_id TEXT NOT NULL,
    role TEXT DEFAULT 'protagonist',
    sentiment TEXT DEFAULT 'neutral',
    state_dimension TEXT DEFAULT '',
    state_delta TEXT DEFAULT '',
    event_time TEXT,
    created_at TEXT NOT NULL,
    PRIMARY KEY (entity_id, unit_id),
    FOREIGN KEY(entity_id) REFERENCES entities(id)
);
CREATE INDEX IF NOT EXISTS idx_mentions_unit ON entity_mentions(unit_id);
CREATE INDEX IF NOT EXISTS idx_mentions_created ON entity_mentions(created_at);

CREATE TABLE IF NOT EXISTS entity_relations (
    id TEXT NOT NULL,
    source_id TEXT NOT NULL,
    target_id TEXT NOT NULL,
    relation_type TEXT NOT NULL,
    strength REAL DEFAULT 1.0,
    confidence REAL DEFAULT 0.8,
    evidence_unit_ids TEXT,
    valid_from TEXT,
    valid_to TEXT,
    created_at TEXT NOT NULL,
    PRIMARY KEY (source_id, target_id, relation_type),
    FOREIGN KEY(source_id) REFERENCES entities(id),
    FOREIGN KEY(target_id) REFERENCES entities(id)
);
CREATE INDEX IF NOT EXISTS idx_relations_target ON entity_relations(target_id);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_applies_cleanly() {
        let db = Database::open_in_memory().unwrap();
        // Idempotent: re-applying the schema must not fail
        db.with_conn(|conn| conn.execute_batch(SCHEMA)).unwrap();
    }

    #[test]
    fn test_canonical_name_unique_per_type_case_insensitive() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO entities (id, canonical_name, type, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params!["e1", "OpenAI", "COMPANY", "2026-01-01"],
            )
        })
        .unwrap();
        let dup = db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO entities (id, canonical_name, type, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params!["e2", "openai", "COMPANY", "2026-01-01"],
            )
        });
        assert!(dup.is_err());
        // Same name under a different type is allowed
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO entities (id, canonical_name, type, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params!["e3", "OpenAI", "PRODUCT", "2026-01-01"],
            )
        })
        .unwrap();
    }

    #[test]
    fn test_relation_triple_unique() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute_batch(
                "INSERT INTO entities (id, canonical_name, type, created_at)
                 VALUES ('a', 'A', 'COMPANY', '2026-01-01'), ('b', 'B', 'COMPANY', '2026-01-01');
                 INSERT INTO entity_relations (id, source_id, target_id, relation_type, created_at)
                 VALUES ('r1', 'a', 'b', 'competitor', '2026-01-01');",
            )
        })
        .unwrap();
        let dup = db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO entity_relations (id, source_id, target_id, relation_type, created_at)
                 VALUES ('r2', 'a', 'b', 'competitor', '2026-01-01')",
                [],
            )
        });
        assert!(dup.is_err());
    }
}
