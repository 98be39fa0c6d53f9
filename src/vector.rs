//! Vector index for semantic retrieval
//!
//! The orchestrator treats this as opaque: any backend returning
//! `(id, score)` pairs in descending score order works, with cosine scores
//! in [-1, 1]. The bundled backend is a deduplication-quality heuristic,
//! not a search engine: 256-dimensional hashed features over word tokens
//! and character n-grams, cosine similarity, scanning only the 100 most
//! recently indexed rows to bound cost.

use crate::error::Result;
use async_trait::async_trait;
use md5::{Digest, Md5};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Arc;

/// Embedding dimensionality of the hashed-feature backend
pub const EMBEDDING_DIM: usize = 256;

/// How many most-recent rows a search scans
const SEARCH_SCAN_LIMIT: usize = 100;

/// A search hit
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub title: String,
    pub content: String,
    pub score: f64,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Pluggable embedding index
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Index (or re-index) a document.
    async fn add(
        &self,
        id: &str,
        title: &str,
        content: &str,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<()>;

    /// k-NN search; hits come back in descending score order.
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<VectorHit>>;

    /// Most recently indexed documents.
    async fn recent(&self, limit: usize) -> Result<Vec<VectorHit>>;

    /// Drop everything.
    async fn clear(&self) -> Result<()>;

    /// Number of indexed documents.
    async fn len(&self) -> Result<usize>;
}

/// SQLite-backed hashed-feature index
#[derive(Clone)]
pub struct HashedVectorIndex {
    conn: Arc<Mutex<Connection>>,
}

impl HashedVectorIndex {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS vectors (
                id TEXT PRIMARY KEY,
                title TEXT,
                content TEXT,
                embedding TEXT NOT NULL,
                metadata TEXT,
                added_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_vectors_added_at ON vectors(added_at);
            "#,
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl VectorIndex for HashedVectorIndex {
    async fn add(
        &self,
        id: &str,
        title: &str,
        content: &str,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<()> {
        let text = format!("{} {}", title, truncate(content, 2000));
        let embedding = serde_json::to_string(&compute_embedding(&text))?;
        let metadata = serde_json::to_string(&metadata.unwrap_or_default())?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO vectors (id, title, content, embedding, metadata, added_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                title,
                truncate(content, 2000),
                embedding,
                metadata,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<VectorHit>> {
        let query_embedding = compute_embedding(query);
        let rows: Vec<(String, String, String, String, String)> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(
                "SELECT id, title, content, embedding, metadata FROM vectors
                 ORDER BY added_at DESC
                 LIMIT ?1",
            )?;
            let mapped = stmt.query_map(params![SEARCH_SCAN_LIMIT as i64], |row| {
                Ok((
                    row.get(0)?,
                    row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    row.get(3)?,
                    row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                ))
            })?;
            mapped.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut hits: Vec<VectorHit> = rows
            .into_iter()
            .filter_map(|(id, title, content, embedding_json, metadata_json)| {
                let embedding: Vec<f64> = serde_json::from_str(&embedding_json).ok()?;
                let score = cosine_similarity(&query_embedding, &embedding);
                let metadata = serde_json::from_str(&metadata_json).unwrap_or_default();
                Some(VectorHit {
                    id,
                    title,
                    content,
                    score,
                    metadata,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<VectorHit>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, title, content, metadata FROM vectors
             ORDER BY added_at DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(VectorHit {
                id: row.get(0)?,
                title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                content: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                score: 0.0,
                metadata: row
                    .get::<_, Option<String>>(3)?
                    .and_then(|m| serde_json::from_str(&m).ok())
                    .unwrap_or_default(),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    async fn clear(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM vectors", [])?;
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM vectors", [], |r| r.get(0))?;
        Ok(count as usize)
    }
}

/// Hashed-feature embedding: word tokens (≤200), char 2-grams and 3-grams of
/// the first 500 chars; each feature hashes to an index (mod 256) and a
/// sign; the accumulated vector is L2-normalized.
pub fn compute_embedding(text: &str) -> Vec<f64> {
    let mut vector = vec![0.0f64; EMBEDDING_DIM];
    if text.trim().is_empty() {
        return vector;
    }

    let lower = text.to_lowercase();
    let mut features: Vec<&str> = lower.split_whitespace().take(200).collect();

    let prefix: String = lower.chars().take(500).collect();
    let chars: Vec<(usize, char)> = prefix.char_indices().collect();
    let mut grams: Vec<String> = Vec::new();
    for window in chars.windows(2) {
        let start = window[0].0;
        let end = window[1].0 + window[1].1.len_utf8();
        grams.push(prefix[start..end].to_string());
    }
    for window in chars.windows(3) {
        let start = window[0].0;
        let end = window[2].0 + window[2].1.len_utf8();
        grams.push(prefix[start..end].to_string());
    }
    features.extend(grams.iter().map(String::as_str));

    for feature in features {
        let hash = feature_hash(feature);
        let idx = (hash % EMBEDDING_DIM as u64) as usize;
        let sign = if (hash / EMBEDDING_DIM as u64) % 2 == 0 {
            1.0
        } else {
            -1.0
        };
        vector[idx] += sign;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

/// Stable 64-bit feature hash derived from md5.
fn feature_hash(feature: &str) -> u64 {
    let digest = Md5::digest(feature.as_bytes());
    u64::from_be_bytes(digest[..8].try_into().expect("md5 yields 16 bytes"))
}

/// Cosine similarity; inputs are already normalized so this is a dot
/// product. Mismatched dimensions score 0.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_is_normalized_and_deterministic() {
        let a = compute_embedding("NVIDIA ships the B200 accelerator");
        let b = compute_embedding("NVIDIA ships the B200 accelerator");
        assert_eq!(a, b);
        let norm: f64 = a.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let v = compute_embedding("   ");
        assert!(v.iter().all(|x| *x == 0.0));
        assert_eq!(v.len(), EMBEDDING_DIM);
    }

    #[test]
    fn test_self_similarity_is_one() {
        let v = compute_embedding("quarterly earnings beat expectations");
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_similar_texts_score_higher_than_unrelated() {
        let a = compute_embedding("OpenAI releases a new reasoning model for developers");
        let b = compute_embedding("OpenAI ships a new reasoning model to developers");
        let c = compute_embedding("Heavy rainfall expected across the northern plains");
        assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &c));
    }

    #[tokio::test]
    async fn test_index_add_search_recent_clear() {
        let index = HashedVectorIndex::open_in_memory().unwrap();
        index
            .add("a", "Chip export rules tighten", "New export controls on AI chips", None)
            .await
            .unwrap();
        index
            .add("b", "Pasta recipes", "How to cook pasta al dente", None)
            .await
            .unwrap();
        assert_eq!(index.len().await.unwrap(), 2);

        let hits = index
            .search("export controls on AI chips", 2)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a");
        assert!(hits[0].score >= hits[1].score);
        assert!(hits[0].score <= 1.0 + 1e-9 && hits[0].score >= -1.0 - 1e-9);

        let recent = index.recent(1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, "b");

        index.clear().await.unwrap();
        assert_eq!(index.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reindex_same_id_replaces() {
        let index = HashedVectorIndex::open_in_memory().unwrap();
        index.add("a", "v1", "first", None).await.unwrap();
        index.add("a", "v2", "second", None).await.unwrap();
        assert_eq!(index.len().await.unwrap(), 1);
        let recent = index.recent(10).await.unwrap();
        assert_eq!(recent[0].title, "v2");
    }
}
