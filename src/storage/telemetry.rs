//! Telemetry persistence — daily JSONL shards plus a SQLite query index
//!
//! Full records append to `<storage_path>/YYYY-MM-DD.jsonl` (UTC date); a
//! slim index row goes into `telemetry.db` for querying. One append is one
//! JSONL line plus one index insert, so concurrent writers cannot tear a
//! record.

use crate::error::Result;
use crate::models::{AiCallRecord, TelemetryAggregate};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Filters for [`TelemetryStore::query`] and friends
#[derive(Debug, Clone, Default)]
pub struct TelemetryQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub session_id: Option<String>,
    pub agent_name: Option<String>,
    pub call_type: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

/// Slim index row returned by queries
#[derive(Debug, Clone, serde::Serialize)]
pub struct TelemetryIndexRow {
    pub call_id: String,
    pub timestamp: DateTime<Utc>,
    pub call_type: String,
    pub model: String,
    pub agent_name: Option<String>,
    pub session_id: Option<String>,
    pub total_tokens: u64,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub log_shard: String,
}

#[derive(Clone)]
pub struct TelemetryStore {
    storage_path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl TelemetryStore {
    pub fn open(storage_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(storage_path)?;
        let conn = Connection::open(storage_path.join("telemetry.db"))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS ai_calls (
                call_id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                call_type TEXT NOT NULL,
                model TEXT,
                agent_name TEXT,
                session_id TEXT,
                prompt_tokens INTEGER,
                completion_tokens INTEGER,
                total_tokens INTEGER,
                duration_ms INTEGER,
                error TEXT,
                log_shard TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_calls_timestamp ON ai_calls(timestamp);
            CREATE INDEX IF NOT EXISTS idx_calls_session ON ai_calls(session_id);
            CREATE INDEX IF NOT EXISTS idx_calls_agent ON ai_calls(agent_name);
            CREATE INDEX IF NOT EXISTS idx_calls_type ON ai_calls(call_type);
            "#,
        )?;
        Ok(Self {
            storage_path: storage_path.to_path_buf(),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn shard_path(&self, timestamp: DateTime<Utc>) -> PathBuf {
        self.storage_path
            .join(format!("{}.jsonl", timestamp.format("%Y-%m-%d")))
    }

    /// Append one record: a JSONL line to the day's shard, then the index
    /// row. The shard name is recorded so `get_full` knows where to look.
    pub fn append(&self, record: &AiCallRecord) -> Result<()> {
        let shard = self.shard_path(record.timestamp);
        let line = serde_json::to_string(record)?;
        {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&shard)?;
            file.write_all(line.as_bytes())?;
            file.write_all(b"\n")?;
        }

        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO ai_calls
             (call_id, timestamp, call_type, model, agent_name, session_id,
              prompt_tokens, completion_tokens, total_tokens, duration_ms, error, log_shard)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.call_id,
                record.timestamp.to_rfc3339(),
                record.call_type,
                record.model,
                record.agent_name,
                record.session_id,
                record.token_usage.prompt as i64,
                record.token_usage.completion as i64,
                record.token_usage.total as i64,
                record.duration_ms,
                record.error,
                shard.file_name().and_then(|n| n.to_str()).unwrap_or(""),
            ],
        )?;
        Ok(())
    }

    /// Query index rows, newest first.
    pub fn query(&self, q: &TelemetryQuery) -> Result<Vec<TelemetryIndexRow>> {
        let mut sql = String::from("SELECT * FROM ai_calls WHERE 1=1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(start) = q.start {
            sql.push_str(&format!(" AND timestamp >= ?{}", args.len() + 1));
            args.push(Box::new(start.to_rfc3339()));
        }
        if let Some(end) = q.end {
            sql.push_str(&format!(" AND timestamp <= ?{}", args.len() + 1));
            args.push(Box::new(end.to_rfc3339()));
        }
        for (column, value) in [
            ("session_id", &q.session_id),
            ("agent_name", &q.agent_name),
            ("call_type", &q.call_type),
        ] {
            if let Some(value) = value {
                sql.push_str(&format!(" AND {} = ?{}", column, args.len() + 1));
                args.push(Box::new(value.clone()));
            }
        }
        let limit = if q.limit == 0 { 100 } else { q.limit };
        sql.push_str(&format!(
            " ORDER BY timestamp DESC LIMIT ?{} OFFSET ?{}",
            args.len() + 1,
            args.len() + 2
        ));
        args.push(Box::new(limit as i64));
        args.push(Box::new(q.offset as i64));

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let params_ref: Vec<&dyn rusqlite::ToSql> = args.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(params_ref.as_slice(), |row| {
            Ok(TelemetryIndexRow {
                call_id: row.get("call_id")?,
                timestamp: DateTime::parse_from_rfc3339(&row.get::<_, String>("timestamp")?)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                call_type: row.get("call_type")?,
                model: row.get::<_, Option<String>>("model")?.unwrap_or_default(),
                agent_name: row.get("agent_name")?,
                session_id: row.get("session_id")?,
                total_tokens: row.get::<_, Option<i64>>("total_tokens")?.unwrap_or(0) as u64,
                duration_ms: row.get::<_, Option<i64>>("duration_ms")?.unwrap_or(0),
                error: row.get("error")?,
                log_shard: row
                    .get::<_, Option<String>>("log_shard")?
                    .unwrap_or_default(),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Fetch the full record back out of its JSONL shard.
    pub fn get_full(&self, call_id: &str) -> Result<Option<AiCallRecord>> {
        let shard: Option<String> = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT log_shard FROM ai_calls WHERE call_id = ?1",
                params![call_id],
                |row| row.get(0),
            )
            .optional()?
        };
        let Some(shard) = shard else {
            return Ok(None);
        };
        let path = self.storage_path.join(shard);
        let Ok(content) = std::fs::read_to_string(&path) else {
            return Ok(None);
        };
        for line in content.lines() {
            if !line.contains(call_id) {
                continue;
            }
            if let Ok(record) = serde_json::from_str::<AiCallRecord>(line) {
                if record.call_id == call_id {
                    return Ok(Some(record));
                }
            }
        }
        Ok(None)
    }

    /// Aggregate counters over a query window.
    pub fn aggregate(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        session_id: Option<&str>,
    ) -> Result<TelemetryAggregate> {
        let rows = self.query(&TelemetryQuery {
            start,
            end,
            session_id: session_id.map(str::to_string),
            limit: usize::MAX >> 1,
            ..Default::default()
        })?;

        let mut agg = TelemetryAggregate::default();
        let mut total_duration: i64 = 0;
        let mut errors: u64 = 0;

        // prompt/completion live only in the index, re-read them
        let conn = self.conn.lock();
        for row in &rows {
            agg.total_calls += 1;
            agg.total_tokens += row.total_tokens;
            total_duration += row.duration_ms;
            if row.error.is_some() {
                errors += 1;
            }
            *agg.calls_by_type.entry(row.call_type.clone()).or_insert(0) += 1;
            *agg
                .calls_by_agent
                .entry(row.agent_name.clone().unwrap_or_else(|| "unknown".to_string()))
                .or_insert(0) += 1;
            *agg.calls_by_model.entry(row.model.clone()).or_insert(0) += 1;

            let (prompt, completion): (i64, i64) = conn.query_row(
                "SELECT prompt_tokens, completion_tokens FROM ai_calls WHERE call_id = ?1",
                params![row.call_id],
                |r| {
                    Ok((
                        r.get::<_, Option<i64>>(0)?.unwrap_or(0),
                        r.get::<_, Option<i64>>(1)?.unwrap_or(0),
                    ))
                },
            )?;
            agg.total_prompt_tokens += prompt as u64;
            agg.total_completion_tokens += completion as u64;
        }

        if agg.total_calls > 0 {
            agg.avg_duration_ms = total_duration as f64 / agg.total_calls as f64;
            agg.error_rate = errors as f64 / agg.total_calls as f64;
        }
        Ok(agg)
    }

    /// Distinct sessions, most recent first.
    pub fn list_sessions(&self, limit: usize) -> Result<Vec<(String, u64)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT session_id, COUNT(*) AS calls, MAX(timestamp) AS last_seen
             FROM ai_calls
             WHERE session_id IS NOT NULL
             GROUP BY session_id
             ORDER BY last_seen DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Delete shards and index rows older than the retention window.
    /// Returns the number of index rows removed.
    pub fn cleanup(&self, retention_days: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let cutoff_str = cutoff.to_rfc3339();
        let deleted = {
            let conn = self.conn.lock();
            conn.execute("DELETE FROM ai_calls WHERE timestamp < ?1", params![cutoff_str])?
        };

        let cutoff_shard = format!("{}.jsonl", cutoff.format("%Y-%m-%d"));
        if let Ok(entries) = std::fs::read_dir(&self.storage_path) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.ends_with(".jsonl") && name < cutoff_shard {
                    let _ = std::fs::remove_file(entry.path());
                }
            }
        }
        Ok(deleted)
    }

    /// Export full records matching the filters as JSONL. Returns the
    /// record count.
    pub fn export_jsonl(&self, output: &Path, filters: &TelemetryQuery) -> Result<usize> {
        let rows = self.query(filters)?;
        let mut file = std::fs::File::create(output)?;
        let mut count = 0;
        for row in rows {
            if let Some(record) = self.get_full(&row.call_id)? {
                let line = serde_json::to_string(&record)?;
                file.write_all(line.as_bytes())?;
                file.write_all(b"\n")?;
                count += 1;
            }
        }
        Ok(count)
    }
}

impl std::fmt::Debug for TelemetryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryStore")
            .field("storage_path", &self.storage_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatMessage, TokenUsage};
    use tempfile::TempDir;

    fn store() -> (TelemetryStore, TempDir) {
        let dir = TempDir::new().unwrap();
        (TelemetryStore::open(dir.path()).unwrap(), dir)
    }

    fn record(call_type: &str, agent: Option<&str>, error: Option<&str>) -> AiCallRecord {
        let mut r = AiCallRecord::new(call_type, "test-model");
        r.agent_name = agent.map(str::to_string);
        r.session_id = Some("session-1".to_string());
        r.messages.push(ChatMessage::user("hello"));
        r.response = "world".to_string();
        r.token_usage = TokenUsage {
            prompt: 10,
            completion: 5,
            total: 15,
        };
        r.duration_ms = 120;
        r.error = error.map(str::to_string);
        r
    }

    #[test]
    fn test_append_query_round_trip() {
        let (store, _dir) = store();
        let r = record("chat", Some("Collector"), None);
        store.append(&r).unwrap();

        let rows = store.query(&TelemetryQuery::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].call_id, r.call_id);
        assert_eq!(rows[0].total_tokens, 15);
        assert!(rows[0].log_shard.ends_with(".jsonl"));
    }

    #[test]
    fn test_get_full_reads_back_the_shard() {
        let (store, _dir) = store();
        let r = record("chat_json", Some("Extractor"), None);
        store.append(&r).unwrap();

        let full = store.get_full(&r.call_id).unwrap().unwrap();
        assert_eq!(full.response, "world");
        assert_eq!(full.messages.len(), 1);
        assert!(store.get_full("missing-id").unwrap().is_none());
    }

    #[test]
    fn test_query_filters() {
        let (store, _dir) = store();
        store.append(&record("chat", Some("Collector"), None)).unwrap();
        store.append(&record("chat_json", Some("Extractor"), None)).unwrap();

        let q = TelemetryQuery {
            agent_name: Some("Collector".to_string()),
            ..Default::default()
        };
        let rows = store.query(&q).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].call_type, "chat");

        let q = TelemetryQuery {
            call_type: Some("chat_json".to_string()),
            ..Default::default()
        };
        assert_eq!(store.query(&q).unwrap().len(), 1);
    }

    #[test]
    fn test_aggregate() {
        let (store, _dir) = store();
        store.append(&record("chat", Some("Collector"), None)).unwrap();
        store.append(&record("chat", Some("Collector"), None)).unwrap();
        store
            .append(&record("chat_json", Some("Extractor"), Some("boom")))
            .unwrap();

        let agg = store.aggregate(None, None, None).unwrap();
        assert_eq!(agg.total_calls, 3);
        assert_eq!(agg.total_tokens, 45);
        assert_eq!(agg.total_prompt_tokens, 30);
        assert_eq!(agg.total_completion_tokens, 15);
        assert_eq!(agg.calls_by_type["chat"], 2);
        assert_eq!(agg.calls_by_agent["Extractor"], 1);
        assert!((agg.error_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((agg.avg_duration_ms - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_list_sessions_and_cleanup() {
        let (store, _dir) = store();
        store.append(&record("chat", None, None)).unwrap();
        let sessions = store.list_sessions(10).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].0, "session-1");

        // Nothing is old enough to clean
        assert_eq!(store.cleanup(30).unwrap(), 0);
        // Everything is older than a -1 day horizon
        assert_eq!(store.cleanup(-1).unwrap(), 1);
    }

    #[test]
    fn test_export_jsonl() {
        let (store, dir) = store();
        store.append(&record("chat", Some("Collector"), None)).unwrap();
        store.append(&record("chat", Some("Extractor"), None)).unwrap();

        let out = dir.path().join("export.jsonl");
        let count = store
            .export_jsonl(
                &out,
                &TelemetryQuery {
                    agent_name: Some("Collector".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(count, 1);
        let content = std::fs::read_to_string(out).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("Collector"));
    }
}
