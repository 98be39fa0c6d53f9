//! Trace manager — on-disk audit trail of one article's analysis
//!
//! One directory per session (named by timestamp + URL hash), one JSON
//! file per agent output in call order, plus a `final.json` with the end
//! result. Everything is best-effort: a trace write failure never affects
//! the pipeline.

use md5::{Digest, Md5};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};

struct SessionState {
    dir: PathBuf,
    seq: usize,
}

pub struct TraceManager {
    base_dir: PathBuf,
    session: Mutex<Option<SessionState>>,
}

impl TraceManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            session: Mutex::new(None),
        }
    }

    /// Open a session keyed on the article URL. Replaces any session left
    /// open by a failed run.
    pub fn start_session(&self, url: &str, title: &str) {
        let hash = format!("{:x}", Md5::digest(url.as_bytes()));
        let dir = self.base_dir.join(format!(
            "{}_{}",
            chrono::Utc::now().format("%Y%m%dT%H%M%S"),
            &hash[..8]
        ));
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!(error = %e, "Cannot create trace session dir");
            return;
        }
        let meta = serde_json::json!({ "url": url, "title": title });
        let _ = std::fs::write(
            dir.join("session.json"),
            serde_json::to_string_pretty(&meta).unwrap_or_default(),
        );
        *self.session.lock() = Some(SessionState { dir, seq: 0 });
    }

    /// Record one agent's output under the open session.
    pub fn save_agent_output<I: Serialize, O: Serialize>(
        &self,
        agent_name: &str,
        input: &I,
        output: &O,
        duration_ms: i64,
    ) {
        let mut guard = self.session.lock();
        let Some(session) = guard.as_mut() else {
            return;
        };
        session.seq += 1;
        let payload = serde_json::json!({
            "agent": agent_name,
            "input": input,
            "output": output,
            "duration_ms": duration_ms,
        });
        let path = session
            .dir
            .join(format!("{:02}_{}.json", session.seq, agent_name.to_lowercase()));
        if let Err(e) = std::fs::write(
            &path,
            serde_json::to_string_pretty(&payload).unwrap_or_default(),
        ) {
            tracing::warn!(error = %e, "Trace write failed");
        }
    }

    /// Write the session's final result.
    pub fn save_final<T: Serialize>(&self, result: &T) {
        let guard = self.session.lock();
        let Some(session) = guard.as_ref() else {
            return;
        };
        let _ = std::fs::write(
            session.dir.join("final.json"),
            serde_json::to_string_pretty(result).unwrap_or_default(),
        );
    }

    /// Close the session, returning its directory.
    pub fn end_session(&self) -> Option<PathBuf> {
        self.session.lock().take().map(|s| s.dir)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_session_lifecycle() {
        let dir = TempDir::new().unwrap();
        let manager = TraceManager::new(dir.path());

        manager.start_session("https://example.com/a", "Title");
        manager.save_agent_output("Collector", &"input", &serde_json::json!({"k": 1}), 42);
        manager.save_agent_output("Editor", &"input", &"output", 7);
        manager.save_final(&serde_json::json!({"score": 8.0}));

        let session_dir = manager.end_session().unwrap();
        let names: Vec<String> = std::fs::read_dir(&session_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert!(names.contains(&"session.json".to_string()));
        assert!(names.contains(&"01_collector.json".to_string()));
        assert!(names.contains(&"02_editor.json".to_string()));
        assert!(names.contains(&"final.json".to_string()));

        // Closed session: further writes are no-ops
        manager.save_agent_output("Late", &"x", &"y", 1);
        assert!(manager.end_session().is_none());
    }
}
