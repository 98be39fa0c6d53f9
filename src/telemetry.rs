//! Telemetry recorder
//!
//! Injected into the LLM gateway (never a global). Fills the ambient
//! `(session, agent)` tags into each record, truncates oversized content,
//! and swallows store failures — a telemetry write must never fail a model
//! call.

use crate::config::TelemetryConfig;
use crate::llm::context::CallContext;
use crate::models::AiCallRecord;
use crate::storage::{TelemetryQuery, TelemetryStore};
use std::sync::Arc;

#[derive(Clone)]
pub struct TelemetryRecorder {
    store: Option<Arc<TelemetryStore>>,
    max_content_length: usize,
}

impl TelemetryRecorder {
    pub fn new(config: &TelemetryConfig) -> crate::Result<Self> {
        let store = if config.enabled {
            Some(Arc::new(TelemetryStore::open(&config.storage_path)?))
        } else {
            None
        };
        Ok(Self {
            store,
            max_content_length: config.max_content_length,
        })
    }

    /// A recorder that drops everything (tests, telemetry disabled).
    pub fn disabled() -> Self {
        Self {
            store: None,
            max_content_length: 10_000,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Record one call. Ambient session/agent tags fill any fields the
    /// caller left empty; content is truncated to the configured cap; write
    /// failures are logged and dropped.
    pub fn record(&self, mut record: AiCallRecord) {
        let Some(store) = &self.store else {
            return;
        };

        let context = CallContext::current();
        if record.session_id.is_none() {
            record.session_id = context.session_id;
        }
        if record.agent_name.is_none() {
            record.agent_name = context.agent_name;
        }

        for message in &mut record.messages {
            message.content = truncate_content(&message.content, self.max_content_length);
        }
        record.response = truncate_content(&record.response, self.max_content_length);

        if let Err(e) = store.append(&record) {
            tracing::error!(call_id = %record.call_id, error = %e, "Telemetry write failed");
        }
    }

    pub fn store(&self) -> Option<&Arc<TelemetryStore>> {
        self.store.as_ref()
    }

    pub fn query(&self, q: &TelemetryQuery) -> Vec<crate::storage::TelemetryIndexRow> {
        self.store
            .as_ref()
            .and_then(|s| s.query(q).ok())
            .unwrap_or_default()
    }

    pub fn cleanup(&self, retention_days: i64) -> usize {
        self.store
            .as_ref()
            .and_then(|s| s.cleanup(retention_days).ok())
            .unwrap_or(0)
    }
}

/// Truncate with a marker naming the pre-truncation length.
fn truncate_content(content: &str, max_len: usize) -> String {
    let total = content.chars().count();
    if total <= max_len {
        return content.to_string();
    }
    let kept: String = content.chars().take(max_len).collect();
    format!("{}... [truncated, total {} chars]", kept, total)
}
