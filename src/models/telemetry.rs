//! Telemetry records for LLM calls

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Token accounting for one call. On success,
/// `total == prompt + completion`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.prompt += other.prompt;
        self.completion += other.completion;
        self.total += other.total;
    }
}

/// One chat message on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Append-only record of a single model call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiCallRecord {
    pub call_id: String,
    pub timestamp: DateTime<Utc>,
    /// "chat" or "chat_json"
    pub call_type: String,
    pub model: String,
    pub session_id: Option<String>,
    pub agent_name: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub parameters: serde_json::Map<String, serde_json::Value>,
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed_json: Option<serde_json::Value>,
    pub token_usage: TokenUsage,
    pub duration_ms: i64,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub caller: String,
}

impl AiCallRecord {
    pub fn new(call_type: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            call_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            call_type: call_type.into(),
            model: model.into(),
            session_id: None,
            agent_name: None,
            messages: Vec::new(),
            parameters: serde_json::Map::new(),
            response: String::new(),
            parsed_json: None,
            token_usage: TokenUsage::default(),
            duration_ms: 0,
            retry_count: 0,
            error: None,
            caller: String::new(),
        }
    }
}

/// Aggregate over a telemetry query window
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryAggregate {
    pub total_calls: u64,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_tokens: u64,
    pub calls_by_type: HashMap<String, u64>,
    pub calls_by_agent: HashMap<String, u64>,
    pub calls_by_model: HashMap<String, u64>,
    pub avg_duration_ms: f64,
    pub error_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_usage_add() {
        let mut usage = TokenUsage {
            prompt: 10,
            completion: 5,
            total: 15,
        };
        usage.add(TokenUsage {
            prompt: 1,
            completion: 2,
            total: 3,
        });
        assert_eq!(usage.prompt, 11);
        assert_eq!(usage.completion, 7);
        assert_eq!(usage.total, 18);
    }

    #[test]
    fn test_record_serde_round_trip() {
        let mut record = AiCallRecord::new("chat", "test-model");
        record.messages.push(ChatMessage::system("s"));
        record.messages.push(ChatMessage::user("u"));
        record.token_usage = TokenUsage {
            prompt: 3,
            completion: 4,
            total: 7,
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: AiCallRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.call_id, record.call_id);
        assert_eq!(back.messages.len(), 2);
        assert_eq!(back.token_usage, record.token_usage);
        // error/parsed_json are omitted when absent
        assert!(!json.contains("\"error\""));
    }
}
