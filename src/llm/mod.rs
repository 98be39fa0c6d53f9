//! LLM gateway — the sole path for model interactions
//!
//! Targets an OpenAI-compatible chat-completions endpoint. Every call gets
//! retries with capped exponential backoff, token accounting, and a
//! telemetry record stamped with the ambient session/agent tags. Failed
//! calls are recorded too, with zero usage and the error set.

pub mod context;

use crate::config::AiConfig;
use crate::error::{Error, Result};
use crate::models::{AiCallRecord, ChatMessage, TokenUsage};
use crate::telemetry::TelemetryRecorder;
use regex::Regex;
use serde::Deserialize;
use std::time::{Duration, Instant};

/// Default retry attempts per call
const DEFAULT_RETRY_COUNT: u32 = 3;

/// Backoff cap in seconds
const MAX_BACKOFF_SECS: u64 = 30;

#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    config: AiConfig,
    recorder: TelemetryRecorder,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    usage: Option<UsagePayload>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsagePayload {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

impl LlmClient {
    pub fn new(config: AiConfig, recorder: TelemetryRecorder) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| Error::Llm(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            config,
            recorder,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Send a chat request. Retries up to `retry_count` times with
    /// `min(2^attempt, 30)`s backoff; on terminal failure the error is
    /// recorded to telemetry (zero usage) and returned.
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        max_tokens: Option<u32>,
        temperature: Option<f32>,
        retry_count: Option<u32>,
    ) -> Result<(String, TokenUsage)> {
        self.chat_inner(messages, max_tokens, temperature, retry_count, "chat")
            .await
            .map(|(text, usage, _)| (text, usage))
    }

    /// Send a chat request and run JSON recovery over the response.
    /// Unparseable output yields `None`, never an error.
    pub async fn chat_json(
        &self,
        messages: &[ChatMessage],
        max_tokens: Option<u32>,
        temperature: Option<f32>,
        retry_count: Option<u32>,
    ) -> Result<(Option<serde_json::Value>, TokenUsage)> {
        let (text, usage, call_id) = self
            .chat_inner(messages, max_tokens, temperature, retry_count, "chat_json")
            .await?;
        let parsed = parse_json(&text);
        if parsed.is_none() {
            tracing::warn!(
                call_id = %call_id,
                preview = %text.chars().take(200).collect::<String>(),
                "JSON recovery failed"
            );
        }
        Ok((parsed, usage))
    }

    async fn chat_inner(
        &self,
        messages: &[ChatMessage],
        max_tokens: Option<u32>,
        temperature: Option<f32>,
        retry_count: Option<u32>,
        call_type: &str,
    ) -> Result<(String, TokenUsage, String)> {
        let retry_count = retry_count.unwrap_or(DEFAULT_RETRY_COUNT).max(1);
        let max_tokens = max_tokens.unwrap_or(self.config.max_tokens);
        let temperature = temperature.unwrap_or(self.config.temperature);

        let body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": max_tokens,
            "temperature": temperature,
        });
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let started = Instant::now();
        let mut attempts = 0;
        let mut last_error: Option<Error> = None;

        while attempts < retry_count {
            match self.send_once(&url, &body).await {
                Ok((content, usage)) => {
                    let duration_ms = started.elapsed().as_millis() as i64;
                    tracing::debug!(
                        model = %self.config.model,
                        duration_ms,
                        total_tokens = usage.total,
                        "LLM call succeeded"
                    );
                    let mut record = AiCallRecord::new(call_type, &self.config.model);
                    record.messages = messages.to_vec();
                    record
                        .parameters
                        .insert("max_tokens".to_string(), max_tokens.into());
                    record.response = content.clone();
                    if call_type == "chat_json" {
                        record.parsed_json = parse_json(&content);
                    }
                    record.token_usage = usage;
                    record.duration_ms = duration_ms;
                    record.retry_count = attempts;
                    record.caller = format!("LlmClient::{}", call_type);
                    let call_id = record.call_id.clone();
                    self.recorder.record(record);
                    return Ok((content, usage, call_id));
                }
                Err(e) => {
                    attempts += 1;
                    tracing::warn!(
                        attempt = attempts,
                        of = retry_count,
                        error = %e,
                        "LLM call failed"
                    );
                    last_error = Some(e);
                    if attempts < retry_count {
                        let wait = Duration::from_secs(
                            2u64.saturating_pow(attempts - 1).min(MAX_BACKOFF_SECS),
                        );
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }

        let error = last_error.unwrap_or_else(|| Error::Llm("no attempts made".to_string()));
        let mut record = AiCallRecord::new(call_type, &self.config.model);
        record.messages = messages.to_vec();
        record.duration_ms = started.elapsed().as_millis() as i64;
        record.retry_count = attempts.saturating_sub(1);
        record.error = Some(error.to_string());
        record.caller = format!("LlmClient::{}", call_type);
        self.recorder.record(record);
        Err(error)
    }

    async fn send_once(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<(String, TokenUsage)> {
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Llm(format!(
                "endpoint returned {}: {}",
                status,
                text.chars().take(300).collect::<String>()
            )));
        }

        let completion: CompletionResponse = response.json().await?;
        let content = completion
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        let usage = completion
            .usage
            .map(|u| TokenUsage {
                prompt: u.prompt_tokens,
                completion: u.completion_tokens,
                total: u.total_tokens,
            })
            .unwrap_or_default();
        Ok((content, usage))
    }
}

/// Build the standard message list: system, optional few-shot example
/// pairs, then the user prompt.
pub fn build_messages(
    system_prompt: &str,
    user_prompt: &str,
    examples: Option<&[(String, String)]>,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system_prompt)];
    if let Some(examples) = examples {
        for (user, assistant) in examples {
            messages.push(ChatMessage::user(user.clone()));
            messages.push(ChatMessage::assistant(assistant.clone()));
        }
    }
    messages.push(ChatMessage::user(user_prompt));
    messages
}

/// Fault-tolerant JSON recovery, in order:
/// 1. parse the text directly;
/// 2. parse the first fenced ```json (or bare ```) block;
/// 3. parse the longest `{ ... }` span.
///
/// Returns `None` when nothing parses; never panics or errors.
pub fn parse_json(content: &str) -> Option<serde_json::Value> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    let fence = Regex::new(r"```(?:json)?\s*([\s\S]*?)\s*```").expect("static regex");
    if let Some(captures) = fence.captures(trimmed) {
        if let Ok(value) = serde_json::from_str(captures[1].trim()) {
            return Some(value);
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                return Some(value);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_direct() {
        let value = parse_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(value["a"], 1);
        // Arrays parse too
        let value = parse_json(r#"[1, 2, 3]"#).unwrap();
        assert!(value.is_array());
    }

    #[test]
    fn test_parse_json_fenced_block() {
        let content = "Here is the result:\n```json\n{\"score\": 8.5}\n```\nDone.";
        let value = parse_json(content).unwrap();
        assert_eq!(value["score"], 8.5);

        let bare = "```\n{\"x\": true}\n```";
        assert_eq!(parse_json(bare).unwrap()["x"], true);
    }

    #[test]
    fn test_parse_json_brace_span() {
        let content = "The answer, roughly speaking, is {\"verdict\": \"yes\"} as discussed.";
        let value = parse_json(content).unwrap();
        assert_eq!(value["verdict"], "yes");
    }

    #[test]
    fn test_parse_json_unparseable_returns_none() {
        assert!(parse_json("").is_none());
        assert!(parse_json("no json here at all").is_none());
        assert!(parse_json("{broken: ]").is_none());
    }

    #[test]
    fn test_parse_json_round_trip() {
        let original = serde_json::json!({"nested": {"list": [1, 2], "s": "text"}});
        let serialized = serde_json::to_string(&original).unwrap();
        assert_eq!(parse_json(&serialized).unwrap(), original);
    }

    #[test]
    fn test_build_messages_shapes() {
        let messages = build_messages("sys", "user", None);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");

        let examples = vec![("q1".to_string(), "a1".to_string())];
        let messages = build_messages("sys", "user", Some(&examples));
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[2].role, "assistant");
        assert_eq!(messages[3].content, "user");
    }
}
