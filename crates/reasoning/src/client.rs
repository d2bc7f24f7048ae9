//! Reasoning client (component C4): a single non-streaming chat-completions
//! call against a configurable OpenAI-compatible endpoint, with a
//! fail-open fallback verdict on any error.

use agentic_c_eda_core::config::keys;
use agentic_c_eda_core::ConfigProvider;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::error::ReasoningError;

const DEFAULT_API_URL: &str = "http://localhost:1234/v1/chat/completions";
const DEFAULT_MODEL: &str = "qwen/qwen3-4b-2507";
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_SENSITIVITY: u32 = 5;

/// The batch-level verdict C4 hands back to the scheduler. Distinct from
/// [`agentic_c_eda_core::Verdict`], which is the coarser ALLOW/FLAG/BLOCK
/// stored on the `decisions` row; `Analysis` is the richer shape the model
/// actually emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub flagged: bool,
    pub severity: String,
    pub summary: String,
    pub suggested_actions: Vec<String>,
}

impl Analysis {
    fn empty_input() -> Self {
        Self {
            flagged: false,
            severity: "info".to_string(),
            summary: "No events to analyze".to_string(),
            suggested_actions: Vec::new(),
        }
    }

    fn fallback(event_count: usize) -> Self {
        Self {
            flagged: true,
            severity: "warning".to_string(),
            summary: format!("Analysis inconclusive for {event_count} event(s)"),
            suggested_actions: vec!["Review events manually".to_string()],
        }
    }
}

fn system_prompt(sensitivity: u32) -> String {
    format!(
        r#"You are a security analyst for a Linux server.
Analyze the following security events and determine if they should be flagged for user attention.

Sensitivity level: {sensitivity}/10 (higher = more alerts)

IMPORTANT: You must respond with ONLY valid JSON, no other text.

Response format:
{{
    "flagged": true/false,
    "severity": "info" | "warning" | "critical",
    "summary": "Brief description of what happened",
    "suggested_actions": ["action1", "action2"]
}}

Rules:
- flagged=false for normal traffic, routine operations
- flagged=true with severity="info" for minor anomalies
- flagged=true with severity="warning" for suspicious but not urgent
- flagged=true with severity="critical" for likely attacks or breaches
- Be concise in summaries
- Never auto-block, only flag for user review"#
    )
}

/// `analyze_batch(events) -> verdict`, following the same chat
/// completions request shape as `chat_completions.rs` but collapsed to a
/// single non-streaming POST, since a batch verdict has no incremental
/// output worth streaming to anyone.
pub struct ReasoningClient {
    http: reqwest::Client,
}

impl Default for ReasoningClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ReasoningClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    pub async fn analyze_batch(
        &self,
        events: &[String],
        config: &dyn ConfigProvider,
    ) -> Result<Analysis, ReasoningError> {
        if events.is_empty() {
            return Ok(Analysis::empty_input());
        }

        let api_url = config
            .get_config(keys::LLM_API_URL)
            .await?
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_key = config.get_config(keys::LLM_API_KEY).await?;
        let model = config
            .get_config(keys::LLM_MODEL)
            .await?
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let timeout_secs = config
            .get_config(keys::LLM_TIMEOUT)
            .await?
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let sensitivity = config
            .get_config(keys::SENSITIVITY)
            .await?
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(DEFAULT_SENSITIVITY);

        let events_text = events.iter().map(|e| format!("- {e}")).collect::<Vec<_>>().join("\n");
        let user_prompt = format!("Events to analyze:\n{events_text}");

        let payload = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": system_prompt(sensitivity)},
                {"role": "user", "content": user_prompt},
            ],
            "temperature": 0.3,
            "max_tokens": 500,
        });

        match self.call(&api_url, api_key.as_deref(), timeout_secs, &payload).await {
            Ok(analysis) => Ok(analysis),
            Err(error) => {
                warn!(%error, "reasoning call failed, returning fail-open fallback");
                Ok(Analysis::fallback(events.len()))
            }
        }
    }

    async fn call(
        &self,
        api_url: &str,
        api_key: Option<&str>,
        timeout_secs: u64,
        payload: &serde_json::Value,
    ) -> Result<Analysis, ReasoningError> {
        let mut request = self
            .http
            .post(api_url)
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .json(payload);
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReasoningError::Status { status, body });
        }

        let body: serde_json::Value = response.json().await?;
        let content = body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or(ReasoningError::NoJsonObject)?;

        parse_model_response(content)
    }
}

/// Strips a leading `<think>...</think>` block, then extracts the first
/// brace-delimited JSON object and decodes it, defaulting any missing
/// fields the way the fallback's caller expects.
fn parse_model_response(content: &str) -> Result<Analysis, ReasoningError> {
    let content = if content.contains("<think>") {
        content.rsplit("</think>").next().unwrap_or(content).trim()
    } else {
        content
    };

    let start = content.find('{').ok_or(ReasoningError::NoJsonObject)?;
    let end = content.rfind('}').map(|i| i + 1).ok_or(ReasoningError::NoJsonObject)?;
    if end <= start {
        return Err(ReasoningError::NoJsonObject);
    }

    let parsed: serde_json::Value = serde_json::from_str(&content[start..end])?;
    let severity = parsed
        .get("severity")
        .and_then(|v| v.as_str())
        .filter(|s| matches!(*s, "info" | "warning" | "critical"))
        .unwrap_or("info")
        .to_string();

    Ok(Analysis {
        flagged: parsed.get("flagged").and_then(|v| v.as_bool()).unwrap_or(false),
        severity,
        summary: parsed
            .get("summary")
            .and_then(|v| v.as_str())
            .unwrap_or("Analysis complete")
            .to_string(),
        suggested_actions: parsed
            .get("suggested_actions")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clean_json_response() {
        let content = r#"{"flagged": true, "severity": "critical", "summary": "brute force", "suggested_actions": ["block ip"]}"#;
        let analysis = parse_model_response(content).expect("should parse");
        assert!(analysis.flagged);
        assert_eq!(analysis.severity, "critical");
        assert_eq!(analysis.suggested_actions, vec!["block ip".to_string()]);
    }

    #[test]
    fn strips_think_block_before_extracting_json() {
        let content = "<think>reasoning about this</think>\n{\"flagged\": false}";
        let analysis = parse_model_response(content).expect("should parse");
        assert!(!analysis.flagged);
        assert_eq!(analysis.severity, "info");
        assert_eq!(analysis.summary, "Analysis complete");
    }

    #[test]
    fn invalid_severity_defaults_to_info() {
        let content = r#"{"flagged": true, "severity": "apocalyptic"}"#;
        let analysis = parse_model_response(content).expect("should parse");
        assert_eq!(analysis.severity, "info");
    }

    #[test]
    fn missing_braces_is_an_error() {
        assert!(parse_model_response("not json at all").is_err());
    }

    #[test]
    fn empty_input_short_circuits_without_a_network_call() {
        let analysis = Analysis::empty_input();
        assert!(!analysis.flagged);
        assert_eq!(analysis.summary, "No events to analyze");
    }

    #[test]
    fn fallback_is_deliberately_flagged() {
        let analysis = Analysis::fallback(3);
        assert!(analysis.flagged);
        assert_eq!(analysis.severity, "warning");
        assert_eq!(analysis.summary, "Analysis inconclusive for 3 event(s)");
    }
}
