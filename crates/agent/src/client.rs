//! The chat agent's own model call, grounded on `_call_llm` (`agent.py`).
//! Distinct from [`agentic_c_eda_reasoning::ReasoningClient`]: a different
//! `max_tokens` budget, and a deliberately permissive error path — any
//! failure becomes the literal response text rather than a `Result::Err`,
//! so the chat loop can keep iterating on it like any other model reply.

use agentic_c_eda_core::config::keys;
use agentic_c_eda_core::ConfigProvider;
use serde_json::{json, Value};

const DEFAULT_API_URL: &str = "http://localhost:1234/v1/chat/completions";
const DEFAULT_MODEL: &str = "qwen/qwen3-4b-2507";
const DEFAULT_TIMEOUT_SECS: u64 = 10;

pub struct AgentLlmClient {
    http: reqwest::Client,
}

impl Default for AgentLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentLlmClient {
    pub fn new() -> Self {
        Self { http: reqwest::Client::new() }
    }

    /// `messages` is the full running transcript (system prompt, chat
    /// history, and any tool-result turns appended this iteration).
    pub async fn call(&self, messages: &[Value], config: &dyn ConfigProvider) -> String {
        match self.try_call(messages, config).await {
            Ok(content) => content,
            Err(error) => format!("Error calling LLM: {error}"),
        }
    }

    async fn try_call(&self, messages: &[Value], config: &dyn ConfigProvider) -> Result<String, String> {
        let api_url = config
            .get_config(keys::LLM_API_URL)
            .await
            .map_err(|e| e.to_string())?
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_key = config.get_config(keys::LLM_API_KEY).await.map_err(|e| e.to_string())?;
        let model = config
            .get_config(keys::LLM_MODEL)
            .await
            .map_err(|e| e.to_string())?
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let timeout_secs = config
            .get_config(keys::LLM_TIMEOUT)
            .await
            .map_err(|e| e.to_string())?
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let payload = json!({
            "model": model,
            "messages": messages,
            "temperature": 0.3,
            "max_tokens": 1000,
        });

        let mut request = self
            .http
            .post(&api_url)
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .json(&payload);
        if let Some(key) = api_key.as_deref().filter(|k| !k.is_empty()) {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| e.to_string())?;
        let response = response.error_for_status().map_err(|e| e.to_string())?;
        let body: Value = response.json().await.map_err(|e| e.to_string())?;
        body.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| "malformed chat completion response".to_string())
    }
}
