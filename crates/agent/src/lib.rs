//! Chat agent (component C7): a bounded tool-calling loop over an
//! OpenAI-compatible chat completions endpoint, grounded on `ChatAgent`
//! (`agent.py`). Streams its progress as [`ChatEvent`]s over an mpsc
//! channel, the way `codex_tool_runner.rs`'s tool-call runner streams
//! Codex events back to its caller rather than returning one final
//! value.

pub mod client;
pub mod error;
pub mod tools;

use std::sync::LazyLock;

use agentic_c_eda_core::ChatRole;
use agentic_c_eda_store::Store;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

pub use client::AgentLlmClient;
pub use error::AgentError;
pub use tools::{ExecutionResult, ProposalExecutor, ToolOutcome, ToolRegistry, TOOL_DEFINITIONS};

const MAX_TOOL_ITERATIONS: usize = 5;
const OVERFLOW_MESSAGE: &str =
    "I've reached the maximum number of tool calls. Please continue the conversation.";

const SYSTEM_PROMPT_TEMPLATE: &str = r#"You are Agent, an assistant for a Linux based server.
You help users with security monitoring AND general server maintenance tasks.

CRITICAL WORKFLOW:
1. For ANY command the user wants to run, use propose_command
2. The user will see your proposed command and click [Run] to approve
3. After they run it, you'll see the output and can analyze it
4. NEVER make up data - if you need info, propose a command to get it

You CAN help with:
- Security monitoring (checking logs, ports, IPs, processes)
- Network diagnostics (ping, traceroute, netstat, ss)
- System maintenance (apt, systemctl, df, free, uptime)
- File operations (ls, cat, tail, grep)
- ANY command the user requests

Available tools:
{tool_list}

EXAMPLES:
- Network test: propose_command("ping -c 5 google.com", "Test internet connectivity")
- Check ports: propose_command("ss -tlnp", "List all listening TCP ports")
- Check an IP: propose_command("host 192.168.1.1", "Reverse DNS lookup")
- Read logs: propose_command("tail -20 /var/log/auth.log", "Recent auth events")
- Check processes: propose_command("ps aux | grep python", "Find Python processes")
- Update packages: propose_command("sudo apt update", "Update package lists")

Keep responses concise. Do not use markdown tables - use simple lists instead."#;

fn system_prompt() -> String {
    let tool_list = TOOL_DEFINITIONS
        .iter()
        .map(|t| format!("- {}: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n");
    SYSTEM_PROMPT_TEMPLATE.replace("{tool_list}", &tool_list)
}

/// An event of the chat loop's progress, serialized the same shape the
/// dashboard's event stream expects on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Status { text: String },
    ToolCall { tool: String, params: Value },
    ToolResult { data: Value },
    Proposal { action: String, data: Value },
    Text { content: String },
}

fn send(events: &UnboundedSender<ChatEvent>, event: ChatEvent) {
    // A dropped receiver just means nobody's watching this turn anymore;
    // the loop still needs to run to completion to persist its messages.
    let _ = events.send(event);
}

/// Ties the tool registry, proposal executor, and the agent's own LLM
/// client to one conversation backed by the shared event store.
pub struct AgentLoop {
    store: Store,
    tools: ToolRegistry,
    executor: ProposalExecutor,
    llm: AgentLlmClient,
}

impl AgentLoop {
    pub fn new(store: Store) -> Self {
        Self {
            tools: ToolRegistry::new(store.clone()),
            executor: ProposalExecutor::new(store.clone()),
            llm: AgentLlmClient::new(),
            store,
        }
    }

    /// Runs one turn of the conversation: persists `user_message`, then
    /// iterates up to [`MAX_TOOL_ITERATIONS`] model calls, streaming
    /// progress to `events`. Returns once the model produces plain text,
    /// proposes an action, or the iteration bound is hit.
    pub async fn chat(&self, user_message: String, events: UnboundedSender<ChatEvent>) -> Result<(), AgentError> {
        self.store.insert_chat_message(ChatRole::User, user_message, None).await?;
        send(&events, ChatEvent::Status { text: "Thinking...".to_string() });

        let history = self.store.get_chat_messages(20).await?;
        let mut messages: Vec<Value> = vec![serde_json::json!({"role": "system", "content": system_prompt()})];
        for msg in history {
            messages.push(serde_json::json!({"role": msg.role.to_string(), "content": msg.content}));
        }

        for iteration in 0..MAX_TOOL_ITERATIONS {
            let llm_response = self.llm.call(&messages, &self.store).await;
            debug!(iteration, response = %llm_response, "raw chat completion");

            let Some((tool_name, params)) = parse_tool_call(&llm_response) else {
                let mut clean_msg = clean_response(&llm_response);
                if clean_msg.is_empty() {
                    clean_msg = llm_response;
                }
                self.store.insert_chat_message(ChatRole::Assistant, clean_msg.clone(), None).await?;
                send(&events, ChatEvent::Status { text: String::new() });
                send(&events, ChatEvent::Text { content: clean_msg });
                return Ok(());
            };

            send(&events, ChatEvent::Status { text: format!("Calling {tool_name}...") });
            send(&events, ChatEvent::ToolCall { tool: tool_name.clone(), params: params.clone() });

            let outcome = self.tools.execute_tool(&tool_name, params).await;
            if let ToolOutcome::Proposal { action, data } = outcome {
                let clean_msg = clean_response(&llm_response);
                if !clean_msg.is_empty() {
                    let metadata = serde_json::json!({"type": "proposal", "action": action, "data": data});
                    self.store.insert_chat_message(ChatRole::Assistant, clean_msg, Some(metadata)).await?;
                }
                send(&events, ChatEvent::Proposal { action, data });
                return Ok(());
            }

            let outcome_value = serde_json::to_value(&outcome).unwrap_or(Value::Null);
            send(&events, ChatEvent::ToolResult { data: outcome_value.clone() });
            send(&events, ChatEvent::Status { text: "Analyzing results...".to_string() });
            messages.push(serde_json::json!({"role": "assistant", "content": llm_response}));
            messages.push(serde_json::json!({"role": "user", "content": format!("Tool result: {outcome_value}")}));
        }

        send(&events, ChatEvent::Text { content: OVERFLOW_MESSAGE.to_string() });
        Ok(())
    }

    /// Carries out an approved proposal and logs a `system`-role note to
    /// the transcript recording what happened, mirroring
    /// `execute_proposal`.
    pub async fn execute_proposal(&self, action: &str, data: &Value) -> Result<ExecutionResult, AgentError> {
        let result = self.executor.execute(action, data).await;
        let summary = serde_json::to_value(&result).unwrap_or(Value::Null);
        let metadata = serde_json::json!({"action": action, "result": result});
        self.store
            .insert_chat_message(ChatRole::System, format!("Executed {action}: {summary}"), Some(metadata))
            .await?;
        Ok(result)
    }
}

static RE_TOOL_PARAMS: LazyLock<Regex> = LazyLock::new(|| re(r"(?s)TOOL:\s*(\w+)\s*\nPARAMS:\s*(\{.*?\})"));
static RE_QWEN: LazyLock<Regex> = LazyLock::new(|| re(r"(?s)to=tool\.(\w+).*?<\|message\|>(\{.*?\})"));
static RE_QWEN_ALT: LazyLock<Regex> = LazyLock::new(|| re(r"(?s)to=(\w+).*?<\|message\|>(\{.*?\})"));
static RE_TOOL_TAG: LazyLock<Regex> = LazyLock::new(|| re(r"<tool>(\w+)</tool>"));
static RE_PARAMS_TAG: LazyLock<Regex> = LazyLock::new(|| re(r"(?s)<params>(\{.*?\})</params>"));
static RE_FUNC_CALL: LazyLock<Regex> = LazyLock::new(|| re(r"(?s)(\w+)\((\{.*?\})\)"));

static RE_CLEAN_CHANNEL_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?s)<\|channel\|>.*?<\|message\|>\{.*?\}"));
static RE_CLEAN_CHANNEL_TAIL: LazyLock<Regex> = LazyLock::new(|| re(r"(?s)<\|channel\|>.*$"));
static RE_CLEAN_SPECIAL_TOKEN: LazyLock<Regex> = LazyLock::new(|| re(r"<\|[^|]+\|>[^<{]*"));
static RE_CLEAN_JSON_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| re(r#"(?s)\{["'].*?["']:\s*["'].*?["']\s*\}"#));
static RE_CLEAN_JSON_TAIL: LazyLock<Regex> =
    LazyLock::new(|| re(r#"["'],\s*["'][^"']+["']\s*:\s*["'][^"']*["'].*?\}"#));
static RE_CLEAN_TOOL_TAG: LazyLock<Regex> = LazyLock::new(|| re(r"<tool>.*?</tool>"));
static RE_CLEAN_PARAMS_TAG: LazyLock<Regex> = LazyLock::new(|| re(r"(?s)<params>.*?</params>"));
static RE_CLEAN_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| re(r"\s+"));

fn re(pattern: &str) -> Regex {
    #[allow(clippy::unwrap_used)]
    Regex::new(pattern).unwrap()
}

/// Prioritized tool-call shapes a local model's chat completion can come
/// back in, cascading to the next on a non-match or a JSON decode failure.
/// The explicit `TOOL:`/`PARAMS:` form and the trailing JSON-blob scan have
/// no precedent in `agent.py` and are implemented directly from the
/// extraction contract's own text; the qwen/qwen_alt channel-tag forms, the
/// `<tool>`/`<params>` XML tags, and the `name({...})` function-call form
/// are grounded on `_parse_tool_call`'s actual regex cascade.
fn parse_tool_call(content: &str) -> Option<(String, Value)> {
    if let Some(caps) = RE_TOOL_PARAMS.captures(content) {
        if let Ok(params) = serde_json::from_str(&caps[2]) {
            return Some((caps[1].to_string(), params));
        }
    }

    if let Some(caps) = RE_QWEN.captures(content) {
        if let Ok(params) = serde_json::from_str(&caps[2]) {
            return Some((caps[1].to_string(), params));
        }
    }

    if let Some(caps) = RE_QWEN_ALT.captures(content) {
        let tool_name = &caps[1];
        if ToolRegistry::is_known_tool(tool_name) {
            if let Ok(params) = serde_json::from_str(&caps[2]) {
                return Some((tool_name.to_string(), params));
            }
        }
    }

    if let (Some(tool_caps), Some(params_caps)) = (RE_TOOL_TAG.captures(content), RE_PARAMS_TAG.captures(content)) {
        if let Ok(params) = serde_json::from_str(&params_caps[1]) {
            return Some((tool_caps[1].to_string(), params));
        }
    }

    if let Some(caps) = RE_FUNC_CALL.captures(content) {
        let tool_name = &caps[1];
        if ToolRegistry::is_known_tool(tool_name) {
            if let Ok(params) = serde_json::from_str(&caps[2]) {
                return Some((tool_name.to_string(), params));
            }
        }
    }

    extract_json_blob_call(content)
}

/// Scans for a top-level JSON object anywhere in `content` that either
/// names `tool`+`params` fields directly, or a `command` field implying
/// `propose_command`. Tried last since it's the broadest shape.
fn extract_json_blob_call(content: &str) -> Option<(String, Value)> {
    for span in balanced_brace_spans(content) {
        let Ok(Value::Object(map)) = serde_json::from_str::<Value>(span) else {
            continue;
        };

        if let (Some(tool_name), Some(params)) = (map.get("tool").and_then(Value::as_str), map.get("params")) {
            if ToolRegistry::is_known_tool(tool_name) {
                return Some((tool_name.to_string(), params.clone()));
            }
        }

        if map.contains_key("command") {
            return Some(("propose_command".to_string(), Value::Object(map)));
        }
    }
    None
}

/// Yields each substring bounded by a `{` and its matching `}`, scanning
/// left to right and not recursing into spans already found.
fn balanced_brace_spans(content: &str) -> Vec<&str> {
    let bytes = content.as_bytes();
    let mut spans = Vec::new();
    let mut depth = 0i32;
    let mut start = None;
    for (i, &byte) in bytes.iter().enumerate() {
        match byte {
            b'{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            b'}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start {
                        spans.push(&content[s..=i]);
                    }
                }
            }
            _ => {}
        }
    }
    spans
}

/// Strips model-specific control tokens and stray tool-call fragments out
/// of a response before it's shown to the user, grounded on
/// `_clean_response`.
fn clean_response(content: &str) -> String {
    let content = RE_CLEAN_CHANNEL_BLOCK.replace_all(content, "");
    let content = RE_CLEAN_CHANNEL_TAIL.replace_all(&content, "");
    let content = RE_CLEAN_SPECIAL_TOKEN.replace_all(&content, "");
    let content = RE_CLEAN_JSON_OBJECT.replace_all(&content, "");
    let content = RE_CLEAN_JSON_TAIL.replace_all(&content, "");
    let content = RE_CLEAN_TOOL_TAG.replace_all(&content, "");
    let content = RE_CLEAN_PARAMS_TAG.replace_all(&content, "");
    RE_CLEAN_WHITESPACE.replace_all(&content, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_interpolates_every_tool() {
        let prompt = system_prompt();
        for tool in TOOL_DEFINITIONS {
            assert!(prompt.contains(tool.name), "missing {} in system prompt", tool.name);
        }
        assert!(!prompt.contains("{tool_list}"));
    }

    #[test]
    fn parses_explicit_tool_params_form() {
        let content = "TOOL: get_flags\nPARAMS: {\"status\": \"pending\"}";
        let (name, params) = parse_tool_call(content).expect("should parse");
        assert_eq!(name, "get_flags");
        assert_eq!(params["status"], "pending");
    }

    #[test]
    fn parses_json_blob_with_command_field_as_propose_command() {
        let content = r#"Sure, let's check: {"command": "ss -tlnp", "reason": "list ports"}"#;
        let (name, params) = parse_tool_call(content).expect("should parse");
        assert_eq!(name, "propose_command");
        assert_eq!(params["command"], "ss -tlnp");
    }

    #[test]
    fn parses_json_blob_with_tool_and_params_fields() {
        let content = r#"{"tool": "get_events", "params": {"limit": 10}}"#;
        let (name, params) = parse_tool_call(content).expect("should parse");
        assert_eq!(name, "get_events");
        assert_eq!(params["limit"], 10);
    }

    #[test]
    fn parses_qwen_tool_prefixed_call() {
        let content = r#"to=tool.get_events something <|message|>{"limit": 5}"#;
        let (name, params) = parse_tool_call(content).expect("should parse");
        assert_eq!(name, "get_events");
        assert_eq!(params["limit"], 5);
    }

    #[test]
    fn qwen_alt_requires_known_tool_membership() {
        let content = r#"to=not_a_real_tool <|message|>{"x": 1}"#;
        assert!(parse_tool_call(content).is_none());

        let content = r#"to=get_flags <|message|>{"status": "pending"}"#;
        let (name, _) = parse_tool_call(content).expect("should parse");
        assert_eq!(name, "get_flags");
    }

    #[test]
    fn parses_xml_style_tool_call_without_membership_check() {
        let content = r#"<tool>anything_goes</tool><params>{"a": 1}</params>"#;
        let (name, params) = parse_tool_call(content).expect("should parse");
        assert_eq!(name, "anything_goes");
        assert_eq!(params["a"], 1);
    }

    #[test]
    fn function_call_syntax_requires_known_tool_membership() {
        let content = r#"resolve_flag({"flag_id": 1, "status": "resolved"})"#;
        let (name, params) = parse_tool_call(content).expect("should parse");
        assert_eq!(name, "resolve_flag");
        assert_eq!(params["flag_id"], 1);

        assert!(parse_tool_call(r#"made_up_fn({"a": 1})"#).is_none());
    }

    #[test]
    fn plain_text_with_no_tool_call_returns_none() {
        assert!(parse_tool_call("Everything looks normal, no action needed.").is_none());
    }

    #[test]
    fn clean_response_strips_special_tokens_and_collapses_whitespace() {
        let content = "<|channel|>analysis<|message|>{\"a\": 1}\nFinal   answer   here";
        let cleaned = clean_response(content);
        assert_eq!(cleaned, "Final answer here");
    }

    #[test]
    fn clean_response_strips_xml_tool_markup() {
        let content = "<tool>get_events</tool><params>{\"limit\": 5}</params>All clear.";
        assert_eq!(clean_response(content), "All clear.");
    }
}
