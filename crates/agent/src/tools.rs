//! Tool dispatch (component C8): the six named tools the chat agent can
//! invoke, and the executor that actually carries out an approved
//! proposal. Proposals are never auto-executed — `execute_tool` only ever
//! returns a `Proposal` outcome; a caller (the daemon's chat endpoint)
//! decides whether and when to hand it to [`ProposalExecutor::execute`].

use agentic_c_eda_core::FlagStatus;
use agentic_c_eda_store::Store;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One entry of the tool list interpolated into the system prompt.
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
}

pub const TOOL_DEFINITIONS: &[ToolDefinition] = &[
    ToolDefinition {
        name: "get_events",
        description: "Get recent security events from the database",
    },
    ToolDefinition {
        name: "get_flags",
        description: "Get pending flags that need user attention",
    },
    ToolDefinition {
        name: "propose_command",
        description: "Propose a shell command for user to approve and run. Use this for ANY investigation: checking ports, looking up IPs, reading logs, etc.",
    },
    ToolDefinition {
        name: "propose_ignore_port",
        description: "Propose adding a port to the ignore list",
    },
    ToolDefinition {
        name: "propose_ignore_ip",
        description: "Propose adding an IP to the ignore list",
    },
    ToolDefinition {
        name: "resolve_flag",
        description: "Mark a flag as resolved or dismissed",
    },
];

/// Outcome of a tool call, tagged the way the dashboard's event stream
/// expects it on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolOutcome {
    ToolResult { data: Value },
    Proposal { action: String, data: Value },
    Error { message: String },
}

impl ToolOutcome {
    fn error(message: impl Into<String>) -> Self {
        Self::Error { message: message.into() }
    }
}

#[derive(Deserialize)]
struct GetEventsParams {
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    10
}

#[derive(Deserialize)]
struct GetFlagsParams {
    status: Option<String>,
}

#[derive(Deserialize)]
struct ProposeCommandParams {
    command: String,
    reason: Option<String>,
    description: Option<String>,
}

#[derive(Deserialize)]
struct ProposeIgnorePortParams {
    port: u16,
    reason: String,
}

#[derive(Deserialize)]
struct ProposeIgnoreIpParams {
    ip: String,
    reason: String,
}

#[derive(Deserialize)]
struct ResolveFlagParams {
    flag_id: i64,
    status: String,
}

/// Dispatches tool calls by name against the event store. Grounded on
/// `ToolRegistry` (`tools.py`): a flat name-keyed handler table with no
/// separate registration mechanism.
pub struct ToolRegistry {
    store: Store,
}

impl ToolRegistry {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn is_known_tool(name: &str) -> bool {
        TOOL_DEFINITIONS.iter().any(|t| t.name == name)
    }

    pub async fn execute_tool(&self, name: &str, params: Value) -> ToolOutcome {
        match name {
            "get_events" => self.get_events(params).await,
            "get_flags" => self.get_flags(params).await,
            "propose_command" => propose_command(params),
            "propose_ignore_port" => propose_ignore_port(params),
            "propose_ignore_ip" => propose_ignore_ip(params),
            "resolve_flag" => self.resolve_flag(params).await,
            other => ToolOutcome::error(format!("Unknown tool: {other}")),
        }
    }

    async fn get_events(&self, params: Value) -> ToolOutcome {
        let params: GetEventsParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(error) => return ToolOutcome::error(error.to_string()),
        };
        match self.store.get_events(params.limit, 0, None).await {
            Ok(events) => ToolOutcome::ToolResult { data: json!({ "events": events }) },
            Err(error) => ToolOutcome::error(error.to_string()),
        }
    }

    async fn get_flags(&self, params: Value) -> ToolOutcome {
        let params: GetFlagsParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(error) => return ToolOutcome::error(error.to_string()),
        };
        // An unrecognized status string quietly yields no rows, the same
        // way an unvalidated `WHERE status = ?` would.
        let status = params.status.and_then(|raw| FlagStatus::parse(&raw).ok());
        match self.store.get_flags(status, 50).await {
            Ok(flags) => ToolOutcome::ToolResult { data: json!({ "flags": flags }) },
            Err(error) => ToolOutcome::error(error.to_string()),
        }
    }

    async fn resolve_flag(&self, params: Value) -> ToolOutcome {
        let params: ResolveFlagParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(error) => return ToolOutcome::error(error.to_string()),
        };
        let Ok(status) = FlagStatus::parse(&params.status) else {
            return ToolOutcome::error("Status must be 'resolved' or 'dismissed'");
        };
        if !status.is_valid_resolution() {
            return ToolOutcome::error("Status must be 'resolved' or 'dismissed'");
        }
        match self.store.update_flag_status(params.flag_id, status).await {
            Ok(()) => ToolOutcome::ToolResult {
                data: json!({ "flag_id": params.flag_id, "status": status.to_string() }),
            },
            Err(error) => ToolOutcome::error(error.to_string()),
        }
    }
}

fn propose_command(params: Value) -> ToolOutcome {
    let params: ProposeCommandParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(error) => return ToolOutcome::error(error.to_string()),
    };
    let reason = params.reason.or(params.description).unwrap_or_else(|| "No reason provided".to_string());
    ToolOutcome::Proposal {
        action: "run_command".to_string(),
        data: json!({ "command": params.command, "reason": reason }),
    }
}

fn propose_ignore_port(params: Value) -> ToolOutcome {
    let params: ProposeIgnorePortParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(error) => return ToolOutcome::error(error.to_string()),
    };
    ToolOutcome::Proposal {
        action: "ignore_port".to_string(),
        data: json!({ "port": params.port, "reason": params.reason }),
    }
}

fn propose_ignore_ip(params: Value) -> ToolOutcome {
    let params: ProposeIgnoreIpParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(error) => return ToolOutcome::error(error.to_string()),
    };
    ToolOutcome::Proposal {
        action: "ignore_ip".to_string(),
        data: json!({ "ip": params.ip, "reason": params.reason }),
    }
}

/// Carries out an approved proposal. `run_command` is deliberately never
/// implemented here — shell execution is the PTY service's job
/// (components C9/C10), never something a proposal auto-triggers.
pub struct ProposalExecutor {
    store: Store,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl ExecutionResult {
    fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: Some(message.into()), error: None }
    }

    fn err(error: impl Into<String>) -> Self {
        Self { success: false, message: None, error: Some(error.into()) }
    }
}

impl ProposalExecutor {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn execute(&self, action: &str, data: &Value) -> ExecutionResult {
        match action {
            "run_command" => ExecutionResult::err("Commands should be executed via PTY service"),
            "ignore_port" => match data.get("port").and_then(Value::as_u64) {
                Some(port) => self.add_ignore_entry(agentic_c_eda_core::config::keys::IGNORED_PORTS, &port.to_string(), "port").await,
                None => ExecutionResult::err("missing 'port'"),
            },
            "ignore_ip" => match data.get("ip").and_then(Value::as_str) {
                Some(ip) => self.add_ignore_entry(agentic_c_eda_core::config::keys::IGNORED_IPS, ip, "IP").await,
                None => ExecutionResult::err("missing 'ip'"),
            },
            other => ExecutionResult::err(format!("Unknown action: {other}")),
        }
    }

    /// `ignored_ports`/`ignored_ips` are stored as a newline-joined, sorted,
    /// deduplicated set in a single config row, matching `_add_ignore_port`
    /// / `_add_ignore_ip`.
    async fn add_ignore_entry(&self, key: &str, value: &str, noun: &str) -> ExecutionResult {
        let current = self.store.get_config(key).await.ok().flatten().unwrap_or_default();
        let mut entries: std::collections::BTreeSet<String> =
            current.split('\n').filter(|s| !s.is_empty()).map(str::to_string).collect();
        entries.insert(value.to_string());
        let joined = entries.into_iter().collect::<Vec<_>>().join("\n");
        match self.store.set_config(key, &joined).await {
            Ok(()) => ExecutionResult::ok(format!("Added {noun} {value} to ignore list")),
            Err(error) => ExecutionResult::err(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn propose_command_defaults_missing_reason() {
        let outcome = propose_command(json!({ "command": "ss -tlnp" }));
        match outcome {
            ToolOutcome::Proposal { action, data } => {
                assert_eq!(action, "run_command");
                assert_eq!(data["reason"], "No reason provided");
            }
            other => panic!("expected a proposal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn resolve_flag_rejects_pending_as_a_target_status() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open(dir.path().join("db.sqlite3")).await.expect("open store");
        let registry = ToolRegistry::new(store);
        let outcome = registry.execute_tool("resolve_flag", json!({ "flag_id": 1, "status": "pending" })).await;
        assert!(matches!(outcome, ToolOutcome::Error { .. }));
    }

    #[tokio::test]
    async fn unknown_tool_name_is_an_error_outcome() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open(dir.path().join("db.sqlite3")).await.expect("open store");
        let registry = ToolRegistry::new(store);
        let outcome = registry.execute_tool("delete_everything", json!({})).await;
        assert!(matches!(outcome, ToolOutcome::Error { .. }));
    }

    #[tokio::test]
    async fn ignore_port_proposal_executes_as_a_sorted_deduplicated_list() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open(dir.path().join("db.sqlite3")).await.expect("open store");
        let executor = ProposalExecutor::new(store.clone());
        executor.execute("ignore_port", &json!({ "port": 2222 })).await;
        executor.execute("ignore_port", &json!({ "port": 22 })).await;
        let saved = store.get_config(agentic_c_eda_core::config::keys::IGNORED_PORTS).await.unwrap().unwrap();
        assert_eq!(saved, "22\n2222");
    }
}
