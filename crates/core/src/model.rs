//! Row-shaped data model, mirroring the event store's five tables
//! (`events`, `decisions`, `config`, `flags`, `chat_messages`).

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::CoreError;

/// A single row of the `events` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedEvent {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub source_ip: Option<String>,
    pub port: Option<u16>,
    pub raw_event: String,
    pub batch_id: Option<i64>,
}

/// A buffered group of parsed events awaiting a reasoning verdict.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub batch_id: i64,
    pub events: Vec<PersistedEvent>,
}

/// The reasoning client's closed verdict vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Verdict {
    Allow,
    Flag,
    Block,
}

impl Verdict {
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        Self::from_str(raw.trim()).map_err(|_| CoreError::UnknownVerdict(raw.to_string()))
    }
}

/// A row of the `decisions` table: one per reasoned batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub batch_id: i64,
    pub event_count: i64,
    pub verdict: Verdict,
    pub confidence: f64,
    pub reason: Option<String>,
    pub threat_ips: Vec<String>,
}

/// Workflow state for a row of the `flags` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum FlagStatus {
    Pending,
    Resolved,
    Dismissed,
}

impl FlagStatus {
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        Self::from_str(raw.trim()).map_err(|_| CoreError::UnknownFlagStatus(raw.to_string()))
    }

    /// The chat agent's `resolve_flag` tool only accepts these two targets;
    /// `pending` is the initial state a flag is born in and never a valid
    /// resolution.
    pub fn is_valid_resolution(self) -> bool {
        matches!(self, FlagStatus::Resolved | FlagStatus::Dismissed)
    }
}

/// A row of the `flags` table: an operator-visible escalation raised by the
/// reasoning loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flag {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_ids: Vec<i64>,
    pub severity: String,
    pub summary: String,
    pub suggested_actions: Vec<String>,
    pub status: FlagStatus,
}

/// Speaker of a row in the `chat_messages` table. `System` covers the
/// note the agent loop writes after executing an approved proposal; it is
/// never a role sent to the LLM, only a log entry in the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    Tool,
    System,
}

/// A row of the `chat_messages` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub role: ChatRole,
    pub content: String,
    pub metadata: Option<serde_json::Value>,
}

/// Summary of a live PTY session, as reported by `ptyd`'s `list` action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PtySessionInfo {
    pub session_id: String,
    pub command: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub alive: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_parses_case_and_whitespace_insensitively() {
        assert_eq!(Verdict::parse("BLOCK").unwrap(), Verdict::Block);
        assert_eq!(Verdict::parse(" ALLOW \n").unwrap(), Verdict::Allow);
    }

    #[test]
    fn verdict_rejects_unknown_text() {
        assert!(Verdict::parse("MAYBE").is_err());
    }

    #[test]
    fn flag_status_round_trips_through_display() {
        for status in [FlagStatus::Pending, FlagStatus::Resolved, FlagStatus::Dismissed] {
            let text = status.to_string();
            assert_eq!(FlagStatus::parse(&text).unwrap(), status);
        }
    }

    #[test]
    fn only_resolved_and_dismissed_are_valid_resolutions() {
        assert!(FlagStatus::Resolved.is_valid_resolution());
        assert!(FlagStatus::Dismissed.is_valid_resolution());
        assert!(!FlagStatus::Pending.is_valid_resolution());
    }
}
