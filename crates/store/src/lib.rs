//! Event store (component C6): a connection-per-call sqlite3 backend for
//! the five tables shared by the ingestion loop, the agent, and the PTY
//! service. Every public method opens a short-lived connection on a
//! blocking thread rather than holding one open across awaits.

pub mod error;
mod schema;

pub use error::StoreError;

use std::path::{Path, PathBuf};

use agentic_c_eda_core::{ChatMessage, ChatRole, Decision, Flag, FlagStatus, PersistedEvent, Verdict};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::warn;

/// Handle to the sqlite-backed event store. Cheap to clone (it's just a
/// path); every method spawns its own connection.
#[derive(Clone)]
pub struct Store {
    db_path: PathBuf,
}

fn open_connection(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(std::time::Duration::from_secs(30))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
    Ok(conn)
}

impl Store {
    /// Ensures the database directory exists (world-writable, matching
    /// the daemon's historical deployment posture of running as a
    /// dedicated low-privilege user alongside a root-owned log reader),
    /// runs schema migrations, and fixes up file permissions on the main
    /// db file and its `-wal`/`-shm` siblings.
    pub async fn open(db_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let db_path = db_path.into();
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir)?;
            set_permissions(dir, 0o777);
        }

        let path_for_init = db_path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let conn = open_connection(&path_for_init)?;
            schema::init(&conn)?;
            Ok(())
        })
        .await??;

        fix_db_file_permissions(&db_path);

        Ok(Self { db_path })
    }

    async fn with_connection<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open_connection(&db_path)?;
            f(&conn)
        })
        .await?
    }

    // -- events ----------------------------------------------------------

    pub async fn insert_event(
        &self,
        event_type: String,
        raw_event: String,
        source_ip: Option<String>,
        port: Option<u16>,
        batch_id: Option<i64>,
    ) -> Result<i64, StoreError> {
        self.with_connection(move |conn| {
            conn.execute(
                "INSERT INTO events (timestamp, event_type, source_ip, port, raw_event, batch_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![Utc::now().to_rfc3339(), event_type, source_ip, port, raw_event, batch_id],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn get_events(
        &self,
        limit: i64,
        offset: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PersistedEvent>, StoreError> {
        self.with_connection(move |conn| {
            let mut rows = Vec::new();
            let mut push_row = |row: &rusqlite::Row| -> rusqlite::Result<()> {
                rows.push(PersistedEvent {
                    id: row.get("id")?,
                    timestamp: parse_timestamp(row.get::<_, String>("timestamp")?),
                    event_type: row.get("event_type")?,
                    source_ip: row.get("source_ip")?,
                    port: row.get::<_, Option<i64>>("port")?.map(|p| p as u16),
                    raw_event: row.get("raw_event")?,
                    batch_id: row.get("batch_id")?,
                });
                Ok(())
            };

            if let Some(since) = since {
                let mut stmt = conn.prepare(
                    "SELECT * FROM events WHERE timestamp > ?1 ORDER BY id DESC LIMIT ?2 OFFSET ?3",
                )?;
                let mut iter = stmt.query(rusqlite::params![since.to_rfc3339(), limit, offset])?;
                while let Some(row) = iter.next()? {
                    push_row(row)?;
                }
            } else {
                let mut stmt = conn.prepare("SELECT * FROM events ORDER BY id DESC LIMIT ?1 OFFSET ?2")?;
                let mut iter = stmt.query(rusqlite::params![limit, offset])?;
                while let Some(row) = iter.next()? {
                    push_row(row)?;
                }
            }
            Ok(rows)
        })
        .await
    }

    pub async fn get_latest_event_id(&self) -> Result<i64, StoreError> {
        self.with_connection(|conn| {
            Ok(conn.query_row("SELECT MAX(id) FROM events", [], |row| row.get::<_, Option<i64>>(0))?
                .unwrap_or(0))
        })
        .await
    }

    pub async fn purge_all_events(&self) -> Result<i64, StoreError> {
        self.with_connection(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
            conn.execute("DELETE FROM events", [])?;
            Ok(count)
        })
        .await
    }

    // -- decisions ---------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_decision(
        &self,
        batch_id: i64,
        event_count: i64,
        verdict: Verdict,
        confidence: f64,
        reason: Option<String>,
        threat_ips: Vec<String>,
    ) -> Result<i64, StoreError> {
        self.with_connection(move |conn| {
            let threat_ips_json = serde_json::to_string(&threat_ips)?;
            conn.execute(
                "INSERT INTO decisions (timestamp, batch_id, event_count, verdict, confidence, reason, threat_ips)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    Utc::now().to_rfc3339(),
                    batch_id,
                    event_count,
                    verdict.to_string(),
                    confidence,
                    reason,
                    threat_ips_json,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn get_decisions(&self, limit: i64, offset: i64) -> Result<Vec<Decision>, StoreError> {
        self.with_connection(move |conn| {
            let mut stmt = conn.prepare("SELECT * FROM decisions ORDER BY id DESC LIMIT ?1 OFFSET ?2")?;
            let mut iter = stmt.query(rusqlite::params![limit, offset])?;
            let mut rows = Vec::new();
            while let Some(row) = iter.next()? {
                let verdict_raw: String = row.get("verdict")?;
                let threat_ips_raw: String = row.get("threat_ips")?;
                rows.push(Decision {
                    id: row.get("id")?,
                    timestamp: parse_timestamp(row.get::<_, String>("timestamp")?),
                    batch_id: row.get("batch_id")?,
                    event_count: row.get("event_count")?,
                    verdict: Verdict::parse(&verdict_raw)?,
                    confidence: row.get("confidence")?,
                    reason: row.get("reason")?,
                    threat_ips: serde_json::from_str(&threat_ips_raw).unwrap_or_default(),
                });
            }
            Ok(rows)
        })
        .await
    }

    pub async fn get_latest_decision_id(&self) -> Result<i64, StoreError> {
        self.with_connection(|conn| {
            Ok(conn
                .query_row("SELECT MAX(id) FROM decisions", [], |row| row.get::<_, Option<i64>>(0))?
                .unwrap_or(0))
        })
        .await
    }

    pub async fn purge_all_decisions(&self) -> Result<i64, StoreError> {
        self.with_connection(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM decisions", [], |row| row.get(0))?;
            conn.execute("DELETE FROM decisions", [])?;
            Ok(count)
        })
        .await
    }

    // -- config --------------------------------------------------------

    pub async fn get_config(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        self.with_connection(move |conn| {
            Ok(conn
                .query_row("SELECT value FROM config WHERE key = ?1", [&key], |row| row.get(0))
                .ok())
        })
        .await
    }

    pub async fn set_config(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let (key, value) = (key.to_string(), value.to_string());
        self.with_connection(move |conn| {
            conn.execute(
                "INSERT INTO config (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                rusqlite::params![key, value, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_all_config(&self) -> Result<Vec<(String, String)>, StoreError> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT key, value FROM config")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    // -- flags -----------------------------------------------------------

    pub async fn insert_flag(
        &self,
        event_ids: Vec<i64>,
        severity: String,
        summary: String,
        suggested_actions: Vec<String>,
    ) -> Result<i64, StoreError> {
        self.with_connection(move |conn| {
            let event_ids_json = serde_json::to_string(&event_ids)?;
            let actions_json = serde_json::to_string(&suggested_actions)?;
            conn.execute(
                "INSERT INTO flags (timestamp, event_ids, severity, summary, suggested_actions, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending')",
                rusqlite::params![Utc::now().to_rfc3339(), event_ids_json, severity, summary, actions_json],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn get_flags(&self, status: Option<FlagStatus>, limit: i64) -> Result<Vec<Flag>, StoreError> {
        self.with_connection(move |conn| {
            let mut rows = Vec::new();
            let mut push_row = |row: &rusqlite::Row| -> rusqlite::Result<()> {
                let event_ids_raw: String = row.get("event_ids")?;
                let actions_raw: String = row.get("suggested_actions")?;
                let status_raw: String = row.get("status")?;
                rows.push(Flag {
                    id: row.get("id")?,
                    timestamp: parse_timestamp(row.get::<_, String>("timestamp")?),
                    event_ids: serde_json::from_str(&event_ids_raw).unwrap_or_default(),
                    severity: row.get("severity")?,
                    summary: row.get("summary")?,
                    suggested_actions: serde_json::from_str(&actions_raw).unwrap_or_default(),
                    status: FlagStatus::parse(&status_raw)
                        .map_err(|_| rusqlite::Error::InvalidQuery)?,
                });
                Ok(())
            };

            if let Some(status) = status {
                let mut stmt =
                    conn.prepare("SELECT * FROM flags WHERE status = ?1 ORDER BY id DESC LIMIT ?2")?;
                let mut iter = stmt.query(rusqlite::params![status.to_string(), limit])?;
                while let Some(row) = iter.next()? {
                    push_row(row)?;
                }
            } else {
                let mut stmt = conn.prepare("SELECT * FROM flags ORDER BY id DESC LIMIT ?1")?;
                let mut iter = stmt.query(rusqlite::params![limit])?;
                while let Some(row) = iter.next()? {
                    push_row(row)?;
                }
            }
            Ok(rows)
        })
        .await
    }

    /// Idempotent: succeeds silently if `flag_id` doesn't exist, matching
    /// a plain `UPDATE ... WHERE id = ?` with no row-count check.
    pub async fn update_flag_status(&self, flag_id: i64, status: FlagStatus) -> Result<(), StoreError> {
        self.with_connection(move |conn| {
            conn.execute(
                "UPDATE flags SET status = ?1 WHERE id = ?2",
                rusqlite::params![status.to_string(), flag_id],
            )?;
            Ok(())
        })
        .await
    }

    // -- chat messages -----------------------------------------------------

    pub async fn insert_chat_message(
        &self,
        role: ChatRole,
        content: String,
        metadata: Option<serde_json::Value>,
    ) -> Result<i64, StoreError> {
        self.with_connection(move |conn| {
            let metadata_json = metadata.map(|m| m.to_string());
            conn.execute(
                "INSERT INTO chat_messages (timestamp, role, content, metadata) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![Utc::now().to_rfc3339(), role.to_string(), content, metadata_json],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Returns the most recent `limit` messages, oldest-first.
    pub async fn get_chat_messages(&self, limit: i64) -> Result<Vec<ChatMessage>, StoreError> {
        let mut rows: Vec<ChatMessage> = self
            .with_connection(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT * FROM chat_messages ORDER BY id DESC LIMIT ?1")?;
                let mut iter = stmt.query(rusqlite::params![limit])?;
                let mut rows = Vec::new();
                while let Some(row) = iter.next()? {
                    let role_raw: String = row.get("role")?;
                    let metadata_raw: Option<String> = row.get("metadata")?;
                    rows.push(ChatMessage {
                        id: row.get("id")?,
                        timestamp: parse_timestamp(row.get::<_, String>("timestamp")?),
                        role: ChatRole::from_str_or_user(&role_raw),
                        content: row.get("content")?,
                        metadata: metadata_raw.and_then(|raw| serde_json::from_str(&raw).ok()),
                    });
                }
                Ok(rows)
            })
            .await?;
        rows.reverse();
        Ok(rows)
    }

    pub async fn clear_chat_messages(&self) -> Result<(), StoreError> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM chat_messages", [])?;
            Ok(())
        })
        .await
    }

    // -- maintenance -----------------------------------------------------

    pub async fn cleanup_old_records(&self, retention_days: i64) -> Result<(), StoreError> {
        self.with_connection(move |conn| {
            let cutoff = (Utc::now() - chrono::Duration::days(retention_days)).to_rfc3339();
            conn.execute("DELETE FROM events WHERE timestamp < ?1", [&cutoff])?;
            conn.execute("DELETE FROM decisions WHERE timestamp < ?1", [&cutoff])?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl agentic_c_eda_core::ConfigProvider for Store {
    async fn get_config(&self, key: &str) -> Result<Option<String>, agentic_c_eda_core::CoreError> {
        Store::get_config(self, key).await.map_err(Into::into)
    }

    async fn set_config(&self, key: &str, value: &str) -> Result<(), agentic_c_eda_core::CoreError> {
        Store::set_config(self, key, value).await.map_err(Into::into)
    }
}

trait ChatRoleExt {
    fn from_str_or_user(raw: &str) -> ChatRole;
}

impl ChatRoleExt for ChatRole {
    fn from_str_or_user(raw: &str) -> ChatRole {
        use std::str::FromStr;
        ChatRole::from_str(raw).unwrap_or(ChatRole::User)
    }
}

fn parse_timestamp(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

fn set_permissions(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(error) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)) {
        warn!(path = %path.display(), %error, "could not set permissions");
    }
}

fn fix_db_file_permissions(db_path: &Path) {
    let Some(file_name) = db_path.file_name().and_then(|n| n.to_str()) else {
        return;
    };
    let Some(dir) = db_path.parent() else {
        return;
    };
    for suffix in ["", "-shm", "-wal"] {
        let candidate = dir.join(format!("{file_name}{suffix}"));
        if candidate.exists() {
            set_permissions(&candidate, 0o666);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_temp_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open(dir.path().join("agentic-c-eda.db")).await.expect("open store");
        (store, dir)
    }

    #[tokio::test]
    async fn insert_and_fetch_events_reverse_chronological() {
        let (store, _dir) = open_temp_store().await;
        store
            .insert_event("SSH_AUTH_FAIL".to_string(), "raw1".to_string(), Some("1.2.3.4".to_string()), None, Some(1))
            .await
            .unwrap();
        store
            .insert_event("SSH_AUTH_SUCCESS".to_string(), "raw2".to_string(), None, None, Some(1))
            .await
            .unwrap();

        let events = store.get_events(10, 0, None).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "SSH_AUTH_SUCCESS");
        assert_eq!(events[1].source_ip.as_deref(), Some("1.2.3.4"));
    }

    #[tokio::test]
    async fn latest_event_id_is_zero_when_empty() {
        let (store, _dir) = open_temp_store().await;
        assert_eq!(store.get_latest_event_id().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn insert_decision_round_trips_threat_ips() {
        let (store, _dir) = open_temp_store().await;
        store
            .insert_decision(1, 3, Verdict::Flag, 0.0, Some("brute force".to_string()), vec!["9.9.9.9".to_string()])
            .await
            .unwrap();

        let decisions = store.get_decisions(10, 0).await.unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].verdict, Verdict::Flag);
        assert_eq!(decisions[0].threat_ips, vec!["9.9.9.9".to_string()]);
    }

    #[tokio::test]
    async fn config_upsert_overwrites_value() {
        let (store, _dir) = open_temp_store().await;
        store.set_config("sensitivity", "5").await.unwrap();
        store.set_config("sensitivity", "9").await.unwrap();
        assert_eq!(store.get_config("sensitivity").await.unwrap(), Some("9".to_string()));
    }

    #[tokio::test]
    async fn update_flag_status_on_missing_id_is_a_silent_no_op() {
        let (store, _dir) = open_temp_store().await;
        store.update_flag_status(999, FlagStatus::Resolved).await.unwrap();
    }

    #[tokio::test]
    async fn flags_round_trip_with_pending_initial_status() {
        let (store, _dir) = open_temp_store().await;
        let id = store
            .insert_flag(vec![1, 2], "critical".to_string(), "brute force".to_string(), vec!["block ip".to_string()])
            .await
            .unwrap();
        let flags = store.get_flags(None, 10).await.unwrap();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].id, id);
        assert_eq!(flags[0].status, FlagStatus::Pending);
    }

    #[tokio::test]
    async fn chat_messages_return_oldest_first() {
        let (store, _dir) = open_temp_store().await;
        store.insert_chat_message(ChatRole::User, "hi".to_string(), None).await.unwrap();
        store.insert_chat_message(ChatRole::Assistant, "hello".to_string(), None).await.unwrap();

        let messages = store.get_chat_messages(10).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "hi");
        assert_eq!(messages[1].content, "hello");
    }

    #[tokio::test]
    async fn clear_chat_messages_empties_the_table() {
        let (store, _dir) = open_temp_store().await;
        store.insert_chat_message(ChatRole::User, "hi".to_string(), None).await.unwrap();
        store.clear_chat_messages().await.unwrap();
        assert!(store.get_chat_messages(10).await.unwrap().is_empty());
    }
}
