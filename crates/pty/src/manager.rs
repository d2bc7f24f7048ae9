//! Session registry and idle-timeout sweeper (component C9), grounded on
//! `PTYSessionManager`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::info;

use crate::error::PtyError;
use crate::session::PtySession;

const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 30;

#[derive(Default)]
pub struct PtySessionManager {
    sessions: Mutex<HashMap<String, Arc<PtySession>>>,
}

impl PtySessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_session(
        &self,
        session_id: String,
        command: String,
        timeout: Duration,
    ) -> Result<Arc<PtySession>, PtyError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(old) = sessions.remove(&session_id) {
            old.close();
        }

        let session = Arc::new(PtySession::start(session_id.clone(), command, timeout)?);
        sessions.insert(session_id, Arc::clone(&session));
        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Option<Arc<PtySession>> {
        self.sessions.lock().await.get(session_id).cloned()
    }

    pub async fn close_session(&self, session_id: &str) {
        if let Some(session) = self.sessions.lock().await.remove(session_id) {
            session.close();
        }
    }

    pub async fn cleanup_stale_sessions(&self) {
        let mut sessions = self.sessions.lock().await;
        let mut to_remove = Vec::new();
        for (id, session) in sessions.iter() {
            if session.is_timed_out() {
                info!(session_id = %id, "session timed out, closing");
                session.close();
                to_remove.push(id.clone());
            } else if !session.is_running() {
                to_remove.push(id.clone());
            }
        }
        for id in to_remove {
            sessions.remove(&id);
        }
    }

    pub async fn start_cleanup_loop(&self) -> ! {
        let mut ticker = tokio::time::interval(Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS));
        loop {
            ticker.tick().await;
            self.cleanup_stale_sessions().await;
        }
    }

    pub async fn get_active_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn list_sessions(&self) -> Vec<Arc<PtySession>> {
        self.sessions.lock().await.values().cloned().collect()
    }

    pub async fn close_all(&self) {
        let mut sessions = self.sessions.lock().await;
        for session in sessions.values() {
            session.close();
        }
        sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_session_replaces_an_existing_one_with_the_same_id() {
        let manager = PtySessionManager::new();
        manager.create_session("s1".to_string(), "echo one".to_string(), Duration::from_secs(60)).await.unwrap();
        manager.create_session("s1".to_string(), "echo two".to_string(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(manager.get_active_count().await, 1);
    }

    #[tokio::test]
    async fn close_session_removes_it_from_the_registry() {
        let manager = PtySessionManager::new();
        manager.create_session("s1".to_string(), "sleep 1".to_string(), Duration::from_secs(60)).await.unwrap();
        manager.close_session("s1").await;
        assert!(manager.get_session("s1").await.is_none());
    }
}
