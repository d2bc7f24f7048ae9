//! Runtime configuration contract.
//!
//! Configuration lives in the event store's `config` table, not in a
//! cached struct: every component re-reads the keys it needs on each use
//! so that an operator edit (or a chat-driven `propose_ignore_port`
//! resolution) takes effect on the next batch/request without a restart.

use async_trait::async_trait;

/// Async accessor for the shared key/value configuration table.
///
/// Implementors must not cache values across calls; callers that need a
/// value more than once in the same operation should read it once and
/// pass it down rather than relying on the provider to memoize.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Fetch a single config value by key, or `None` if unset.
    async fn get_config(&self, key: &str) -> Result<Option<String>, crate::CoreError>;

    /// Overwrite a single config value.
    async fn set_config(&self, key: &str, value: &str) -> Result<(), crate::CoreError>;
}

/// Well-known config keys, gathered here so producers and consumers don't
/// drift on spelling.
pub mod keys {
    pub const BATCH_INTERVAL: &str = "batch_interval";
    pub const SENSITIVITY: &str = "sensitivity";
    pub const LLM_API_URL: &str = "llm_api_url";
    pub const LLM_API_KEY: &str = "llm_api_key";
    pub const LLM_MODEL: &str = "llm_model";
    pub const LLM_TIMEOUT: &str = "llm_timeout";
    pub const TRUSTED_PORTS_DYNAMIC: &str = "trusted_ports_dynamic";
    pub const IGNORED_PORTS: &str = "ignored_ports";
    pub const IGNORED_IPS: &str = "ignored_ips";
}
