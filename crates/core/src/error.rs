use thiserror::Error;

/// Errors shared across the workspace's foundational types (mostly
/// string/enum conversion failures at the data-model boundary).
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("unknown event kind: {0}")]
    UnknownEventKind(String),

    #[error("unknown flag status: {0}")]
    UnknownFlagStatus(String),

    #[error("unknown verdict: {0}")]
    UnknownVerdict(String),

    #[error("invalid flag status transition: {from} -> {to}")]
    InvalidFlagTransition { from: String, to: String },

    /// Catch-all for a [`crate::ConfigProvider`] implementation's own
    /// backend failures (a dropped sqlite connection, a poisoned lock).
    /// Kept as a string so this crate stays free of a dependency on any
    /// particular storage backend's error type.
    #[error("config provider error: {0}")]
    Provider(String),
}
