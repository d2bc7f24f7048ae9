use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("blocking task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown verdict or flag status in stored row: {0}")]
    Core(#[from] agentic_c_eda_core::CoreError),
}

impl From<StoreError> for agentic_c_eda_core::CoreError {
    fn from(error: StoreError) -> Self {
        agentic_c_eda_core::CoreError::Provider(error.to_string())
    }
}
