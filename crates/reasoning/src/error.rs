use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReasoningError {
    #[error("request to reasoning endpoint failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("reasoning endpoint returned {status}: {body}")]
    Status { status: reqwest::StatusCode, body: String },

    #[error("could not locate a JSON object in the model response")]
    NoJsonObject,

    #[error("failed to decode model response JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] agentic_c_eda_core::CoreError),
}
