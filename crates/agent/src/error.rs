use thiserror::Error;

/// Errors surfaced by the store-backed parts of the agent loop. The LLM
/// call itself never raises one of these — a network or decode failure
/// there becomes response text, matching `_call_llm`'s own
/// catch-and-stringify behaviour.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Store(#[from] agentic_c_eda_store::StoreError),

    #[error(transparent)]
    Core(#[from] agentic_c_eda_core::CoreError),

    #[error("tool call referenced an unknown tool: {0}")]
    UnknownTool(String),
}
