//! The reasoning endpoint client (C4) and service discovery (C11). Both
//! talk to the same configurable OpenAI-compatible chat-completions
//! endpoint, so they share one crate and one HTTP error type.

pub mod client;
pub mod error;
pub mod service_discovery;

pub use client::{Analysis, ReasoningClient};
pub use error::ReasoningError;
pub use service_discovery::{discover_services, MANUAL_TRUSTED_PORTS};
