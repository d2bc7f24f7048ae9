//! Shared data model, event grammar, and error types for the agentic-c-eda
//! workspace. Every other crate in the workspace depends on this one so
//! there is a single definition of the wire/row shapes that cross process
//! and component boundaries.

pub mod config;
pub mod error;
pub mod event;
pub mod model;

pub use config::ConfigProvider;
pub use error::CoreError;
pub use event::{parse, EventKind, NormalizedEvent};
pub use model::{
    Batch, ChatMessage, ChatRole, Decision, Flag, FlagStatus, PersistedEvent, PtySessionInfo,
    Verdict,
};
