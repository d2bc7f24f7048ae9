//! Interactive PTY sessions (C9) and their Unix-socket front end (C10):
//! the agent proposes a shell command, a human approves it, and this
//! crate runs it in a real pseudo-terminal so interactive programs
//! (password prompts, pagers, confirmation dialogs) behave the same way
//! they would at a real shell.

pub mod error;
pub mod manager;
pub mod prompts;
pub mod service;
pub mod session;

pub use error::PtyError;
pub use manager::PtySessionManager;
pub use prompts::{detect_prompt_type, CONFIRM_PROMPTS, PASSWORD_PROMPTS};
pub use service::PtyService;
pub use session::PtySession;
