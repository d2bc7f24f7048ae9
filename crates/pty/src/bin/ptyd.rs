//! Standalone entry point for the PTY session service (C10): binds the
//! Unix-domain socket and serves session `create`/`attach`/`list`/`close`
//! requests until killed. Grounded on `pty_service.py`'s module-level
//! `if __name__ == "__main__"` bootstrap and on `run_main`'s
//! `tracing_subscriber::fmt()` setup.

use std::path::PathBuf;

use agentic_c_eda_pty::PtyService;

const DEFAULT_SOCKET_PATH: &str = "/var/lib/agentic-c-eda/pty.sock";

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let socket_path: PathBuf =
        std::env::var("AGENT_PTY_SOCKET").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(DEFAULT_SOCKET_PATH));

    tracing::info!(path = %socket_path.display(), "starting pty service");
    PtyService::new(socket_path).run().await
}
