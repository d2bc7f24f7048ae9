//! Entry point for `agentic-c-edad`: the resident sensor/reasoning
//! daemon. Wires the event store (C6), a one-time service-discovery pass
//! (C11), and the log-tailer/reduction/reasoning batch loop (C2-C5)
//! together, then runs that loop forever. Grounded on
//! `original_source/daemon/main.py`'s `main()` phase ordering (database,
//! then service discovery, then sensors) and on `mcp-server::run_main`'s
//! logging bootstrap.
//!
//! The chat agent (C7/C8) and the PTY service (C9/C10) are deliberately
//! not started from here: in the original system they live in a
//! separate process (the web dashboard, and now `ptyd`), and that split
//! is preserved — this binary owns only the always-on sensing loop.

use std::collections::HashSet;
use std::path::PathBuf;

use agentic_c_eda_core::config::keys;
use agentic_c_eda_core::ConfigProvider;
use agentic_c_eda_ingest::{LogTailer, ReductionPipeline};
use agentic_c_eda_reasoning::{discover_services, ReasoningClient};
use agentic_c_eda_scheduler::BatchScheduler;
use agentic_c_eda_store::Store;
use tracing_subscriber::EnvFilter;

const DEFAULT_DB_PATH: &str = "/var/lib/agentic-c-eda/agentic-c-eda.db";
const DEFAULT_LOG_FILES: &[&str] = &["/var/log/syslog", "/var/log/auth.log"];
const NETWORK_TAG: &str = "[Agent]";
const INTERNAL_SUBNET: &str = "10.0.0.";

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let db_path: PathBuf =
        std::env::var("AGENT_DB_PATH").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(DEFAULT_DB_PATH));
    tracing::info!(path = %db_path.display(), "opening event store");
    let store = Store::open(db_path).await?;

    run_service_discovery(&store).await;

    let tailer = LogTailer::start(DEFAULT_LOG_FILES.iter().map(PathBuf::from));
    let pipeline = ReductionPipeline::new(NETWORK_TAG, INTERNAL_SUBNET);
    let reasoning = ReasoningClient::new();
    let mut scheduler = BatchScheduler::new(tailer, pipeline, reasoning, store).await?;

    tracing::info!("monitoring active, awaiting events");
    scheduler.run().await
}

/// Runs once at startup: scans listening ports, asks the reasoning
/// endpoint which look trustworthy for this host, and persists the
/// union with the manual whitelist to `trusted_ports_dynamic` so the
/// reduction pipeline's next `refresh()` picks it up. Grounded on
/// `main.py`'s "Phase 1: Service Discovery".
async fn run_service_discovery(store: &Store) {
    let http = reqwest::Client::new();
    let api_url = store
        .get_config(keys::LLM_API_URL)
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| "http://localhost:1234/v1/chat/completions".to_string());
    let model =
        store.get_config(keys::LLM_MODEL).await.ok().flatten().unwrap_or_else(|| "qwen/qwen3-4b-2507".to_string());
    let timeout_secs =
        store.get_config(keys::LLM_TIMEOUT).await.ok().flatten().and_then(|raw| raw.parse().ok()).unwrap_or(10);

    let (trusted_ports, services): (HashSet<u16>, _) =
        discover_services(&http, &api_url, &model, timeout_secs).await;
    tracing::info!(count = trusted_ports.len(), "service discovery found trusted ports");

    let ports: Vec<u16> = trusted_ports.into_iter().collect();
    if let Ok(encoded) = serde_json::to_string(&ports) {
        if let Err(error) = store.set_config(keys::TRUSTED_PORTS_DYNAMIC, &encoded).await {
            tracing::warn!(%error, "failed to persist trusted_ports_dynamic");
        }
    }
    tracing::debug!(?services, "identified services on trusted ports");
}
