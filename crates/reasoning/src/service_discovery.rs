//! Service discovery (component C11): enumerate listening ports with `ss`,
//! ask the reasoning endpoint which ones look trustworthy for a home
//! server, and union the result with a static manual whitelist.

use std::collections::{HashMap, HashSet};

use regex::Regex;
use std::sync::LazyLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ReasoningError;

const SERVICE_PROMPT: &str = r#"You are a network security expert analyzing a Linux server.

This is a personal home machine, so common applications like Steam, media servers,
development tools, and desktop sharing are EXPECTED and SAFE.

For each service, determine if it's TRUSTED (safe for a home network).

TRUSTED (safe) examples:
- Gaming: Steam, game servers
- Media: Plex, Squeezebox, Jellyfin, Kodi
- Development: VS Code, LM Studio, Docker, Node.js, Flask
- Desktop: Synergy, KDE Connect, VNC, RDP
- System: SSH, HTTP, databases
- Communication: MQTT, Home Assistant

Only mark as UNKNOWN if it's:
- A service you've never heard of
- Suspicious malware-like process names
- Crypto miners or botnets

Respond with JSON only:
{
    "trusted_ports": [list of port numbers that are safe],
    "services": {"port": "service_name", ...}
}"#;

const FALLBACK_TRUSTED_PORTS: &[u16] = &[22, 80, 443, 53];

/// Compiled-in whitelist, unioned with whatever the LLM flags as trusted.
/// Mirrors the daemon's manual override list.
pub const MANUAL_TRUSTED_PORTS: &[u16] =
    &[22, 80, 443, 1234, 3389, 8080, 9000, 24800, 1716, 27036, 27060];

fn known_services() -> &'static HashMap<u16, &'static str> {
    static MAP: LazyLock<HashMap<u16, &'static str>> = LazyLock::new(|| {
        HashMap::from([
            (22, "SSH"),
            (53, "DNS"),
            (80, "HTTP"),
            (443, "HTTPS"),
            (1234, "LM-Studio"),
            (1716, "KDE-Connect"),
            (1883, "MQTT"),
            (3000, "Node.js"),
            (3306, "MySQL"),
            (3389, "RDP"),
            (5000, "Flask/Dev"),
            (5432, "PostgreSQL"),
            (6379, "Redis"),
            (8080, "HTTP-Proxy"),
            (9000, "PHP-FPM/Squeezebox"),
            (24800, "Synergy"),
            (27017, "MongoDB"),
            (27036, "Steam"),
            (27060, "Steam"),
            (32400, "Plex"),
        ])
    });
    &MAP
}

fn identify_service(port: u16, process: &str) -> String {
    if let Some(name) = known_services().get(&port) {
        return name.to_string();
    }
    let lower = process.to_lowercase();
    if lower.contains("steam") {
        "Steam".to_string()
    } else if lower.contains("lm-studio") || lower.contains("lmstudio") {
        "LM-Studio".to_string()
    } else if lower.contains("code") {
        "VS-Code".to_string()
    } else if lower.contains("kde") {
        "KDE-Service".to_string()
    } else if process != "unknown" {
        process.to_string()
    } else {
        format!("Unknown:{port}")
    }
}

#[derive(Debug, Clone)]
struct ListeningPort {
    port: u16,
    process: String,
}

static RE_PORT: LazyLock<Regex> = LazyLock::new(|| re(r":(\d+)$"));
static RE_PROCESS: LazyLock<Regex> = LazyLock::new(|| re(r#"\("([^"]+)""#));

fn re(pattern: &str) -> Regex {
    #[allow(clippy::unwrap_used)]
    Regex::new(pattern).unwrap()
}

/// Runs `ss -tlnp` and parses its output into listening ports. An
/// unavailable or failing `ss` yields an empty list, not an error — the
/// caller degrades to the static fallback trust list.
async fn get_listening_ports() -> Vec<ListeningPort> {
    let output = match tokio::time::timeout(
        std::time::Duration::from_secs(10),
        tokio::process::Command::new("ss").arg("-tlnp").output(),
    )
    .await
    {
        Ok(Ok(output)) => output,
        Ok(Err(error)) => {
            warn!(%error, "failed to spawn ss for port scan");
            return Vec::new();
        }
        Err(_) => {
            warn!("ss -tlnp timed out");
            return Vec::new();
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut ports = Vec::new();
    for line in stdout.trim().lines().skip(1) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 6 {
            continue;
        }
        let local_addr = parts[3];
        let Some(port) = RE_PORT.captures(local_addr).and_then(|c| c[1].parse::<u16>().ok()) else {
            continue;
        };
        let mut process = "unknown".to_string();
        for part in &parts {
            if part.contains("users:") {
                if let Some(caps) = RE_PROCESS.captures(part) {
                    process = caps[1].to_string();
                }
            }
        }
        ports.push(ListeningPort { port, process });
    }
    ports
}

#[derive(Debug, Deserialize, Serialize, Default)]
struct ServiceAnalysis {
    #[serde(default)]
    trusted_ports: Vec<u16>,
    #[serde(default)]
    services: HashMap<String, String>,
    #[serde(default)]
    warnings: Vec<String>,
}

async fn analyze_services_with_llm(
    http: &reqwest::Client,
    api_url: &str,
    model: &str,
    timeout_secs: u64,
    ports: &[ListeningPort],
) -> ServiceAnalysis {
    if ports.is_empty() {
        return ServiceAnalysis::default();
    }

    let service_list = ports
        .iter()
        .map(|p| format!("Port {}: {} (process: {})", p.port, identify_service(p.port, &p.process), p.process))
        .collect::<Vec<_>>()
        .join("\n");

    let payload = serde_json::json!({
        "model": model,
        "messages": [
            {"role": "system", "content": SERVICE_PROMPT},
            {"role": "user", "content": format!("Analyze these {} open ports:\n{service_list}", ports.len())},
        ],
        "temperature": 0.1,
        "max_tokens": 500,
    });

    match try_analyze(http, api_url, timeout_secs, &payload).await {
        Ok(analysis) => analysis,
        Err(error) => {
            warn!(%error, "LLM service analysis failed, using default trust list");
            ServiceAnalysis {
                trusted_ports: FALLBACK_TRUSTED_PORTS.to_vec(),
                services: ports
                    .iter()
                    .map(|p| (p.port.to_string(), identify_service(p.port, &p.process)))
                    .collect(),
                warnings: vec!["LLM unavailable - using default trust list".to_string()],
            }
        }
    }
}

async fn try_analyze(
    http: &reqwest::Client,
    api_url: &str,
    timeout_secs: u64,
    payload: &serde_json::Value,
) -> Result<ServiceAnalysis, ReasoningError> {
    let response = http
        .post(api_url)
        .timeout(std::time::Duration::from_secs(timeout_secs * 2))
        .json(payload)
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ReasoningError::Status { status, body });
    }
    let body: serde_json::Value = response.json().await?;
    let content = body
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or(ReasoningError::NoJsonObject)?;

    let cleaned = content.replace("```json", "").replace("```", "");
    Ok(serde_json::from_str(cleaned.trim())?)
}

/// Discovers listening ports, asks the reasoning endpoint which are
/// trustworthy, and returns the union with the manual whitelist alongside
/// a human-readable service map. Call once at daemon startup; the result
/// is persisted to config under `trusted_ports_dynamic` by the caller.
pub async fn discover_services(
    http: &reqwest::Client,
    api_url: &str,
    model: &str,
    timeout_secs: u64,
) -> (HashSet<u16>, HashMap<String, String>) {
    let ports = get_listening_ports().await;
    let analysis = analyze_services_with_llm(http, api_url, model, timeout_secs, &ports).await;

    let mut trusted: HashSet<u16> = analysis.trusted_ports.into_iter().collect();
    trusted.extend(MANUAL_TRUSTED_PORTS.iter().copied());

    (trusted, analysis.services)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identify_service_prefers_known_port_table() {
        assert_eq!(identify_service(22, "sshd"), "SSH");
        assert_eq!(identify_service(32400, "plex-media-server"), "Plex");
    }

    #[test]
    fn identify_service_falls_back_to_process_heuristics() {
        assert_eq!(identify_service(40000, "steamwebhelper"), "Steam");
        assert_eq!(identify_service(40001, "lm-studio-server"), "LM-Studio");
    }

    #[test]
    fn identify_service_falls_back_to_unknown_port_label() {
        assert_eq!(identify_service(40002, "unknown"), "Unknown:40002");
    }

    #[test]
    fn manual_trusted_ports_always_included() {
        let trusted: HashSet<u16> = HashSet::new();
        let union: HashSet<u16> = trusted.union(&MANUAL_TRUSTED_PORTS.iter().copied().collect()).copied().collect();
        assert!(union.contains(&22));
        assert!(union.contains(&27036));
    }
}
