//! Reduction pipeline (component C3): noise gate, trust filter, parser,
//! in that fixed order, with per-stage counters.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Instant;

use agentic_c_eda_core::config::keys;
use agentic_c_eda_core::{parse, ConfigProvider, NormalizedEvent};
use regex::Regex;

const NOISE_PATTERNS: &[&str] = &[
    "apparmor=",
    "audit:",
    "IN=lo",
    "DST=224.0.0.251",
    "DST=255.255.255.255",
    "systemd-logind",
    "CRON",
];

#[allow(clippy::unwrap_used)]
static RE_SRC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"SRC=([\d.]+)").unwrap());
#[allow(clippy::unwrap_used)]
static RE_DPT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"DPT=(\d+)").unwrap());

const DEFAULT_IGNORED_PORTS: &[&str] = &[
    "80", "443", "22", "53", "3389", "5432", "6379", "5353", "5355", "1900", "137", "138", "67",
    "68", "32410", "32412", "32414", "17500",
];

const DEFAULT_IGNORED_IPS: &[&str] = &["127.0.0.1", "0.0.0.0"];

/// Running counters the §8 volume-reduction property is measured against.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineCounters {
    pub raw_lines: u64,
    pub noise_filtered: u64,
    pub trust_filtered: u64,
    pub parse_failed: u64,
    pub events_output: u64,
    /// Exponentially-smoothed average parse latency, in microseconds.
    pub parse_latency_ewma_us: f64,
}

impl PipelineCounters {
    pub fn reset(&mut self) {
        *self = PipelineCounters::default();
    }
}

/// Fixed three-stage reduction pipeline: noise gate, trust filter, parser.
///
/// `ignored_ports`/`ignored_ips` and the trusted-ports set are cached copies
/// of config-store state; call [`ReductionPipeline::refresh`] to re-read
/// them.
pub struct ReductionPipeline {
    network_tag: String,
    internal_subnet: String,
    ignored_ports: HashSet<String>,
    ignored_ips: HashSet<String>,
    trusted_ports: HashSet<String>,
    pub counters: PipelineCounters,
    ewma_alpha: f64,
}

impl ReductionPipeline {
    pub fn new(network_tag: impl Into<String>, internal_subnet: impl Into<String>) -> Self {
        Self {
            network_tag: network_tag.into(),
            internal_subnet: internal_subnet.into(),
            ignored_ports: DEFAULT_IGNORED_PORTS.iter().map(|s| s.to_string()).collect(),
            ignored_ips: DEFAULT_IGNORED_IPS.iter().map(|s| s.to_string()).collect(),
            trusted_ports: HashSet::new(),
            counters: PipelineCounters::default(),
            ewma_alpha: 0.2,
        }
    }

    /// Re-reads `ignored_ports`, `ignored_ips`, and `trusted_ports_dynamic`
    /// from the config store, merging the compiled-in defaults with
    /// whatever the store holds. Safe to call from a timer or between
    /// batches; cheap relative to the scan it guards.
    pub async fn refresh(&mut self, config: &dyn ConfigProvider) -> Result<(), crate::IngestError> {
        if let Ok(Some(raw)) = config.get_config(keys::IGNORED_PORTS).await {
            let extra = raw.lines().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
            self.ignored_ports = DEFAULT_IGNORED_PORTS.iter().map(|s| s.to_string()).chain(extra).collect();
        }
        if let Ok(Some(raw)) = config.get_config(keys::IGNORED_IPS).await {
            self.ignored_ips = raw
                .lines()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Ok(Some(raw)) = config.get_config(keys::TRUSTED_PORTS_DYNAMIC).await {
            if let Ok(ports) = serde_json::from_str::<Vec<u64>>(&raw) {
                self.trusted_ports = ports.into_iter().map(|p| p.to_string()).collect();
            }
        }
        Ok(())
    }

    fn is_noise(&self, line: &str) -> bool {
        if NOISE_PATTERNS.iter().any(|pattern| line.contains(pattern)) {
            return true;
        }
        if let Some(dpt) = RE_DPT.captures(line).map(|c| c[1].to_string()) {
            if self.ignored_ports.contains(&dpt) {
                return true;
            }
        }
        if let Some(src) = RE_SRC.captures(line).map(|c| c[1].to_string()) {
            if self.ignored_ips.contains(&src) {
                return true;
            }
        }
        false
    }

    fn is_trusted_internal(&self, line: &str) -> bool {
        let Some(src) = RE_SRC.captures(line).map(|c| c[1].to_string()) else {
            return false;
        };
        let Some(dpt) = RE_DPT.captures(line).map(|c| c[1].to_string()) else {
            return false;
        };
        src.starts_with(&self.internal_subnet) && self.trusted_ports.contains(&dpt)
    }

    /// Run one raw line through noise gate, trust filter, and parser.
    /// Returns `None` if the line was filtered or failed to parse; in
    /// either case the relevant counter has already been bumped.
    pub fn process_line(&mut self, line: &str) -> Option<NormalizedEvent> {
        self.counters.raw_lines += 1;

        if self.is_noise(line) {
            self.counters.noise_filtered += 1;
            return None;
        }
        if self.is_trusted_internal(line) {
            self.counters.trust_filtered += 1;
            return None;
        }

        let started = Instant::now();
        let event = parse(line, &self.network_tag);
        let elapsed_us = started.elapsed().as_micros() as f64;
        self.counters.parse_latency_ewma_us =
            self.ewma_alpha * elapsed_us + (1.0 - self.ewma_alpha) * self.counters.parse_latency_ewma_us;

        match event {
            Some(event) => {
                self.counters.events_output += 1;
                Some(event)
            }
            None => {
                self.counters.parse_failed += 1;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::collections::HashMap;

    struct FakeConfig(Mutex<HashMap<String, String>>);

    #[async_trait]
    impl ConfigProvider for FakeConfig {
        async fn get_config(&self, key: &str) -> Result<Option<String>, agentic_c_eda_core::CoreError> {
            Ok(self.0.lock().expect("lock").get(key).cloned())
        }

        async fn set_config(&self, key: &str, value: &str) -> Result<(), agentic_c_eda_core::CoreError> {
            self.0.lock().expect("lock").insert(key.to_string(), value.to_string());
            Ok(())
        }
    }

    #[test]
    fn noise_gate_rejects_fixed_patterns() {
        let mut pipeline = ReductionPipeline::new("[Agent]", "10.0.0.");
        let line = "Aug 17 kernel: [Agent] IN=lo SRC=127.0.0.1 DST=127.0.0.1 PROTO=TCP DPT=9999";
        assert!(pipeline.process_line(line).is_none());
        assert_eq!(pipeline.counters.noise_filtered, 1);
    }

    #[test]
    fn noise_gate_rejects_ignored_port_default() {
        let mut pipeline = ReductionPipeline::new("[Agent]", "10.0.0.");
        let line = "Aug 17 kernel: [Agent] IN=eth0 SRC=203.0.113.9 DST=10.0.0.5 PROTO=TCP DPT=443";
        assert!(pipeline.process_line(line).is_none());
        assert_eq!(pipeline.counters.noise_filtered, 1);
    }

    #[tokio::test]
    async fn trust_filter_honors_refreshed_dynamic_ports() {
        let config = FakeConfig(Mutex::new(HashMap::from([(
            keys::TRUSTED_PORTS_DYNAMIC.to_string(),
            "[22,8080]".to_string(),
        )])));
        let mut pipeline = ReductionPipeline::new("[Agent]", "10.0.0.");
        pipeline.refresh(&config).await.unwrap();

        let line = "Aug 17 kernel: [Agent] IN=eth0 SRC=10.0.0.42 DST=10.0.0.1 PROTO=TCP DPT=8080";
        assert!(pipeline.process_line(line).is_none());
        assert_eq!(pipeline.counters.trust_filtered, 1);

        let external_line = "Aug 17 kernel: [Agent] IN=eth0 SRC=198.51.100.9 DST=10.0.0.1 PROTO=TCP DPT=8080";
        assert!(pipeline.process_line(external_line).is_some());
    }

    #[test]
    fn surviving_line_parses_to_event_and_bumps_output_counter() {
        let mut pipeline = ReductionPipeline::new("[Agent]", "10.0.0.");
        let line = "Aug 17 12:00:01 host sshd[1]: Failed password for root from 198.51.100.9 port 1 ssh2";
        let event = pipeline.process_line(line).expect("should parse");
        assert_eq!(event.kind, agentic_c_eda_core::EventKind::SshAuthFail);
        assert_eq!(pipeline.counters.events_output, 1);
        assert_eq!(pipeline.counters.raw_lines, 1);
    }

    #[test]
    fn unparseable_surviving_line_bumps_parse_failed() {
        let mut pipeline = ReductionPipeline::new("[Agent]", "10.0.0.");
        let line = "Aug 17 12:00:01 host somedaemon[1]: routine heartbeat";
        assert!(pipeline.process_line(line).is_none());
        assert_eq!(pipeline.counters.parse_failed, 1);
    }

    #[test]
    fn counters_reset_clears_all_fields() {
        let mut pipeline = ReductionPipeline::new("[Agent]", "10.0.0.");
        pipeline.process_line("garbage line one");
        pipeline.counters.reset();
        assert_eq!(pipeline.counters.raw_lines, 0);
        assert_eq!(pipeline.counters.parse_failed, 0);
    }
}
