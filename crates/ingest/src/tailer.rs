//! Log tailer (component C2): rotation-aware, no-backfill, poll-based.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Datelike, Local, NaiveDateTime, TimeZone};
use regex::Regex;
use std::sync::LazyLock;
use tracing::warn;

use crate::pipeline::ReductionPipeline;
use agentic_c_eda_core::NormalizedEvent;

#[allow(clippy::unwrap_used)]
static RE_SYSLOG_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\w{3})\s+(\d{1,2})\s+(\d{2}):(\d{2}):(\d{2})").unwrap());

const POLL_INTERVAL: Duration = Duration::from_millis(100);

struct TailedFile {
    path: PathBuf,
    handle: Option<BufReader<File>>,
    inode: u64,
}

impl TailedFile {
    fn open_at_end(path: PathBuf) -> std::io::Result<Self> {
        let file = File::open(&path)?;
        let inode = file.metadata()?.ino();
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::End(0))?;
        Ok(Self {
            path,
            handle: Some(reader),
            inode,
        })
    }

    /// Reopens at offset 0 if the inode on disk no longer matches the one
    /// we have open; a log rotation swapped the path to a new file.
    fn check_rotation(&mut self) {
        let Ok(metadata) = std::fs::metadata(&self.path) else {
            return;
        };
        if metadata.ino() != self.inode {
            self.inode = metadata.ino();
            self.handle = File::open(&self.path).ok().map(BufReader::new);
        }
    }

    fn read_new_lines(&mut self) -> Vec<String> {
        self.check_rotation();
        let Some(reader) = self.handle.as_mut() else {
            return Vec::new();
        };
        let mut lines = Vec::new();
        loop {
            let mut buf = String::new();
            match reader.read_line(&mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = buf.trim();
                    if !trimmed.is_empty() {
                        lines.push(trimmed.to_string());
                    }
                }
                Err(_) => break,
            }
        }
        lines
    }
}

/// Multi-file rotation-aware tailer. `read_stream` is the sole externally
/// visible operation: it scans all configured files for newly-appended,
/// non-backfilled lines, runs each through the reduction pipeline, and
/// returns the first resulting event, or `None` after a ~100ms poll sleep
/// if nothing surfaced.
pub struct LogTailer {
    files: Vec<TailedFile>,
    start_time: DateTime<Local>,
    pending: Vec<String>,
}

impl LogTailer {
    /// Opens each path that exists, seeking to EOF and recording its
    /// inode. Missing files are logged and skipped, not fatal.
    pub fn start(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut files = Vec::new();
        for path in paths {
            if !path.exists() {
                continue;
            }
            match TailedFile::open_at_end(path.clone()) {
                Ok(tailed) => files.push(tailed),
                Err(error) => warn!(path = %path.display(), %error, "cannot open log file"),
            }
        }
        Self {
            files,
            start_time: Local::now(),
            pending: Vec::new(),
        }
    }

    fn parse_log_time(line: &str) -> Option<DateTime<Local>> {
        let caps = RE_SYSLOG_TIME.captures(line)?;
        let month = month_number(&caps[1])?;
        let day: u32 = caps[2].parse().ok()?;
        let hour: u32 = caps[3].parse().ok()?;
        let minute: u32 = caps[4].parse().ok()?;
        let second: u32 = caps[5].parse().ok()?;
        let year = Local::now().year();
        let naive = NaiveDateTime::parse_from_str(
            &format!("{year}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"),
            "%Y-%m-%d %H:%M:%S",
        )
        .ok()?;
        Local.from_local_datetime(&naive).single()
    }

    fn refill_pending(&mut self) {
        for tailed in &mut self.files {
            for line in tailed.read_new_lines() {
                if let Some(log_time) = Self::parse_log_time(&line) {
                    if log_time < self.start_time {
                        continue;
                    }
                }
                self.pending.push(line);
            }
        }
    }

    /// Blocking-shaped poll: returns the next surviving event, or sleeps
    /// ~100ms and returns `None` if nothing was available this pass.
    pub async fn read_stream(&mut self, pipeline: &mut ReductionPipeline) -> Option<NormalizedEvent> {
        loop {
            while let Some(line) = self.pending_pop() {
                if let Some(event) = pipeline.process_line(&line) {
                    return Some(event);
                }
            }

            self.refill_pending();
            if self.pending.is_empty() {
                tokio::time::sleep(POLL_INTERVAL).await;
                return None;
            }
        }
    }

    fn pending_pop(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending.remove(0))
        }
    }
}

fn month_number(abbrev: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    MONTHS.iter().position(|m| *m == abbrev).map(|i| i as u32 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ReductionPipeline;
    use std::io::Write;

    fn new_pipeline() -> ReductionPipeline {
        ReductionPipeline::new("[Agent]", "10.0.0.")
    }

    #[tokio::test]
    async fn tails_appended_lines_and_yields_parsed_event() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("auth.log");
        std::fs::write(&path, "").expect("create file");

        let mut tailer = LogTailer::start([path.clone()]);
        let mut pipeline = new_pipeline();

        {
            let mut file = std::fs::OpenOptions::new().append(true).open(&path).expect("open");
            writeln!(
                file,
                "Aug 17 12:00:01 host sshd[1]: Failed password for root from 198.51.100.9 port 1 ssh2"
            )
            .expect("write");
        }

        let event = tailer.read_stream(&mut pipeline).await;
        assert!(event.is_some());
    }

    #[tokio::test]
    async fn empty_file_yields_none_after_poll() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("auth.log");
        std::fs::write(&path, "").expect("create file");

        let mut tailer = LogTailer::start([path]);
        let mut pipeline = new_pipeline();

        let event = tailer.read_stream(&mut pipeline).await;
        assert!(event.is_none());
    }

    #[tokio::test]
    async fn missing_file_is_skipped_not_fatal() {
        let mut tailer = LogTailer::start([PathBuf::from("/nonexistent/path.log")]);
        let mut pipeline = new_pipeline();
        assert!(tailer.read_stream(&mut pipeline).await.is_none());
    }

    #[test]
    fn parses_syslog_timestamp_with_current_year_imputed() {
        let parsed = LogTailer::parse_log_time("Aug 17 12:00:01 host sshd: test");
        assert!(parsed.is_some());
        assert_eq!(parsed.unwrap().year(), Local::now().year());
    }

    #[test]
    fn line_without_timestamp_is_not_filtered_by_backfill_rule() {
        assert!(LogTailer::parse_log_time("no timestamp here").is_none());
    }
}
