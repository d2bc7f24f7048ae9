//! Event grammar & parser (component C1).
//!
//! `parse` is a pure function from a raw log line to an optional
//! [`NormalizedEvent`]. Dispatch is by substring test in a fixed order;
//! the first matching rule wins. Missing capture groups substitute the
//! literal `"unknown"`. The parser holds no state and is safe to call from
//! any thread.

use std::fmt;

use regex::Regex;
use std::sync::LazyLock;
use strum::{Display, EnumString};

/// The closed set of event kinds the grammar recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, serde::Serialize, serde::Deserialize)]
pub enum EventKind {
    #[strum(serialize = "NET_PING")]
    NetPing,
    #[strum(serialize = "NET_CONN")]
    NetConn,
    #[strum(serialize = "SSH_AUTH_FAIL")]
    SshAuthFail,
    #[strum(serialize = "SSH_AUTH_SUCCESS")]
    SshAuthSuccess,
    #[strum(serialize = "SSH_INVALID_USER")]
    SshInvalidUser,
    #[strum(serialize = "SSH_CONNECTION_CLOSED")]
    SshConnectionClosed,
    #[strum(serialize = "SUDO_EXEC")]
    SudoExec,
    #[strum(serialize = "SUDO_AUTH_FAIL")]
    SudoAuthFail,
    #[strum(serialize = "SESSION_OPEN")]
    SessionOpen,
    #[strum(serialize = "SESSION_CLOSE")]
    SessionClose,
}

/// A single normalized event: `<KIND> Key=Value [Key=Value ...]`.
///
/// Key order is preserved as emitted by [`parse`] so `Display` round-trips
/// to the exact wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEvent {
    pub kind: EventKind,
    pub fields: Vec<(String, String)>,
}

impl NormalizedEvent {
    fn new(kind: EventKind, fields: Vec<(&str, String)>) -> Self {
        Self {
            kind,
            fields: fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        }
    }

    /// Value for `Source=` if present, used to populate `PersistedEvent.source_ip`.
    pub fn source(&self) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == "Source")
            .map(|(_, v)| v.as_str())
    }

    /// Value for `Port=` parsed as `u16`, used to populate `PersistedEvent.port`.
    pub fn port(&self) -> Option<u16> {
        self.fields
            .iter()
            .find(|(k, _)| k == "Port")
            .and_then(|(_, v)| v.parse().ok())
    }
}

impl fmt::Display for NormalizedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        for (k, v) in &self.fields {
            write!(f, " {k}={v}")?;
        }
        Ok(())
    }
}

const UNKNOWN: &str = "unknown";

static RE_SRC: LazyLock<Regex> = LazyLock::new(|| re(r"SRC=([\d.]+)"));
static RE_DPT: LazyLock<Regex> = LazyLock::new(|| re(r"DPT=(\d+)"));
static RE_PROTO: LazyLock<Regex> = LazyLock::new(|| re(r"PROTO=(\w+)"));
static RE_IP_FROM: LazyLock<Regex> = LazyLock::new(|| re(r"from ([\d.]+)"));
static RE_USER_FOR: LazyLock<Regex> = LazyLock::new(|| re(r"for (\w+)"));
static RE_INVALID_USER: LazyLock<Regex> = LazyLock::new(|| re(r"Invalid user (\w+)"));
static RE_CLOSED_IP: LazyLock<Regex> = LazyLock::new(|| re(r"([\d.]+) port"));
static RE_CLOSED_USER: LazyLock<Regex> = LazyLock::new(|| re(r"user ([\w-]+)"));
static RE_SUDO_USER: LazyLock<Regex> = LazyLock::new(|| re(r"sudo: (\w+) :"));
static RE_SUDO_COMMAND: LazyLock<Regex> = LazyLock::new(|| re(r"COMMAND=(.+)$"));
static RE_TTY: LazyLock<Regex> = LazyLock::new(|| re(r"TTY=([^;]+)"));
static RE_LOGNAME: LazyLock<Regex> = LazyLock::new(|| re(r"logname=(\w+)"));
static RE_TTY_LOWER: LazyLock<Regex> = LazyLock::new(|| re(r"tty=([^;]+)"));
static RE_SESSION_USER: LazyLock<Regex> = LazyLock::new(|| re(r"for user (\w+)"));
static RE_PAM_SERVICE: LazyLock<Regex> = LazyLock::new(|| re(r"pam_unix\((\w+)"));

fn re(pattern: &str) -> Regex {
    // Patterns are fixed string literals compiled once at process startup;
    // a bad literal here is a programming error, not a runtime condition.
    #[allow(clippy::unwrap_used)]
    Regex::new(pattern).unwrap()
}

fn capture1(re: &Regex, line: &str) -> Option<String> {
    re.captures(line).map(|c| c[1].to_string())
}

fn capture_or_unknown(re: &Regex, line: &str) -> String {
    capture1(re, line).unwrap_or_else(|| UNKNOWN.to_string())
}

/// Parse a single log line into a [`NormalizedEvent`], or `None` if it
/// matches none of the recognized grammar rules. Pure and stateless.
///
/// `network_tag` is the configured marker for kernel network-log lines
/// (default `"[Agent]"`).
pub fn parse(line: &str, network_tag: &str) -> Option<NormalizedEvent> {
    if line.contains(network_tag) {
        return parse_network(line);
    }

    if line.contains("sshd") && line.contains("Failed password") {
        let user = capture_or_unknown(&RE_USER_FOR, line);
        let source = capture_or_unknown(&RE_IP_FROM, line);
        return Some(NormalizedEvent::new(
            EventKind::SshAuthFail,
            vec![
                ("User", user),
                ("Source", source),
                ("Method", "password".to_string()),
            ],
        ));
    }

    if line.contains("sshd") && line.contains("Accepted") {
        let user = capture_or_unknown(&RE_USER_FOR, line);
        let source = capture_or_unknown(&RE_IP_FROM, line);
        let method = if line.contains("publickey") { "key" } else { "password" };
        return Some(NormalizedEvent::new(
            EventKind::SshAuthSuccess,
            vec![
                ("User", user),
                ("Source", source),
                ("Method", method.to_string()),
            ],
        ));
    }

    if line.contains("sshd") && line.contains("Invalid user") {
        let user = capture_or_unknown(&RE_INVALID_USER, line);
        let source = capture_or_unknown(&RE_IP_FROM, line);
        return Some(NormalizedEvent::new(
            EventKind::SshInvalidUser,
            vec![("User", user), ("Source", source)],
        ));
    }

    if line.contains("sshd") && line.contains("Connection closed") {
        let source = capture_or_unknown(&RE_CLOSED_IP, line);
        let user = capture_or_unknown(&RE_CLOSED_USER, line);
        return Some(NormalizedEvent::new(
            EventKind::SshConnectionClosed,
            vec![("User", user), ("Source", source)],
        ));
    }

    if line.contains("sudo:") && line.contains("COMMAND=") {
        let user = capture_or_unknown(&RE_SUDO_USER, line);
        let command = capture_or_unknown(&RE_SUDO_COMMAND, line);
        let tty = capture_or_unknown(&RE_TTY, line);
        let session = session_class(&tty, "CRON");
        return Some(NormalizedEvent::new(
            EventKind::SudoExec,
            vec![
                ("User", user),
                ("Session", session.to_string()),
                ("TTY", tty),
                ("Command", command),
            ],
        ));
    }

    if line.contains("sudo") && line.contains("authentication failure") {
        let user = capture_or_unknown(&RE_LOGNAME, line);
        let tty = capture_or_unknown(&RE_TTY_LOWER, line);
        let session = session_class(&tty, "UNKNOWN");
        return Some(NormalizedEvent::new(
            EventKind::SudoAuthFail,
            vec![("User", user), ("Session", session.to_string()), ("TTY", tty)],
        ));
    }

    if line.contains("session opened") && line.contains("pam_unix") {
        let service = capture1(&RE_PAM_SERVICE, line)?;
        if service == "sudo" || service == "cron" {
            return None;
        }
        let user = capture_or_unknown(&RE_SESSION_USER, line);
        return Some(NormalizedEvent::new(
            EventKind::SessionOpen,
            vec![("Service", service), ("User", user)],
        ));
    }

    if line.contains("session closed") && line.contains("pam_unix") {
        let service = capture1(&RE_PAM_SERVICE, line)?;
        if service == "sudo" || service == "cron" {
            return None;
        }
        let user = capture_or_unknown(&RE_SESSION_USER, line);
        return Some(NormalizedEvent::new(
            EventKind::SessionClose,
            vec![("Service", service), ("User", user)],
        ));
    }

    None
}

fn parse_network(line: &str) -> Option<NormalizedEvent> {
    let src = capture1(&RE_SRC, line)?;
    if line.contains("PROTO=ICMP") {
        return Some(NormalizedEvent::new(EventKind::NetPing, vec![("Source", src)]));
    }
    let dpt = capture1(&RE_DPT, line)?;
    let proto = capture1(&RE_PROTO, line).unwrap_or_else(|| "?".to_string());
    Some(NormalizedEvent::new(
        EventKind::NetConn,
        vec![("Source", src), ("Port", dpt), ("Proto", proto)],
    ))
}

/// `"pts"` in tty -> SSH, `"tty"` in tty -> LOCAL, else the caller's fallback
/// (`CRON` for `SUDO_EXEC`, `UNKNOWN` for `SUDO_AUTH_FAIL`).
fn session_class(tty: &str, fallback: &'static str) -> &'static str {
    if tty.contains("pts") {
        "SSH"
    } else if tty.contains("tty") {
        "LOCAL"
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAG: &str = "[Agent]";

    #[test]
    fn parses_ssh_auth_fail() {
        let line = "Aug 17 12:00:01 host sshd[1001]: Failed password for root from 185.143.223.47 port 50001 ssh2";
        let event = parse(line, TAG).expect("should parse");
        assert_eq!(event.kind, EventKind::SshAuthFail);
        assert_eq!(
            event.to_string(),
            "SSH_AUTH_FAIL User=root Source=185.143.223.47 Method=password"
        );
    }

    #[test]
    fn parses_ssh_auth_success_key() {
        let line = "Aug 17 12:00:01 host sshd[1001]: Accepted publickey for alice from 10.0.0.5 port 51000 ssh2";
        let event = parse(line, TAG).expect("should parse");
        assert_eq!(event.kind, EventKind::SshAuthSuccess);
        assert!(event.to_string().contains("Method=key"));
    }

    #[test]
    fn parses_ssh_auth_success_password() {
        let line = "Aug 17 12:00:01 host sshd[1001]: Accepted password for alice from 10.0.0.5 port 51000 ssh2";
        let event = parse(line, TAG).expect("should parse");
        assert!(event.to_string().contains("Method=password"));
    }

    #[test]
    fn parses_ssh_invalid_user() {
        let line = "Aug 17 12:00:01 host sshd[1001]: Invalid user admin from 1.2.3.4 port 4000";
        let event = parse(line, TAG).expect("should parse");
        assert_eq!(event.kind, EventKind::SshInvalidUser);
        assert_eq!(event.to_string(), "SSH_INVALID_USER User=admin Source=1.2.3.4");
    }

    #[test]
    fn parses_ssh_connection_closed() {
        let line = "Aug 17 12:00:01 host sshd[1001]: Connection closed by 1.2.3.4 port 4000 [preauth] user root";
        let event = parse(line, TAG).expect("should parse");
        assert_eq!(event.kind, EventKind::SshConnectionClosed);
    }

    #[test]
    fn parses_sudo_exec_ssh_session() {
        let line = "Aug 17 12:00:01 host sudo: alice : TTY=pts/0 ; PWD=/home/alice ; USER=root ; COMMAND=/bin/ls";
        let event = parse(line, TAG).expect("should parse");
        assert_eq!(event.kind, EventKind::SudoExec);
        assert_eq!(
            event.to_string(),
            "SUDO_EXEC User=alice Session=SSH TTY=pts/0 Command=/bin/ls"
        );
    }

    #[test]
    fn parses_sudo_exec_local_session() {
        let line = "Aug 17 12:00:01 host sudo: bob : TTY=tty1 ; PWD=/root ; USER=root ; COMMAND=/bin/systemctl restart x";
        let event = parse(line, TAG).expect("should parse");
        assert!(event.to_string().contains("Session=LOCAL"));
    }

    #[test]
    fn parses_sudo_exec_cron_session() {
        let line = "Aug 17 12:00:01 host sudo: root : TTY=unknown ; PWD=/ ; USER=root ; COMMAND=/usr/bin/backup.sh";
        let event = parse(line, TAG).expect("should parse");
        assert!(event.to_string().contains("Session=CRON"));
    }

    #[test]
    fn parses_sudo_auth_fail() {
        let line = "Aug 17 12:00:01 host sudo: pam_unix(sudo:auth): authentication failure; logname=alice uid=1000 tty=pts/1";
        let event = parse(line, TAG).expect("should parse");
        assert_eq!(event.kind, EventKind::SudoAuthFail);
    }

    #[test]
    fn parses_session_open_excludes_sudo_and_cron() {
        let sudo_line = "Aug 17 12:00:01 host sudo: pam_unix(sudo:session): session opened for user root by alice(uid=0)";
        assert!(parse(sudo_line, TAG).is_none());

        let cron_line = "Aug 17 12:00:01 host CRON[123]: pam_unix(cron:session): session opened for user root";
        assert!(parse(cron_line, TAG).is_none());

        let ssh_line = "Aug 17 12:00:01 host sshd[1001]: pam_unix(sshd:session): session opened for user alice by (uid=0)";
        let event = parse(ssh_line, TAG).expect("should parse");
        assert_eq!(event.kind, EventKind::SessionOpen);
        assert_eq!(event.to_string(), "SESSION_OPEN Service=sshd User=alice");
    }

    #[test]
    fn parses_session_close() {
        let line = "Aug 17 12:00:01 host sshd[1001]: pam_unix(sshd:session): session closed for user alice";
        let event = parse(line, TAG).expect("should parse");
        assert_eq!(event.kind, EventKind::SessionClose);
    }

    #[test]
    fn parses_net_ping() {
        let line = "Aug 17 12:00:01 host kernel: [Agent] IN=eth0 OUT= SRC=1.2.3.4 DST=10.0.0.1 PROTO=ICMP TYPE=8";
        let event = parse(line, TAG).expect("should parse");
        assert_eq!(event.kind, EventKind::NetPing);
        assert_eq!(event.to_string(), "NET_PING Source=1.2.3.4");
    }

    #[test]
    fn parses_net_conn() {
        let line = "Aug 17 12:00:01 host kernel: [Agent] IN=eth0 SRC=192.168.1.100 DST=10.0.0.1 PROTO=TCP DPT=22";
        let event = parse(line, TAG).expect("should parse");
        assert_eq!(event.kind, EventKind::NetConn);
        assert_eq!(event.to_string(), "NET_CONN Source=192.168.1.100 Port=22 Proto=TCP");
    }

    #[test]
    fn net_conn_defaults_proto_to_question_mark() {
        let line = "Aug 17 12:00:01 host kernel: [Agent] SRC=192.168.1.100 DPT=22";
        let event = parse(line, TAG).expect("should parse");
        assert_eq!(event.to_string(), "NET_CONN Source=192.168.1.100 Port=22 Proto=?");
    }

    #[test]
    fn tagged_line_without_src_or_dpt_is_dropped() {
        let line = "Aug 17 12:00:01 host kernel: [Agent] noise only, no fields";
        assert!(parse(line, TAG).is_none());
    }

    #[test]
    fn unrecognized_line_is_dropped() {
        let line = "Aug 17 12:00:01 host somedaemon[1]: routine heartbeat";
        assert!(parse(line, TAG).is_none());
    }

    #[test]
    fn parser_is_pure_and_reentrant() {
        let line = "Aug 17 12:00:01 host sshd[1001]: Failed password for root from 1.2.3.4 port 1 ssh2";
        let a = parse(line, TAG);
        let b = parse(line, TAG);
        assert_eq!(a, b);
    }
}
