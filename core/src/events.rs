//! Structured audit events.
//!
//! Every security-relevant decision becomes one of these, rendered two
//! ways: a JSON object for the append-only logs, and a `key=value` line for
//! syslog. Event ids are stable and range-partitioned so operators can
//! filter by class:
//!
//! - 1000-1099 informational (daemon lifecycle, executions, sessions)
//! - 1100-1199 warnings (high-risk approvals, configuration changes)
//! - 1200-1299 errors (denials, invalid requests, failures, timeouts)
//! - 1300-1399 critical (manipulation, self-invocation, blocked commands)

use chrono::Local;
use ganesha_protocol::RiskLevel;
use serde_json::Value;
use serde_json::json;
use strum_macros::Display;

/// Longest command string kept in structured (JSON) form.
const COMMAND_JSON_MAX: usize = 500;
/// Longest command string kept in the syslog line form.
const COMMAND_LINE_MAX: usize = 200;
const REASON_LINE_MAX: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventId {
    // Informational (1000-1099)
    DaemonStart = 1000,
    DaemonStop = 1001,
    CommandExecuted = 1010,
    CommandPlanned = 1011,
    SessionStart = 1020,
    SessionEnd = 1021,
    ConfigLoaded = 1030,

    // Warnings (1100-1199)
    HighRiskApproved = 1100,
    ConfigChanged = 1110,
    AccessLevelChanged = 1111,
    WhitelistModified = 1120,
    BlacklistModified = 1121,
    ElevatedAccessUsed = 1130,

    // Errors (1200-1299)
    CommandDenied = 1200,
    AccessViolation = 1201,
    AuthenticationFailed = 1210,
    InvalidRequest = 1220,
    ExecutionFailed = 1230,
    Timeout = 1240,

    // Critical (1300-1399)
    ManipulationDetected = 1300,
    SelfInvocationBlocked = 1301,
    SecurityBreachAttempt = 1310,
    CriticalCommandBlocked = 1320,
    LogTamperingAttempt = 1330,
}

impl EventId {
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn name(self) -> &'static str {
        match self {
            EventId::DaemonStart => "DAEMON_START",
            EventId::DaemonStop => "DAEMON_STOP",
            EventId::CommandExecuted => "COMMAND_EXECUTED",
            EventId::CommandPlanned => "COMMAND_PLANNED",
            EventId::SessionStart => "SESSION_START",
            EventId::SessionEnd => "SESSION_END",
            EventId::ConfigLoaded => "CONFIG_LOADED",
            EventId::HighRiskApproved => "HIGH_RISK_APPROVED",
            EventId::ConfigChanged => "CONFIG_CHANGED",
            EventId::AccessLevelChanged => "ACCESS_LEVEL_CHANGED",
            EventId::WhitelistModified => "WHITELIST_MODIFIED",
            EventId::BlacklistModified => "BLACKLIST_MODIFIED",
            EventId::ElevatedAccessUsed => "ELEVATED_ACCESS_USED",
            EventId::CommandDenied => "COMMAND_DENIED",
            EventId::AccessViolation => "ACCESS_VIOLATION",
            EventId::AuthenticationFailed => "AUTHENTICATION_FAILED",
            EventId::InvalidRequest => "INVALID_REQUEST",
            EventId::ExecutionFailed => "EXECUTION_FAILED",
            EventId::Timeout => "TIMEOUT",
            EventId::ManipulationDetected => "MANIPULATION_DETECTED",
            EventId::SelfInvocationBlocked => "SELF_INVOCATION_BLOCKED",
            EventId::SecurityBreachAttempt => "SECURITY_BREACH_ATTEMPT",
            EventId::CriticalCommandBlocked => "CRITICAL_COMMAND_BLOCKED",
            EventId::LogTamperingAttempt => "LOG_TAMPERING_ATTEMPT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// Syslog priority value for this severity.
    pub fn syslog_priority(self) -> u8 {
        match self {
            Severity::Debug => 7,
            Severity::Info => 6,
            Severity::Warning => 4,
            Severity::Error => 3,
            Severity::Critical => 2,
        }
    }
}

/// One audit record. Build with [`AuditEvent::new`] and the `with_*`
/// setters; render with [`AuditEvent::to_json`] or
/// [`AuditEvent::syslog_line`].
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub event_id: EventId,
    pub level: Severity,
    pub message: String,
    pub user: String,
    pub command: String,
    pub risk_level: Option<RiskLevel>,
    pub allowed: Option<bool>,
    pub reason: String,
    pub session_id: String,
    pub request_id: String,
    pub extra: Option<Value>,
}

impl AuditEvent {
    pub fn new(event_id: EventId, level: Severity, message: impl Into<String>) -> Self {
        Self {
            event_id,
            level,
            message: message.into(),
            user: String::new(),
            command: String::new(),
            risk_level: None,
            allowed: None,
            reason: String::new(),
            session_id: String::new(),
            request_id: String::new(),
            extra: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub fn with_risk(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = Some(risk_level);
        self
    }

    pub fn with_allowed(mut self, allowed: bool) -> Self {
        self.allowed = Some(allowed);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_request(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_extra(mut self, extra: Value) -> Self {
        self.extra = Some(extra);
        self
    }

    /// JSON form for the append-only logs. The timestamp is taken at render
    /// time, in the local timezone.
    pub fn to_json(&self) -> Value {
        let mut record = json!({
            "timestamp": Local::now().to_rfc3339(),
            "source": "ganesha",
            "event_id": self.event_id.code(),
            "event_name": self.event_id.name(),
            "level": self.level.to_string(),
            "message": self.message,
            "hostname": hostname(),
        });
        let map = record
            .as_object_mut()
            .unwrap_or_else(|| unreachable!("json! object literal"));
        if !self.user.is_empty() {
            map.insert("user".into(), json!(self.user));
        }
        if !self.command.is_empty() {
            map.insert("command".into(), json!(truncate(&self.command, COMMAND_JSON_MAX)));
        }
        if let Some(risk) = self.risk_level {
            map.insert("risk_level".into(), json!(risk));
        }
        if let Some(allowed) = self.allowed {
            map.insert("allowed".into(), json!(allowed));
        }
        if !self.reason.is_empty() {
            map.insert("reason".into(), json!(self.reason));
        }
        if !self.session_id.is_empty() {
            map.insert("session_id".into(), json!(self.session_id));
        }
        if !self.request_id.is_empty() {
            map.insert("request_id".into(), json!(self.request_id));
        }
        if let Some(extra) = &self.extra {
            map.insert("extra".into(), extra.clone());
        }
        record
    }

    /// Human-readable, grep-friendly line form for syslog. Commands are
    /// truncated harder than in the JSON form and embedded quotes and
    /// newlines are escaped.
    pub fn syslog_line(&self) -> String {
        let mut parts = vec![
            format!("GANESHA[{}]", self.event_id.code()),
            format!("level={}", self.level),
        ];
        if !self.user.is_empty() {
            parts.push(format!("user={}", self.user));
        }
        if !self.command.is_empty() {
            parts.push(format!(
                "cmd=\"{}\"",
                escape_line(&truncate(&self.command, COMMAND_LINE_MAX))
            ));
        }
        if let Some(risk) = self.risk_level {
            parts.push(format!("risk={risk}"));
        }
        if let Some(allowed) = self.allowed {
            parts.push(format!(
                "allowed={}",
                if allowed { "yes" } else { "no" }
            ));
        }
        if !self.reason.is_empty() {
            parts.push(format!(
                "reason=\"{}\"",
                escape_line(&truncate(&self.reason, REASON_LINE_MAX))
            ));
        }
        if !self.session_id.is_empty() {
            parts.push(format!("session={}", self.session_id));
        }
        if !self.request_id.is_empty() {
            parts.push(format!("request={}", self.request_id));
        }
        parts.push(format!("msg={}", self.message));
        parts.join(" ")
    }
}

pub(crate) fn hostname() -> String {
    whoami::fallible::hostname().unwrap_or_else(|_| "unknown".to_string())
}

/// Truncate to at most `max` bytes without splitting a UTF-8 character.
pub(crate) fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

fn escape_line(text: &str) -> String {
    text.replace('"', "\\\"").replace('\n', " ")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn event_ids_sit_in_their_ranges() {
        assert_eq!(EventId::DaemonStart.code(), 1000);
        assert_eq!(EventId::CommandExecuted.code(), 1010);
        assert_eq!(EventId::HighRiskApproved.code(), 1100);
        assert_eq!(EventId::CommandDenied.code(), 1200);
        assert_eq!(EventId::ManipulationDetected.code(), 1300);
        assert_eq!(EventId::CriticalCommandBlocked.code(), 1320);
    }

    #[test]
    fn json_form_has_the_canonical_fields() {
        let event = AuditEvent::new(EventId::CommandDenied, Severity::Error, "denied")
            .with_user("alice")
            .with_command("rm -rf /")
            .with_risk(RiskLevel::Critical)
            .with_allowed(false)
            .with_reason("security-critical deny")
            .with_request("req-1");
        let json = event.to_json();
        assert_eq!(json["source"], "ganesha");
        assert_eq!(json["event_id"], 1200);
        assert_eq!(json["event_name"], "COMMAND_DENIED");
        assert_eq!(json["level"], "ERROR");
        assert_eq!(json["user"], "alice");
        assert_eq!(json["risk_level"], "critical");
        assert_eq!(json["allowed"], false);
        assert_eq!(json["request_id"], "req-1");
        assert!(json["timestamp"].as_str().unwrap().len() >= 19);
        assert!(json.get("session_id").is_none());
    }

    #[test]
    fn syslog_line_escapes_and_truncates() {
        let long_command = format!("echo \"{}\nmore\"", "x".repeat(300));
        let event = AuditEvent::new(EventId::CommandExecuted, Severity::Info, "ok")
            .with_command(long_command)
            .with_allowed(true);
        let line = event.syslog_line();
        assert!(line.starts_with("GANESHA[1010] level=INFO cmd=\""));
        assert!(line.contains("allowed=yes"));
        assert!(!line.contains('\n'));
        // 200-char cap applies before escaping.
        let cmd_field = line.split("cmd=\"").nth(1).unwrap();
        assert!(cmd_field.len() < 250);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "héllo wörld";
        let cut = truncate(text, 2);
        assert!(cut.len() <= 2);
        assert!(text.starts_with(&cut));
        assert_eq!(truncate("short", 500), "short");
    }

    #[test]
    fn severity_maps_to_syslog_priorities() {
        assert_eq!(Severity::Info.syslog_priority(), 6);
        assert_eq!(Severity::Warning.syslog_priority(), 4);
        assert_eq!(Severity::Error.syslog_priority(), 3);
        assert_eq!(Severity::Critical.syslog_priority(), 2);
        assert_eq!(Severity::Info.to_string(), "INFO");
    }
}
