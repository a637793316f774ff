use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;

/// Upper bound on a serialized request. The daemon stops reading at this
/// size; anything larger is rejected as an invalid request.
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// Upper bound on a serialized response as read by the client. Command
/// output is already capped daemon-side, so this is a second fence, not the
/// primary limit.
pub const MAX_RESPONSE_BYTES: usize = 2 * 1024 * 1024;

/// How long the daemon waits for a complete request on an accepted
/// connection before giving up on the peer.
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Risk classification attached to every decision and response.
///
/// Ordered so that `max()` picks the more severe of two assessments;
/// `Unknown` sorts below everything because it carries no information.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Display, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Unknown,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// High and critical commands get WARNING-level audit events and, on the
    /// front-end, a consent prompt that `--auto` does not bypass.
    pub fn is_high_or_critical(self) -> bool {
        matches!(self, RiskLevel::High | RiskLevel::Critical)
    }
}

/// One command the client asks the daemon to run. A connection carries
/// exactly one request and one response.
///
/// `user_name`, `uid` and `pid` are filled in daemon-side from the kernel's
/// peer credentials; values supplied by the client are overwritten, never
/// trusted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandRequest {
    pub command: String,

    #[serde(default = "default_working_dir")]
    pub working_dir: String,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Client-generated opaque id, mirrored back in the response and used to
    /// correlate audit events.
    #[serde(default)]
    pub request_id: String,

    #[serde(default)]
    pub user_name: String,

    #[serde(default)]
    pub uid: u32,

    #[serde(default)]
    pub pid: i32,
}

fn default_working_dir() -> String {
    "/tmp".to_string()
}

fn default_timeout_seconds() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandResponse {
    pub success: bool,
    pub output: String,
    pub error: String,

    /// `-1` when the command was not executed (denied, invalid, timeout).
    pub exit_code: i32,

    pub risk_level: RiskLevel,
    pub request_id: String,
    pub execution_time_ms: u64,
}

impl CommandResponse {
    /// Response for a request that never reached execution.
    pub fn rejected(request_id: &str, risk_level: RiskLevel, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: error.into(),
            exit_code: -1,
            risk_level,
            request_id: request_id.to_string(),
            execution_time_ms: 0,
        }
    }

    /// Response for a request that could not even be parsed, so no
    /// `request_id` is available to mirror.
    pub fn invalid_request(error: impl Into<String>) -> Self {
        Self::rejected("", RiskLevel::Unknown, error)
    }
}

/// Decode a request from raw connection bytes. Unknown fields are ignored;
/// a missing `command` field is an error.
pub fn parse_request(bytes: &[u8]) -> Result<CommandRequest, serde_json::Error> {
    serde_json::from_slice(bytes)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn request_round_trips() {
        let request = CommandRequest {
            command: "systemctl status sshd".to_string(),
            working_dir: "/var/tmp".to_string(),
            timeout_seconds: 30,
            request_id: "a1b2c3d4".to_string(),
            user_name: String::new(),
            uid: 0,
            pid: 0,
        };
        let bytes = serde_json::to_vec(&request).unwrap();
        assert_eq!(parse_request(&bytes).unwrap(), request);
    }

    #[test]
    fn request_defaults_apply_and_unknown_fields_are_ignored() {
        let request =
            parse_request(br#"{"command":"ls","flavor":"ignored","timestamp":"whenever"}"#)
                .unwrap();
        assert_eq!(request.command, "ls");
        assert_eq!(request.working_dir, "/tmp");
        assert_eq!(request.timeout_seconds, 60);
        assert_eq!(request.request_id, "");
    }

    #[test]
    fn request_without_command_is_rejected() {
        assert!(parse_request(br#"{"working_dir":"/tmp"}"#).is_err());
        assert!(parse_request(b"not json at all").is_err());
    }

    #[test]
    fn risk_ordering_picks_the_more_severe() {
        assert_eq!(RiskLevel::Low.max(RiskLevel::High), RiskLevel::High);
        assert_eq!(
            RiskLevel::Critical.max(RiskLevel::Medium),
            RiskLevel::Critical
        );
        assert!(RiskLevel::Unknown < RiskLevel::Low);
    }

    #[test]
    fn risk_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&RiskLevel::Critical).unwrap(),
            r#""critical""#
        );
        assert_eq!(RiskLevel::High.to_string(), "high");
    }

    #[test]
    fn rejected_response_has_sentinel_exit_code() {
        let response = CommandResponse::rejected("r1", RiskLevel::Critical, "denied");
        assert!(!response.success);
        assert_eq!(response.exit_code, -1);
        assert_eq!(response.request_id, "r1");
    }
}
