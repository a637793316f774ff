//! Client library for the privileged daemon.
//!
//! The front-end uses this to round-trip [`CommandRequest`]s over the local
//! socket. When the daemon is absent it can fall back to direct execution
//! under the caller's own privileges; the fallback still enforces the
//! hardcoded deny floor and the manipulation check, so a missing daemon
//! never relaxes the security floor, it only removes the escalation.

use std::path::Path;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

use ganesha_core::AccessController;
use ganesha_core::AccessLevel;
use ganesha_core::RuleOrigin;
use ganesha_core::exec::ExecParams;
use ganesha_core::exec::run_command;
use ganesha_core::manipulation::contains_manipulation;
use ganesha_core::paths;
use ganesha_core::policy::load_policy;
use ganesha_protocol::CommandRequest;
use ganesha_protocol::CommandResponse;
use ganesha_protocol::MAX_RESPONSE_BYTES;
use ganesha_protocol::RiskLevel;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Slack on top of the command timeout when waiting for the daemon's
/// response.
const RESPONSE_SLACK: Duration = Duration::from_secs(5);

/// Result of a privileged execution attempt, daemon-backed or direct.
#[derive(Debug, Clone)]
pub struct PrivilegedResult {
    pub success: bool,
    pub output: String,
    pub error: String,
    pub exit_code: i32,
    pub risk_level: RiskLevel,
    pub execution_time_ms: u64,
    /// True when the daemon ran the command; false for the direct
    /// fallback. Callers surface this so the user knows the trust mode.
    pub used_daemon: bool,
}

impl PrivilegedResult {
    fn failure(error: impl Into<String>, risk_level: RiskLevel, used_daemon: bool) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: error.into(),
            exit_code: -1,
            risk_level,
            execution_time_ms: 0,
            used_daemon,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DaemonStatus {
    pub available: bool,
    pub socket_path: PathBuf,
    pub socket_exists: bool,
    /// Access level of the locally visible policy, for display. The daemon
    /// applies its own copy authoritatively.
    pub policy_level: Option<AccessLevel>,
}

pub struct PrivilegedClient {
    socket_path: PathBuf,
    local_controller: OnceLock<Option<AccessController>>,
}

impl Default for PrivilegedClient {
    fn default() -> Self {
        Self::new()
    }
}

impl PrivilegedClient {
    pub fn new() -> Self {
        Self::with_socket_path(paths::socket_path())
    }

    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            local_controller: OnceLock::new(),
        }
    }

    /// Existence and reachability of the daemon socket.
    pub async fn is_daemon_available(&self) -> bool {
        if !self.socket_path.exists() {
            return false;
        }
        matches!(
            tokio::time::timeout(PROBE_TIMEOUT, UnixStream::connect(&self.socket_path)).await,
            Ok(Ok(_))
        )
    }

    /// Execute through the daemon when it is reachable, otherwise fall back
    /// to direct execution. Never panics or errors: failures come back as
    /// error-shaped results.
    pub async fn execute(
        &self,
        command: &str,
        working_dir: &Path,
        timeout: Duration,
    ) -> PrivilegedResult {
        if self.is_daemon_available().await {
            self.execute_via_daemon(command, working_dir, timeout).await
        } else {
            self.execute_direct(command, working_dir, timeout).await
        }
    }

    async fn execute_via_daemon(
        &self,
        command: &str,
        working_dir: &Path,
        timeout: Duration,
    ) -> PrivilegedResult {
        let request = CommandRequest {
            command: command.to_string(),
            working_dir: working_dir.to_string_lossy().into_owned(),
            timeout_seconds: timeout.as_secs().max(1),
            request_id: request_id(),
            user_name: String::new(),
            uid: 0,
            pid: 0,
        };

        match self.round_trip(&request, timeout + RESPONSE_SLACK).await {
            Ok(response) => PrivilegedResult {
                success: response.success,
                output: response.output,
                error: response.error,
                exit_code: response.exit_code,
                risk_level: response.risk_level,
                execution_time_ms: response.execution_time_ms,
                used_daemon: true,
            },
            Err(e) => {
                tracing::warn!("daemon round trip failed: {e}");
                PrivilegedResult::failure(
                    format!("daemon communication error: {e}"),
                    RiskLevel::Unknown,
                    true,
                )
            }
        }
    }

    async fn round_trip(
        &self,
        request: &CommandRequest,
        response_timeout: Duration,
    ) -> std::io::Result<CommandResponse> {
        let mut stream =
            tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(&self.socket_path))
                .await
                .map_err(|_| {
                    std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timeout")
                })??;

        let payload = serde_json::to_vec(request)?;
        stream.write_all(&payload).await?;
        // Half-close so the daemon sees EOF and knows the request is
        // complete.
        stream.shutdown().await?;

        let mut buf = Vec::with_capacity(8 * 1024);
        let read_all = async {
            let mut chunk = [0u8; 8192];
            loop {
                let n = stream.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                if buf.len() + n > MAX_RESPONSE_BYTES {
                    return Err(std::io::Error::other("response exceeds size cap"));
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            Ok(())
        };
        tokio::time::timeout(response_timeout, read_all)
            .await
            .map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::TimedOut, "response timeout")
            })??;

        if buf.is_empty() {
            return Err(std::io::Error::other("daemon closed without a response"));
        }
        serde_json::from_slice(&buf).map_err(std::io::Error::other)
    }

    /// Direct execution fallback. The locally loaded policy provides risk
    /// labeling; the hardcoded deny floor and the manipulation check are
    /// enforced even here.
    pub async fn execute_direct(
        &self,
        command: &str,
        working_dir: &Path,
        timeout: Duration,
    ) -> PrivilegedResult {
        let mut risk_level = RiskLevel::Unknown;

        if let Some(controller) = self.local_controller() {
            if let Some(matched) = contains_manipulation(controller.rules(), command) {
                tracing::warn!("direct execution refused, manipulation indicator: {matched}");
                return PrivilegedResult::failure(
                    format!("access denied: manipulation indicator `{matched}`"),
                    RiskLevel::Critical,
                    false,
                );
            }

            let decision = controller.check(command);
            risk_level = decision.risk_level;
            if !decision.allowed && matches!(decision.origin, RuleOrigin::AlwaysDenied(_)) {
                tracing::warn!("direct execution refused: {}", decision.reason);
                return PrivilegedResult::failure(
                    format!("access denied: {}", decision.reason),
                    decision.risk_level,
                    false,
                );
            }
        }

        let params = ExecParams {
            command: command.to_string(),
            working_dir: working_dir.to_path_buf(),
            timeout,
        };
        match run_command(&params).await {
            Ok(output) => PrivilegedResult {
                success: output.success(),
                error: if output.timed_out {
                    "timeout".to_string()
                } else {
                    output.stderr
                },
                output: output.stdout,
                exit_code: output.exit_code,
                risk_level,
                execution_time_ms: output.duration.as_millis() as u64,
                used_daemon: false,
            },
            Err(e) => PrivilegedResult::failure(e.to_string(), risk_level, false),
        }
    }

    pub async fn status(&self) -> DaemonStatus {
        DaemonStatus {
            available: self.is_daemon_available().await,
            socket_path: self.socket_path.clone(),
            socket_exists: self.socket_path.exists(),
            policy_level: self.local_controller().map(|c| c.level()),
        }
    }

    fn local_controller(&self) -> Option<&AccessController> {
        self.local_controller
            .get_or_init(|| {
                let policy = load_policy().unwrap_or_default();
                match AccessController::new(&policy) {
                    Ok(controller) => Some(controller),
                    Err(e) => {
                        tracing::warn!("local rule compile failed: {e}");
                        None
                    }
                }
            })
            .as_ref()
    }
}

fn request_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use tempfile::TempDir;
    use tokio::net::UnixListener;

    fn client_for(dir: &TempDir) -> PrivilegedClient {
        PrivilegedClient::with_socket_path(dir.path().join("privileged.sock"))
    }

    #[tokio::test]
    async fn missing_socket_means_unavailable() {
        let dir = TempDir::new().unwrap();
        let client = client_for(&dir);
        assert!(!client.is_daemon_available().await);

        let status = client.status().await;
        assert!(!status.available);
        assert!(!status.socket_exists);
    }

    #[tokio::test]
    async fn round_trips_against_a_fake_daemon() {
        let dir = TempDir::new().unwrap();
        let socket_path = dir.path().join("privileged.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let _ = stream.read_to_end(&mut buf).await;
                    if buf.is_empty() {
                        // Availability probe.
                        return;
                    }
                    let request: CommandRequest = serde_json::from_slice(&buf).unwrap();
                    let response = CommandResponse {
                        success: true,
                        output: "pretend output".to_string(),
                        error: String::new(),
                        exit_code: 0,
                        risk_level: RiskLevel::Low,
                        request_id: request.request_id,
                        execution_time_ms: 7,
                    };
                    let _ = stream
                        .write_all(&serde_json::to_vec(&response).unwrap())
                        .await;
                });
            }
        });

        let client = PrivilegedClient::with_socket_path(socket_path);
        assert!(client.is_daemon_available().await);

        let result = client
            .execute("ls -la", Path::new("/tmp"), Duration::from_secs(5))
            .await;
        assert!(result.used_daemon);
        assert!(result.success);
        assert_eq!(result.output, "pretend output");
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn direct_fallback_keeps_the_deny_floor() {
        let state = TempDir::new().unwrap();
        // Point the per-user policy somewhere empty so defaults load.
        unsafe {
            std::env::set_var("GANESHA_HOME", state.path());
        }

        let dir = TempDir::new().unwrap();
        let client = client_for(&dir);

        let result = client
            .execute("rm -rf /", Path::new("/tmp"), Duration::from_secs(5))
            .await;
        assert!(!result.used_daemon);
        assert!(!result.success);
        assert_eq!(result.risk_level, RiskLevel::Critical);
        assert!(result.error.contains("security-critical"));
    }

    #[tokio::test]
    async fn direct_fallback_runs_ordinary_commands() {
        let state = TempDir::new().unwrap();
        unsafe {
            std::env::set_var("GANESHA_HOME", state.path());
        }

        let dir = TempDir::new().unwrap();
        let client = client_for(&dir);

        let result = client
            .execute("echo direct", Path::new("/tmp"), Duration::from_secs(5))
            .await;
        assert!(!result.used_daemon);
        assert!(result.success);
        assert_eq!(result.output.trim(), "direct");
    }
}
