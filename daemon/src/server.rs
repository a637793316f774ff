//! Per-connection request handling.
//!
//! One connection carries one request and one response. The peer is
//! authenticated by the kernel's credentials on the socket; the access
//! controller re-checks every command authoritatively, whatever the client
//! claims to have checked; and the audit record is written before the
//! response leaves the daemon.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

use ganesha_core::AccessController;
use ganesha_core::AccessPolicy;
use ganesha_core::AuditEvent;
use ganesha_core::AuditLog;
use ganesha_core::Decision;
use ganesha_core::EventId;
use ganesha_core::RuleOrigin;
use ganesha_core::Severity;
use ganesha_core::SystemLogger;
use ganesha_core::exec::ChildTracker;
use ganesha_core::exec::ExecParams;
use ganesha_core::exec::run_tracked;
use ganesha_core::rules::DenyClass;
use ganesha_protocol::CommandRequest;
use ganesha_protocol::CommandResponse;
use ganesha_protocol::MAX_REQUEST_BYTES;
use ganesha_protocol::READ_TIMEOUT;
use ganesha_protocol::RiskLevel;
use ganesha_protocol::parse_request;

/// Per-daemon state shared by every connection task. The compiled rules
/// are immutable between reloads and read concurrently; an explicit reload
/// (SIGHUP) swaps them wholesale. The audit log serializes its own writes.
pub struct DaemonState {
    rules: tokio::sync::RwLock<RuleState>,
    pub audit: AuditLog,
    pub system_log: SystemLogger,
    pub children: ChildTracker,
}

struct RuleState {
    controller: AccessController,
    policy: AccessPolicy,
}

impl DaemonState {
    pub fn new(
        controller: AccessController,
        policy: AccessPolicy,
        audit: AuditLog,
        system_log: SystemLogger,
        children: ChildTracker,
    ) -> Self {
        Self {
            rules: tokio::sync::RwLock::new(RuleState { controller, policy }),
            audit,
            system_log,
            children,
        }
    }

    /// Evaluate a command under the current rules, returning the decision
    /// and the policy's execution-time ceiling together so one request
    /// never sees two different policies.
    pub async fn check(&self, command: &str) -> (Decision, u64) {
        let rules = self.rules.read().await;
        (
            rules.controller.check(command),
            rules.policy.max_execution_time_seconds,
        )
    }

    pub async fn level(&self) -> ganesha_core::AccessLevel {
        self.rules.read().await.policy.level
    }

    /// Swap in a freshly compiled policy (explicit reload).
    pub async fn replace_rules(&self, controller: AccessController, policy: AccessPolicy) {
        let mut rules = self.rules.write().await;
        *rules = RuleState { controller, policy };
    }

    /// Write an event to the daemon's own audit log, then fan it out to
    /// the OS sinks. Completion of this call is what orders the audit
    /// record before the response on the wire.
    pub async fn emit(&self, event: AuditEvent) {
        if let Err(e) = self.audit.append(&event).await {
            tracing::warn!("audit append failed: {e}");
        }
        self.system_log.log(&event);
    }
}

pub async fn handle_connection(state: Arc<DaemonState>, mut stream: UnixStream) {
    let peer = peer_identity(&stream);

    let request_bytes = match read_request(&mut stream).await {
        // A connect-then-close is the client's availability probe, not a
        // request.
        Ok(None) => return,
        Ok(Some(bytes)) => bytes,
        Err(reason) => {
            let event = AuditEvent::new(EventId::InvalidRequest, Severity::Error, reason.clone())
                .with_user(&peer.user_name);
            state.emit(event).await;
            send_response(&mut stream, &CommandResponse::invalid_request(reason)).await;
            return;
        }
    };

    let mut request = match parse_request(&request_bytes) {
        Ok(request) => request,
        Err(e) => {
            let reason = format!("invalid request: {e}");
            state
                .emit(
                    AuditEvent::new(EventId::InvalidRequest, Severity::Error, reason)
                        .with_user(&peer.user_name),
                )
                .await;
            send_response(
                &mut stream,
                &CommandResponse::invalid_request("invalid request"),
            )
            .await;
            return;
        }
    };

    // Kernel credentials are the only identity; anything the client put in
    // these fields is overwritten.
    request.user_name = peer.user_name.clone();
    request.uid = peer.uid;
    request.pid = peer.pid;

    if !Path::new(&request.working_dir).is_absolute() {
        let reason = format!("working_dir must be absolute: {}", request.working_dir);
        state
            .emit(
                AuditEvent::new(EventId::InvalidRequest, Severity::Error, reason.clone())
                    .with_user(&request.user_name)
                    .with_command(&request.command)
                    .with_request(&request.request_id),
            )
            .await;
        send_response(
            &mut stream,
            &CommandResponse::rejected(&request.request_id, RiskLevel::Unknown, reason),
        )
        .await;
        return;
    }

    let response = process_request(&state, &request).await;
    send_response(&mut stream, &response).await;
}

async fn process_request(state: &Arc<DaemonState>, request: &CommandRequest) -> CommandResponse {
    let (decision, max_execution_time_seconds) = state.check(&request.command).await;

    if !decision.allowed {
        let (event_id, severity) = denial_event(&decision);
        state
            .emit(
                AuditEvent::new(event_id, severity, denial_message(event_id))
                    .with_user(&request.user_name)
                    .with_command(&request.command)
                    .with_risk(decision.risk_level)
                    .with_allowed(false)
                    .with_reason(&decision.reason)
                    .with_request(&request.request_id),
            )
            .await;
        return CommandResponse::rejected(
            &request.request_id,
            decision.risk_level,
            format!("access denied: {}", decision.reason),
        );
    }

    // Clamp the client's timeout to the policy ceiling.
    let timeout_seconds = request.timeout_seconds.clamp(1, max_execution_time_seconds);

    let params = ExecParams {
        command: request.command.clone(),
        working_dir: PathBuf::from(&request.working_dir),
        timeout: Duration::from_secs(timeout_seconds),
    };

    let output = match run_tracked(&params, Some(&state.children)).await {
        Ok(output) => output,
        Err(e) => {
            state
                .emit(
                    AuditEvent::new(
                        EventId::ExecutionFailed,
                        Severity::Error,
                        format!("spawn failed: {e}"),
                    )
                    .with_user(&request.user_name)
                    .with_command(&request.command)
                    .with_risk(decision.risk_level)
                    .with_allowed(true)
                    .with_reason(&decision.reason)
                    .with_request(&request.request_id),
                )
                .await;
            return CommandResponse::rejected(
                &request.request_id,
                decision.risk_level,
                format!("execution error: {e}"),
            );
        }
    };

    if output.timed_out {
        state
            .emit(
                AuditEvent::new(
                    EventId::Timeout,
                    Severity::Error,
                    format!("command timed out after {timeout_seconds}s"),
                )
                .with_user(&request.user_name)
                .with_command(&request.command)
                .with_risk(decision.risk_level)
                .with_allowed(true)
                .with_reason(&decision.reason)
                .with_request(&request.request_id),
            )
            .await;
        return CommandResponse {
            success: false,
            output: output.stdout,
            error: "timeout".to_string(),
            exit_code: -1,
            risk_level: decision.risk_level,
            request_id: request.request_id.clone(),
            execution_time_ms: output.duration.as_millis() as u64,
        };
    }

    let (event_id, message) = if output.exit_code == 0 {
        (EventId::CommandExecuted, "command executed".to_string())
    } else {
        (
            EventId::ExecutionFailed,
            format!("command exited with code {}", output.exit_code),
        )
    };
    let severity = if decision.risk_level.is_high_or_critical() {
        Severity::Warning
    } else {
        Severity::Info
    };
    state
        .emit(
            AuditEvent::new(event_id, severity, message)
                .with_user(&request.user_name)
                .with_command(&request.command)
                .with_risk(decision.risk_level)
                .with_allowed(true)
                .with_reason(&decision.reason)
                .with_request(&request.request_id)
                .with_extra(serde_json::json!({ "exit_code": output.exit_code })),
        )
        .await;

    CommandResponse {
        success: output.exit_code == 0,
        output: output.stdout,
        error: output.stderr,
        exit_code: output.exit_code,
        risk_level: decision.risk_level,
        request_id: request.request_id.clone(),
        execution_time_ms: output.duration.as_millis() as u64,
    }
}

fn denial_event(decision: &Decision) -> (EventId, Severity) {
    match decision.origin {
        RuleOrigin::AlwaysDenied(DenyClass::SelfInvocation) => {
            (EventId::SelfInvocationBlocked, Severity::Critical)
        }
        RuleOrigin::AlwaysDenied(_) => (EventId::CriticalCommandBlocked, Severity::Critical),
        _ => (EventId::CommandDenied, Severity::Error),
    }
}

fn denial_message(event_id: EventId) -> &'static str {
    match event_id {
        EventId::SelfInvocationBlocked => "self-invocation with bypass flags blocked",
        EventId::CriticalCommandBlocked => "security-critical command blocked",
        _ => "command denied by access control",
    }
}

struct PeerIdentity {
    user_name: String,
    uid: u32,
    pid: i32,
}

/// Resolve the peer from kernel credentials. This is the whole
/// authentication story: no tokens, no passwords.
fn peer_identity(stream: &UnixStream) -> PeerIdentity {
    #[cfg(unix)]
    {
        match stream.peer_cred() {
            Ok(cred) => {
                let uid = cred.uid();
                let user_name = resolve_user(uid);
                PeerIdentity {
                    user_name,
                    uid,
                    pid: cred.pid().unwrap_or(0),
                }
            }
            Err(e) => {
                tracing::warn!("peer credentials unavailable: {e}");
                PeerIdentity {
                    user_name: "unknown".to_string(),
                    uid: u32::MAX,
                    pid: 0,
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = stream;
        PeerIdentity {
            user_name: "unknown".to_string(),
            uid: u32::MAX,
            pid: 0,
        }
    }
}

#[cfg(unix)]
fn resolve_user(uid: u32) -> String {
    match nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(uid)) {
        Ok(Some(user)) => user.name,
        _ => "unknown".to_string(),
    }
}

/// Read the request until the client half-closes, up to the size cap and
/// within the read timeout. `None` means the peer closed without sending
/// anything.
async fn read_request(stream: &mut UnixStream) -> Result<Option<Vec<u8>>, String> {
    let read_all = async {
        let mut buf = Vec::with_capacity(4 * 1024);
        let mut chunk = [0u8; 8192];
        loop {
            let n = stream
                .read(&mut chunk)
                .await
                .map_err(|e| format!("read error: {e}"))?;
            if n == 0 {
                break;
            }
            if buf.len() + n > MAX_REQUEST_BYTES {
                return Err("request exceeds size cap".to_string());
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        Ok(buf)
    };

    let bytes = tokio::time::timeout(READ_TIMEOUT, read_all)
        .await
        .map_err(|_| "request read timeout".to_string())??;
    Ok((!bytes.is_empty()).then_some(bytes))
}

/// Best effort: if the client disconnected while its command was running,
/// the command has already run to completion and been logged; the response
/// is simply discarded.
async fn send_response(stream: &mut UnixStream, response: &CommandResponse) {
    let payload = match serde_json::to_vec(response) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!("response serialization failed: {e}");
            return;
        }
    };
    if let Err(e) = stream.write_all(&payload).await {
        tracing::debug!("client went away before the response: {e}");
        return;
    }
    let _ = stream.shutdown().await;
}
