//! OS-level log fanout.
//!
//! Audit events are pushed into logs the daemon itself cannot quietly edit:
//! syslog via the `/dev/log` datagram socket and the systemd journal via its
//! native socket, with structured `GANESHA_*` fields for filtering
//! (`journalctl -t ganesha`, `journalctl GANESHA_EVENT_ID=1200`). When no OS
//! sink accepts the event it lands in an append-only JSONL fallback file, so
//! a misconfigured host still keeps a record.
//!
//! This is a constructed handle, not a global: the daemon and the config
//! tool each build their own with an explicit fallback path.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use crate::events::AuditEvent;
use crate::events::EventId;
use crate::events::Severity;

#[cfg(unix)]
use std::os::unix::net::UnixDatagram;

/// Syslog facility LOCAL0.
const SYSLOG_FACILITY: u8 = 16;
const SYSLOG_IDENT: &str = "ganesha";

#[cfg(unix)]
const DEV_LOG: &str = "/dev/log";
#[cfg(unix)]
const JOURNAL_SOCKET: &str = "/run/systemd/journal/socket";

#[cfg(unix)]
fn emit_syslog(socket: &UnixDatagram, event: &AuditEvent) -> io::Result<()> {
    let priority = (SYSLOG_FACILITY << 3) | event.level.syslog_priority();
    let message = format!(
        "<{priority}>{SYSLOG_IDENT}[{}]: {}",
        std::process::id(),
        event.syslog_line()
    );
    socket.send(message.as_bytes()).map(|_| ())
}

#[cfg(unix)]
fn emit_journald(socket: &UnixDatagram, event: &AuditEvent) -> io::Result<()> {
    socket.send(&journal_payload(event)).map(|_| ())
}

/// Serialize an event into the journald native wire format: `KEY=value\n`
/// per field, or `KEY\n<len u64 le><raw>\n` when the value could contain a
/// newline.
#[cfg(unix)]
fn journal_payload(event: &AuditEvent) -> Vec<u8> {
    let mut payload = Vec::with_capacity(512);
    let mut push = |key: &str, value: &str| {
        if value.contains('\n') {
            payload.extend_from_slice(key.as_bytes());
            payload.push(b'\n');
            payload.extend_from_slice(&(value.len() as u64).to_le_bytes());
            payload.extend_from_slice(value.as_bytes());
            payload.push(b'\n');
        } else {
            payload.extend_from_slice(key.as_bytes());
            payload.push(b'=');
            payload.extend_from_slice(value.as_bytes());
            payload.push(b'\n');
        }
    };

    push("MESSAGE", &event.syslog_line());
    push("PRIORITY", &event.level.syslog_priority().to_string());
    push("SYSLOG_IDENTIFIER", SYSLOG_IDENT);
    push("GANESHA_EVENT_ID", &event.event_id.code().to_string());
    push("GANESHA_EVENT_NAME", event.event_id.name());
    push("GANESHA_LEVEL", &event.level.to_string());
    if !event.user.is_empty() {
        push("GANESHA_USER", &event.user);
    }
    if !event.command.is_empty() {
        push(
            "GANESHA_COMMAND",
            &crate::events::truncate(&event.command, 500),
        );
    }
    if let Some(risk) = event.risk_level {
        push("GANESHA_RISK_LEVEL", &risk.to_string());
    }
    if let Some(allowed) = event.allowed {
        push("GANESHA_ALLOWED", if allowed { "yes" } else { "no" });
    }
    if !event.session_id.is_empty() {
        push("GANESHA_SESSION_ID", &event.session_id);
    }
    payload
}

/// Fan-out logger over the available OS sinks, with a JSONL file fallback.
pub struct SystemLogger {
    #[cfg(unix)]
    syslog: Option<UnixDatagram>,
    #[cfg(unix)]
    journald: Option<UnixDatagram>,
    fallback_path: PathBuf,
    /// Events that had to go to the fallback file because every OS sink
    /// failed. Reported on the next successful sink write.
    fallback_count: AtomicU64,
}

impl SystemLogger {
    /// Detect the available sinks. Never fails: with no OS sink reachable,
    /// everything goes to the fallback file.
    pub fn new(fallback_path: PathBuf) -> Self {
        Self {
            #[cfg(unix)]
            syslog: connect_datagram(DEV_LOG),
            #[cfg(unix)]
            journald: connect_datagram(JOURNAL_SOCKET),
            fallback_path,
            fallback_count: AtomicU64::new(0),
        }
    }

    /// A logger with no OS sinks that writes only to `fallback_path`.
    pub fn file_only(fallback_path: PathBuf) -> Self {
        Self {
            #[cfg(unix)]
            syslog: None,
            #[cfg(unix)]
            journald: None,
            fallback_path,
            fallback_count: AtomicU64::new(0),
        }
    }

    /// Emit an event to every reachable sink. Individual sink failures are
    /// silent; if all fail, the event is appended to the fallback file.
    pub fn log(&self, event: &AuditEvent) {
        let delivered = self.emit_to_sinks(event);

        if !delivered {
            self.fallback_count.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = self.append_fallback(event) {
                tracing::warn!("system log fallback write failed: {e}");
            }
            return;
        }

        // A sink works again: note how many events were diverted while it
        // did not.
        let diverted = self.fallback_count.swap(0, Ordering::Relaxed);
        if diverted > 0 {
            let notice = AuditEvent::new(
                EventId::ConfigLoaded,
                Severity::Warning,
                format!("{diverted} audit event(s) were diverted to the fallback log"),
            );
            self.emit_to_sinks(&notice);
        }
    }

    fn emit_to_sinks(&self, event: &AuditEvent) -> bool {
        let mut delivered = false;
        #[cfg(unix)]
        {
            if let Some(socket) = &self.syslog
                && emit_syslog(socket, event).is_ok()
            {
                delivered = true;
            }
            if let Some(socket) = &self.journald
                && emit_journald(socket, event).is_ok()
            {
                delivered = true;
            }
        }
        #[cfg(not(unix))]
        let _ = event;
        delivered
    }

    fn append_fallback(&self, event: &AuditEvent) -> io::Result<()> {
        if let Some(parent) = self.fallback_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut line = event.to_json().to_string();
        line.push('\n');
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.fallback_path)?;
        file.write_all(line.as_bytes())
    }
}

#[cfg(unix)]
fn connect_datagram(path: &str) -> Option<UnixDatagram> {
    let socket = UnixDatagram::unbound().ok()?;
    socket.connect(path).ok()?;
    Some(socket)
}
