//! The daemon's own append-only audit trail.
//!
//! Independent of the OS-log fanout so a misconfigured syslog never costs
//! the daemon its record. One JSON object per line, one `write` per event,
//! single writer behind a mutex. `append().await` returns only after the
//! line has been handed to the file, which is what gives the
//! audit-before-response ordering guarantee on the daemon's hot path.

use std::path::Path;
use std::path::PathBuf;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::events::AuditEvent;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

pub struct AuditLog {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl AuditLog {
    /// Open (creating if necessary) the audit file in append-only mode.
    /// Mode 0600: the audit trail is root's on the daemon side and the
    /// user's own in fallback mode, never world-readable.
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut options = std::fs::OpenOptions::new();
        options.append(true).create(true);
        #[cfg(unix)]
        options.mode(0o600);
        let file = options.open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(tokio::fs::File::from_std(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event. The line is fully serialized first so it goes out
    /// in a single write.
    pub async fn append(&self, event: &AuditEvent) -> std::io::Result<()> {
        let mut line = event.to_json().to_string();
        line.push('\n');

        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::events::EventId;
    use crate::events::Severity;
    use tempfile::TempDir;

    #[tokio::test]
    async fn appends_one_json_line_per_event() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.log");
        let log = AuditLog::open(&path).await.unwrap();

        log.append(
            &AuditEvent::new(EventId::DaemonStart, Severity::Info, "started")
                .with_user("root"),
        )
        .await
        .unwrap();
        log.append(
            &AuditEvent::new(EventId::CommandExecuted, Severity::Info, "ok")
                .with_command("ls")
                .with_request("r-1"),
        )
        .await
        .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event_name"], "DAEMON_START");
        assert_eq!(lines[1]["request_id"], "r-1");
    }

    #[tokio::test]
    async fn reopening_appends_rather_than_truncates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.log");

        {
            let log = AuditLog::open(&path).await.unwrap();
            log.append(&AuditEvent::new(EventId::DaemonStart, Severity::Info, "one"))
                .await
                .unwrap();
        }
        {
            let log = AuditLog::open(&path).await.unwrap();
            log.append(&AuditEvent::new(EventId::DaemonStop, Severity::Info, "two"))
                .await
                .unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
