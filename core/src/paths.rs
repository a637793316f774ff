//! Filesystem layout. The policy store owns the policy files, the session
//! recorder owns the session directory, and the daemon owns the socket and
//! PID file; everything else just needs to agree on where those live.

use std::io;
use std::path::PathBuf;

/// Leaf of the policy file under either config directory.
pub const POLICY_FILENAME: &str = "privilege.toml";

/// System-wide configuration directory. The file here, when present, wins
/// over the per-user one.
pub const SYSTEM_CONFIG_DIR: &str = "/etc/ganesha";

/// Runtime directory holding the daemon socket and PID file.
pub const RUNTIME_DIR: &str = "/run/ganesha";

/// System log directory for the audit trail.
pub const SYSTEM_LOG_DIR: &str = "/var/log/ganesha";

/// Per-user state directory, `~/.ganesha` unless `GANESHA_HOME` is set.
/// The override exists for tests and packaging, same as the config dir
/// override most CLIs honor.
pub fn ganesha_home() -> io::Result<PathBuf> {
    if let Ok(home) = std::env::var("GANESHA_HOME")
        && !home.is_empty()
    {
        return Ok(PathBuf::from(home));
    }
    dirs::home_dir()
        .map(|home| home.join(".ganesha"))
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "could not resolve home directory"))
}

pub fn system_policy_path() -> PathBuf {
    PathBuf::from(SYSTEM_CONFIG_DIR).join(POLICY_FILENAME)
}

pub fn user_policy_path() -> io::Result<PathBuf> {
    Ok(ganesha_home()?.join(POLICY_FILENAME))
}

pub fn socket_path() -> PathBuf {
    PathBuf::from(RUNTIME_DIR).join("privileged.sock")
}

pub fn pid_file_path() -> PathBuf {
    PathBuf::from(RUNTIME_DIR).join("daemon.pid")
}

/// Audit log location for a root process. Unprivileged fallback execution
/// audits into the user's state directory instead.
pub fn system_audit_log_path() -> PathBuf {
    PathBuf::from(SYSTEM_LOG_DIR).join("audit.log")
}

pub fn user_audit_log_path() -> io::Result<PathBuf> {
    Ok(ganesha_home()?.join("audit.log"))
}

/// Fallback file for the OS-log pipeline when every syslog/journald sink is
/// unavailable.
pub fn system_log_fallback_path(running_as_root: bool) -> io::Result<PathBuf> {
    if running_as_root {
        Ok(PathBuf::from(SYSTEM_LOG_DIR).join("system.log"))
    } else {
        Ok(ganesha_home()?.join("system.log"))
    }
}

pub fn sessions_dir() -> io::Result<PathBuf> {
    Ok(ganesha_home()?.join("sessions"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_paths_share_the_leaf() {
        assert!(system_policy_path().ends_with("ganesha/privilege.toml"));
    }

    #[test]
    fn socket_and_pid_file_are_siblings() {
        let socket = socket_path();
        let pid = pid_file_path();
        assert_eq!(socket.parent(), pid.parent());
        assert!(socket.ends_with("ganesha/privileged.sock"));
        assert!(pid.ends_with("daemon.pid"));
    }
}
