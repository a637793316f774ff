//! The persisted access policy and its on-disk store.
//!
//! Two locations are searched in order: the system file under
//! `/etc/ganesha/` and the per-user file under `~/.ganesha/`. The first one
//! that exists is authoritative; with neither present the `standard` preset
//! defaults apply. Saves are atomic (temp file + rename) so the daemon never
//! observes a half-written policy.

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;

use crate::error::GaneshaErr;
use crate::error::Result;
use crate::paths;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AccessLevel {
    /// Read-only inspection. Cannot modify system state.
    Restricted,
    /// Common sysadmin tasks, safe modifications.
    Standard,
    /// Package management, service control, system configuration.
    Elevated,
    /// Anything not hardcoded-denied.
    FullAccess,
    /// Only user-supplied patterns are allowed.
    Whitelist,
    /// Everything except user-supplied denials.
    Blacklist,
}

/// Access control policy for the privileged daemon.
///
/// Commands are checked in fixed order: always-denied patterns, then the
/// user blacklist, then the mode-specific rules. See
/// [`crate::access::AccessController::check`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessPolicy {
    pub level: AccessLevel,
    pub whitelist: Vec<String>,
    pub blacklist: Vec<String>,
    pub allowed_paths: Vec<String>,
    pub denied_paths: Vec<String>,
    pub require_approval_for_high_risk: bool,
    pub audit_all_commands: bool,
    pub max_execution_time_seconds: u64,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            level: AccessLevel::Standard,
            whitelist: Vec::new(),
            blacklist: Vec::new(),
            allowed_paths: vec!["/tmp".to_string(), "/home".to_string()],
            denied_paths: vec!["/etc/shadow".to_string(), "/etc/sudoers".to_string()],
            require_approval_for_high_risk: true,
            audit_all_commands: true,
            max_execution_time_seconds: 300,
        }
    }
}

/// Serde mirror of the policy file. Every field is optional so a partial
/// file merges over the defaults, and unknown keys are ignored.
#[derive(Debug, Default, Deserialize)]
struct PolicyToml {
    level: Option<AccessLevel>,
    whitelist: Option<Vec<String>>,
    blacklist: Option<Vec<String>>,
    allowed_paths: Option<Vec<String>>,
    denied_paths: Option<Vec<String>>,
    require_approval_for_high_risk: Option<bool>,
    audit_all_commands: Option<bool>,
    max_execution_time_seconds: Option<u64>,
}

impl PolicyToml {
    fn into_policy(self) -> AccessPolicy {
        let defaults = AccessPolicy::default();
        let mut policy = AccessPolicy {
            level: self.level.unwrap_or(defaults.level),
            whitelist: self.whitelist.unwrap_or(defaults.whitelist),
            blacklist: self.blacklist.unwrap_or(defaults.blacklist),
            allowed_paths: self.allowed_paths.unwrap_or(defaults.allowed_paths),
            denied_paths: self.denied_paths.unwrap_or(defaults.denied_paths),
            require_approval_for_high_risk: self
                .require_approval_for_high_risk
                .unwrap_or(defaults.require_approval_for_high_risk),
            audit_all_commands: self.audit_all_commands.unwrap_or(defaults.audit_all_commands),
            max_execution_time_seconds: self
                .max_execution_time_seconds
                .unwrap_or(defaults.max_execution_time_seconds),
        };
        if policy.max_execution_time_seconds == 0 {
            tracing::warn!("max_execution_time_seconds must be >= 1; clamping to 1");
            policy.max_execution_time_seconds = 1;
        }
        policy
    }
}

/// The search order for the policy file: system first, then per-user.
pub fn policy_locations() -> Vec<PathBuf> {
    let mut locations = vec![paths::system_policy_path()];
    if let Ok(user) = paths::user_policy_path() {
        locations.push(user);
    }
    locations
}

/// Path the policy would be loaded from right now, if any file exists.
pub fn active_policy_path() -> Option<PathBuf> {
    policy_locations().into_iter().find(|p| p.exists())
}

/// Load the policy from the first existing location, or defaults.
pub fn load_policy() -> Result<AccessPolicy> {
    match active_policy_path() {
        Some(path) => load_policy_from(&path),
        None => Ok(AccessPolicy::default()),
    }
}

/// Load the policy from an explicit path. A missing file yields defaults; a
/// malformed file is a [`GaneshaErr::PolicyLoad`].
pub fn load_policy_from(path: &Path) -> Result<AccessPolicy> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(AccessPolicy::default());
        }
        Err(e) => {
            return Err(GaneshaErr::PolicyLoad(format!(
                "{}: {e}",
                path.to_string_lossy()
            )));
        }
    };
    let parsed: PolicyToml = toml::from_str(&contents).map_err(|e| {
        GaneshaErr::PolicyLoad(format!("{}: {e}", path.to_string_lossy()))
    })?;
    Ok(parsed.into_policy())
}

/// Atomically persist the policy: write a sibling temp file, fsync, rename.
pub fn save_policy(policy: &AccessPolicy, path: &Path) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| GaneshaErr::PolicyLoad(format!("{} has no parent", path.display())))?;
    std::fs::create_dir_all(parent)?;

    let serialized = toml::to_string_pretty(policy)
        .map_err(|e| GaneshaErr::PolicyLoad(format!("serialize policy: {e}")))?;

    let tmp = tempfile::NamedTempFile::new_in(parent)?;
    std::io::Write::write_all(&mut tmp.as_file(), serialized.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| GaneshaErr::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_standard() {
        let policy = AccessPolicy::default();
        assert_eq!(policy.level, AccessLevel::Standard);
        assert_eq!(policy.max_execution_time_seconds, 300);
        assert!(policy.require_approval_for_high_risk);
        assert!(policy.audit_all_commands);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("privilege.toml");
        let policy = AccessPolicy {
            level: AccessLevel::Whitelist,
            whitelist: vec!["^apt ".to_string(), "^systemctl status".to_string()],
            blacklist: vec!["^mv\\s+/tmp/".to_string()],
            max_execution_time_seconds: 42,
            ..AccessPolicy::default()
        };

        save_policy(&policy, &path).unwrap();
        let loaded = load_policy_from(&path).unwrap();
        assert_eq!(loaded, policy);
    }

    #[test]
    fn partial_file_merges_over_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("privilege.toml");
        std::fs::write(&path, "level = \"elevated\"\n").unwrap();

        let loaded = load_policy_from(&path).unwrap();
        assert_eq!(loaded.level, AccessLevel::Elevated);
        assert_eq!(loaded.max_execution_time_seconds, 300);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let loaded = load_policy_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(loaded, AccessPolicy::default());
    }

    #[test]
    fn malformed_file_is_a_load_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("privilege.toml");
        std::fs::write(&path, "level = [this is not toml").unwrap();
        assert!(matches!(
            load_policy_from(&path),
            Err(GaneshaErr::PolicyLoad(_))
        ));
    }

    #[test]
    fn zero_timeout_is_clamped_to_one() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("privilege.toml");
        std::fs::write(&path, "max_execution_time_seconds = 0\n").unwrap();
        let loaded = load_policy_from(&path).unwrap();
        assert_eq!(loaded.max_execution_time_seconds, 1);
    }

    #[test]
    fn level_uses_snake_case_in_the_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("privilege.toml");
        let policy = AccessPolicy {
            level: AccessLevel::FullAccess,
            ..AccessPolicy::default()
        };
        save_policy(&policy, &path).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("level = \"full_access\""));
        assert_eq!(AccessLevel::FullAccess.to_string(), "full_access");
    }
}
