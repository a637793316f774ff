//! Hardcoded rule tables and the compiler that turns an [`AccessPolicy`]
//! into an evaluable rule set.
//!
//! The deny tables are not configuration. They are the floor of the security
//! model and cannot be removed or overridden by any policy file.

use regex_lite::Regex;
use regex_lite::RegexBuilder;

use crate::error::GaneshaErr;
use crate::error::Result;
use crate::policy::AccessLevel;
use crate::policy::AccessPolicy;

/// Why a hardcoded pattern exists. The daemon picks the audit event class
/// from this (self-invocation gets its own critical event).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyClass {
    SelfInvocation,
    StateTampering,
    LogErasure,
    CatastrophicDeletion,
    ForkBomb,
    DiskDestruction,
    FirmwareWrite,
    CredentialExfiltration,
    KernelManipulation,
    SecurityDisable,
}

/// Security-critical patterns. Never allowed regardless of access level,
/// whitelist or blacklist.
pub const ALWAYS_DENIED: &[(DenyClass, &str)] = &[
    // Self-invocation with consent-bypass or escalation flags. The planner
    // must not be able to re-enter the front-end with a weaker boundary.
    (DenyClass::SelfInvocation, r"ganesha\s+.*--auto"),
    (DenyClass::SelfInvocation, r"ganesha\s+.*-A\b"),
    (DenyClass::SelfInvocation, r"ganesha\s+.*--yes"),
    (DenyClass::SelfInvocation, r"ganesha\s+.*-y\b"),
    (DenyClass::SelfInvocation, r"ganesha-daemon\s+.*--level\s+full"),
    (
        DenyClass::SelfInvocation,
        r"ganesha-config\s+.*set-level\s+full",
    ),
    (DenyClass::SelfInvocation, r"ganesha-config\s+.*reset"),
    // Destructive operations against our own config and logs.
    (
        DenyClass::StateTampering,
        r"(rm|mv|cp|cat\s*>|echo\s*>).*\.ganesha/",
    ),
    (
        DenyClass::StateTampering,
        r"(rm|mv|cp|cat\s*>|echo\s*>).*/etc/ganesha/",
    ),
    (
        DenyClass::StateTampering,
        r"(rm|mv|cp|cat\s*>|echo\s*>).*/var/log/ganesha/",
    ),
    // Clearing the system logs our events land in.
    (
        DenyClass::LogErasure,
        r"(rm|truncate|cat\s*/dev/null\s*>).*(/var/log/syslog|/var/log/messages)",
    ),
    (DenyClass::LogErasure, r"journalctl\s+--vacuum"),
    (DenyClass::LogErasure, r"(rm|truncate).*\.xsession-errors"),
    // Catastrophic recursive deletion.
    (DenyClass::CatastrophicDeletion, r"rm\s+(-rf?|--recursive)\s+/\s*$"),
    (DenyClass::CatastrophicDeletion, r"rm\s+(-rf?|--recursive)\s+/\*"),
    (
        DenyClass::CatastrophicDeletion,
        r"rm\s+(-rf?|--recursive)\s+/home\s*$",
    ),
    (
        DenyClass::CatastrophicDeletion,
        r"rm\s+(-rf?|--recursive)\s+/etc\s*$",
    ),
    (
        DenyClass::CatastrophicDeletion,
        r"rm\s+(-rf?|--recursive)\s+/var\s*$",
    ),
    (
        DenyClass::CatastrophicDeletion,
        r"rm\s+(-rf?|--recursive)\s+/usr\s*$",
    ),
    // Fork bombs and recursive self-spawn.
    (DenyClass::ForkBomb, r":\(\)\s*\{\s*:\|:&\s*\}\s*;:"),
    (DenyClass::ForkBomb, r"\./\s*\S+\s*\|\s*\./\s*\S+\s*&"),
    // Raw disk destruction.
    (DenyClass::DiskDestruction, r"dd\s+.*of=/dev/[sh]d[a-z]\s*$"),
    (
        DenyClass::DiskDestruction,
        r"mkfs\s+.*\s+/dev/[sh]d[a-z][0-9]*",
    ),
    (DenyClass::DiskDestruction, r"wipefs"),
    // Firmware and bootloader writes.
    (DenyClass::FirmwareWrite, r"dd\s+.*of=/dev/nvme"),
    (DenyClass::FirmwareWrite, r"flashrom"),
    // Credential exfiltration.
    (
        DenyClass::CredentialExfiltration,
        r"(curl|wget|nc)\s+.*(/etc/shadow|/etc/passwd|\.ssh/)",
    ),
    (
        DenyClass::CredentialExfiltration,
        r"cat\s+.*\.ssh/(id_rsa|id_ed25519)\s*\|",
    ),
    // Kernel manipulation.
    (DenyClass::KernelManipulation, r"insmod\s+.*\.ko"),
    (DenyClass::KernelManipulation, r"rmmod"),
    (DenyClass::KernelManipulation, r"echo\s+.*>\s*/proc/sys"),
    // Disabling security controls.
    (DenyClass::SecurityDisable, r"setenforce\s+0"),
    (
        DenyClass::SecurityDisable,
        r"systemctl\s+(stop|disable)\s+.*firewall",
    ),
    (DenyClass::SecurityDisable, r"ufw\s+disable"),
    (DenyClass::SecurityDisable, r"iptables\s+-F"),
];

/// Phrases characteristic of prompt-injection and jailbreak attempts.
/// Matching text never executes anything by itself, but it terminates the
/// planning stage.
pub const MANIPULATION_INDICATORS: &[&str] = &[
    r"ignore\s+(previous|prior|above)\s+(instructions?|rules?|constraints?)",
    r"disregard\s+(safety|security|restrictions?)",
    r"pretend\s+(you\s+)?(are|can|have)",
    r"act\s+as\s+if\s+(there\s+)?(are\s+)?no\s+(rules?|restrictions?)",
    r"bypass\s+(the\s+)?(safety|security|consent)",
    r"override\s+(the\s+)?(safety|security|consent)",
    r"you\s+(must|should|have\s+to)\s+(always\s+)?approve",
    r"automatically\s+(approve|accept|allow|run)",
    r"without\s+(asking|confirmation|consent|approval)",
    r"skip\s+(the\s+)?(confirmation|consent|approval|check)",
    r"trust\s+me",
    r"i('m|\s+am)\s+(the\s+)?(admin|root|owner|authorized)",
    r"emergency\s+(override|access|mode)",
    r"maintenance\s+mode",
    r"debug\s+mode.*all\s+access",
];

/// Read-only inspection of files, system state, network state, services,
/// packages and git.
const PRESET_RESTRICTED: &[&str] = &[
    // File viewing
    r"^cat\s+",
    r"^less\s+",
    r"^head\s+",
    r"^tail\s+",
    r"^ls\s+",
    r"^ls$",
    r"^find\s+.*-type",
    r"^file\s+",
    r"^stat\s+",
    r"^wc\s+",
    // System info
    r"^uname\s+",
    r"^hostname$",
    r"^uptime$",
    r"^whoami$",
    r"^id$",
    r"^groups$",
    r"^df\s+",
    r"^du\s+",
    r"^free\s+",
    r"^lscpu$",
    r"^lsblk$",
    r"^lspci$",
    r"^lsusb$",
    r"^lsof\s+",
    r"^ps\s+",
    r"^top\s+-b\s+-n\s*1",
    // Network info
    r"^ip\s+(addr|link|route)\s*(show)?",
    r"^ifconfig$",
    r"^netstat\s+",
    r"^ss\s+",
    r"^ping\s+-c\s+\d+\s+",
    r"^dig\s+",
    r"^nslookup\s+",
    r"^host\s+",
    // Service status
    r"^systemctl\s+status\s+",
    r"^systemctl\s+is-active\s+",
    r"^systemctl\s+is-enabled\s+",
    r"^systemctl\s+list-units",
    r"^service\s+\S+\s+status$",
    // Docker, read-only
    r"^docker\s+(ps|images|info|version|inspect)",
    r"^docker\s+logs\s+",
    // Package info
    r"^apt\s+(list|show|search)",
    r"^apt-cache\s+",
    r"^dpkg\s+-[lLsS]",
    r"^pip3?\s+(list|show|freeze)",
    r"^npm\s+(list|ls|view)",
    // Git, read-only
    r"^git\s+(status|log|diff|branch|remote|show)",
    // Environment viewing
    r"^env$",
    r"^printenv",
    r"^echo\s+\$",
];

/// Common sysadmin tasks; safe modifications. `rm -rf /` and friends stay
/// blocked by the always-denied table.
const PRESET_STANDARD: &[&str] = &[
    // File operations
    r"^mkdir\s+",
    r"^touch\s+",
    r"^cp\s+",
    r"^mv\s+",
    r"^rm\s+",
    r"^chmod\s+",
    r"^chown\s+",
    r"^ln\s+",
    // Text processing
    r"^grep\s+",
    r"^awk\s+",
    r"^sed\s+",
    r"^sort\s+",
    r"^uniq\s+",
    r"^cut\s+",
    r"^tr\s+",
    // Archives
    r"^tar\s+",
    r"^gzip\s+",
    r"^gunzip\s+",
    r"^zip\s+",
    r"^unzip\s+",
    // Network fetches (exfiltration targets are always-denied)
    r"^curl\s+",
    r"^wget\s+",
    // Own-process control
    r"^kill\s+\d+",
    r"^pkill\s+",
    r"^killall\s+",
    // Docker, non-privileged
    r"^docker\s+(pull|run|stop|start|restart|rm|exec)",
    r"^docker-compose\s+",
    // Git mutations
    r"^git\s+(add|commit|push|pull|fetch|checkout|merge|rebase)",
    // Editors
    r"^nano\s+",
    r"^vim?\s+",
    // Interpreters and user-local installs
    r"^python3?\s+",
    r"^pip3?\s+install\s+--user",
    r"^node\s+",
    r"^npm\s+(install|run|start|test)",
    // User crontab
    r"^crontab\s+",
];

/// Package management and service lifecycle. Requires more trust.
const PRESET_ELEVATED: &[&str] = &[
    // Package management
    r"^apt\s+(update|upgrade|install|remove|purge|autoremove)",
    r"^apt-get\s+",
    r"^dpkg\s+-i",
    r"^pip3?\s+install",
    r"^npm\s+install\s+-g",
    // Service lifecycle
    r"^systemctl\s+(start|stop|restart|reload|enable|disable)\s+",
    r"^service\s+\S+\s+(start|stop|restart|reload)$",
    // Docker privileged
    r"^docker\s+(build|network|volume)",
    // System configuration
    r"^hostnamectl\s+",
    r"^timedatectl\s+",
    r"^localectl\s+",
    // User management
    r"^useradd\s+",
    r"^usermod\s+",
    r"^passwd\s+",
    r"^groupadd\s+",
    // Firewall rules (disabling it is always-denied)
    r"^ufw\s+(allow|deny|status|enable)",
    // Mounts
    r"^mount\s+",
    r"^umount\s+",
    r"^blkid\s+",
];

/// Everything, relying exclusively on the always-denied floor.
const PRESET_FULL_ACCESS: &[&str] = &[r".*"];

fn preset_patterns(level: AccessLevel) -> &'static [&'static str] {
    match level {
        AccessLevel::Restricted => PRESET_RESTRICTED,
        AccessLevel::Standard => PRESET_STANDARD,
        AccessLevel::Elevated => PRESET_ELEVATED,
        AccessLevel::FullAccess => PRESET_FULL_ACCESS,
        AccessLevel::Whitelist | AccessLevel::Blacklist => &[],
    }
}

fn preset_inherits(level: AccessLevel) -> Option<AccessLevel> {
    match level {
        AccessLevel::Standard => Some(AccessLevel::Restricted),
        AccessLevel::Elevated => Some(AccessLevel::Standard),
        AccessLevel::FullAccess => Some(AccessLevel::Elevated),
        _ => None,
    }
}

fn compile(pattern: &str) -> std::result::Result<Regex, regex_lite::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

/// The compiled, immutable rule set the daemon evaluates against. Built
/// once at startup (and on explicit reload) and then shared read-only.
pub struct RuleSet {
    pub level: AccessLevel,
    always_denied: Vec<(DenyClass, Regex)>,
    manipulation: Vec<Regex>,
    preset_allowed: Vec<Regex>,
    whitelist: Vec<Regex>,
    blacklist: Vec<Regex>,
    /// User patterns that failed to compile and were dropped.
    pub dropped_patterns: Vec<String>,
}

impl RuleSet {
    /// Compile the policy into a rule set. A builtin pattern that fails to
    /// compile is a hard error; an invalid user pattern is dropped with a
    /// warning and recorded in `dropped_patterns`.
    pub fn compile(policy: &AccessPolicy) -> Result<Self> {
        let mut always_denied = Vec::with_capacity(ALWAYS_DENIED.len());
        for (class, pattern) in ALWAYS_DENIED {
            let regex = compile(pattern).map_err(|e| GaneshaErr::PatternCompile {
                pattern: (*pattern).to_string(),
                message: e.to_string(),
            })?;
            always_denied.push((*class, regex));
        }

        let mut manipulation = Vec::with_capacity(MANIPULATION_INDICATORS.len());
        for pattern in MANIPULATION_INDICATORS {
            let regex = compile(pattern).map_err(|e| GaneshaErr::PatternCompile {
                pattern: (*pattern).to_string(),
                message: e.to_string(),
            })?;
            manipulation.push(regex);
        }

        // Expand preset inheritance, leaves last so the most specific
        // patterns are consulted first.
        let mut preset_allowed = Vec::new();
        let mut next = Some(policy.level);
        while let Some(level) = next {
            for pattern in preset_patterns(level) {
                let regex = compile(pattern).map_err(|e| GaneshaErr::PatternCompile {
                    pattern: (*pattern).to_string(),
                    message: e.to_string(),
                })?;
                preset_allowed.push(regex);
            }
            next = preset_inherits(level);
        }

        let mut dropped_patterns = Vec::new();
        let whitelist = compile_user_patterns(&policy.whitelist, &mut dropped_patterns);
        let blacklist = compile_user_patterns(&policy.blacklist, &mut dropped_patterns);

        Ok(Self {
            level: policy.level,
            always_denied,
            manipulation,
            preset_allowed,
            whitelist,
            blacklist,
            dropped_patterns,
        })
    }

    pub fn match_always_denied(&self, command: &str) -> Option<DenyClass> {
        self.always_denied
            .iter()
            .find(|(_, regex)| regex.is_match(command))
            .map(|(class, _)| *class)
    }

    pub fn match_blacklist(&self, command: &str) -> bool {
        self.blacklist.iter().any(|regex| regex.is_match(command))
    }

    pub fn match_whitelist(&self, command: &str) -> bool {
        self.whitelist.iter().any(|regex| regex.is_match(command))
    }

    /// Preset patterns must match from the start of the command.
    pub fn match_preset(&self, command: &str) -> bool {
        self.preset_allowed
            .iter()
            .any(|regex| regex.find(command).is_some_and(|m| m.start() == 0))
    }

    /// Returns the text that matched a manipulation indicator, if any.
    pub fn find_manipulation<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.manipulation
            .iter()
            .find_map(|regex| regex.find(text).map(|m| m.as_str()))
    }
}

fn compile_user_patterns(patterns: &[String], dropped: &mut Vec<String>) -> Vec<Regex> {
    let mut compiled = Vec::with_capacity(patterns.len());
    for pattern in patterns {
        match compile(pattern) {
            Ok(regex) => compiled.push(regex),
            Err(e) => {
                tracing::warn!("dropping invalid user pattern `{pattern}`: {e}");
                dropped.push(pattern.clone());
            }
        }
    }
    compiled
}
