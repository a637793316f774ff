//! The authoritative decision function over a single command line.
//!
//! `check()` runs on both sides of the trust boundary: the client may
//! pre-check to fail fast, but only the daemon's call grants execution.

use ganesha_protocol::RiskLevel;

use crate::error::Result;
use crate::policy::AccessLevel;
use crate::policy::AccessPolicy;
use crate::rules::DenyClass;
use crate::rules::RuleSet;

/// Which rule produced the decision. Drives audit event classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOrigin {
    AlwaysDenied(DenyClass),
    Blacklist,
    Whitelist,
    Preset(AccessLevel),
    /// No rule matched; the mode's default applied.
    Default,
}

#[derive(Debug, Clone)]
pub struct Decision {
    pub allowed: bool,
    pub risk_level: RiskLevel,
    /// Stable, machine-correlatable reason string.
    pub reason: String,
    pub origin: RuleOrigin,
}

impl Decision {
    fn deny(risk_level: RiskLevel, reason: impl Into<String>, origin: RuleOrigin) -> Self {
        Self {
            allowed: false,
            risk_level,
            reason: reason.into(),
            origin,
        }
    }

    fn allow(risk_level: RiskLevel, reason: impl Into<String>, origin: RuleOrigin) -> Self {
        Self {
            allowed: true,
            risk_level,
            reason: reason.into(),
            origin,
        }
    }
}

/// Evaluates commands against the compiled rule set. Deterministic and
/// side-effect free: the decision depends only on the command text and the
/// rules compiled at construction.
pub struct AccessController {
    rules: RuleSet,
}

impl AccessController {
    pub fn new(policy: &AccessPolicy) -> Result<Self> {
        Ok(Self {
            rules: RuleSet::compile(policy)?,
        })
    }

    pub fn from_rules(rules: RuleSet) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn level(&self) -> AccessLevel {
        self.rules.level
    }

    /// Classify a command. The evaluation order is fixed and must not be
    /// reordered: empty check, always-denied, blacklist, then mode
    /// dispatch. The lexical risk heuristic may raise the risk of any
    /// outcome but never lowers it.
    pub fn check(&self, command: &str) -> Decision {
        let command = command.trim();
        if command.is_empty() {
            return Decision::deny(RiskLevel::Unknown, "empty command", RuleOrigin::Default);
        }

        let heuristic = risk_heuristic(command);

        if let Some(class) = self.rules.match_always_denied(command) {
            return Decision::deny(
                RiskLevel::Critical,
                "security-critical deny",
                RuleOrigin::AlwaysDenied(class),
            );
        }

        if self.rules.match_blacklist(command) {
            return Decision::deny(
                RiskLevel::High.max(heuristic),
                "blacklist match",
                RuleOrigin::Blacklist,
            );
        }

        match self.rules.level {
            AccessLevel::Whitelist => {
                if self.rules.match_whitelist(command) {
                    Decision::allow(
                        RiskLevel::Low.max(heuristic),
                        "whitelist match",
                        RuleOrigin::Whitelist,
                    )
                } else {
                    Decision::deny(
                        RiskLevel::Medium.max(heuristic),
                        "not in whitelist",
                        RuleOrigin::Default,
                    )
                }
            }
            AccessLevel::Blacklist => {
                // The blacklist itself was consulted above.
                Decision::allow(
                    RiskLevel::Medium.max(heuristic),
                    "not in blacklist",
                    RuleOrigin::Default,
                )
            }
            level => {
                if self.rules.match_preset(command) {
                    Decision::allow(
                        RiskLevel::Low.max(heuristic),
                        format!("allowed by {level} preset"),
                        RuleOrigin::Preset(level),
                    )
                } else {
                    Decision::deny(
                        RiskLevel::Medium.max(heuristic),
                        format!("not allowed by {level} preset"),
                        RuleOrigin::Default,
                    )
                }
            }
        }
    }
}

const CRITICAL_MARKERS: &[&str] = &["rm -rf", "dd if=", "mkfs", "> /dev/", "chmod 777 /"];

const HIGH_MARKERS: &[&str] = &[
    "rm -r",
    "sudo",
    "su -",
    "chmod",
    "chown",
    "kill -9",
    "systemctl stop",
    "service stop",
    "iptables",
];

const MEDIUM_MARKERS: &[&str] = &[
    "install",
    "remove",
    "delete",
    "modify",
    "update",
    "mv /",
    "cp /",
    "docker run",
];

/// Lexical risk assessment, independent of allow/deny.
pub fn risk_heuristic(command: &str) -> RiskLevel {
    let lower = command.to_lowercase();
    if CRITICAL_MARKERS.iter().any(|m| lower.contains(m)) {
        RiskLevel::Critical
    } else if HIGH_MARKERS.iter().any(|m| lower.contains(m)) {
        RiskLevel::High
    } else if MEDIUM_MARKERS.iter().any(|m| lower.contains(m)) {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}
