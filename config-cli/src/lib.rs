//! Policy management for the privileged daemon. Every mutation goes
//! through the same atomic save as the daemon's loads, and is mirrored to
//! the OS log so level changes and pattern edits leave a trail.

mod cli;

use std::path::PathBuf;

use owo_colors::OwoColorize;

use ganesha_core::AccessController;
use ganesha_core::AccessLevel;
use ganesha_core::AccessPolicy;
use ganesha_core::AuditEvent;
use ganesha_core::EventId;
use ganesha_core::Severity;
use ganesha_core::SystemLogger;
use ganesha_core::paths;
use ganesha_core::policy::load_policy_from;
use ganesha_core::policy::save_policy;
use ganesha_core::rules::ALWAYS_DENIED;

pub use cli::Cli;
pub use cli::ConfigCommand;
pub use cli::LevelArg;
pub use cli::PatternAction;

pub fn run_main(cli: Cli) -> anyhow::Result<i32> {
    let config_path = if cli.system {
        paths::system_policy_path()
    } else {
        paths::user_policy_path()?
    };
    let system_log = SystemLogger::new(paths::system_log_fallback_path(cli.system)?);
    let tool = ConfigTool {
        config_path,
        system_log,
    };

    match cli.command.unwrap_or(ConfigCommand::Show) {
        ConfigCommand::Show => tool.show()?,
        ConfigCommand::SetLevel { level } => tool.set_level(level.into())?,
        ConfigCommand::Whitelist { action } => tool.edit_patterns(ListKind::Whitelist, action)?,
        ConfigCommand::Blacklist { action } => tool.edit_patterns(ListKind::Blacklist, action)?,
        ConfigCommand::Test { command } => {
            let allowed = tool.test_command(&command.join(" "))?;
            return Ok(if allowed { 0 } else { 2 });
        }
        ConfigCommand::Preset => tool.interactive_preset()?,
        ConfigCommand::Reset => tool.reset()?,
    }
    Ok(0)
}

#[derive(Clone, Copy)]
enum ListKind {
    Whitelist,
    Blacklist,
}

struct ConfigTool {
    config_path: PathBuf,
    system_log: SystemLogger,
}

impl ConfigTool {
    fn load(&self) -> anyhow::Result<AccessPolicy> {
        Ok(load_policy_from(&self.config_path)?)
    }

    fn save(&self, policy: &AccessPolicy) -> anyhow::Result<()> {
        save_policy(policy, &self.config_path)?;
        Ok(())
    }

    fn current_user() -> String {
        whoami_user()
    }

    fn show(&self) -> anyhow::Result<()> {
        let policy = self.load()?;
        let source = if self.config_path.exists() {
            self.config_path.display().to_string()
        } else {
            "defaults".to_string()
        };

        println!("{}", "ganesha access policy".bold());
        println!("  config: {source}");
        println!("  level: {}", level_colored(policy.level));
        println!(
            "  require approval for high risk: {}",
            policy.require_approval_for_high_risk
        );
        println!("  audit all commands: {}", policy.audit_all_commands);
        println!(
            "  max execution time: {}s",
            policy.max_execution_time_seconds
        );

        if !policy.whitelist.is_empty() {
            println!("\n{}", "whitelist:".green());
            for pattern in &policy.whitelist {
                println!("  + {pattern}");
            }
        }
        if !policy.blacklist.is_empty() {
            println!("\n{}", "blacklist:".red());
            for pattern in &policy.blacklist {
                println!("  - {pattern}");
            }
        }

        println!(
            "\n{} {} security-critical patterns (rm -rf /, disk wipes, log erasure, ...)",
            "always denied:".red().bold(),
            ALWAYS_DENIED.len()
        );
        Ok(())
    }

    fn set_level(&self, level: AccessLevel) -> anyhow::Result<()> {
        let mut policy = self.load()?;
        let old_level = policy.level;
        policy.level = level;
        self.save(&policy)?;

        self.system_log.log(
            &AuditEvent::new(
                EventId::AccessLevelChanged,
                Severity::Warning,
                format!("access level changed from {old_level} to {level}"),
            )
            .with_user(Self::current_user()),
        );

        println!("access level set to {}", level_colored(level));
        println!("saved to {}", self.config_path.display());
        if level == AccessLevel::FullAccess {
            println!(
                "{}",
                "warning: full access allows everything except the hardcoded security blocks"
                    .red()
                    .bold()
            );
        }
        Ok(())
    }

    fn edit_patterns(&self, kind: ListKind, action: PatternAction) -> anyhow::Result<()> {
        let mut policy = self.load()?;
        let (list, name, event_id) = match kind {
            ListKind::Whitelist => (
                &mut policy.whitelist,
                "whitelist",
                EventId::WhitelistModified,
            ),
            ListKind::Blacklist => (
                &mut policy.blacklist,
                "blacklist",
                EventId::BlacklistModified,
            ),
        };

        let message = match action {
            PatternAction::Add { pattern } => {
                if list.contains(&pattern) {
                    println!("pattern already in {name}: {pattern}");
                    return Ok(());
                }
                list.push(pattern.clone());
                println!("added to {name}: {pattern}");
                format!("{name} add: {pattern}")
            }
            PatternAction::Remove { pattern } => {
                let before = list.len();
                list.retain(|p| p != &pattern);
                if list.len() == before {
                    println!("pattern not in {name}: {pattern}");
                    return Ok(());
                }
                println!("removed from {name}: {pattern}");
                format!("{name} remove: {pattern}")
            }
        };

        self.save(&policy)?;
        self.system_log.log(
            &AuditEvent::new(event_id, Severity::Warning, message)
                .with_user(Self::current_user()),
        );
        Ok(())
    }

    fn test_command(&self, command: &str) -> anyhow::Result<bool> {
        let policy = self.load()?;
        let controller = AccessController::new(&policy)?;
        let decision = controller.check(command);

        println!("command: {command}");
        println!("policy level: {}", policy.level);
        if decision.allowed {
            println!(
                "{} [{}]",
                "ALLOWED".green().bold(),
                decision.risk_level
            );
        } else {
            println!("{} [{}]", "DENIED".red().bold(), decision.risk_level);
        }
        println!("reason: {}", decision.reason);
        Ok(decision.allowed)
    }

    fn interactive_preset(&self) -> anyhow::Result<()> {
        println!("{}", "access level presets:".bold());
        let presets = [
            (AccessLevel::Restricted, "read-only inspection"),
            (AccessLevel::Standard, "common sysadmin tasks (recommended)"),
            (AccessLevel::Elevated, "package management, services"),
            (AccessLevel::FullAccess, "everything; dangerous"),
            (AccessLevel::Whitelist, "only your allow patterns"),
            (AccessLevel::Blacklist, "everything except your denials"),
        ];
        for (index, (level, description)) in presets.iter().enumerate() {
            println!("  {}. {} - {description}", index + 1, level_colored(*level));
        }

        print!("select [1-{}]: ", presets.len());
        use std::io::Write;
        std::io::stdout().flush()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        let choice = line.trim();

        let selected = choice
            .parse::<usize>()
            .ok()
            .and_then(|n| presets.get(n.wrapping_sub(1)))
            .map(|(level, _)| *level)
            .or_else(|| {
                presets
                    .iter()
                    .find(|(level, _)| level.to_string() == choice)
                    .map(|(level, _)| *level)
            });

        match selected {
            Some(level) => self.set_level(level),
            None => {
                println!("invalid choice");
                Ok(())
            }
        }
    }

    fn reset(&self) -> anyhow::Result<()> {
        if self.config_path.exists() {
            std::fs::remove_file(&self.config_path)?;
            println!("deleted {}", self.config_path.display());
        }
        println!("configuration reset to defaults");
        self.system_log.log(
            &AuditEvent::new(
                EventId::ConfigChanged,
                Severity::Warning,
                "policy reset to defaults",
            )
            .with_user(Self::current_user()),
        );
        Ok(())
    }
}

fn level_colored(level: AccessLevel) -> String {
    match level {
        AccessLevel::Restricted | AccessLevel::Whitelist => format!("{}", level.green()),
        AccessLevel::Standard => format!("{}", level.cyan()),
        AccessLevel::Elevated | AccessLevel::Blacklist => format!("{}", level.yellow()),
        AccessLevel::FullAccess => format!("{}", level.red().bold()),
    }
}

fn whoami_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use tempfile::TempDir;

    fn tool(dir: &TempDir) -> ConfigTool {
        ConfigTool {
            config_path: dir.path().join("privilege.toml"),
            system_log: SystemLogger::file_only(dir.path().join("system.log")),
        }
    }

    #[test]
    fn set_level_persists() {
        let dir = TempDir::new().unwrap();
        let tool = tool(&dir);
        tool.set_level(AccessLevel::Elevated).unwrap();

        let policy = tool.load().unwrap();
        assert_eq!(policy.level, AccessLevel::Elevated);
    }

    #[test]
    fn pattern_edits_round_trip() {
        let dir = TempDir::new().unwrap();
        let tool = tool(&dir);

        tool.edit_patterns(
            ListKind::Whitelist,
            PatternAction::Add {
                pattern: "^apt ".to_string(),
            },
        )
        .unwrap();
        assert_eq!(tool.load().unwrap().whitelist, vec!["^apt ".to_string()]);

        // Adding the same pattern twice is a no-op.
        tool.edit_patterns(
            ListKind::Whitelist,
            PatternAction::Add {
                pattern: "^apt ".to_string(),
            },
        )
        .unwrap();
        assert_eq!(tool.load().unwrap().whitelist.len(), 1);

        tool.edit_patterns(
            ListKind::Whitelist,
            PatternAction::Remove {
                pattern: "^apt ".to_string(),
            },
        )
        .unwrap();
        assert!(tool.load().unwrap().whitelist.is_empty());
    }

    #[test]
    fn test_command_reports_the_decision() {
        let dir = TempDir::new().unwrap();
        let tool = tool(&dir);
        assert!(tool.test_command("ls /tmp").unwrap());
        assert!(!tool.test_command("rm -rf /").unwrap());
    }

    #[test]
    fn reset_removes_the_file() {
        let dir = TempDir::new().unwrap();
        let tool = tool(&dir);
        tool.set_level(AccessLevel::Restricted).unwrap();
        assert!(tool.config_path.exists());
        tool.reset().unwrap();
        assert!(!tool.config_path.exists());
        assert_eq!(tool.load().unwrap().level, AccessLevel::Standard);
    }

    #[test]
    fn config_changes_land_in_the_log() {
        let dir = TempDir::new().unwrap();
        let tool = tool(&dir);
        tool.set_level(AccessLevel::FullAccess).unwrap();

        let log = std::fs::read_to_string(dir.path().join("system.log")).unwrap();
        assert!(log.contains("ACCESS_LEVEL_CHANGED"));
        assert!(log.contains("full_access"));
    }
}
