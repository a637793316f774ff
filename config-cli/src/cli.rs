use clap::Parser;
use clap::ValueEnum;
use ganesha_core::AccessLevel;

/// Manage the ganesha access policy.
#[derive(Debug, Parser)]
#[command(version)]
pub struct Cli {
    /// Operate on the system policy (/etc/ganesha) instead of the per-user
    /// one.
    #[arg(long, short = 's', default_value_t = false)]
    pub system: bool,

    #[clap(subcommand)]
    pub command: Option<ConfigCommand>,
}

#[derive(Debug, clap::Subcommand)]
pub enum ConfigCommand {
    /// Show the active policy (the default).
    Show,

    /// Set the access level preset.
    SetLevel {
        #[arg(value_enum)]
        level: LevelArg,
    },

    /// Manage user allow patterns.
    Whitelist {
        #[clap(subcommand)]
        action: PatternAction,
    },

    /// Manage user deny patterns.
    Blacklist {
        #[clap(subcommand)]
        action: PatternAction,
    },

    /// Run the access controller against a command without executing it.
    Test {
        #[arg(value_name = "COMMAND", trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },

    /// Pick a preset interactively.
    Preset,

    /// Delete the policy file, returning to defaults.
    Reset,
}

#[derive(Debug, clap::Subcommand)]
pub enum PatternAction {
    Add { pattern: String },
    Remove { pattern: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum LevelArg {
    Restricted,
    Standard,
    Elevated,
    FullAccess,
    Whitelist,
    Blacklist,
}

impl From<LevelArg> for AccessLevel {
    fn from(arg: LevelArg) -> Self {
        match arg {
            LevelArg::Restricted => AccessLevel::Restricted,
            LevelArg::Standard => AccessLevel::Standard,
            LevelArg::Elevated => AccessLevel::Elevated,
            LevelArg::FullAccess => AccessLevel::FullAccess,
            LevelArg::Whitelist => AccessLevel::Whitelist,
            LevelArg::Blacklist => AccessLevel::Blacklist,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn parses_set_level() {
        let cli = Cli::try_parse_from(["ganesha-config", "set-level", "full_access"]).unwrap();
        match cli.command {
            Some(ConfigCommand::SetLevel { level }) => {
                assert_eq!(AccessLevel::from(level), AccessLevel::FullAccess);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_whitelist_add_and_test() {
        let cli =
            Cli::try_parse_from(["ganesha-config", "whitelist", "add", "^apt "]).unwrap();
        assert!(matches!(
            cli.command,
            Some(ConfigCommand::Whitelist {
                action: PatternAction::Add { .. }
            })
        ));

        let cli = Cli::try_parse_from(["ganesha-config", "test", "apt", "update"]).unwrap();
        match cli.command {
            Some(ConfigCommand::Test { command }) => {
                assert_eq!(command.join(" "), "apt update");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
