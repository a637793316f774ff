use clap::Parser;
use std::path::PathBuf;

/// Ganesha CLI
///
/// Translates a natural-language task into shell commands, asks for your
/// consent, and executes the approved steps through the privileged daemon
/// when one is running.
#[derive(Debug, Parser)]
#[clap(version, subcommand_negates_reqs = true)]
pub struct Cli {
    /// The task to perform, in plain language.
    #[arg(value_name = "TASK", required = true)]
    pub task: Option<String>,

    /// Approve every low/medium-risk action without prompting. High-risk
    /// actions still prompt unless the policy says otherwise. The daemon
    /// ignores this flag entirely.
    #[arg(long = "auto", short = 'A', default_value_t = false)]
    pub auto: bool,

    /// Working directory for executed commands.
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Per-action timeout in seconds (clamped by the daemon's policy).
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,

    #[clap(subcommand)]
    pub command: Option<Subcommand>,
}

#[derive(Debug, clap::Subcommand)]
pub enum Subcommand {
    /// Undo a previous session's reversible actions, newest first.
    Rollback {
        /// Session id, or `last` for the most recent one.
        #[arg(value_name = "SESSION_ID", default_value = "last")]
        session_id: String,

        /// Approve rollback actions without prompting.
        #[arg(long = "auto", short = 'A', default_value_t = false)]
        auto: bool,
    },

    /// Show daemon availability and the active policy.
    Status,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_a_task_with_auto_flag() {
        let cli = Cli::try_parse_from(["ganesha", "-A", "update all packages"]).unwrap();
        assert_eq!(cli.task.as_deref(), Some("update all packages"));
        assert!(cli.auto);
        assert!(cli.command.is_none());
        assert_eq!(cli.timeout, 60);
    }

    #[test]
    fn task_is_required_without_a_subcommand() {
        assert!(Cli::try_parse_from(["ganesha"]).is_err());
    }

    #[test]
    fn rollback_defaults_to_last() {
        let cli = Cli::try_parse_from(["ganesha", "rollback"]).unwrap();
        match cli.command {
            Some(Subcommand::Rollback { session_id, auto }) => {
                assert_eq!(session_id, "last");
                assert!(!auto);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn rollback_accepts_an_explicit_session() {
        let cli = Cli::try_parse_from(["ganesha", "rollback", "20250801_093000"]).unwrap();
        match cli.command {
            Some(Subcommand::Rollback { session_id, .. }) => {
                assert_eq!(session_id, "20250801_093000");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
