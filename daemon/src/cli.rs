use clap::Parser;
use clap::ValueEnum;
use ganesha_core::AccessLevel;
use std::path::PathBuf;

/// Ganesha privileged daemon.
///
/// Must run as root. Listens on a local socket, authenticates peers by
/// kernel credentials, and executes commands approved by the access policy.
#[derive(Debug, Parser)]
#[command(version)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Option<DaemonCommand>,

    /// Explicit policy file instead of the standard search locations.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Override the policy's access level for this run.
    #[arg(long, value_enum)]
    pub level: Option<AccessLevelArg>,
}

#[derive(Debug, Clone, clap::Subcommand)]
pub enum DaemonCommand {
    /// Serve requests (the default).
    Run,
    /// Report whether a daemon appears to be running.
    Status,
}

/// CLI surface for the access level. `whitelist`/`blacklist` can only come
/// from the policy file; the flag covers the presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum AccessLevelArg {
    Restricted,
    Standard,
    Elevated,
    FullAccess,
}

impl From<AccessLevelArg> for AccessLevel {
    fn from(arg: AccessLevelArg) -> Self {
        match arg {
            AccessLevelArg::Restricted => AccessLevel::Restricted,
            AccessLevelArg::Standard => AccessLevel::Standard,
            AccessLevelArg::Elevated => AccessLevel::Elevated,
            AccessLevelArg::FullAccess => AccessLevel::FullAccess,
        }
    }
}
