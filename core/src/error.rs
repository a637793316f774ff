use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GaneshaErr>;

#[derive(Error, Debug)]
pub enum GaneshaErr {
    /// The policy file exists but could not be read or parsed. The daemon
    /// recovers by falling back to the `restricted` preset.
    #[error("failed to load policy: {0}")]
    PolicyLoad(String),

    /// A builtin rule failed to compile. This is a code defect, not a
    /// configuration problem; the daemon refuses to start on it. Invalid
    /// *user* patterns are dropped with a warning instead.
    #[error("invalid builtin pattern `{pattern}`: {message}")]
    PatternCompile { pattern: String, message: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("manipulation attempt detected: matched `{0}`")]
    ManipulationDetected(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The daemon socket is unreachable. The client may fall back to direct
    /// execution, which keeps the hardcoded deny floor but drops privilege.
    #[error("cannot reach privileged daemon: {0}")]
    Transport(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
