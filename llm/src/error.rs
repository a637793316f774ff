use thiserror::Error;

/// Typed failures of the planning stage. Any of these moves the session to
/// `failed` without a single request reaching the daemon.
#[derive(Error, Debug)]
pub enum PlannerError {
    #[error("no planner provider is reachable")]
    NoProviderAvailable,

    #[error("provider transport error: {0}")]
    Transport(String),

    #[error("provider request timed out")]
    Timeout,

    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("provider returned an empty response")]
    EmptyResponse,

    #[error("provider response is not a usable plan: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for PlannerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            PlannerError::Timeout
        } else {
            PlannerError::Transport(e.to_string())
        }
    }
}
