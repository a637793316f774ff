//! Wire contract between the unprivileged ganesha front-end and the
//! privileged daemon. Both sides depend on this crate and nothing else in
//! the workspace, so the trust boundary is expressed in one place.

mod wire;

pub use wire::CommandRequest;
pub use wire::CommandResponse;
pub use wire::MAX_REQUEST_BYTES;
pub use wire::MAX_RESPONSE_BYTES;
pub use wire::READ_TIMEOUT;
pub use wire::RiskLevel;
pub use wire::parse_request;
