//! Root of the `ganesha-core` library.
//!
//! Layering is strict: the access controller and manipulation detector
//! depend on nothing above them; the daemon and client build on them plus
//! the audit pipeline; the session recorder touches only the filesystem.

// Prevent accidental direct writes to stdout/stderr in library code. All
// user-visible output belongs to the binaries.
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod access;
pub mod audit;
pub mod error;
pub mod events;
pub mod exec;
pub mod manipulation;
pub mod paths;
pub mod policy;
pub mod rules;
pub mod session;
pub mod system_log;

pub use access::AccessController;
pub use access::Decision;
pub use access::RuleOrigin;
pub use audit::AuditLog;
pub use error::GaneshaErr;
pub use error::Result;
pub use events::AuditEvent;
pub use events::EventId;
pub use events::Severity;
pub use policy::AccessLevel;
pub use policy::AccessPolicy;
pub use rules::DenyClass;
pub use rules::RuleSet;
pub use session::Action;
pub use session::ActionType;
pub use session::ExecutionResult;
pub use session::Plan;
pub use session::Session;
pub use session::SessionState;
pub use session::SessionStore;
pub use system_log::SystemLogger;
