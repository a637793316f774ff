use std::path::PathBuf;

/// What the planner is told about the host. Collected once per task so the
/// plan targets the right platform and paths.
#[derive(Debug, Clone)]
pub struct SystemFacts {
    pub os: String,
    pub arch: String,
    pub platform_version: String,
    pub cwd: PathBuf,
}

impl SystemFacts {
    pub fn collect() -> Self {
        let info = os_info::get();
        Self {
            os: info.os_type().to_string(),
            arch: std::env::consts::ARCH.to_string(),
            platform_version: info.version().to_string(),
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/tmp")),
        }
    }
}
