//! The root-privileged daemon: socket lifecycle, policy loading, signal
//! handling, and the graceful shutdown drain. Per-connection handling
//! lives in [`server`].

mod cli;
mod server;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::bail;
use tokio::net::UnixListener;
use tokio::sync::Notify;
use tokio::task::JoinSet;

use ganesha_core::AccessController;
use ganesha_core::AccessLevel;
use ganesha_core::AccessPolicy;
use ganesha_core::AuditEvent;
use ganesha_core::AuditLog;
use ganesha_core::EventId;
use ganesha_core::Severity;
use ganesha_core::SystemLogger;
use ganesha_core::exec::ChildTracker;
use ganesha_core::paths;
use ganesha_core::policy;

pub use cli::Cli;
pub use cli::DaemonCommand;
pub use server::DaemonState;

/// How long in-flight requests get to finish after a termination signal.
const DRAIN_WINDOW: Duration = Duration::from_secs(10);

const SOCKET_GROUP: &str = "ganesha";

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub pid_file: PathBuf,
    pub audit_log_path: PathBuf,
    pub system_log_fallback: PathBuf,
    pub policy_file: Option<PathBuf>,
    pub level_override: Option<AccessLevel>,
    /// Group granted connect access via the socket mode. `None` skips the
    /// chown entirely (tests).
    pub socket_group: Option<String>,
    /// Refuse to start without euid 0. Disabled only in tests, which
    /// exercise the pipeline without privilege.
    pub require_root: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: paths::socket_path(),
            pid_file: paths::pid_file_path(),
            audit_log_path: paths::system_audit_log_path(),
            system_log_fallback: PathBuf::from(paths::SYSTEM_LOG_DIR).join("system.log"),
            policy_file: None,
            level_override: None,
            socket_group: Some(SOCKET_GROUP.to_string()),
            require_root: true,
        }
    }
}

pub async fn run_main(cli: Cli) -> anyhow::Result<()> {
    let config = DaemonConfig {
        policy_file: cli.config,
        level_override: cli.level.map(Into::into),
        ..DaemonConfig::default()
    };

    match cli.command.unwrap_or(DaemonCommand::Run) {
        DaemonCommand::Run => {
            let shutdown = shutdown_on_signals()?;
            run_daemon(&config, shutdown).await
        }
        DaemonCommand::Status => {
            print_status(&config);
            Ok(())
        }
    }
}

fn print_status(config: &DaemonConfig) {
    match std::fs::read_to_string(&config.pid_file) {
        Ok(pid) if pid_alive(pid.trim()) => {
            println!("daemon running (pid {})", pid.trim());
        }
        Ok(pid) => {
            println!("daemon not running (stale pid file for pid {})", pid.trim());
        }
        Err(_) => println!("daemon not running"),
    }
}

/// Serve until `shutdown` fires. Public (with the config's test knobs) so
/// the integration suite can drive a real daemon on a scratch socket.
pub async fn run_daemon(config: &DaemonConfig, shutdown: Arc<Notify>) -> anyhow::Result<()> {
    #[cfg(unix)]
    if config.require_root && !nix::unistd::geteuid().is_root() {
        bail!("the privileged daemon must run as root");
    }

    let (policy, policy_warning) = load_policy_with_fallback(config);

    // A builtin pattern failing to compile is a code defect; refuse to
    // serve rather than serve with a hole in the floor.
    let controller =
        AccessController::new(&policy).context("builtin rule compilation failed")?;
    let dropped_patterns = controller.rules().dropped_patterns.clone();

    let audit = AuditLog::open(&config.audit_log_path)
        .await
        .context("open audit log")?;
    let system_log = SystemLogger::new(config.system_log_fallback.clone());

    let state = Arc::new(DaemonState::new(
        controller,
        policy.clone(),
        audit,
        system_log,
        ChildTracker::default(),
    ));

    match policy_warning {
        Some(warning) => {
            state
                .emit(
                    AuditEvent::new(EventId::ConfigLoaded, Severity::Warning, warning)
                        .with_user("root"),
                )
                .await;
        }
        None => {
            state
                .emit(
                    AuditEvent::new(
                        EventId::ConfigLoaded,
                        Severity::Info,
                        format!("policy loaded, level {}", policy.level),
                    )
                    .with_user("root"),
                )
                .await;
        }
    }
    for dropped in &dropped_patterns {
        state
            .emit(AuditEvent::new(
                EventId::ConfigLoaded,
                Severity::Warning,
                format!("dropped invalid user pattern `{dropped}`"),
            ))
            .await;
    }

    let listener = bind_socket(config)?;
    std::fs::create_dir_all(
        config
            .pid_file
            .parent()
            .context("pid file has no parent")?,
    )?;
    std::fs::write(&config.pid_file, std::process::id().to_string())?;

    state
        .emit(
            AuditEvent::new(
                EventId::DaemonStart,
                Severity::Info,
                format!("daemon started with access level {}", policy.level),
            )
            .with_user("root")
            .with_extra(serde_json::json!({ "access_level": policy.level.to_string() })),
        )
        .await;
    tracing::info!(
        socket = %config.socket_path.display(),
        level = %policy.level,
        "ganesha daemon listening"
    );

    let reload = reload_on_sighup()?;
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let state = Arc::clone(&state);
                        connections.spawn(server::handle_connection(state, stream));
                    }
                    Err(e) => tracing::warn!("accept failed: {e}"),
                }
            }
            _ = reload.notified() => {
                reload_policy(config, &state).await;
            }
            _ = shutdown.notified() => break,
        }
    }

    // Stop accepting, give in-flight requests a bounded window, then take
    // down whatever is left with its process group.
    drop(listener);
    let drained = tokio::time::timeout(DRAIN_WINDOW, async {
        while connections.join_next().await.is_some() {}
    })
    .await
    .is_ok();
    if !drained {
        tracing::warn!("drain window expired; killing remaining children");
        state.children.kill_all();
        connections.shutdown().await;
    }

    let _ = std::fs::remove_file(&config.socket_path);
    let _ = std::fs::remove_file(&config.pid_file);
    state
        .emit(
            AuditEvent::new(EventId::DaemonStop, Severity::Info, "daemon stopped gracefully")
                .with_user("root"),
        )
        .await;
    Ok(())
}

/// Explicit reload: re-read the policy file and swap the compiled rules.
/// Requests already in flight finish under the rules they started with.
async fn reload_policy(config: &DaemonConfig, state: &Arc<DaemonState>) {
    let (policy, warning) = load_policy_with_fallback(config);
    let controller = match AccessController::new(&policy) {
        Ok(controller) => controller,
        Err(e) => {
            tracing::error!("reload failed, keeping previous rules: {e}");
            return;
        }
    };
    let level = policy.level;
    state.replace_rules(controller, policy).await;
    let (severity, message) = match warning {
        Some(warning) => (Severity::Warning, warning),
        None => (Severity::Info, format!("policy reloaded, level {level}")),
    };
    state
        .emit(AuditEvent::new(EventId::ConfigLoaded, severity, message).with_user("root"))
        .await;
}

fn load_policy_with_fallback(config: &DaemonConfig) -> (AccessPolicy, Option<String>) {
    let loaded = match &config.policy_file {
        Some(path) => policy::load_policy_from(path),
        None => policy::load_policy(),
    };
    let (mut policy, warning) = match loaded {
        Ok(policy) => (policy, None),
        Err(e) => {
            tracing::warn!("policy load failed, falling back to restricted: {e}");
            (
                AccessPolicy {
                    level: AccessLevel::Restricted,
                    ..AccessPolicy::default()
                },
                Some(format!("policy load failed, running restricted: {e}")),
            )
        }
    };
    if let Some(level) = config.level_override {
        policy.level = level;
    }
    (policy, warning)
}

fn bind_socket(config: &DaemonConfig) -> anyhow::Result<UnixListener> {
    let socket_dir = config
        .socket_path
        .parent()
        .context("socket path has no parent")?;
    std::fs::create_dir_all(socket_dir)?;

    if config.socket_path.exists() {
        if let Ok(pid) = std::fs::read_to_string(&config.pid_file)
            && pid_alive(pid.trim())
        {
            bail!(
                "another daemon appears to be running (pid {})",
                pid.trim()
            );
        }
        tracing::warn!("removing stale socket {}", config.socket_path.display());
        std::fs::remove_file(&config.socket_path)?;
    }

    let listener = UnixListener::bind(&config.socket_path)
        .with_context(|| format!("bind {}", config.socket_path.display()))?;

    set_socket_permissions(config);
    Ok(listener)
}

/// `root:ganesha` and mode 0660 are the entire access list: only group
/// members can connect. A missing group leaves the socket root-only with a
/// warning.
fn set_socket_permissions(config: &DaemonConfig) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        if let Some(group_name) = &config.socket_group {
            match nix::unistd::Group::from_name(group_name) {
                Ok(Some(group)) => {
                    if let Err(e) = nix::unistd::chown(
                        &config.socket_path,
                        Some(nix::unistd::Uid::from_raw(0)),
                        Some(group.gid),
                    ) {
                        tracing::warn!("could not chown socket to root:{group_name}: {e}");
                    }
                }
                _ => {
                    tracing::warn!(
                        "group `{group_name}` not found; socket stays root-only \
                         (create it with: groupadd {group_name})"
                    );
                }
            }
        }

        if let Err(e) = std::fs::set_permissions(
            &config.socket_path,
            std::fs::Permissions::from_mode(0o660),
        ) {
            tracing::warn!("could not set socket mode: {e}");
        }
    }
}

fn pid_alive(pid: &str) -> bool {
    #[cfg(unix)]
    {
        let Ok(pid) = pid.parse::<i32>() else {
            return false;
        };
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Reload notifier wired to SIGHUP.
fn reload_on_sighup() -> anyhow::Result<Arc<Notify>> {
    let notify = Arc::new(Notify::new());
    #[cfg(unix)]
    {
        use tokio::signal::unix::SignalKind;
        use tokio::signal::unix::signal;

        let mut sighup = signal(SignalKind::hangup())?;
        let notify_signal = Arc::clone(&notify);
        tokio::spawn(async move {
            while sighup.recv().await.is_some() {
                notify_signal.notify_waiters();
            }
        });
    }
    Ok(notify)
}

/// Shutdown notifier wired to SIGTERM and SIGINT.
pub fn shutdown_on_signals() -> anyhow::Result<Arc<Notify>> {
    let notify = Arc::new(Notify::new());
    #[cfg(unix)]
    {
        use tokio::signal::unix::SignalKind;
        use tokio::signal::unix::signal;

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let notify_signals = Arc::clone(&notify);
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => {},
                _ = sigint.recv() => {},
            }
            tracing::info!("termination signal received");
            notify_signals.notify_waiters();
        });
    }
    Ok(notify)
}
