//! The front-end pipeline: plan, scan, pre-check, consent, execute,
//! record. The daemon re-checks everything; this side exists to fail fast
//! and to keep the human in the loop.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;
use std::time::Instant;

use owo_colors::OwoColorize;

use ganesha_client::PrivilegedClient;
use ganesha_core::AccessController;
use ganesha_core::AccessPolicy;
use ganesha_core::Action;
use ganesha_core::ActionType;
use ganesha_core::AuditEvent;
use ganesha_core::EventId;
use ganesha_core::ExecutionResult;
use ganesha_core::Session;
use ganesha_core::SessionState;
use ganesha_core::SessionStore;
use ganesha_core::Severity;
use ganesha_core::SystemLogger;
use ganesha_core::manipulation::contains_manipulation;
use ganesha_core::manipulation::scan_plan;
use ganesha_core::paths;
use ganesha_core::policy::load_policy;
use ganesha_llm::AdapterChain;
use ganesha_llm::SystemFacts;
use ganesha_llm::recovery_task;

use crate::consent::ConsentDecision;
use crate::consent::review_actions;

/// Recovery attempts after a failed action before the session fails.
const MAX_RECOVERY_ITERATIONS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Planner chain failed or the task could not be serviced.
    ProviderFailure,
    /// Every planned action was denied by access control.
    Denied,
    ManipulationDetected,
    Cancelled,
    /// Execution failed and recovery was exhausted.
    Failed,
}

impl RunOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            RunOutcome::Completed => 0,
            RunOutcome::ProviderFailure | RunOutcome::Cancelled | RunOutcome::Failed => 1,
            RunOutcome::Denied | RunOutcome::ManipulationDetected => 2,
        }
    }
}

pub struct Runner {
    chain: AdapterChain,
    client: PrivilegedClient,
    controller: Option<AccessController>,
    policy: AccessPolicy,
    store: SessionStore,
    system_log: SystemLogger,
    cwd: PathBuf,
    timeout: Duration,
}

impl Runner {
    pub fn new(cwd: Option<PathBuf>, timeout_seconds: u64) -> anyhow::Result<Self> {
        let policy = load_policy().unwrap_or_default();
        let controller = match AccessController::new(&policy) {
            Ok(controller) => Some(controller),
            Err(e) => {
                tracing::warn!("local rule compile failed, pre-checks disabled: {e}");
                None
            }
        };
        let cwd = match cwd {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };
        Ok(Self {
            chain: AdapterChain::from_env(),
            client: PrivilegedClient::new(),
            controller,
            policy,
            store: SessionStore::default_location()?,
            system_log: SystemLogger::new(paths::system_log_fallback_path(false)?),
            cwd,
            timeout: Duration::from_secs(timeout_seconds.max(1)),
        })
    }

    fn log(&self, event: AuditEvent) {
        self.system_log.log(&event);
    }

    pub async fn run_task(&self, task: &str, auto: bool) -> anyhow::Result<RunOutcome> {
        let facts = SystemFacts::collect();
        let mut session = self.store.create(task);
        self.log(
            AuditEvent::new(EventId::SessionStart, Severity::Info, "session started")
                .with_session(&session.session_id),
        );

        // The raw task is the first thing the planner will see; scan it
        // before spending a model call on it.
        if let Some(controller) = &self.controller
            && let Some(matched) = contains_manipulation(controller.rules(), task)
        {
            return self
                .fail_manipulation(&mut session, matched, "task text")
                .await;
        }

        session.state = SessionState::Planning;
        println!("{} planning...", "*".cyan());
        let plan = match self.chain.plan(&facts, task, &[]).await {
            Ok(plan) => plan,
            Err(e) => {
                eprintln!("{} planning failed: {e}", "x".red());
                session.finish(SessionState::Failed);
                self.close_session(&session);
                return Ok(RunOutcome::ProviderFailure);
            }
        };
        self.log(
            AuditEvent::new(
                EventId::CommandPlanned,
                Severity::Info,
                format!("plan {} with {} action(s)", plan.plan_id, plan.actions.len()),
            )
            .with_session(&session.session_id),
        );

        if let Some(controller) = &self.controller
            && let Some((matched, action_id)) = scan_plan(controller.rules(), &plan)
        {
            let context = format!("plan action {action_id}");
            return self.fail_manipulation(&mut session, &matched, &context).await;
        }

        let runnable = self.precheck(&plan.actions);
        session.plan = Some(plan);
        if runnable.is_empty() {
            eprintln!("{} every planned action was denied by the access policy", "x".red());
            session.finish(SessionState::Failed);
            self.close_session(&session);
            return Ok(RunOutcome::Denied);
        }

        session.state = SessionState::AwaitingConsent;
        let approved = match review_actions(
            &runnable,
            auto,
            self.policy.require_approval_for_high_risk,
        )? {
            ConsentDecision::Cancelled => {
                println!("cancelled");
                session.finish(SessionState::Cancelled);
                self.close_session(&session);
                return Ok(RunOutcome::Cancelled);
            }
            ConsentDecision::Approved(ids) if ids.is_empty() => {
                println!("nothing approved");
                session.finish(SessionState::Cancelled);
                self.close_session(&session);
                return Ok(RunOutcome::Cancelled);
            }
            ConsentDecision::Approved(ids) => {
                let approved: Vec<Action> = runnable
                    .into_iter()
                    .filter(|a| ids.contains(&a.id))
                    .collect();
                approved
            }
        };

        session.state = SessionState::Executing;
        let all_ok = self
            .execute_all(&mut session, approved, auto, Some(&facts))
            .await?;

        let outcome = if all_ok {
            session.finish(SessionState::Completed);
            RunOutcome::Completed
        } else {
            session.finish(SessionState::Failed);
            RunOutcome::Failed
        };
        self.close_session(&session);
        Ok(outcome)
    }

    pub async fn rollback(&self, selector: &str, auto: bool) -> anyhow::Result<RunOutcome> {
        let source = match self.store.resolve(selector) {
            Ok(session) => session,
            Err(e) => {
                eprintln!("{} {e}", "x".red());
                return Ok(RunOutcome::Failed);
            }
        };

        let actions = source.rollback_actions();
        if actions.is_empty() {
            eprintln!("no reversible actions in session {}", source.session_id);
            return Ok(RunOutcome::Failed);
        }
        println!(
            "rolling back session {} ({} action(s))",
            source.session_id,
            actions.len()
        );

        let mut session = self
            .store
            .create(&format!("rollback {}", source.session_id));
        self.log(
            AuditEvent::new(EventId::SessionStart, Severity::Info, "rollback session started")
                .with_session(&session.session_id),
        );

        let runnable = self.precheck(&actions);
        if runnable.is_empty() {
            eprintln!("{} every rollback action was denied by the access policy", "x".red());
            session.finish(SessionState::Failed);
            self.close_session(&session);
            return Ok(RunOutcome::Denied);
        }

        session.state = SessionState::AwaitingConsent;
        let approved = match review_actions(
            &runnable,
            auto,
            self.policy.require_approval_for_high_risk,
        )? {
            ConsentDecision::Cancelled => {
                session.finish(SessionState::Cancelled);
                self.close_session(&session);
                return Ok(RunOutcome::Cancelled);
            }
            ConsentDecision::Approved(ids) => runnable
                .into_iter()
                .filter(|a| ids.contains(&a.id))
                .collect::<Vec<_>>(),
        };
        if approved.is_empty() {
            session.finish(SessionState::Cancelled);
            self.close_session(&session);
            return Ok(RunOutcome::Cancelled);
        }

        session.state = SessionState::Executing;
        // Rollback is not re-planned on failure; it either undoes cleanly
        // or the user investigates.
        let all_ok = self.execute_all(&mut session, approved, auto, None).await?;

        let outcome = if all_ok {
            session.finish(SessionState::Completed);
            RunOutcome::Completed
        } else {
            session.finish(SessionState::Failed);
            RunOutcome::Failed
        };
        self.close_session(&session);
        Ok(outcome)
    }

    pub async fn status(&self) -> anyhow::Result<()> {
        let status = self.client.status().await;
        let mode = if status.available {
            format!("{}", "daemon".green())
        } else {
            format!("{}", "direct (daemon unavailable)".yellow())
        };
        println!("execution mode: {mode}");
        println!("socket: {}", status.socket_path.display());
        if let Some(level) = status.policy_level {
            println!("policy level: {level}");
        }
        println!("sessions: {}", self.store.dir().display());
        Ok(())
    }

    /// Client-side pre-check. A deny here only saves a round trip and a
    /// prompt; the daemon re-checks whatever survives.
    fn precheck(&self, actions: &[Action]) -> Vec<Action> {
        let Some(controller) = &self.controller else {
            return actions.to_vec();
        };
        let mut runnable = Vec::with_capacity(actions.len());
        for action in actions {
            if action.action_type != ActionType::Shell {
                runnable.push(action.clone());
                continue;
            }
            let decision = controller.check(&action.command);
            if decision.allowed {
                let mut action = action.clone();
                // Trust our risk floor over the model's self-assessment.
                action.risk_level = action.risk_level.max(decision.risk_level);
                runnable.push(action);
            } else {
                eprintln!(
                    "{} denied: {} ({})",
                    "x".red(),
                    action.command,
                    decision.reason
                );
            }
        }
        runnable
    }

    /// Run approved actions in order. On a failure, when `facts` is given,
    /// ask the planner for a recovery plan (scanned, pre-checked and
    /// consented like any other) and continue with it, up to the iteration
    /// cap.
    async fn execute_all(
        &self,
        session: &mut Session,
        approved: Vec<Action>,
        auto: bool,
        facts: Option<&SystemFacts>,
    ) -> anyhow::Result<bool> {
        let mut queue: VecDeque<Action> = approved.into();
        let mut iterations = 0u32;

        while let Some(action) = queue.pop_front() {
            if action.risk_level.is_high_or_critical() {
                self.log(
                    AuditEvent::new(
                        EventId::HighRiskApproved,
                        Severity::Warning,
                        "high-risk action approved",
                    )
                    .with_command(&action.command)
                    .with_risk(action.risk_level)
                    .with_allowed(true)
                    .with_session(&session.session_id),
                );
            }

            let result = self.execute_action(&action).await;
            print_result(&action, &result);
            let success = result.success;
            let error = result.error.clone();
            session.record(action.clone(), result);

            if success {
                continue;
            }

            iterations += 1;
            let Some(facts) = facts else {
                return Ok(false);
            };
            if iterations > MAX_RECOVERY_ITERATIONS {
                eprintln!("{} recovery attempts exhausted", "x".red());
                return Ok(false);
            }

            println!("{} attempting recovery ({iterations}/{MAX_RECOVERY_ITERATIONS})", "*".cyan());
            match self.plan_recovery(facts, &action.command, &error, auto).await {
                Some(recovery) => queue = recovery.into(),
                None => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Recovery plans go through the same gauntlet as the original plan.
    async fn plan_recovery(
        &self,
        facts: &SystemFacts,
        failed_command: &str,
        error: &str,
        auto: bool,
    ) -> Option<Vec<Action>> {
        let task = recovery_task(failed_command, error);
        let plan = match self.chain.plan(facts, &task, &[]).await {
            Ok(plan) => plan,
            Err(e) => {
                eprintln!("{} recovery planning failed: {e}", "x".red());
                return None;
            }
        };

        if let Some(controller) = &self.controller
            && let Some((matched, _)) = scan_plan(controller.rules(), &plan)
        {
            eprintln!("{} manipulation indicator in recovery plan: {matched}", "x".red());
            self.log(
                AuditEvent::new(
                    EventId::ManipulationDetected,
                    Severity::Critical,
                    "manipulation attempt detected in recovery plan",
                )
                .with_reason(matched),
            );
            return None;
        }

        let runnable = self.precheck(&plan.actions);
        if runnable.is_empty() {
            return None;
        }
        match review_actions(&runnable, auto, self.policy.require_approval_for_high_risk) {
            Ok(ConsentDecision::Approved(ids)) if !ids.is_empty() => Some(
                runnable
                    .into_iter()
                    .filter(|a| ids.contains(&a.id))
                    .collect(),
            ),
            _ => None,
        }
    }

    async fn execute_action(&self, action: &Action) -> ExecutionResult {
        let start = Instant::now();
        let (success, output, error) = match action.action_type {
            ActionType::Shell => {
                let result = self
                    .client
                    .execute(&action.command, &self.cwd, self.timeout)
                    .await;
                if !result.used_daemon {
                    println!("{}", "(direct execution; daemon unavailable)".dimmed());
                }
                return ExecutionResult {
                    success: result.success,
                    output: result.output,
                    error: result.error,
                    duration_ms: result.execution_time_ms,
                    action_id: action.id.clone(),
                };
            }
            ActionType::FileRead => match std::fs::read_to_string(&action.command) {
                Ok(contents) => (true, contents, String::new()),
                Err(e) => (false, String::new(), format!("{}: {e}", action.command)),
            },
            ActionType::FileWrite => match action.command.split_once("|||") {
                Some((path, contents)) => {
                    let path = PathBuf::from(path);
                    let write = || -> std::io::Result<()> {
                        if let Some(parent) = path.parent() {
                            std::fs::create_dir_all(parent)?;
                        }
                        std::fs::write(&path, contents)
                    };
                    match write() {
                        Ok(()) => (true, format!("written to {}", path.display()), String::new()),
                        Err(e) => (false, String::new(), e.to_string()),
                    }
                }
                None => (
                    false,
                    String::new(),
                    "invalid file write format (expected path|||content)".to_string(),
                ),
            },
            ActionType::FileDelete => match std::fs::remove_file(&action.command) {
                Ok(()) => (true, format!("deleted {}", action.command), String::new()),
                Err(e) => (false, String::new(), format!("{}: {e}", action.command)),
            },
        };
        ExecutionResult {
            success,
            output,
            error,
            duration_ms: start.elapsed().as_millis() as u64,
            action_id: action.id.clone(),
        }
    }

    async fn fail_manipulation(
        &self,
        session: &mut Session,
        matched: &str,
        context: &str,
    ) -> anyhow::Result<RunOutcome> {
        eprintln!(
            "{} manipulation attempt detected in {context}: `{matched}`",
            "x".red().bold()
        );
        self.log(
            AuditEvent::new(
                EventId::ManipulationDetected,
                Severity::Critical,
                format!("manipulation attempt detected in {context}"),
            )
            .with_reason(matched)
            .with_session(&session.session_id),
        );
        session.finish(SessionState::Failed);
        self.close_session(session);
        Ok(RunOutcome::ManipulationDetected)
    }

    fn close_session(&self, session: &Session) {
        if let Err(e) = self.store.save(session) {
            tracing::warn!("failed to save session {}: {e}", session.session_id);
        }
        self.log(
            AuditEvent::new(
                EventId::SessionEnd,
                Severity::Info,
                format!("session ended: {}", session.state),
            )
            .with_session(&session.session_id),
        );
    }
}


fn print_result(action: &Action, result: &ExecutionResult) {
    if result.success {
        println!(
            "{} {} ({}ms)",
            "ok".green().bold(),
            action.command,
            result.duration_ms
        );
        let trimmed = result.output.trim();
        if !trimmed.is_empty() {
            let lines: Vec<&str> = trimmed.lines().collect();
            for line in lines.iter().take(10) {
                println!("  {line}");
            }
            if lines.len() > 10 {
                println!("  {}", format!("... ({} more lines)", lines.len() - 10).dimmed());
            }
        }
    } else {
        let error = result.error.trim();
        let shown: String = error.chars().take(500).collect();
        eprintln!("{} {}: {shown}", "x".red().bold(), action.command);
    }
}
