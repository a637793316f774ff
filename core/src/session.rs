//! Per-task sessions: the plan, what actually ran, and what it would take
//! to undo it.
//!
//! A session is created when the front-end accepts a task and serialized to
//! its own file once it reaches a terminal state. The executed-actions and
//! results lists are appended pairwise and stay the same length at all
//! times; rollback is derived from them, newest first.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::DateTime;
use chrono::Local;
use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;
use uuid::Uuid;

use crate::error::GaneshaErr;
use crate::error::Result;
use crate::paths;
use ganesha_protocol::RiskLevel;

/// Output kept per result when a session is serialized.
const RESULT_OUTPUT_MAX: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    Pending,
    Planning,
    AwaitingConsent,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionType {
    Shell,
    FileRead,
    /// `command` carries `path|||content`.
    FileWrite,
    FileDelete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub command: String,
    pub explanation: String,
    pub risk_level: RiskLevel,
    pub reversible: bool,
    pub rollback_command: Option<String>,
    #[serde(default = "default_true")]
    pub requires_consent: bool,
}

fn default_true() -> bool {
    true
}

impl Action {
    pub fn new(action_type: ActionType, command: impl Into<String>) -> Self {
        Self {
            id: short_id(),
            action_type,
            command: command.into(),
            explanation: String::new(),
            risk_level: RiskLevel::Low,
            reversible: false,
            rollback_command: None,
            requires_consent: true,
        }
    }
}

/// Opaque 8-char id, enough to correlate within one session or plan.
pub fn short_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub task: String,
    pub actions: Vec<Action>,
    pub created_at: DateTime<Local>,
}

impl Plan {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            plan_id: short_id(),
            task: task.into(),
            actions: Vec::new(),
            created_at: Local::now(),
        }
    }

    pub fn high_risk_actions(&self) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|a| a.risk_level.is_high_or_critical())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    pub error: String,
    pub duration_ms: u64,
    pub action_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub task: String,
    pub state: SessionState,
    pub plan: Option<Plan>,
    pub executed_actions: Vec<Action>,
    pub results: Vec<ExecutionResult>,
    pub started_at: DateTime<Local>,
    pub completed_at: Option<DateTime<Local>>,
}

impl Session {
    fn new(session_id: String, task: impl Into<String>) -> Self {
        Self {
            session_id,
            task: task.into(),
            state: SessionState::Pending,
            plan: None,
            executed_actions: Vec::new(),
            results: Vec::new(),
            started_at: Local::now(),
            completed_at: None,
        }
    }

    /// Append an executed action and its result as one unit, keeping
    /// `executed_actions` and `results` the same length.
    pub fn record(&mut self, action: Action, mut result: ExecutionResult) {
        result.action_id = action.id.clone();
        if result.output.len() > RESULT_OUTPUT_MAX {
            result.output = crate::events::truncate(&result.output, RESULT_OUTPUT_MAX);
        }
        self.executed_actions.push(action);
        self.results.push(result);
        debug_assert_eq!(self.executed_actions.len(), self.results.len());
    }

    /// Move to a terminal state and stamp the completion time.
    pub fn finish(&mut self, state: SessionState) {
        debug_assert!(state.is_terminal());
        self.state = state;
        self.completed_at = Some(Local::now());
    }

    /// The inverse commands for this session, newest first. Only actions
    /// flagged reversible with a non-empty rollback command qualify; each is
    /// wrapped into a fresh action that goes through the full pipeline
    /// (consent, access control, daemon) like any other.
    pub fn rollback_actions(&self) -> Vec<Action> {
        self.executed_actions
            .iter()
            .rev()
            .filter(|action| {
                action.reversible
                    && action
                        .rollback_command
                        .as_deref()
                        .is_some_and(|cmd| !cmd.trim().is_empty())
            })
            .map(|action| {
                let rollback = action.rollback_command.clone().unwrap_or_default();
                let mut inverse = Action::new(action.action_type, rollback);
                inverse.explanation = format!("Rollback: {}", action.explanation);
                inverse.risk_level = action.risk_level;
                inverse
            })
            .collect()
    }
}

/// Owns the sessions directory and the id sequence. Ids are derived from
/// the wall clock; a counter suffix keeps them unique and monotonic when
/// two sessions start within the same second.
pub struct SessionStore {
    dir: PathBuf,
    last_id: Mutex<Option<String>>,
}

impl SessionStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            last_id: Mutex::new(None),
        }
    }

    pub fn default_location() -> Result<Self> {
        Ok(Self::new(paths::sessions_dir()?))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn create(&self, task: &str) -> Session {
        let base = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let mut last = match self.last_id.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let id = match last.as_deref() {
            Some(prev) if prev == base || prev.starts_with(&format!("{base}_")) => {
                let n = prev
                    .rsplit('_')
                    .next()
                    .and_then(|s| s.parse::<u32>().ok())
                    .filter(|_| prev.len() > base.len())
                    .unwrap_or(0);
                format!("{base}_{}", n + 1)
            }
            _ => base,
        };
        *last = Some(id.clone());
        Session::new(id, task)
    }

    /// Persist a session to `<dir>/<session_id>.json`.
    pub fn save(&self, session: &Session) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.session_path(&session.session_id);
        let json = serde_json::to_string_pretty(session)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(&self, session_id: &str) -> Result<Session> {
        let path = self.session_path(session_id);
        let contents = std::fs::read_to_string(&path)
            .map_err(|_| GaneshaErr::SessionNotFound(session_id.to_string()))?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// The most recent session by id order (ids sort chronologically).
    pub fn load_last(&self) -> Result<Session> {
        let mut ids: Vec<String> = std::fs::read_dir(&self.dir)
            .map_err(|_| GaneshaErr::SessionNotFound("last".to_string()))?
            .filter_map(|entry| {
                let name = entry.ok()?.file_name().to_string_lossy().into_owned();
                name.strip_suffix(".json").map(str::to_string)
            })
            .collect();
        ids.sort();
        let last = ids
            .pop()
            .ok_or_else(|| GaneshaErr::SessionNotFound("last".to_string()))?;
        self.load(&last)
    }

    /// Resolve a CLI selector: an explicit id, or the literal `last`.
    pub fn resolve(&self, selector: &str) -> Result<Session> {
        if selector == "last" {
            self.load_last()
        } else {
            self.load(selector)
        }
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn store() -> (TempDir, SessionStore) {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());
        (dir, store)
    }

    fn shell_action(command: &str, rollback: Option<&str>) -> Action {
        let mut action = Action::new(ActionType::Shell, command);
        action.reversible = rollback.is_some();
        action.rollback_command = rollback.map(str::to_string);
        action
    }

    fn ok_result() -> ExecutionResult {
        ExecutionResult {
            success: true,
            output: String::new(),
            error: String::new(),
            duration_ms: 1,
            action_id: String::new(),
        }
    }

    #[test]
    fn ids_are_unique_within_a_second() {
        let (_dir, store) = store();
        let a = store.create("one");
        let b = store.create("two");
        let c = store.create("three");
        assert_ne!(a.session_id, b.session_id);
        assert_ne!(b.session_id, c.session_id);
        assert!(b.session_id > a.session_id || b.session_id.starts_with(&a.session_id));
    }

    #[test]
    fn record_keeps_actions_and_results_paired() {
        let (_dir, store) = store();
        let mut session = store.create("pair test");
        session.record(shell_action("mkdir /tmp/x", Some("rmdir /tmp/x")), ok_result());
        session.record(shell_action("ls", None), ok_result());
        assert_eq!(session.executed_actions.len(), session.results.len());
        assert_eq!(
            session.results[0].action_id,
            session.executed_actions[0].id
        );
    }

    #[test]
    fn rollback_reverses_order_and_filters_irreversible() {
        let (_dir, store) = store();
        let mut session = store.create("rollback fidelity");
        session.record(
            shell_action("mkdir /tmp/x", Some("rmdir /tmp/x")),
            ok_result(),
        );
        session.record(
            shell_action("touch /tmp/x/y", Some("rm /tmp/x/y")),
            ok_result(),
        );
        session.record(shell_action("cat /tmp/x/y", None), ok_result());
        session.record(shell_action("echo hi", Some("   ")), ok_result());

        let rollback = session.rollback_actions();
        let commands: Vec<&str> = rollback.iter().map(|a| a.command.as_str()).collect();
        assert_eq!(commands, vec!["rm /tmp/x/y", "rmdir /tmp/x"]);
        assert!(rollback.iter().all(|a| a.requires_consent));
        assert!(rollback.iter().all(|a| !a.reversible));
    }

    #[test]
    fn save_and_load_round_trip_at_terminal_state() {
        let (_dir, store) = store();
        let mut session = store.create("persist me");
        session.state = SessionState::Executing;
        session.record(
            shell_action("mkdir /tmp/x", Some("rmdir /tmp/x")),
            ok_result(),
        );
        session.finish(SessionState::Completed);
        store.save(&session).unwrap();

        let loaded = store.load(&session.session_id).unwrap();
        assert_eq!(loaded.session_id, session.session_id);
        assert_eq!(loaded.state, SessionState::Completed);
        assert_eq!(loaded.executed_actions.len(), loaded.results.len());
        assert!(loaded.completed_at.is_some());
    }

    #[test]
    fn load_last_picks_newest() {
        let (_dir, store) = store();
        let mut first = store.create("first");
        first.finish(SessionState::Completed);
        store.save(&first).unwrap();
        let mut second = store.create("second");
        second.finish(SessionState::Failed);
        store.save(&second).unwrap();

        let last = store.load_last().unwrap();
        assert_eq!(last.session_id, second.session_id);
        assert_eq!(store.resolve("last").unwrap().session_id, second.session_id);
    }

    #[test]
    fn missing_session_is_an_error() {
        let (_dir, store) = store();
        assert!(matches!(
            store.load("20990101_000000"),
            Err(GaneshaErr::SessionNotFound(_))
        ));
    }

    #[test]
    fn long_output_is_truncated_on_record() {
        let (_dir, store) = store();
        let mut session = store.create("truncate");
        let mut result = ok_result();
        result.output = "y".repeat(5000);
        session.record(shell_action("ls", None), result);
        assert_eq!(session.results[0].output.len(), 1000);
    }
}
