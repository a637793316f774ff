//! Planner adapters: the untrusted bridge from a natural-language task to a
//! candidate [`Plan`].
//!
//! Everything that comes back through this crate is treated as adversarial.
//! The front-end scans it with the manipulation detector, runs every
//! command through the access controller, and the daemon re-checks
//! authoritatively; nothing here grants execution.

mod chat;
mod error;
mod facts;
mod parse;

use async_trait::async_trait;
use ganesha_core::Plan;

pub use chat::ChatCompletionsAdapter;
pub use error::PlannerError;
pub use facts::SystemFacts;
pub use parse::parse_plan;

/// One prior exchange, oldest first, for multi-turn planning.
#[derive(Debug, Clone)]
pub struct HistoryTurn {
    pub role: String,
    pub content: String,
}

/// The provider contract: map (system facts, task, history) to a plan.
#[async_trait]
pub trait PlannerAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Cheap reachability probe, used by the chain to skip dead providers.
    async fn is_available(&self) -> bool;

    async fn plan(
        &self,
        facts: &SystemFacts,
        task: &str,
        history: &[HistoryTurn],
    ) -> Result<Plan, PlannerError>;
}

/// A static, ordered list of adapters. The first one that is reachable and
/// produces a parseable plan wins; otherwise the last failure is surfaced.
pub struct AdapterChain {
    adapters: Vec<Box<dyn PlannerAdapter>>,
}

impl AdapterChain {
    pub fn new(adapters: Vec<Box<dyn PlannerAdapter>>) -> Self {
        Self { adapters }
    }

    /// Build the default chain. `GANESHA_LLM_BASE_URL` pins a single
    /// provider; otherwise the local providers are tried in order
    /// (LM Studio, then Ollama), both speaking the OpenAI chat shape.
    pub fn from_env() -> Self {
        let adapters: Vec<Box<dyn PlannerAdapter>> = match *chat::GANESHA_LLM_BASE_URL {
            Some(base_url) => vec![Box::new(ChatCompletionsAdapter::from_env(
                "configured",
                base_url,
            ))],
            None => vec![
                Box::new(ChatCompletionsAdapter::from_env(
                    "lmstudio",
                    "http://localhost:1234",
                )),
                Box::new(ChatCompletionsAdapter::from_env(
                    "ollama",
                    "http://localhost:11434",
                )),
            ],
        };
        Self::new(adapters)
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub async fn plan(
        &self,
        facts: &SystemFacts,
        task: &str,
        history: &[HistoryTurn],
    ) -> Result<Plan, PlannerError> {
        let mut last_error = PlannerError::NoProviderAvailable;
        for adapter in &self.adapters {
            if !adapter.is_available().await {
                tracing::debug!("planner {} unavailable, skipping", adapter.name());
                continue;
            }
            match adapter.plan(facts, task, history).await {
                Ok(plan) => return Ok(plan),
                Err(e) => {
                    tracing::warn!("planner {} failed: {e}", adapter.name());
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}

/// Task text for a recovery round after an action failed. The recovery plan
/// re-enters the same scan/check/consent pipeline as the original.
pub fn recovery_task(failed_command: &str, error: &str) -> String {
    format!(
        "The following action failed:\nCommand: {failed_command}\nError: {error}\n\n\
         Generate a recovery plan to fix this issue."
    )
}
