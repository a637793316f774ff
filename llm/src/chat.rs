//! Chat-completions planner adapter.
//!
//! Speaks the OpenAI chat shape against any base URL, which covers
//! LM Studio, Ollama's compatibility endpoint, and the hosted providers.
//! Non-streaming: a plan is one small JSON document, not a conversation.

use std::time::Duration;

use async_trait::async_trait;
use env_flags::env_flags;
use ganesha_core::Plan;
use serde_json::json;

use crate::HistoryTurn;
use crate::PlannerAdapter;
use crate::SystemFacts;
use crate::error::PlannerError;
use crate::parse::parse_plan;

env_flags! {
    /// Pin a single provider base URL instead of probing the local ones.
    pub GANESHA_LLM_BASE_URL: Option<&str> = None;

    /// Model name to request. When unset, the provider's first listed
    /// model is used.
    pub GANESHA_LLM_MODEL: Option<&str> = None;

    /// Bearer token for hosted providers. Local providers ignore it.
    pub GANESHA_LLM_API_KEY: Option<&str> = None;

    pub GANESHA_LLM_TIMEOUT_MS: Duration = Duration::from_millis(120_000), |value| {
        value.parse().map(Duration::from_millis)
    };
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const PLAN_TEMPERATURE: f32 = 0.3;
const PLAN_MAX_TOKENS: u32 = 2000;

pub struct ChatCompletionsAdapter {
    name: String,
    base_url: String,
    model: Option<String>,
    api_key: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl ChatCompletionsAdapter {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(PROBE_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: None,
            api_key: None,
            timeout: Duration::from_secs(120),
            client,
        }
    }

    /// Constructor used by the default chain: model, key and timeout come
    /// from the environment flags.
    pub fn from_env(name: &str, base_url: &str) -> Self {
        let mut adapter = Self::new(name, base_url);
        adapter.model = (*GANESHA_LLM_MODEL).map(str::to_string);
        adapter.api_key = (*GANESHA_LLM_API_KEY).map(str::to_string);
        adapter.timeout = *GANESHA_LLM_TIMEOUT_MS;
        adapter
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// First model the provider advertises, for when none is configured.
    async fn default_model(&self) -> Result<String, PlannerError> {
        let url = format!("{}/v1/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;
        let body: serde_json::Value = response.json().await?;
        body.get("data")
            .and_then(|d| d.as_array())
            .and_then(|models| models.first())
            .and_then(|m| m.get("id"))
            .and_then(|id| id.as_str())
            .map(str::to_string)
            .ok_or_else(|| PlannerError::Malformed("provider lists no models".to_string()))
    }

    fn system_prompt(facts: &SystemFacts) -> String {
        format!(
            "You are Ganesha, the Remover of Obstacles.\n\
             You translate natural language tasks into executable system commands.\n\n\
             SYSTEM: {os} {version}\n\
             ARCH: {arch}\n\
             CWD: {cwd}\n\n\
             OUTPUT FORMAT (JSON only):\n\
             {{\n  \"actions\": [\n    {{\n      \"type\": \"shell\",\n      \
             \"command\": \"actual command\",\n      \
             \"explanation\": \"what this does\",\n      \
             \"risk_level\": \"low|medium|high|critical\",\n      \
             \"reversible\": true,\n      \
             \"rollback_command\": \"command to undo (if reversible)\"\n    }}\n  ]\n}}\n\n\
             RULES:\n\
             - Output ONLY valid JSON\n\
             - Use appropriate commands for {os}\n\
             - Assess risk level honestly\n\
             - Provide rollback commands when possible\n\
             - Break complex tasks into simple steps",
            os = facts.os,
            version = facts.platform_version,
            arch = facts.arch,
            cwd = facts.cwd.display(),
        )
    }
}

#[async_trait]
impl PlannerAdapter for ChatCompletionsAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/v1/models", self.base_url);
        matches!(
            self.client.get(&url).timeout(PROBE_TIMEOUT).send().await,
            Ok(response) if response.status().is_success()
        )
    }

    async fn plan(
        &self,
        facts: &SystemFacts,
        task: &str,
        history: &[HistoryTurn],
    ) -> Result<Plan, PlannerError> {
        let model = match &self.model {
            Some(model) => model.clone(),
            None => self.default_model().await?,
        };

        let mut messages = vec![json!({
            "role": "system",
            "content": Self::system_prompt(facts),
        })];
        for turn in history {
            messages.push(json!({"role": turn.role, "content": turn.content}));
        }
        messages.push(json!({"role": "user", "content": format!("TASK: {task}")}));

        let payload = json!({
            "model": model,
            "messages": messages,
            "temperature": PLAN_TEMPERATURE,
            "max_tokens": PLAN_MAX_TOKENS,
            "stream": false,
        });

        let url = format!("{}/v1/chat/completions", self.base_url);
        let mut request = self.client.post(&url).timeout(self.timeout).json(&payload);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PlannerError::Http {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let body: serde_json::Value = response.json().await?;
        let content = body
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(PlannerError::EmptyResponse);
        }

        parse_plan(task, content)
    }
}
