//! Turning raw model text into a [`Plan`].
//!
//! The model is asked for a single JSON object; everything outside the
//! outermost braces is ignored (models love to wrap JSON in prose and code
//! fences). Action descriptors that do not conform are discarded rather
//! than trusted; a response with no usable action at all is a malformed-plan
//! failure.

use ganesha_core::Action;
use ganesha_core::ActionType;
use ganesha_core::Plan;
use ganesha_protocol::RiskLevel;
use serde_json::Value;

use crate::error::PlannerError;

/// Parse a provider response into a plan for `task`.
pub fn parse_plan(task: &str, response: &str) -> Result<Plan, PlannerError> {
    let json = extract_json_object(response)
        .ok_or_else(|| PlannerError::Malformed("no JSON object in response".to_string()))?;
    let value: Value = serde_json::from_str(json)
        .map_err(|e| PlannerError::Malformed(format!("invalid JSON: {e}")))?;

    let actions = value
        .get("actions")
        .and_then(Value::as_array)
        .ok_or_else(|| PlannerError::Malformed("missing `actions` array".to_string()))?;

    let mut plan = Plan::new(task);
    for descriptor in actions {
        if let Some(action) = parse_action(descriptor) {
            plan.actions.push(action);
        } else {
            tracing::debug!("discarding non-conforming action descriptor: {descriptor}");
        }
    }

    if plan.actions.is_empty() {
        return Err(PlannerError::Malformed(
            "no usable action in response".to_string(),
        ));
    }
    Ok(plan)
}

fn parse_action(descriptor: &Value) -> Option<Action> {
    let command = descriptor.get("command")?.as_str()?.trim();
    if command.is_empty() {
        return None;
    }

    let action_type = match descriptor.get("type").and_then(Value::as_str) {
        // The shell alias shows up from models trained on older schemas.
        None | Some("shell") | Some("shell_command") => ActionType::Shell,
        Some("file_read") => ActionType::FileRead,
        Some("file_write") => ActionType::FileWrite,
        Some("file_delete") => ActionType::FileDelete,
        Some(_) => return None,
    };

    let mut action = Action::new(action_type, command);
    action.explanation = descriptor
        .get("explanation")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    action.risk_level = descriptor
        .get("risk_level")
        .and_then(|v| serde_json::from_value::<RiskLevel>(v.clone()).ok())
        .unwrap_or(RiskLevel::Low);
    action.reversible = descriptor
        .get("reversible")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    action.rollback_command = descriptor
        .get("rollback_command")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string);
    Some(action)
}

/// The substring spanning the outermost `{ ... }` pair, if any.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_a_plain_plan() {
        let response = r#"{
            "actions": [
                {
                    "type": "shell",
                    "command": "mkdir /tmp/demo",
                    "explanation": "create the scratch dir",
                    "risk_level": "low",
                    "reversible": true,
                    "rollback_command": "rmdir /tmp/demo"
                },
                {
                    "type": "shell_command",
                    "command": "touch /tmp/demo/a",
                    "explanation": "seed a file",
                    "risk_level": "medium",
                    "reversible": false
                }
            ]
        }"#;
        let plan = parse_plan("set up scratch dir", response).unwrap();
        assert_eq!(plan.actions.len(), 2);
        assert_eq!(plan.actions[0].command, "mkdir /tmp/demo");
        assert_eq!(
            plan.actions[0].rollback_command.as_deref(),
            Some("rmdir /tmp/demo")
        );
        assert_eq!(plan.actions[1].action_type, ActionType::Shell);
        assert_eq!(plan.actions[1].risk_level, RiskLevel::Medium);
        assert!(plan.actions[1].rollback_command.is_none());
    }

    #[test]
    fn tolerates_prose_and_code_fences_around_the_json() {
        let response = "Sure! Here is the plan:\n```json\n{\"actions\":[{\"command\":\"ls\"}]}\n```\nDone.";
        let plan = parse_plan("list", response).unwrap();
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].action_type, ActionType::Shell);
        assert_eq!(plan.actions[0].risk_level, RiskLevel::Low);
    }

    #[test]
    fn discards_non_conforming_descriptors() {
        let response = r#"{"actions": [
            {"command": "ls"},
            {"type": "teleport", "command": "beam me up"},
            {"type": "shell", "command": "   "},
            {"explanation": "no command at all"}
        ]}"#;
        let plan = parse_plan("list", response).unwrap();
        assert_eq!(plan.actions.len(), 1);
    }

    #[test]
    fn rejects_responses_without_a_plan() {
        assert!(matches!(
            parse_plan("t", "I cannot help with that."),
            Err(PlannerError::Malformed(_))
        ));
        assert!(matches!(
            parse_plan("t", "{\"not_actions\": []}"),
            Err(PlannerError::Malformed(_))
        ));
        assert!(matches!(
            parse_plan("t", "{\"actions\": []}"),
            Err(PlannerError::Malformed(_))
        ));
        assert!(matches!(
            parse_plan("t", "{\"actions\": [{\"type\": \"teleport\", \"command\": \"x\"}]}"),
            Err(PlannerError::Malformed(_))
        ));
    }

    #[test]
    fn unknown_risk_levels_default_to_low() {
        let response = r#"{"actions":[{"command":"ls","risk_level":"apocalyptic"}]}"#;
        let plan = parse_plan("t", response).unwrap();
        assert_eq!(plan.actions[0].risk_level, RiskLevel::Low);
    }
}
