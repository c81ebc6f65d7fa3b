//! Tool routing: classify a free-text question into one of the five fixed
//! intents. A reply that is not parseable JSON, or whose tool falls outside
//! the permitted set, is a router failure the caller must report — never a
//! silent default.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::codegen::strip_code_fences;
use crate::error::AnalystError;
use crate::llm::{ChatMessage, ModelProvider};
use crate::prompts::{ROUTER_PROMPT, SYSTEM_ANALYST};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Profile,
    Eda,
    Plot,
    Stats,
    None,
}

impl Tool {
    pub fn name(&self) -> &'static str {
        match self {
            Tool::Profile => "profile",
            Tool::Eda => "eda",
            Tool::Plot => "plot",
            Tool::Stats => "stats",
            Tool::None => "none",
        }
    }

    /// Whether this tool runs generated code against the dataset.
    pub fn is_data_bearing(&self) -> bool {
        matches!(self, Tool::Eda | Tool::Plot | Tool::Stats)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub tool: Tool,
    pub reason: String,
    #[serde(default)]
    pub plan: Vec<String>,
}

#[derive(Debug, Error)]
#[error("router returned a malformed decision: {detail}")]
pub struct MalformedRouteError {
    pub detail: String,
    pub raw: String,
}

/// Strict decode of the router reply. The error carries a path to the
/// offending field when the JSON parses but the shape is wrong.
pub fn decode_route(raw: &str) -> Result<RouteDecision, MalformedRouteError> {
    let cleaned = strip_code_fences(raw);
    let mut de = serde_json::Deserializer::from_str(&cleaned);
    serde_path_to_error::deserialize(&mut de).map_err(|e| MalformedRouteError {
        detail: e.to_string(),
        raw: raw.to_string(),
    })
}

/// Policy override: a loaded dataset forces a concrete-analysis path instead
/// of an evasive dataset-free answer.
pub fn apply_loaded_dataset_override(
    mut decision: RouteDecision,
    dataset_loaded: bool,
) -> RouteDecision {
    if dataset_loaded && decision.tool == Tool::None {
        debug!(original_reason = %decision.reason, "overriding 'none' route: dataset is loaded");
        decision.tool = Tool::Eda;
        decision.reason = "A dataset is loaded, so the question is answered with a concrete \
                           analysis pass instead of a dataset-free reply."
            .to_string();
    }
    decision
}

/// One outbound classification call, then decode and the loaded-dataset
/// override. No other side effects.
pub async fn route(
    model: &dyn ModelProvider,
    question: &str,
    dataset_loaded: bool,
) -> Result<RouteDecision, AnalystError> {
    let messages = vec![
        ChatMessage::system(SYSTEM_ANALYST),
        ChatMessage::system(ROUTER_PROMPT),
        ChatMessage::user(question),
    ];
    let raw = model.chat_json(&messages).await?;
    let decision = decode_route(&raw)?;
    debug!(tool = decision.tool.name(), reason = %decision.reason, "routed question");
    Ok(apply_loaded_dataset_override(decision, dataset_loaded))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_decision_decodes() {
        let raw = r#"{"tool": "profile", "reason": "schema question", "plan": ["show columns"]}"#;
        let decision = decode_route(raw).unwrap();
        assert_eq!(decision.tool, Tool::Profile);
        assert_eq!(decision.plan.len(), 1);
    }

    #[test]
    fn missing_plan_defaults_to_empty() {
        let raw = r#"{"tool": "none", "reason": "chitchat"}"#;
        let decision = decode_route(raw).unwrap();
        assert!(decision.plan.is_empty());
    }

    #[test]
    fn fenced_json_is_tolerated() {
        let raw = "```json\n{\"tool\": \"eda\", \"reason\": \"x\", \"plan\": []}\n```";
        assert_eq!(decode_route(raw).unwrap().tool, Tool::Eda);
    }

    #[test]
    fn non_json_reply_is_a_malformed_route() {
        let err = decode_route("I think you should profile the data.").unwrap_err();
        assert!(err.raw.contains("profile"));
    }

    #[test]
    fn out_of_range_tool_is_a_malformed_route() {
        let raw = r#"{"tool": "summarize", "reason": "x", "plan": []}"#;
        let err = decode_route(raw).unwrap_err();
        assert!(err.detail.contains("tool"));
    }

    #[test]
    fn loaded_dataset_forces_eda_over_none() {
        let decision = RouteDecision {
            tool: Tool::None,
            reason: "needs clarification".to_string(),
            plan: vec![],
        };
        let decided = apply_loaded_dataset_override(decision, true);
        assert_eq!(decided.tool, Tool::Eda);
        assert!(decided.reason.contains("dataset is loaded"));
    }

    #[test]
    fn none_survives_without_a_dataset() {
        let decision = RouteDecision {
            tool: Tool::None,
            reason: "chitchat".to_string(),
            plan: vec![],
        };
        let decided = apply_loaded_dataset_override(decision, false);
        assert_eq!(decided.tool, Tool::None);
        assert_eq!(decided.reason, "chitchat");
    }

    #[test]
    fn non_none_tools_pass_through_untouched() {
        for tool in [Tool::Profile, Tool::Eda, Tool::Plot, Tool::Stats] {
            let decision = RouteDecision {
                tool,
                reason: "r".to_string(),
                plan: vec![],
            };
            assert_eq!(apply_loaded_dataset_override(decision, true).tool, tool);
        }
    }
}
