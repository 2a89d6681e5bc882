//! Tool-call authorization built on skill nets.
//!
//! Each active [`SkillNet`] classifies an incoming call independently
//! ([`Verdict`]). A [`GateSession`] composes those verdicts in four
//! phases: classify, approve manual transitions, validate against each
//! net's `meta` (rolled back as a whole on rejection), then commit by
//! firing or deferring. Only raw structural firing is used here; guards
//! and the scheduler play no part.

mod mapper;
mod session;
mod skill_net;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use mapper::CommandPatternMapper;
pub use session::{
    AUTO_ADVANCE_LIMIT, CallDecision, ConfirmationChannel, GateSession, GateState, PendingCall,
    auto_advance,
};
pub use skill_net::{
    DeferredResultHook, GateSpec, MANUAL, SkillNet, SkillNetBuilder, ToolMapper, ValidationHook,
};

/// A tool invocation an agent wants to make.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Correlates the call with its later [`ToolResult`].
    pub call_id: String,
    /// Physical tool name, before any mapper runs.
    pub tool_name: String,
    /// Arguments as sent by the agent.
    #[serde(default)]
    pub input: Value,
}

/// Outcome of a tool call, matched to its call by `call_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub input: Value,
    /// A failed result never fires a deferred transition.
    #[serde(default)]
    pub is_error: bool,
}

/// One net's opinion about one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// The tool is always allowed by this net.
    Free,
    /// No transition of this net mentions the tool.
    Abstain,
    /// The tool maps onto this net but nothing matching is enabled.
    Blocked { reason: String },
    /// Exactly this enabled transition consumes the call.
    Gated { transition: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_events_use_camel_case() {
        let result: ToolResult = serde_json::from_str(
            r#"{"callId": "c1", "toolName": "bash", "input": {"command": "ls"}, "isError": true}"#,
        )
        .unwrap();
        assert!(result.is_error);
        assert_eq!(result.input["command"], "ls");

        let call: ToolCall = serde_json::from_str(r#"{"callId": "c2", "toolName": "read"}"#).unwrap();
        assert_eq!(call.input, Value::Null);
    }
}
