//! Choice among several guard-enabled transitions.
//!
//! The scheduler only consults a provider when more than one transition
//! is enabled. Any answer naming a transition outside the enabled set,
//! and any provider error, falls back to the first enabled transition.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::anthropic::{AnthropicError, MessageSender, MessagesRequest};
use crate::firing::Context;
use crate::net::Marking;

/// What a provider sees when asked to choose.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionRequest {
    pub instance_id: String,
    pub definition: String,
    /// Guard-enabled transitions in declaration order.
    pub enabled: Vec<String>,
    pub marking: Marking,
    pub context: Context,
}

/// A provider's answer. `transition` must be one of the enabled names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub transition: String,
    #[serde(default)]
    pub reasoning: String,
}

/// Chooses which of several guard-enabled transitions fires next.
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    async fn choose(&self, request: &DecisionRequest) -> Result<Decision>;
}

/// Always picks the first enabled transition.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstEnabled;

#[async_trait]
impl DecisionProvider for FirstEnabled {
    async fn choose(&self, request: &DecisionRequest) -> Result<Decision> {
        let transition = request
            .enabled
            .first()
            .cloned()
            .context("no enabled transitions to choose from")?;
        Ok(Decision {
            transition,
            reasoning: "first enabled".into(),
        })
    }
}

const SYSTEM_PROMPT: &str = "You drive a Petri net workflow. Several transitions are enabled at \
     once and exactly one must fire next. Respond with ONLY valid JSON, no other text.\n\
     Format: {\"transition\": \"<name>\", \"reasoning\": \"<one sentence>\"}";

/// Asks a model to pick the next transition.
pub struct LlmDecisionProvider<S> {
    sender: S,
    model: String,
    max_tokens: u32,
}

impl<S: MessageSender> LlmDecisionProvider<S> {
    pub fn new(sender: S, model: impl Into<String>) -> Self {
        Self {
            sender,
            model: model.into(),
            max_tokens: 256,
        }
    }

    fn prompt(request: &DecisionRequest) -> Result<String> {
        let marking = serde_json::to_string(&request.marking)?;
        let context = serde_json::to_string(&request.context)?;
        Ok(format!(
            "Net: {}\nInstance: {}\nMarking: {marking}\nContext: {context}\n\
             Enabled transitions: {}\n\nWhich transition should fire?",
            request.definition,
            request.instance_id,
            request.enabled.join(", "),
        ))
    }
}

/// Pull the first `{...}` object out of a reply that may wrap it in prose
/// or a code fence.
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[async_trait]
impl<S: MessageSender> DecisionProvider for LlmDecisionProvider<S> {
    async fn choose(&self, request: &DecisionRequest) -> Result<Decision> {
        let req = MessagesRequest::user(&self.model, self.max_tokens, Self::prompt(request)?)
            .with_system(SYSTEM_PROMPT);
        let response = self.sender.send_message(&req).await?;
        let text = response.text();
        if text.trim().is_empty() {
            return Err(AnthropicError::EmptyResponse { id: response.id }.into());
        }
        let json = extract_json(&text)
            .with_context(|| format!("model reply is not JSON: {}", text.trim()))?;
        let decision: Decision =
            serde_json::from_str(json).context("failed to parse model decision")?;
        Ok(decision)
    }
}
