use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::firing::Execute;
use crate::guard::Guard;

/// Where a timed-out candidate drops its token, and after how long.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutSpec {
    pub target_place: String,
    pub delay_ms: u64,
}

/// A named atomic change rule: input and output multisets of places,
/// optionally guarded, effectful, and timed.
#[derive(Clone)]
pub struct Transition {
    name: String,
    inputs: BTreeMap<String, u32>,
    outputs: BTreeMap<String, u32>,
    guard: Option<Guard>,
    execute: Option<Arc<dyn Execute>>,
    timeout: Option<TimeoutSpec>,
    kind: Option<String>,
    config: Option<Value>,
}

impl Transition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            guard: None,
            execute: None,
            timeout: None,
            kind: None,
            config: None,
        }
    }

    /// Consume one token from `place`. Listing a place twice consumes two.
    pub fn input(self, place: impl Into<String>) -> Self {
        self.input_n(place, 1)
    }

    /// Consume `tokens` from `place`, adding to any earlier weight.
    pub fn input_n(mut self, place: impl Into<String>, tokens: u32) -> Self {
        *self.inputs.entry(place.into()).or_insert(0) += tokens;
        self
    }

    pub fn inputs<I, S>(self, places: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        places.into_iter().fold(self, |t, p| t.input(p))
    }

    pub fn output(self, place: impl Into<String>) -> Self {
        self.output_n(place, 1)
    }

    /// Produce `tokens` in `place`, adding to any earlier weight.
    pub fn output_n(mut self, place: impl Into<String>, tokens: u32) -> Self {
        *self.outputs.entry(place.into()).or_insert(0) += tokens;
        self
    }

    pub fn outputs<I, S>(self, places: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        places.into_iter().fold(self, |t, p| t.output(p))
    }

    /// Only fire while `guard` holds for the current context and marking.
    pub fn guard(mut self, guard: Guard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Side effect awaited after the tokens move. Takes precedence over
    /// any executor the registry would resolve from the type tag.
    pub fn execute(mut self, execute: Arc<dyn Execute>) -> Self {
        self.execute = Some(execute);
        self
    }

    /// While structurally enabled but not fired for `delay_ms`, drop one
    /// token into `target_place`.
    pub fn timeout(mut self, target_place: impl Into<String>, delay_ms: u64) -> Self {
        self.timeout = Some(TimeoutSpec {
            target_place: target_place.into(),
            delay_ms,
        });
        self
    }

    /// Type tag used for executor resolution and for the gating layer's
    /// manual/auto distinction.
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Executor configuration, validated against the type tag.
    pub fn config(mut self, config: Value) -> Self {
        self.config = Some(config);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_weights(&self) -> &BTreeMap<String, u32> {
        &self.inputs
    }

    pub fn output_weights(&self) -> &BTreeMap<String, u32> {
        &self.outputs
    }

    pub fn guard_expr(&self) -> Option<&Guard> {
        self.guard.as_ref()
    }

    pub fn executor(&self) -> Option<&Arc<dyn Execute>> {
        self.execute.as_ref()
    }

    pub fn timeout_spec(&self) -> Option<&TimeoutSpec> {
        self.timeout.as_ref()
    }

    pub fn type_tag(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    pub fn type_config(&self) -> Option<&Value> {
        self.config.as_ref()
    }

    /// Every place this transition mentions, timeout target included.
    pub(crate) fn referenced_places(&self) -> impl Iterator<Item = &str> {
        self.inputs
            .keys()
            .chain(self.outputs.keys())
            .map(String::as_str)
            .chain(self.timeout.iter().map(|t| t.target_place.as_str()))
    }

    pub(crate) fn set_executor(&mut self, execute: Arc<dyn Execute>) {
        self.execute = Some(execute);
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("guard", &self.guard.as_ref().map(|g| g.source()))
            .field("execute", &self.execute.is_some())
            .field("timeout", &self.timeout)
            .field("kind", &self.kind)
            .finish()
    }
}
