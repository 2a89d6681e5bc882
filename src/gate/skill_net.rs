use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::DefinitionError;
use crate::net::{Marking, NetBuilder, NetDefinition, Transition, can_fire};

use super::{ToolCall, ToolResult, Verdict};

/// Type tag marking a transition that needs human confirmation.
pub const MANUAL: &str = "manual";

/// Maps a raw tool call to the virtual tool name nets are written against.
pub trait ToolMapper: Send + Sync {
    fn map(&self, tool_name: &str, input: &Value) -> String;
}

/// Semantic check run before commit. May mutate the net's `meta`; on
/// rejection every net's `meta` is restored.
pub trait ValidationHook: Send + Sync {
    fn validate(&self, call: &ToolCall, transition: &str, meta: &mut Value) -> Result<(), String>;
}

impl<F> ValidationHook for F
where
    F: Fn(&ToolCall, &str, &mut Value) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, call: &ToolCall, transition: &str, meta: &mut Value) -> Result<(), String> {
        self(call, transition, meta)
    }
}

/// Called after a deferred transition fires on a successful result.
pub trait DeferredResultHook: Send + Sync {
    fn on_result(&self, result: &ToolResult, transition: &str, meta: &mut Value);
}

impl<F> DeferredResultHook for F
where
    F: Fn(&ToolResult, &str, &mut Value) + Send + Sync,
{
    fn on_result(&self, result: &ToolResult, transition: &str, meta: &mut Value) {
        self(result, transition, meta)
    }
}

/// Gating attributes of one transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateSpec {
    /// Resolved tool names that map onto this transition.
    pub tools: BTreeSet<String>,
    /// Needs interactive confirmation before it may fire.
    pub manual: bool,
    pub deferred: bool,
}

impl GateSpec {
    pub fn tools<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tools: tools.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Require human confirmation.
    pub fn manual(mut self) -> Self {
        self.manual = true;
        self
    }

    /// Fire only once the tool reports success.
    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }
}

/// A net whose transitions authorize tool calls.
pub struct SkillNet {
    net: NetDefinition,
    gates: BTreeMap<String, GateSpec>,
    free_tools: BTreeSet<String>,
    mapper: Option<Arc<dyn ToolMapper>>,
    validate: Option<Arc<dyn ValidationHook>>,
    on_deferred_result: Option<Arc<dyn DeferredResultHook>>,
    initial_meta: Value,
}

impl fmt::Debug for SkillNet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkillNet")
            .field("name", &self.net.name())
            .field("gates", &self.gates)
            .field("free_tools", &self.free_tools)
            .finish_non_exhaustive()
    }
}

impl SkillNet {
    pub fn builder(name: impl Into<String>) -> SkillNetBuilder {
        SkillNetBuilder {
            net: NetDefinition::builder(name),
            gates: BTreeMap::new(),
            free_tools: BTreeSet::new(),
            mapper: None,
            validate: None,
            on_deferred_result: None,
            initial_meta: Value::Object(Default::default()),
        }
    }

    pub fn name(&self) -> &str {
        self.net.name()
    }

    pub fn definition(&self) -> &NetDefinition {
        &self.net
    }

    pub fn initial_meta(&self) -> &Value {
        &self.initial_meta
    }

    pub fn is_manual(&self, transition: &Transition) -> bool {
        transition.type_tag() == Some(MANUAL)
    }

    pub fn is_deferred(&self, transition: &str) -> bool {
        self.gates.get(transition).is_some_and(|g| g.deferred)
    }

    /// Declares no tools; eligible for auto-advance.
    pub fn is_tool_free(&self, transition: &str) -> bool {
        self.gates.get(transition).is_none_or(|g| g.tools.is_empty())
    }

    pub(crate) fn validation_hook(&self) -> Option<&Arc<dyn ValidationHook>> {
        self.validate.as_ref()
    }

    pub(crate) fn deferred_result_hook(&self) -> Option<&Arc<dyn DeferredResultHook>> {
        self.on_deferred_result.as_ref()
    }

    /// Virtual tool name for `call`.
    pub fn resolve_tool(&self, call: &ToolCall) -> String {
        match &self.mapper {
            Some(mapper) => mapper.map(&call.tool_name, &call.input),
            None => call.tool_name.clone(),
        }
    }

    /// Pure classification of `call` against `marking`.
    pub fn classify(&self, marking: &Marking, call: &ToolCall) -> Verdict {
        let tool = self.resolve_tool(call);
        if self.free_tools.contains(&tool) {
            return Verdict::Free;
        }
        let matching: Vec<&Transition> = self
            .net
            .transitions()
            .iter()
            .filter(|t| self.gates.get(t.name()).is_some_and(|g| g.tools.contains(&tool)))
            .collect();
        if matching.is_empty() {
            return Verdict::Abstain;
        }
        match matching.iter().find(|t| can_fire(marking, t)) {
            Some(t) => Verdict::Gated {
                transition: t.name().to_string(),
            },
            None => {
                let names: Vec<&str> = matching.iter().map(|t| t.name()).collect();
                Verdict::Blocked {
                    reason: format!(
                        "'{tool}' needs one of [{}] but none is enabled at marking {marking}",
                        names.join(", ")
                    ),
                }
            }
        }
    }
}

/// Builds a [`SkillNet`]; place and transition validation is the same as
/// for a plain net.
pub struct SkillNetBuilder {
    net: NetBuilder,
    gates: BTreeMap<String, GateSpec>,
    free_tools: BTreeSet<String>,
    mapper: Option<Arc<dyn ToolMapper>>,
    validate: Option<Arc<dyn ValidationHook>>,
    on_deferred_result: Option<Arc<dyn DeferredResultHook>>,
    initial_meta: Value,
}

impl SkillNetBuilder {
    pub fn places<I, S>(mut self, places: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.net = self.net.places(places);
        self
    }

    /// A tool-free transition, fired only by auto-advance.
    pub fn transition(mut self, transition: Transition) -> Self {
        self.net = self.net.transition(transition);
        self
    }

    /// A transition fired by the tools listed in `gate`.
    pub fn gated(mut self, transition: Transition, gate: GateSpec) -> Self {
        let transition = if gate.manual {
            transition.kind(MANUAL)
        } else {
            transition
        };
        self.gates.insert(transition.name().to_string(), gate);
        self.net = self.net.transition(transition);
        self
    }

    pub fn tokens(mut self, place: impl Into<String>, count: u32) -> Self {
        self.net = self.net.tokens(place, count);
        self
    }

    /// Tools this net always allows.
    pub fn free_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.free_tools.extend(tools.into_iter().map(Into::into));
        self
    }

    /// Resolve virtual tool names before classification.
    pub fn mapper(mut self, mapper: impl ToolMapper + 'static) -> Self {
        self.mapper = Some(Arc::new(mapper));
        self
    }

    /// Semantic check run in the validate phase against this net's meta.
    pub fn validate(mut self, hook: impl ValidationHook + 'static) -> Self {
        self.validate = Some(Arc::new(hook));
        self
    }

    pub fn on_deferred_result(mut self, hook: impl DeferredResultHook + 'static) -> Self {
        self.on_deferred_result = Some(Arc::new(hook));
        self
    }

    /// Initial private meta document; an empty object by default.
    pub fn meta(mut self, meta: Value) -> Self {
        self.initial_meta = meta;
        self
    }

    pub fn build(self) -> Result<SkillNet, DefinitionError> {
        let net = self.net.build()?;
        Ok(SkillNet {
            net,
            gates: self.gates,
            free_tools: self.free_tools,
            mapper: self.mapper,
            validate: self.validate,
            on_deferred_result: self.on_deferred_result,
            initial_meta: self.initial_meta,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(tool: &str) -> ToolCall {
        ToolCall {
            call_id: "c1".into(),
            tool_name: tool.into(),
            input: json!({}),
        }
    }

    fn net() -> SkillNet {
        SkillNet::builder("deploy")
            .places(["idle", "tested", "deployed"])
            .gated(
                Transition::new("test").input("idle").output("tested"),
                GateSpec::tools(["run_tests"]),
            )
            .gated(
                Transition::new("deploy").input("tested").output("deployed"),
                GateSpec::tools(["deploy"]).manual(),
            )
            .tokens("idle", 1)
            .free_tools(["read_file"])
            .build()
            .unwrap()
    }

    #[test]
    fn classifies_all_four_ways() {
        let net = net();
        let m = net.definition().initial_marking().clone();
        assert_eq!(net.classify(&m, &call("read_file")), Verdict::Free);
        assert_eq!(net.classify(&m, &call("send_email")), Verdict::Abstain);
        assert_eq!(
            net.classify(&m, &call("run_tests")),
            Verdict::Gated {
                transition: "test".into()
            }
        );
        match net.classify(&m, &call("deploy")) {
            Verdict::Blocked { reason } => {
                assert!(reason.contains("deploy"));
                assert!(reason.contains("idle: 1"));
            }
            other => panic!("expected blocked, got {other:?}"),
        }
    }

    #[test]
    fn manual_flag_is_carried_as_type_tag() {
        let net = net();
        let deploy = net.definition().transition("deploy").unwrap();
        assert!(net.is_manual(deploy));
        assert!(!net.is_manual(net.definition().transition("test").unwrap()));
    }

    #[test]
    fn first_enabled_match_wins() {
        let net = SkillNet::builder("two")
            .places(["a", "b", "out"])
            .gated(
                Transition::new("from_a").input("a").output("out"),
                GateSpec::tools(["go"]),
            )
            .gated(
                Transition::new("from_b").input("b").output("out"),
                GateSpec::tools(["go"]),
            )
            .tokens("a", 1)
            .tokens("b", 1)
            .build()
            .unwrap();
        let m = net.definition().initial_marking().clone();
        assert_eq!(
            net.classify(&m, &call("go")),
            Verdict::Gated {
                transition: "from_a".into()
            }
        );
    }

    #[test]
    fn builder_validates_places() {
        let err = SkillNet::builder("bad")
            .places(["a"])
            .gated(Transition::new("t").input("z"), GateSpec::tools(["x"]))
            .build()
            .unwrap_err();
        assert!(matches!(err, DefinitionError::UnknownPlace { .. }));
    }
}
