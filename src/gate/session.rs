use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::ToolCallBlocked;
use crate::net::{Marking, can_fire, fire};

use super::{SkillNet, ToolCall, ToolResult, Verdict};

/// Upper bound on consecutive auto-advance fires after one commit.
pub const AUTO_ADVANCE_LIMIT: usize = 256;

/// Interactive approval for manual transitions.
#[async_trait]
pub trait ConfirmationChannel: Send + Sync {
    /// Whether a human is reachable at all.
    fn available(&self) -> bool;

    async fn confirm(&self, title: &str, message: &str) -> bool;
}

/// A deferred transition waiting for its tool result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingCall {
    pub transition: String,
    pub tool: String,
}

/// Mutable state of one skill net within a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateState {
    pub marking: Marking,
    pub meta: Value,
    /// Deferred transitions keyed by call id.
    pub pending: BTreeMap<String, PendingCall>,
}

impl GateState {
    pub fn initial(net: &SkillNet) -> Self {
        Self {
            marking: net.definition().initial_marking().clone(),
            meta: net.initial_meta().clone(),
            pending: BTreeMap::new(),
        }
    }
}

/// One classification per net, in session order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallDecision {
    pub verdicts: Vec<(String, Verdict)>,
}

impl CallDecision {
    pub fn gated(&self) -> impl Iterator<Item = (&str, &str)> {
        self.verdicts.iter().filter_map(|(net, v)| match v {
            Verdict::Gated { transition } => Some((net.as_str(), transition.as_str())),
            _ => None,
        })
    }
}

/// The active skill nets of one agent session.
pub struct GateSession {
    nets: Vec<Arc<SkillNet>>,
    states: Vec<GateState>,
    confirmation: Option<Arc<dyn ConfirmationChannel>>,
}

impl GateSession {
    pub fn new(nets: Vec<Arc<SkillNet>>) -> Self {
        let states = nets.iter().map(|n| GateState::initial(n)).collect();
        Self {
            nets,
            states,
            confirmation: None,
        }
    }

    pub fn with_confirmation(mut self, channel: Arc<dyn ConfirmationChannel>) -> Self {
        self.confirmation = Some(channel);
        self
    }

    pub fn state(&self, net: &str) -> Option<&GateState> {
        self.nets
            .iter()
            .position(|n| n.name() == net)
            .map(|i| &self.states[i])
    }

    /// Snapshot of every net's state, in session order.
    pub fn snapshot(&self) -> Vec<(String, GateState)> {
        self.nets
            .iter()
            .zip(&self.states)
            .map(|(n, s)| (n.name().to_string(), s.clone()))
            .collect()
    }

    /// Run the four-phase decision for `call`. On `Err` no net's marking,
    /// meta, or pending set has changed.
    pub async fn handle_call(&mut self, call: &ToolCall) -> Result<CallDecision, ToolCallBlocked> {
        let blocked = |net: &str, reason: String| ToolCallBlocked {
            net: net.to_string(),
            tool: call.tool_name.clone(),
            reason,
        };

        // 1. classify
        let verdicts: Vec<Verdict> = self
            .nets
            .iter()
            .zip(&self.states)
            .map(|(net, state)| net.classify(&state.marking, call))
            .collect();
        for (net, verdict) in self.nets.iter().zip(&verdicts) {
            if let Verdict::Blocked { reason } = verdict {
                warn!(net = net.name(), tool = %call.tool_name, %reason, "tool call blocked");
                return Err(blocked(net.name(), reason.clone()));
            }
        }

        // 2. approve
        for (net, verdict) in self.nets.iter().zip(&verdicts) {
            let Verdict::Gated { transition } = verdict else { continue };
            let Some(t) = net.definition().transition(transition) else { continue };
            if !net.is_manual(t) {
                continue;
            }
            let channel = match &self.confirmation {
                Some(c) if c.available() => c,
                _ => {
                    return Err(blocked(
                        net.name(),
                        format!("transition '{transition}' needs confirmation but no channel is available"),
                    ));
                }
            };
            let title = format!("{}: {transition}", net.name());
            let message = format!(
                "Allow '{}' (call {}) to fire '{transition}'?",
                call.tool_name, call.call_id
            );
            if !channel.confirm(&title, &message).await {
                info!(net = net.name(), transition = %transition, "confirmation rejected");
                return Err(blocked(
                    net.name(),
                    format!("confirmation for '{transition}' was rejected"),
                ));
            }
        }

        // 3. validate, with every meta restorable
        let snapshot: Vec<Value> = self.states.iter().map(|s| s.meta.clone()).collect();
        for (i, (net, verdict)) in self.nets.iter().zip(&verdicts).enumerate() {
            let Verdict::Gated { transition } = verdict else { continue };
            let Some(hook) = net.validation_hook() else { continue };
            if let Err(reason) = hook.validate(call, transition, &mut self.states[i].meta) {
                for (state, meta) in self.states.iter_mut().zip(&snapshot) {
                    state.meta = meta.clone();
                }
                warn!(net = net.name(), transition = %transition, %reason, "validation rejected call; meta rolled back");
                return Err(blocked(net.name(), reason));
            }
        }

        // 4. commit
        for (i, (net, verdict)) in self.nets.iter().zip(&verdicts).enumerate() {
            let Verdict::Gated { transition } = verdict else { continue };
            let state = &mut self.states[i];
            if net.is_deferred(transition) {
                debug!(net = net.name(), transition = %transition, call_id = %call.call_id, "deferred until result");
                state.pending.insert(
                    call.call_id.clone(),
                    PendingCall {
                        transition: transition.clone(),
                        tool: call.tool_name.clone(),
                    },
                );
                continue;
            }
            fire_and_advance(net, state, transition);
        }

        Ok(CallDecision {
            verdicts: self
                .nets
                .iter()
                .map(|n| n.name().to_string())
                .zip(verdicts)
                .collect(),
        })
    }

    /// Resolve deferred transitions recorded under the result's call id.
    /// Returns `(net, transition)` for every transition that fired.
    pub fn handle_result(&mut self, result: &ToolResult) -> Vec<(String, String)> {
        let mut fired = Vec::new();
        for (net, state) in self.nets.iter().zip(self.states.iter_mut()) {
            let Some(pending) = state.pending.remove(&result.call_id) else { continue };
            if result.is_error {
                debug!(net = net.name(), transition = %pending.transition, "deferred call failed; discarded");
                continue;
            }
            let enabled = net
                .definition()
                .transition(&pending.transition)
                .is_some_and(|t| can_fire(&state.marking, t));
            if !enabled {
                warn!(
                    net = net.name(),
                    transition = %pending.transition,
                    marking = %state.marking,
                    "deferred transition no longer enabled"
                );
                continue;
            }
            if let Some(hook) = net.deferred_result_hook() {
                hook.on_result(result, &pending.transition, &mut state.meta);
            }
            fire_and_advance(net, state, &pending.transition);
            fired.push((net.name().to_string(), pending.transition));
        }
        fired
    }
}

fn fire_and_advance(net: &SkillNet, state: &mut GateState, transition: &str) {
    let Some(t) = net.definition().transition(transition) else { return };
    match fire(&state.marking, t) {
        Ok(next) => {
            state.marking = next;
            debug!(net = net.name(), transition, marking = %state.marking, "gated transition fired");
            auto_advance(net, &mut state.marking);
        }
        Err(e) => warn!(net = net.name(), error = %e, "gated transition could not fire"),
    }
}

/// Fire the single enabled tool-free transition until there is none, or
/// more than one. Returns the transitions fired.
pub fn auto_advance(net: &SkillNet, marking: &mut Marking) -> Vec<String> {
    let mut fired = Vec::new();
    for _ in 0..AUTO_ADVANCE_LIMIT {
        let candidates: Vec<_> = net
            .definition()
            .transitions()
            .iter()
            .filter(|t| net.is_tool_free(t.name()) && can_fire(marking, t))
            .collect();
        let t = match candidates.as_slice() {
            [] => return fired,
            [only] => *only,
            _ => {
                debug!(net = net.name(), count = candidates.len(), "ambiguous auto-advance; stopping");
                return fired;
            }
        };
        match fire(marking, t) {
            Ok(next) => *marking = next,
            Err(_) => return fired,
        }
        fired.push(t.name().to_string());
    }
    warn!(net = net.name(), limit = AUTO_ADVANCE_LIMIT, "auto-advance limit reached");
    fired
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{CommandPatternMapper, GateSpec};
    use crate::net::Transition;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn call(id: &str, tool: &str) -> ToolCall {
        ToolCall {
            call_id: id.into(),
            tool_name: tool.into(),
            input: json!({}),
        }
    }

    fn result(id: &str, tool: &str, is_error: bool) -> ToolResult {
        ToolResult {
            call_id: id.into(),
            tool_name: tool.into(),
            input: json!({}),
            is_error,
        }
    }

    fn backup_first() -> SkillNet {
        SkillNet::builder("backup-first")
            .places(["ready", "backed_up", "deleted"])
            .gated(
                Transition::new("backup").input("ready").output("backed_up"),
                GateSpec::tools(["backup"]).deferred(),
            )
            .gated(
                Transition::new("delete").input("backed_up").output("deleted"),
                GateSpec::tools(["delete"]),
            )
            .tokens("ready", 1)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn backup_must_succeed_before_delete() {
        let mut session = GateSession::new(vec![Arc::new(backup_first())]);
        let initial = session.state("backup-first").unwrap().clone();

        let err = session.handle_call(&call("1", "delete")).await.unwrap_err();
        assert_eq!(err.net, "backup-first");
        assert_eq!(session.state("backup-first").unwrap(), &initial);

        session.handle_call(&call("2", "backup")).await.unwrap();
        let state = session.state("backup-first").unwrap();
        assert_eq!(state.marking, initial.marking);
        assert!(state.pending.contains_key("2"));
        assert!(session.handle_call(&call("3", "delete")).await.is_err());

        // A failed backup leaves the marking alone.
        assert!(session.handle_result(&result("2", "backup", true)).is_empty());
        let state = session.state("backup-first").unwrap();
        assert_eq!(state.marking, initial.marking);
        assert!(state.pending.is_empty());

        session.handle_call(&call("4", "backup")).await.unwrap();
        let fired = session.handle_result(&result("4", "backup", false));
        assert_eq!(fired, vec![("backup-first".to_string(), "backup".to_string())]);
        assert_eq!(
            session.state("backup-first").unwrap().marking.tokens("backed_up"),
            1
        );

        let decision = session.handle_call(&call("5", "delete")).await.unwrap();
        assert_eq!(decision.gated().collect::<Vec<_>>(), vec![("backup-first", "delete")]);
        assert_eq!(
            session.state("backup-first").unwrap().marking.tokens("deleted"),
            1
        );
    }

    #[tokio::test]
    async fn unknown_result_ids_are_ignored() {
        let mut session = GateSession::new(vec![Arc::new(backup_first())]);
        assert!(session.handle_result(&result("nope", "backup", false)).is_empty());
    }

    fn counting(name: &str, tool: &str, reject: bool) -> SkillNet {
        SkillNet::builder(name)
            .places(["open", "used"])
            .gated(
                Transition::new("use").input("open").output("used"),
                GateSpec::tools([tool]),
            )
            .tokens("open", 1)
            .meta(json!({"count": 0}))
            .validate(move |_call: &ToolCall, _t: &str, meta: &mut Value| {
                meta["count"] = json!(meta["count"].as_i64().unwrap_or(0) + 1);
                if reject {
                    Err("quota exceeded".to_string())
                } else {
                    Ok(())
                }
            })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn validation_rejection_rolls_back_every_meta() {
        let mut session = GateSession::new(vec![
            Arc::new(counting("a", "write", false)),
            Arc::new(counting("b", "write", false)),
            Arc::new(counting("c", "write", true)),
        ]);
        let before = session.snapshot();

        let err = session.handle_call(&call("1", "write")).await.unwrap_err();
        assert_eq!(err.net, "c");
        assert_eq!(err.reason, "quota exceeded");
        assert_eq!(session.snapshot(), before);
    }

    #[tokio::test]
    async fn accepted_validation_keeps_meta_changes() {
        let mut session = GateSession::new(vec![Arc::new(counting("a", "write", false))]);
        session.handle_call(&call("1", "write")).await.unwrap();
        let state = session.state("a").unwrap();
        assert_eq!(state.meta["count"], json!(1));
        assert_eq!(state.marking.tokens("used"), 1);
    }

    #[tokio::test]
    async fn one_blocked_net_rejects_for_all() {
        let permissive = SkillNet::builder("permissive")
            .places(["p", "q"])
            .gated(Transition::new("t").input("p").output("q"), GateSpec::tools(["push"]))
            .tokens("p", 1)
            .build()
            .unwrap();
        let strict = SkillNet::builder("strict")
            .places(["reviewed", "pushed"])
            .gated(
                Transition::new("push").input("reviewed").output("pushed"),
                GateSpec::tools(["push"]),
            )
            .build()
            .unwrap();
        let mut session = GateSession::new(vec![Arc::new(permissive), Arc::new(strict)]);
        let before = session.snapshot();
        let err = session.handle_call(&call("1", "push")).await.unwrap_err();
        assert_eq!(err.net, "strict");
        assert!(err.reason.contains("reviewed: 0"));
        assert_eq!(session.snapshot(), before);
    }

    #[tokio::test]
    async fn free_and_abstain_do_not_change_state() {
        let net = SkillNet::builder("n")
            .places(["a"])
            .free_tools(["ls"])
            .build()
            .unwrap();
        let mut session = GateSession::new(vec![Arc::new(net)]);
        let before = session.snapshot();
        let d = session.handle_call(&call("1", "ls")).await.unwrap();
        assert_eq!(d.verdicts[0].1, Verdict::Free);
        let d = session.handle_call(&call("2", "cat")).await.unwrap();
        assert_eq!(d.verdicts[0].1, Verdict::Abstain);
        assert_eq!(session.snapshot(), before);
    }

    struct Human {
        available: bool,
        answer: bool,
        asked: AtomicUsize,
    }

    #[async_trait]
    impl ConfirmationChannel for Human {
        fn available(&self) -> bool {
            self.available
        }

        async fn confirm(&self, _title: &str, _message: &str) -> bool {
            self.asked.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    fn release() -> Arc<SkillNet> {
        Arc::new(
            SkillNet::builder("release")
                .places(["ready", "released"])
                .gated(
                    Transition::new("publish").input("ready").output("released"),
                    GateSpec::tools(["publish"]).manual(),
                )
                .tokens("ready", 1)
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn manual_transition_needs_a_channel() {
        let mut session = GateSession::new(vec![release()]);
        let err = session.handle_call(&call("1", "publish")).await.unwrap_err();
        assert!(err.reason.contains("no channel"));

        let offline = Arc::new(Human {
            available: false,
            answer: true,
            asked: AtomicUsize::new(0),
        });
        let mut session = GateSession::new(vec![release()]).with_confirmation(offline.clone());
        assert!(session.handle_call(&call("1", "publish")).await.is_err());
        assert_eq!(offline.asked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn manual_transition_follows_the_human() {
        let no = Arc::new(Human {
            available: true,
            answer: false,
            asked: AtomicUsize::new(0),
        });
        let mut session = GateSession::new(vec![release()]).with_confirmation(no.clone());
        assert!(session.handle_call(&call("1", "publish")).await.is_err());
        assert_eq!(no.asked.load(Ordering::SeqCst), 1);
        assert_eq!(session.state("release").unwrap().marking.tokens("released"), 0);

        let yes = Arc::new(Human {
            available: true,
            answer: true,
            asked: AtomicUsize::new(0),
        });
        let mut session = GateSession::new(vec![release()]).with_confirmation(yes);
        session.handle_call(&call("1", "publish")).await.unwrap();
        assert_eq!(session.state("release").unwrap().marking.tokens("released"), 1);
    }

    #[tokio::test]
    async fn auto_advance_follows_unambiguous_tool_free_chain() {
        let net = SkillNet::builder("pipeline")
            .places(["idle", "built", "staged", "done"])
            .gated(
                Transition::new("build").input("idle").output("built"),
                GateSpec::tools(["make"]),
            )
            .transition(Transition::new("stage").input("built").output("staged"))
            .transition(Transition::new("finish").input("staged").output("done"))
            .tokens("idle", 1)
            .build()
            .unwrap();
        let mut session = GateSession::new(vec![Arc::new(net)]);
        session.handle_call(&call("1", "make")).await.unwrap();
        let m = &session.state("pipeline").unwrap().marking;
        assert_eq!(m.tokens("done"), 1);
        assert_eq!(m.tokens("built") + m.tokens("staged"), 0);
    }

    #[test]
    fn auto_advance_refuses_to_guess() {
        let net = SkillNet::builder("fork")
            .places(["start", "left", "right"])
            .transition(Transition::new("go_left").input("start").output("left"))
            .transition(Transition::new("go_right").input("start").output("right"))
            .tokens("start", 1)
            .build()
            .unwrap();
        let mut m = net.definition().initial_marking().clone();
        assert!(auto_advance(&net, &mut m).is_empty());
        assert_eq!(&m, net.definition().initial_marking());
    }

    #[test]
    fn auto_advance_is_idempotent_at_fixed_point() {
        let net = SkillNet::builder("chain")
            .places(["a", "b"])
            .transition(Transition::new("step").input("a").output("b"))
            .tokens("a", 1)
            .build()
            .unwrap();
        let mut m = net.definition().initial_marking().clone();
        assert_eq!(auto_advance(&net, &mut m), vec!["step".to_string()]);
        let fixed = m.clone();
        assert!(auto_advance(&net, &mut m).is_empty());
        assert_eq!(m, fixed);
    }

    #[test]
    fn auto_advance_stops_at_limit() {
        let net = SkillNet::builder("spin")
            .places(["p"])
            .transition(Transition::new("loop").input("p").output("p"))
            .tokens("p", 1)
            .build()
            .unwrap();
        let mut m = net.definition().initial_marking().clone();
        assert_eq!(auto_advance(&net, &mut m).len(), AUTO_ADVANCE_LIMIT);
        assert_eq!(m.tokens("p"), 1);
    }

    #[tokio::test]
    async fn mapper_gates_shell_commands() {
        let mapper = CommandPatternMapper::new("bash", "command")
            .rule(r"^\s*rm\s", "delete")
            .unwrap();
        let net = SkillNet::builder("no-rm")
            .places(["locked", "unlocked"])
            .gated(
                Transition::new("delete").input("unlocked").output("unlocked"),
                GateSpec::tools(["delete"]),
            )
            .tokens("locked", 1)
            .mapper(mapper)
            .build()
            .unwrap();
        let mut session = GateSession::new(vec![Arc::new(net)]);

        let mut rm = call("1", "bash");
        rm.input = json!({"command": "rm -rf /tmp/x"});
        assert!(session.handle_call(&rm).await.is_err());

        let mut ls = call("2", "bash");
        ls.input = json!({"command": "ls"});
        let d = session.handle_call(&ls).await.unwrap();
        assert_eq!(d.verdicts[0].1, Verdict::Abstain);
    }

    #[tokio::test]
    async fn deferred_hook_updates_meta_on_success() {
        let net = SkillNet::builder("audit")
            .places(["ready", "saved"])
            .gated(
                Transition::new("save").input("ready").output("saved"),
                GateSpec::tools(["save"]).deferred(),
            )
            .tokens("ready", 1)
            .meta(json!({}))
            .on_deferred_result(|r: &ToolResult, t: &str, meta: &mut Value| {
                meta["last"] = json!(format!("{t}:{}", r.call_id));
            })
            .build()
            .unwrap();
        let mut session = GateSession::new(vec![Arc::new(net)]);
        session.handle_call(&call("9", "save")).await.unwrap();
        session.handle_result(&result("9", "save", false));
        assert_eq!(session.state("audit").unwrap().meta["last"], json!("save:9"));
    }
}
