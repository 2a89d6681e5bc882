//! Guard-checked firing with side effects, plus timeout bookkeeping.
//!
//! [`fire_guarded`] applies the structural marking change first and then
//! awaits the transition's executor. The two steps are not transactional:
//! when the executor fails the new marking is kept and only the context
//! merge is skipped.

mod execute;
mod timeout;

pub use execute::{Execute, FnExecute, merge_context};
pub use timeout::{ExpiredTimeout, PendingTimeout, TimeoutChanges, TimeoutTable, timeout_candidates};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FireError, FireGuardedError};
use crate::net::{Marking, NetDefinition, Transition, can_fire, fire};

/// Key-value document threaded alongside the marking.
pub type Context = Map<String, Value>;

/// Marking plus context: everything a guard or executor can see.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetState {
    pub marking: Marking,
    #[serde(default)]
    pub context: Context,
}

impl NetState {
    pub fn initial(definition: &NetDefinition) -> Self {
        Self {
            marking: definition.initial_marking().clone(),
            context: definition.initial_context().clone(),
        }
    }
}

/// Structurally enabled and the guard, if any, holds.
pub fn can_fire_guarded(transition: &Transition, context: &Context, marking: &Marking) -> bool {
    can_fire(marking, transition)
        && transition
            .guard_expr()
            .is_none_or(|g| g.eval(context, marking))
}

/// Guard-enabled transitions in declaration order.
pub fn guard_enabled<'a>(definition: &'a NetDefinition, state: &NetState) -> Vec<&'a Transition> {
    definition
        .transitions()
        .iter()
        .filter(|t| can_fire_guarded(t, &state.context, &state.marking))
        .collect()
}

/// Fire `transition` against `state`.
///
/// A disabled or guard-rejected transition errors before anything
/// changes. An executor failure is reported after the marking change has
/// been applied to `state`; that change is not rolled back.
pub async fn fire_guarded(
    transition: &Transition,
    state: &mut NetState,
) -> Result<(), FireGuardedError> {
    if !can_fire(&state.marking, transition) {
        return Err(FireError {
            transition: transition.name().to_string(),
            marking: state.marking.clone(),
        }
        .into());
    }
    if let Some(guard) = transition.guard_expr() {
        if !guard.eval(&state.context, &state.marking) {
            return Err(FireGuardedError::GuardRejected {
                transition: transition.name().to_string(),
                marking: state.marking.clone(),
            });
        }
    }

    state.marking = fire(&state.marking, transition)?;

    if let Some(exec) = transition.executor() {
        let update = exec
            .execute(transition.name(), &state.context, &state.marking)
            .await?;
        merge_context(&mut state.context, update);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::compile_guard;
    use serde_json::json;
    use std::sync::Arc;

    fn graded() -> NetDefinition {
        NetDefinition::builder("grading")
            .places(["submitted", "passed"])
            .transition(
                Transition::new("pass")
                    .input("submitted")
                    .output("passed")
                    .guard(compile_guard("score >= 90").unwrap()),
            )
            .tokens("submitted", 1)
            .build()
            .unwrap()
    }

    #[test]
    fn guard_blocks_structurally_enabled_transition() {
        let def = graded();
        let mut state = NetState::initial(&def);
        assert!(guard_enabled(&def, &state).is_empty());
        state.context.insert("score".into(), json!(95));
        assert_eq!(guard_enabled(&def, &state).len(), 1);
    }

    #[tokio::test]
    async fn guard_rejection_changes_nothing() {
        let def = graded();
        let mut state = NetState::initial(&def);
        let before = state.clone();
        let err = fire_guarded(def.transition("pass").unwrap(), &mut state)
            .await
            .unwrap_err();
        assert!(matches!(err, FireGuardedError::GuardRejected { .. }));
        assert_eq!(state, before);
    }

    #[tokio::test]
    async fn disabled_transition_changes_nothing() {
        let def = graded();
        let mut state = NetState::initial(&def);
        state.marking.set("submitted", 0);
        let before = state.clone();
        let err = fire_guarded(def.transition("pass").unwrap(), &mut state)
            .await
            .unwrap_err();
        assert!(matches!(err, FireGuardedError::Disabled(_)));
        assert_eq!(state, before);
    }

    #[tokio::test]
    async fn executor_update_is_merged() {
        let exec = Arc::new(FnExecute(|_ctx: Context| async {
            let mut out = Context::new();
            out.insert("charged".into(), json!(true));
            Ok::<_, String>(out)
        }));
        let t = Transition::new("charge").input("cart").output("paid").execute(exec);
        let mut state = NetState {
            marking: Marking::from_iter([("cart", 1), ("paid", 0)]),
            context: Context::new(),
        };
        fire_guarded(&t, &mut state).await.unwrap();
        assert_eq!(state.marking.tokens("paid"), 1);
        assert_eq!(state.context["charged"], json!(true));
    }

    #[tokio::test]
    async fn executor_failure_keeps_marking_change() {
        let exec = Arc::new(FnExecute(|_ctx: Context| async {
            Err::<Context, _>("card declined".to_string())
        }));
        let t = Transition::new("charge").input("cart").output("paid").execute(exec);
        let mut state = NetState {
            marking: Marking::from_iter([("cart", 1), ("paid", 0)]),
            context: Context::new(),
        };
        let err = fire_guarded(&t, &mut state).await.unwrap_err();
        assert!(matches!(err, FireGuardedError::Execute(ref e) if e.message == "card declined"));
        assert_eq!(state.marking, Marking::from_iter([("cart", 0), ("paid", 1)]));
        assert!(state.context.is_empty());
    }
}
