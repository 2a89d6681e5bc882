//! Exhaustive reachability analysis.
//!
//! Breadth-first search over markings from the initial marking. Guards
//! are evaluated against the definition's initial context; executor
//! effects and timeout injections are not modelled. The search gives up
//! with [`AnalysisError::StateSpaceExceeded`] once more than `max_states`
//! distinct markings have been seen.

use std::collections::{BTreeSet, HashSet, VecDeque};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::AnalysisError;
use crate::firing::{can_fire_guarded, timeout_candidates};
use crate::net::{Marking, NetDefinition, fire};

/// Markings explored before [`analyse`] gives up.
pub const DEFAULT_MAX_STATES: usize = 10_000;

/// Verdict for one declared conservation law.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvariantVerdict {
    pub name: String,
    pub initial_sum: i64,
    pub holds: bool,
    /// First reachable marking (in search order) whose weighted sum differs.
    pub violation: Option<Marking>,
}

/// Everything a breadth-first exploration of the reachable markings found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisReport {
    pub net: String,
    /// Reachable markings in breadth-first discovery order.
    pub reachable: Vec<Marking>,
    pub edge_count: usize,
    /// Markings where no transition is structurally and guard enabled.
    pub terminal: Vec<Marking>,
    /// Terminal markings where every declared terminal place is marked.
    pub expected_terminal: Vec<Marking>,
    /// Terminal markings that miss a terminal place and have no timeout
    /// that could still unblock them.
    pub deadlocks: Vec<Marking>,
    /// Terminal markings that miss a terminal place but still have a
    /// timeout candidate.
    pub awaiting_timeout: Vec<Marking>,
    pub invariants: Vec<InvariantVerdict>,
    /// Transitions never enabled in any reachable marking.
    pub dead_transitions: Vec<String>,
}

impl AnalysisReport {
    pub fn state_count(&self) -> usize {
        self.reachable.len()
    }

    pub fn has_deadlocks(&self) -> bool {
        !self.deadlocks.is_empty()
    }

    pub fn invariants_hold(&self) -> bool {
        self.invariants.iter().all(|v| v.holds)
    }

    /// No deadlocks and every invariant holds.
    pub fn is_sound(&self) -> bool {
        !self.has_deadlocks() && self.invariants_hold()
    }
}

/// [`analyse_with_limit`] with [`DEFAULT_MAX_STATES`].
pub fn analyse(definition: &NetDefinition) -> Result<AnalysisReport, AnalysisError> {
    analyse_with_limit(definition, DEFAULT_MAX_STATES)
}

/// Explore every reachable marking breadth-first, failing with
/// [`AnalysisError::StateSpaceExceeded`] past `max_states`.
pub fn analyse_with_limit(
    definition: &NetDefinition,
    max_states: usize,
) -> Result<AnalysisReport, AnalysisError> {
    let context = definition.initial_context();
    let initial = definition.initial_marking().clone();

    let mut verdicts: Vec<InvariantVerdict> = definition
        .invariants()
        .iter()
        .map(|inv| InvariantVerdict {
            name: inv.name.clone(),
            initial_sum: initial.weighted_sum(&inv.weights),
            holds: true,
            violation: None,
        })
        .collect();

    let mut seen: HashSet<Marking> = HashSet::new();
    let mut order: Vec<Marking> = Vec::new();
    let mut frontier: VecDeque<Marking> = VecDeque::new();
    seen.insert(initial.clone());
    frontier.push_back(initial);

    let mut report = AnalysisReport {
        net: definition.name().to_string(),
        reachable: Vec::new(),
        edge_count: 0,
        terminal: Vec::new(),
        expected_terminal: Vec::new(),
        deadlocks: Vec::new(),
        awaiting_timeout: Vec::new(),
        invariants: Vec::new(),
        dead_transitions: Vec::new(),
    };
    let mut ever_enabled: BTreeSet<&str> = BTreeSet::new();

    while let Some(marking) = frontier.pop_front() {
        for (verdict, inv) in verdicts.iter_mut().zip(definition.invariants()) {
            if verdict.holds && marking.weighted_sum(&inv.weights) != verdict.initial_sum {
                verdict.holds = false;
                verdict.violation = Some(marking.clone());
            }
        }

        let enabled: Vec<_> = definition
            .transitions()
            .iter()
            .filter(|t| can_fire_guarded(t, context, &marking))
            .collect();

        if enabled.is_empty() {
            report.terminal.push(marking.clone());
            if definition.terminal_satisfied(&marking) {
                report.expected_terminal.push(marking.clone());
            } else if !timeout_candidates(definition, &marking).is_empty() {
                report.awaiting_timeout.push(marking.clone());
            } else {
                report.deadlocks.push(marking.clone());
            }
        }

        for t in enabled {
            ever_enabled.insert(t.name());
            // Enabled was just checked, so firing cannot fail here.
            let Ok(next) = fire(&marking, t) else { continue };
            report.edge_count += 1;
            if seen.insert(next.clone()) {
                if seen.len() > max_states {
                    warn!(
                        net = definition.name(),
                        limit = max_states,
                        "state space exceeded limit"
                    );
                    return Err(AnalysisError::StateSpaceExceeded {
                        limit: max_states,
                        explored: seen.len(),
                    });
                }
                frontier.push_back(next);
            }
        }
        order.push(marking);
    }

    report.reachable = order;
    report.invariants = verdicts;
    report.dead_transitions = definition
        .transitions()
        .iter()
        .map(|t| t.name())
        .filter(|name| !ever_enabled.contains(name))
        .map(str::to_string)
        .collect();

    debug!(
        net = definition.name(),
        states = report.state_count(),
        edges = report.edge_count,
        deadlocks = report.deadlocks.len(),
        "analysis finished"
    );
    Ok(report)
}
