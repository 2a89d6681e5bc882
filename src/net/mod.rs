//! Places, transitions, markings, and structural firing.
//!
//! Structural firing ignores guards, effects, and timeouts; those layers
//! live in [`crate::firing`]. The gating protocol and the analysis engine
//! both build directly on [`can_fire`] and [`fire`].

mod definition;
mod file;
mod marking;
mod transition;

pub use definition::{Invariant, NetBuilder, NetDefinition};
pub use file::{InvariantFile, NetFile, TransitionFile};
pub use marking::Marking;
pub use transition::{TimeoutSpec, Transition};

use crate::error::FireError;

/// Every input place holds at least its input multiplicity.
pub fn can_fire(marking: &Marking, transition: &Transition) -> bool {
    transition
        .input_weights()
        .iter()
        .all(|(place, n)| marking.tokens(place) >= *n)
}

/// Subtract inputs and add outputs, producing a new marking.
///
/// Firing a disabled transition is an error, never a clamp.
pub fn fire(marking: &Marking, transition: &Transition) -> Result<Marking, FireError> {
    let disabled = || FireError {
        transition: transition.name().to_string(),
        marking: marking.clone(),
    };
    if !can_fire(marking, transition) {
        return Err(disabled());
    }
    let mut next = marking.clone();
    for (place, n) in transition.input_weights() {
        if !next.take(place, *n) {
            return Err(disabled());
        }
    }
    for (place, n) in transition.output_weights() {
        next.add(place, *n);
    }
    Ok(next)
}

/// Structurally enabled transitions, in declaration order.
pub fn structurally_enabled<'a>(
    definition: &'a NetDefinition,
    marking: &Marking,
) -> Vec<&'a Transition> {
    definition
        .transitions()
        .iter()
        .filter(|t| can_fire(marking, t))
        .collect()
}
