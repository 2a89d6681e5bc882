//! Timeout bookkeeping for guard-blocked transitions.
//!
//! A transition is a *candidate* while it is structurally enabled and
//! declares a timeout; its guard is ignored. Candidates get a deadline
//! of `now + delay`. The deadline is dropped when the transition fires
//! or stops being a candidate. An expired deadline yields exactly one
//! token for the target place, after which the candidate is *spent* and
//! is not re-armed until it fires or loses candidacy.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::net::{Marking, NetDefinition, Transition, can_fire};

/// An armed deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTimeout {
    pub deadline: DateTime<Utc>,
    pub target_place: String,
}

/// A deadline that elapsed while its transition was still a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredTimeout {
    pub transition: String,
    pub target_place: String,
}

/// What a [`TimeoutTable::reconcile`] pass changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TimeoutChanges {
    pub armed: Vec<String>,
    pub cancelled: Vec<String>,
}

/// Armed deadlines of one instance, keyed by transition name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutTable {
    armed: BTreeMap<String, PendingTimeout>,
    #[serde(default)]
    spent: BTreeSet<String>,
}

/// Structurally enabled transitions that declare a timeout.
pub fn timeout_candidates<'a>(definition: &'a NetDefinition, marking: &Marking) -> Vec<&'a Transition> {
    definition
        .transitions()
        .iter()
        .filter(|t| t.timeout_spec().is_some() && can_fire(marking, t))
        .collect()
}

impl TimeoutTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// No deadline is armed.
    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn get(&self, transition: &str) -> Option<&PendingTimeout> {
        self.armed.get(transition)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PendingTimeout)> {
        self.armed.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.armed.values().map(|p| p.deadline).min()
    }

    /// The transition fired normally. Returns whether a deadline was
    /// cancelled.
    pub fn on_fired(&mut self, transition: &str) -> bool {
        self.spent.remove(transition);
        self.armed.remove(transition).is_some()
    }

    /// Cancel deadlines of transitions that lost candidacy and arm every
    /// fresh candidate at `now + delay`.
    pub fn reconcile(
        &mut self,
        definition: &NetDefinition,
        marking: &Marking,
        now: DateTime<Utc>,
    ) -> TimeoutChanges {
        let candidates = timeout_candidates(definition, marking);
        let names: BTreeSet<&str> = candidates.iter().map(|t| t.name()).collect();
        let mut changes = TimeoutChanges::default();

        self.armed.retain(|name, _| {
            let keep = names.contains(name.as_str());
            if !keep {
                changes.cancelled.push(name.clone());
            }
            keep
        });
        self.spent.retain(|name| names.contains(name.as_str()));

        for t in candidates {
            let Some(spec) = t.timeout_spec() else { continue };
            if self.armed.contains_key(t.name()) || self.spent.contains(t.name()) {
                continue;
            }
            let delay = i64::try_from(spec.delay_ms)
                .ok()
                .and_then(Duration::try_milliseconds)
                .unwrap_or(Duration::MAX);
            let deadline = now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC);
            self.armed.insert(
                t.name().to_string(),
                PendingTimeout {
                    deadline,
                    target_place: spec.target_place.clone(),
                },
            );
            changes.armed.push(t.name().to_string());
        }
        changes
    }

    /// Remove and return deadlines that have elapsed while their transition
    /// is still a candidate. Elapsed deadlines of non-candidates are
    /// dropped without firing.
    pub fn take_expired(
        &mut self,
        definition: &NetDefinition,
        marking: &Marking,
        now: DateTime<Utc>,
    ) -> Vec<ExpiredTimeout> {
        let due: Vec<String> = self
            .armed
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(name, _)| name.clone())
            .collect();

        let mut expired = Vec::new();
        for name in due {
            let Some(pending) = self.armed.remove(&name) else { continue };
            let still_candidate = definition
                .transition(&name)
                .is_some_and(|t| t.timeout_spec().is_some() && can_fire(marking, t));
            if still_candidate {
                self.spent.insert(name.clone());
                expired.push(ExpiredTimeout {
                    transition: name,
                    target_place: pending.target_place,
                });
            }
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Transition;

    fn net() -> NetDefinition {
        NetDefinition::builder("approval")
            .places(["pending", "approved", "timed_out", "escalated"])
            .transition(
                Transition::new("approve")
                    .input("pending")
                    .output("approved")
                    .timeout("timed_out", 100),
            )
            .transition(
                Transition::new("escalate")
                    .inputs(["pending", "timed_out"])
                    .output("escalated"),
            )
            .tokens("pending", 1)
            .build()
            .unwrap()
    }

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::milliseconds(ms)
    }

    #[test]
    fn candidates_ignore_guards() {
        let def = net();
        let names: Vec<&str> = timeout_candidates(&def, def.initial_marking())
            .iter()
            .map(|t| t.name())
            .collect();
        assert_eq!(names, vec!["approve"]);
    }

    #[test]
    fn reconcile_arms_once() {
        let def = net();
        let mut table = TimeoutTable::new();
        let changes = table.reconcile(&def, def.initial_marking(), at(0));
        assert_eq!(changes.armed, vec!["approve".to_string()]);
        assert_eq!(table.get("approve").unwrap().deadline, at(100));

        // A later pass keeps the original deadline.
        let changes = table.reconcile(&def, def.initial_marking(), at(50));
        assert!(changes.armed.is_empty());
        assert_eq!(table.get("approve").unwrap().deadline, at(100));
    }

    #[test]
    fn losing_candidacy_cancels() {
        let def = net();
        let mut table = TimeoutTable::new();
        table.reconcile(&def, def.initial_marking(), at(0));
        let consumed = Marking::from_iter([("pending", 0)]);
        let changes = table.reconcile(&def, &consumed, at(10));
        assert_eq!(changes.cancelled, vec!["approve".to_string()]);
        assert!(table.is_empty());
        assert!(table.take_expired(&def, &consumed, at(1_000)).is_empty());
    }

    #[test]
    fn firing_cancels() {
        let def = net();
        let mut table = TimeoutTable::new();
        table.reconcile(&def, def.initial_marking(), at(0));
        assert!(table.on_fired("approve"));
        assert!(table.take_expired(&def, def.initial_marking(), at(1_000)).is_empty());
    }

    #[test]
    fn expiry_fires_exactly_once_per_candidacy() {
        let def = net();
        let m = def.initial_marking().clone();
        let mut table = TimeoutTable::new();
        table.reconcile(&def, &m, at(0));
        assert!(table.take_expired(&def, &m, at(99)).is_empty());

        let expired = table.take_expired(&def, &m, at(100));
        assert_eq!(
            expired,
            vec![ExpiredTimeout {
                transition: "approve".into(),
                target_place: "timed_out".into(),
            }]
        );

        // Still a candidate, but spent: no re-arm, no second expiry.
        let changes = table.reconcile(&def, &m, at(200));
        assert!(changes.armed.is_empty());
        assert!(table.take_expired(&def, &m, at(10_000)).is_empty());
    }

    #[test]
    fn spent_mark_clears_after_losing_candidacy() {
        let def = net();
        let m = def.initial_marking().clone();
        let mut table = TimeoutTable::new();
        table.reconcile(&def, &m, at(0));
        table.take_expired(&def, &m, at(100));
        table.reconcile(&def, &Marking::from_iter([("pending", 0)]), at(150));
        let changes = table.reconcile(&def, &m, at(200));
        assert_eq!(changes.armed, vec!["approve".to_string()]);
    }

    #[test]
    fn table_roundtrips_through_json() {
        let def = net();
        let mut table = TimeoutTable::new();
        table.reconcile(&def, def.initial_marking(), at(0));
        let json = serde_json::to_string(&table).unwrap();
        let back: TimeoutTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back, table);
    }
}
