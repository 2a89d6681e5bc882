use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::error::DefinitionError;
use crate::executor::ExecutorRegistry;
use crate::firing::Context;

use super::{Marking, Transition};

/// A named conservation law: a weight per place whose weighted token sum
/// should never change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invariant {
    pub name: String,
    pub weights: BTreeMap<String, i64>,
}

/// An immutable, validated net.
#[derive(Debug, Clone)]
pub struct NetDefinition {
    name: String,
    places: Vec<String>,
    transitions: Vec<Transition>,
    initial_marking: Marking,
    initial_context: Context,
    terminal_places: BTreeSet<String>,
    invariants: Vec<Invariant>,
}

impl NetDefinition {
    pub fn builder(name: impl Into<String>) -> NetBuilder {
        NetBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared places, in declaration order.
    pub fn places(&self) -> &[String] {
        &self.places
    }

    pub fn has_place(&self, place: &str) -> bool {
        self.places.iter().any(|p| p == place)
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Look up a transition by name.
    pub fn transition(&self, name: &str) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.name() == name)
    }

    /// Holds an entry for every declared place.
    pub fn initial_marking(&self) -> &Marking {
        &self.initial_marking
    }

    pub fn initial_context(&self) -> &Context {
        &self.initial_context
    }

    pub fn terminal_places(&self) -> &BTreeSet<String> {
        &self.terminal_places
    }

    pub fn invariants(&self) -> &[Invariant] {
        &self.invariants
    }

    /// Every declared terminal place holds at least one token.
    /// A net without terminal places is trivially satisfied.
    pub fn terminal_satisfied(&self, marking: &Marking) -> bool {
        self.terminal_places.iter().all(|p| marking.tokens(p) >= 1)
    }
}

/// Fluent construction of a [`NetDefinition`]; all referential checks
/// happen in [`NetBuilder::build`].
#[derive(Debug, Clone)]
pub struct NetBuilder {
    name: String,
    places: Vec<String>,
    transitions: Vec<Transition>,
    initial: Vec<(String, u32)>,
    context: Context,
    terminal_places: Vec<String>,
    invariants: Vec<Invariant>,
}

impl NetBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            places: Vec::new(),
            transitions: Vec::new(),
            initial: Vec::new(),
            context: Context::new(),
            terminal_places: Vec::new(),
            invariants: Vec::new(),
        }
    }

    /// Declare a place. Declaring the same name twice fails at `build`.
    pub fn place(mut self, place: impl Into<String>) -> Self {
        self.places.push(place.into());
        self
    }

    pub fn places<I, S>(self, places: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        places.into_iter().fold(self, |b, p| b.place(p))
    }

    pub fn transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }

    /// Initial token count for `place`. Undeclared places fail at `build`;
    /// places never given tokens start empty.
    pub fn tokens(mut self, place: impl Into<String>, count: u32) -> Self {
        self.initial.push((place.into(), count));
        self
    }

    pub fn context_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Replace the whole initial context.
    pub fn context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Mark `place` as terminal: completion requires a token in every
    /// terminal place.
    pub fn terminal(mut self, place: impl Into<String>) -> Self {
        self.terminal_places.push(place.into());
        self
    }

    /// Conservation law: `Σ weight·tokens` must stay at its initial value
    /// in every reachable marking.
    pub fn invariant<I, S>(mut self, name: impl Into<String>, weights: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        self.invariants.push(Invariant {
            name: name.into(),
            weights: weights.into_iter().map(|(p, w)| (p.into(), w)).collect(),
        });
        self
    }

    /// Validate and freeze the net. Transitions keep only explicitly
    /// supplied executors.
    pub fn build(self) -> Result<NetDefinition, DefinitionError> {
        let mut places = BTreeSet::new();
        for place in &self.places {
            if !places.insert(place.as_str()) {
                return Err(DefinitionError::DuplicatePlace(place.clone()));
            }
        }

        let mut names = BTreeSet::new();
        for t in &self.transitions {
            if !names.insert(t.name()) {
                return Err(DefinitionError::DuplicateTransition(t.name().to_string()));
            }
            if let Some(place) = t.referenced_places().find(|p| !places.contains(p)) {
                return Err(DefinitionError::UnknownPlace {
                    transition: t.name().to_string(),
                    place: place.to_string(),
                });
            }
        }

        let mut initial_marking: Marking = self.places.iter().map(|p| (p.clone(), 0)).collect();
        for (place, count) in &self.initial {
            if !places.contains(place.as_str()) {
                return Err(DefinitionError::UnknownInitialPlace(place.clone()));
            }
            initial_marking.set(place.clone(), *count);
        }

        if let Some(place) = self
            .terminal_places
            .iter()
            .find(|p| !places.contains(p.as_str()))
        {
            return Err(DefinitionError::UnknownTerminalPlace(place.clone()));
        }

        for inv in &self.invariants {
            if let Some(place) = inv.weights.keys().find(|p| !places.contains(p.as_str())) {
                return Err(DefinitionError::UnknownInvariantPlace {
                    invariant: inv.name.clone(),
                    place: place.clone(),
                });
            }
        }

        Ok(NetDefinition {
            name: self.name,
            places: self.places,
            transitions: self.transitions,
            initial_marking,
            initial_context: self.context,
            terminal_places: self.terminal_places.into_iter().collect(),
            invariants: self.invariants,
        })
    }

    /// Like [`build`](Self::build), but transitions that declare a type tag
    /// and no explicit executor get the registry's default executor.
    pub fn build_with(self, registry: &ExecutorRegistry) -> Result<NetDefinition, DefinitionError> {
        let mut def = self.build()?;
        for t in &mut def.transitions {
            if t.executor().is_some() {
                continue;
            }
            let Some(kind) = t.type_tag() else { continue };
            if let Some(exec) = registry.resolve(t.name(), kind, t.type_config())? {
                t.set_executor(exec);
            }
        }
        Ok(def)
    }
}
