//! Serialized net definitions (JSON or TOML).
//!
//! ```json
//! {
//!   "name": "coffee",
//!   "places": ["cold", "hot"],
//!   "transitions": [{"name": "heat", "inputs": ["cold"], "outputs": ["hot"]}],
//!   "initialMarking": {"cold": 1},
//!   "terminalPlaces": ["hot"]
//! }
//! ```
//!
//! Inputs and outputs are multisets: a place listed twice moves two tokens.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context as _, Result, bail};
use serde::Deserialize;
use serde_json::Value;

use crate::error::DefinitionError;
use crate::executor::ExecutorRegistry;
use crate::firing::Context;
use crate::guard::compile_guard;

use super::{NetDefinition, TimeoutSpec, Transition};

/// On-disk net definition (JSON or TOML).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NetFile {
    pub name: String,
    pub places: Vec<String>,
    #[serde(default)]
    pub transitions: Vec<TransitionFile>,
    /// Places left out start with zero tokens.
    #[serde(default)]
    pub initial_marking: BTreeMap<String, u32>,
    #[serde(default)]
    pub initial_context: Context,
    #[serde(default)]
    pub terminal_places: Vec<String>,
    #[serde(default)]
    pub invariants: Vec<InvariantFile>,
}

/// One transition of a [`NetFile`]. `guard` is compiled on load.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TransitionFile {
    pub name: String,
    /// Input places; repeat a place to consume several tokens.
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub guard: Option<String>,
    #[serde(default)]
    pub timeout: Option<TimeoutSpec>,
    /// Node type tag resolved through the executor registry.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub config: Option<Value>,
}

/// Named weight vector over places.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InvariantFile {
    pub name: String,
    pub weights: BTreeMap<String, i64>,
}

impl NetFile {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("invalid JSON net definition")
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid TOML net definition")
    }

    /// Read a `.json` or `.toml` file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let parsed = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&text),
            Some("toml") => Self::from_toml(&text),
            _ => bail!(
                "unsupported net file extension for {} (expected .json or .toml)",
                path.display()
            ),
        };
        parsed.with_context(|| format!("failed to load {}", path.display()))
    }

    /// Compile guards, resolve typed transitions through `registry`, and
    /// validate the result.
    pub fn into_definition(self, registry: &ExecutorRegistry) -> Result<NetDefinition, DefinitionError> {
        let mut builder = NetDefinition::builder(self.name)
            .places(self.places)
            .context(self.initial_context);

        for spec in self.transitions {
            let mut t = Transition::new(&spec.name)
                .inputs(spec.inputs)
                .outputs(spec.outputs);
            if let Some(expr) = &spec.guard {
                let guard = compile_guard(expr).map_err(|source| DefinitionError::Guard {
                    transition: spec.name.clone(),
                    source,
                })?;
                t = t.guard(guard);
            }
            if let Some(timeout) = spec.timeout {
                t = t.timeout(timeout.target_place, timeout.delay_ms);
            }
            if let Some(kind) = spec.kind {
                t = t.kind(kind);
            }
            if let Some(config) = spec.config {
                t = t.config(config);
            }
            builder = builder.transition(t);
        }

        for (place, count) in self.initial_marking {
            builder = builder.tokens(place, count);
        }
        for place in self.terminal_places {
            builder = builder.terminal(place);
        }
        for inv in self.invariants {
            builder = builder.invariant(inv.name, inv.weights);
        }
        builder.build_with(registry)
    }
}
