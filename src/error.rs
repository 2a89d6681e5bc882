use thiserror::Error;

use crate::net::Marking;

/// Raised while constructing a net definition or a skill net.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("transition '{transition}' references unknown place '{place}'")]
    UnknownPlace { transition: String, place: String },

    #[error("initial marking references unknown place '{0}'")]
    UnknownInitialPlace(String),

    #[error("unknown terminal place '{0}'")]
    UnknownTerminalPlace(String),

    #[error("invariant '{invariant}' references unknown place '{place}'")]
    UnknownInvariantPlace { invariant: String, place: String },

    #[error("duplicate place '{0}'")]
    DuplicatePlace(String),

    #[error("duplicate transition '{0}'")]
    DuplicateTransition(String),

    /// A runtime reference (e.g. token injection) to an undeclared place.
    #[error("net '{net}' has no place named '{place}'")]
    NoSuchPlace { net: String, place: String },

    #[error("invalid config for '{kind}' transition '{transition}': {message}")]
    InvalidConfig {
        transition: String,
        kind: String,
        message: String,
    },

    #[error("guard of transition '{transition}' failed to compile: {source}")]
    Guard {
        transition: String,
        #[source]
        source: GuardCompileError,
    },
}

/// A guard expression could not be compiled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("guard compile error at offset {offset} in `{expression}`: {message}")]
pub struct GuardCompileError {
    pub expression: String,
    /// Byte offset into `expression` where compilation stopped.
    pub offset: usize,
    pub message: String,
}

/// Firing a transition that is not structurally enabled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transition '{transition}' is not enabled at marking {marking}")]
pub struct FireError {
    pub transition: String,
    pub marking: Marking,
}

/// A transition's side effect failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("execute of transition '{transition}' failed: {message}")]
pub struct ExecuteError {
    pub transition: String,
    pub message: String,
}

impl ExecuteError {
    pub fn new(transition: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            transition: transition.into(),
            message: message.into(),
        }
    }
}

/// Outcome of a failed guarded fire.
///
/// `Disabled` leaves the state untouched. `Execute` means the structural
/// marking change has already been applied and is kept; only the context
/// merge was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FireGuardedError {
    #[error(transparent)]
    Disabled(#[from] FireError),

    /// Structurally enabled but the guard is false. State is untouched.
    #[error("guard of transition '{transition}' rejected marking {marking}")]
    GuardRejected { transition: String, marking: Marking },

    #[error(transparent)]
    Execute(#[from] ExecuteError),
}

/// Reachability analysis could not finish.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error(
        "state space too large or unbounded: explored {explored} markings, limit is {limit}"
    )]
    StateSpaceExceeded { limit: usize, explored: usize },
}

/// Failures of an [`InstanceStore`](crate::store::InstanceStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Backend-specific failure, such as an id the backend cannot store.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Errors returned to scheduler callers. Execute failures never appear
/// here; they mark the instance failed instead.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("instance '{0}' already exists")]
    DuplicateInstance(String),

    #[error("no net definition registered as '{0}'")]
    UnknownDefinition(String),

    #[error("instance '{0}' not found")]
    InstanceNotFound(String),

    #[error("instance '{id}' has failed: {reason}")]
    InstanceFailed { id: String, reason: String },

    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// A gating decision rejected a tool call. The tool is never invoked.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("tool call '{tool}' blocked by net '{net}': {reason}")]
pub struct ToolCallBlocked {
    pub net: String,
    pub tool: String,
    pub reason: String,
}
