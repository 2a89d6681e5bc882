//! Petri net runtime: structural and guarded firing, reachability
//! analysis, a persisted multi-instance scheduler, and a skill-net
//! protocol for gating agent tool calls.

pub mod analysis;
pub mod anthropic;
pub mod config;
pub mod decision;
pub mod error;
pub mod executor;
pub mod firing;
pub mod gate;
pub mod guard;
pub mod net;
pub mod scheduler;
pub mod store;

pub use error::{
    AnalysisError, DefinitionError, ExecuteError, FireError, FireGuardedError, GuardCompileError,
    SchedulerError, StoreError, ToolCallBlocked,
};
