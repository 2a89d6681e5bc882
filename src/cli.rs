//! Command line interface for `petrigate`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use petrigate::store::InstanceStatus;

/// Petri net workflow engine: analyse nets and run persisted instances.
#[derive(Debug, Parser)]
#[command(name = "petrigate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Config file (defaults to ./petrigate.toml when present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Give up analysis after this many distinct markings.
    #[arg(long, global = true)]
    pub max_states: Option<usize>,

    /// Give up running after this many ticks.
    #[arg(long, global = true)]
    pub max_ticks: Option<usize>,

    /// Debug-level logging (RUST_LOG still wins).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StatusArg {
    Active,
    Completed,
    Failed,
}

impl From<StatusArg> for InstanceStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Active => InstanceStatus::Active,
            StatusArg::Completed => InstanceStatus::Completed,
            StatusArg::Failed => InstanceStatus::Failed,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Explore the reachable state space of a net file.
    Analyse {
        /// Net definition (.json or .toml).
        file: PathBuf,

        /// Print the full report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Create (or resume) an instance and tick it until it settles.
    Run {
        file: PathBuf,

        /// Instance id; a fresh one is generated when omitted.
        #[arg(long)]
        instance: Option<String>,

        /// Keep ticking every `tick_interval_ms` until Ctrl-C instead of
        /// stopping at quiescence.
        #[arg(long)]
        watch: bool,
    },

    /// Add one token to a place of a stored instance, then keep running.
    Inject {
        file: PathBuf,

        #[arg(long)]
        instance: String,

        #[arg(long)]
        place: String,
    },

    /// List stored instances.
    Instances {
        #[arg(long)]
        status: Option<StatusArg>,
    },

    /// Analyse and run the built-in coffee net in memory.
    Demo,
}
