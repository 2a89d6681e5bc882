mod cli;
mod ui;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use cli::{Cli, Command};
use petrigate::analysis::analyse_with_limit;
use petrigate::anthropic::AnthropicClient;
use petrigate::config::EngineConfig;
use petrigate::decision::{DecisionProvider, FirstEnabled, LlmDecisionProvider};
use petrigate::error::SchedulerError;
use petrigate::executor::ExecutorRegistry;
use petrigate::guard::compile_guard;
use petrigate::net::{NetDefinition, NetFile, Transition};
use petrigate::scheduler::Scheduler;
use petrigate::store::{InstanceFilter, InstanceStore, JsonFileStore, MemoryStore};

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_definition(path: &Path, registry: &ExecutorRegistry) -> Result<NetDefinition> {
    let file = NetFile::load(path)?;
    file.into_definition(registry)
        .with_context(|| format!("invalid net definition in {}", path.display()))
}

fn decision_provider(config: &EngineConfig) -> Arc<dyn DecisionProvider> {
    if config.has_api_key() {
        let client = AnthropicClient::new(config.api_key.clone());
        Arc::new(LlmDecisionProvider::new(client, config.decision_model.clone()))
    } else {
        Arc::new(FirstEnabled)
    }
}

fn scheduler(
    config: &EngineConfig,
    store: Arc<dyn InstanceStore>,
    definition: NetDefinition,
) -> Scheduler {
    let mut scheduler = Scheduler::new(store)
        .with_decider(decision_provider(config))
        .with_events(Arc::new(ui::ConsoleEvents::new()));
    scheduler.register(definition);
    scheduler
}

async fn run_to_quiescence(scheduler: &Scheduler, id: &str, max_ticks: usize) -> Result<()> {
    let ticks = scheduler.run_until_quiescent(max_ticks).await?;
    tracing::debug!(ticks, "run finished");
    print_outcome(scheduler, id).await
}

/// Tick on the configured interval until Ctrl-C.
async fn watch(scheduler: &Scheduler, id: &str, config: &EngineConfig) -> Result<()> {
    println!("  watching {id} every {}ms (Ctrl-C to stop)", config.tick_interval_ms);
    scheduler
        .run(config.tick_interval(), async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for Ctrl-C");
            }
        })
        .await?;
    print_outcome(scheduler, id).await
}

async fn print_outcome(scheduler: &Scheduler, id: &str) -> Result<()> {
    ui::print_instance(&scheduler.get_instance(id).await?);
    ui::print_history(&scheduler.history(id).await?);
    Ok(())
}

/// Coffee: heat water and grind beans in any order, then pour into a cup.
fn demo_net() -> Result<NetDefinition> {
    Ok(NetDefinition::builder("coffee")
        .places(["cold", "hot", "beans", "ground", "cup", "ready"])
        .transition(Transition::new("heat").input("cold").output("hot"))
        .transition(Transition::new("grind").input("beans").output("ground"))
        .transition(
            Transition::new("pour")
                .inputs(["hot", "ground", "cup"])
                .output("ready")
                .guard(compile_guard("marking.cup >= 1")?),
        )
        .tokens("cold", 1)
        .tokens("beans", 1)
        .tokens("cup", 1)
        .terminal("ready")
        .invariant("water", [("cold", 1), ("hot", 1), ("ready", 1)])
        .build()?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = EngineConfig::load(cli.config.as_deref())?;
    if let Some(n) = cli.max_states {
        config.max_states = n;
    }
    if let Some(n) = cli.max_ticks {
        config.max_ticks = n;
    }
    let registry = ExecutorRegistry::new();

    match cli.command {
        Command::Analyse { file, json } => {
            let def = load_definition(&file, &registry)?;
            let spinner = ui::Spinner::start(format!("analysing {}", def.name()));
            match analyse_with_limit(&def, config.max_states) {
                Ok(report) => {
                    spinner.succeed(&format!("{} reachable markings", report.state_count()));
                    ui::print_report(&report, json);
                }
                Err(e) => {
                    spinner.fail(&e.to_string());
                    return Err(e.into());
                }
            }
        }
        Command::Run {
            file,
            instance,
            watch: keep_watching,
        } => {
            let def = load_definition(&file, &registry)?;
            let id = instance.unwrap_or_else(|| {
                let suffix = uuid::Uuid::new_v4().simple().to_string();
                format!("{}-{}", def.name(), &suffix[..8])
            });
            let name = def.name().to_string();
            let store = Arc::new(JsonFileStore::open(&config.store_dir).await?);
            let scheduler = scheduler(&config, store, def);
            match scheduler.create_instance(&name, &id).await {
                Ok(_) => println!("  created {id}"),
                Err(SchedulerError::DuplicateInstance(_)) => println!("  resuming {id}"),
                Err(e) => return Err(e.into()),
            }
            if keep_watching {
                watch(&scheduler, &id, &config).await?;
            } else {
                run_to_quiescence(&scheduler, &id, config.max_ticks).await?;
            }
        }
        Command::Inject {
            file,
            instance,
            place,
        } => {
            let def = load_definition(&file, &registry)?;
            let store = Arc::new(JsonFileStore::open(&config.store_dir).await?);
            let scheduler = scheduler(&config, store, def);
            scheduler.inject_token(&instance, &place).await?;
            run_to_quiescence(&scheduler, &instance, config.max_ticks).await?;
        }
        Command::Instances { status } => {
            let store = JsonFileStore::open(&config.store_dir).await?;
            let filter = InstanceFilter {
                status: status.map(Into::into),
                definition: None,
            };
            ui::print_instances(&store.list_instances(&filter).await?);
        }
        Command::Demo => {
            let def = demo_net()?;
            let report = analyse_with_limit(&def, config.max_states)?;
            ui::print_report(&report, false);

            let scheduler = scheduler(&config, Arc::new(MemoryStore::new()), def);
            scheduler.create_instance("coffee", "demo").await?;
            run_to_quiescence(&scheduler, "demo", config.max_ticks).await?;
        }
    }

    Ok(())
}
