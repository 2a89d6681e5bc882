//! Tick-driven runtime for many persisted net instances.
//!
//! Each tick fires at most one transition per active instance. Every
//! mutation of an instance (tick step, token injection, context update,
//! deletion) is a load-modify-save against the store performed while
//! holding that instance's lock, so two operations on the same instance
//! never interleave. Steps for different instances run concurrently.

mod events;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::decision::{DecisionProvider, DecisionRequest};
use crate::error::{DefinitionError, FireGuardedError, SchedulerError};
use crate::firing::{Context, NetState, TimeoutTable, fire_guarded, guard_enabled, merge_context};
use crate::net::{NetDefinition, Transition};
use crate::store::{
    HistoryKind, HistoryRow, InstanceFilter, InstanceRecord, InstanceStatus, InstanceStore,
};

pub use events::{NoEvents, SchedulerEvents};

#[cfg(test)]
pub(crate) use events::recording;

/// What one tick did to one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub instance: String,
    /// Transition fired this step, if any. Set even when its execute
    /// effect failed.
    pub fired: Option<String>,
    /// Transitions whose timeout expired this step.
    pub timed_out: Vec<String>,
    /// Status after the step.
    pub status: InstanceStatus,
    pub stalled: bool,
    /// Earliest armed timeout after the step.
    pub next_deadline: Option<DateTime<Utc>>,
}

impl StepReport {
    pub fn progressed(&self) -> bool {
        self.fired.is_some() || !self.timed_out.is_empty()
    }
}

/// Result of one [`Scheduler::tick`] across all active instances.
#[derive(Debug, Default, Clone)]
pub struct TickReport {
    pub steps: Vec<StepReport>,
    /// Instances whose step failed outright (store errors, missing
    /// definitions). Other instances are unaffected.
    pub errors: Vec<(String, String)>,
}

impl TickReport {
    /// Whether any instance fired or timed out.
    pub fn progressed(&self) -> bool {
        self.steps.iter().any(StepReport::progressed)
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.steps.iter().filter_map(|s| s.next_deadline).min()
    }
}

/// Drives persisted instances of registered definitions.
pub struct Scheduler {
    definitions: HashMap<String, Arc<NetDefinition>>,
    store: Arc<dyn InstanceStore>,
    decider: Option<Arc<dyn DecisionProvider>>,
    events: Arc<dyn SchedulerEvents>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn InstanceStore>) -> Self {
        Self {
            definitions: HashMap::new(),
            store,
            decider: None,
            events: Arc::new(NoEvents),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_decider(mut self, decider: Arc<dyn DecisionProvider>) -> Self {
        self.decider = Some(decider);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn SchedulerEvents>) -> Self {
        self.events = events;
        self
    }

    /// Register a definition under its name, replacing any previous one.
    pub fn register(&mut self, definition: NetDefinition) {
        self.definitions
            .insert(definition.name().to_string(), Arc::new(definition));
    }

    pub fn definition(&self, name: &str) -> Result<Arc<NetDefinition>, SchedulerError> {
        self.definitions
            .get(name)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownDefinition(name.to_string()))
    }

    fn lock_for(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(id.to_string()).or_default().clone()
    }

    async fn load_existing(&self, id: &str) -> Result<InstanceRecord, SchedulerError> {
        self.store
            .load(id)
            .await?
            .ok_or_else(|| SchedulerError::InstanceNotFound(id.to_string()))
    }

    /// Create `id` from `definition` at its initial marking and arm its
    /// timeouts. Fails with `DuplicateInstance` if `id` already exists.
    pub async fn create_instance(
        &self,
        definition: &str,
        id: &str,
    ) -> Result<InstanceRecord, SchedulerError> {
        let def = self.definition(definition)?;
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        if self.store.load(id).await?.is_some() {
            return Err(SchedulerError::DuplicateInstance(id.to_string()));
        }

        let now = Utc::now();
        let state = NetState::initial(&def);
        let mut timeouts = TimeoutTable::new();
        timeouts.reconcile(&def, &state.marking, now);
        let record = InstanceRecord {
            id: id.to_string(),
            definition: definition.to_string(),
            status: InstanceStatus::Active,
            state,
            timeouts,
            stalled: false,
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.store.save(&record).await?;
        info!(instance = id, definition, "instance created");
        Ok(record)
    }

    pub async fn get_instance(&self, id: &str) -> Result<InstanceRecord, SchedulerError> {
        self.load_existing(id).await
    }

    pub async fn history(&self, id: &str) -> Result<Vec<HistoryRow>, SchedulerError> {
        Ok(self.store.history(id).await?)
    }

    pub async fn list_instances(
        &self,
        filter: &InstanceFilter,
    ) -> Result<Vec<InstanceRecord>, SchedulerError> {
        Ok(self.store.list_instances(filter).await?)
    }

    pub async fn has_pending_timeouts(&self, id: &str) -> Result<bool, SchedulerError> {
        Ok(self.store.has_pending_timeouts(id).await?)
    }

    /// Remove the instance and its history. Returns whether it existed.
    pub async fn delete_instance(&self, id: &str) -> Result<bool, SchedulerError> {
        let lock = self.lock_for(id);
        let existed = {
            let _guard = lock.lock().await;
            self.store.delete(id).await?
        };
        // Only drop the entry when no other task holds or awaits this
        // mutex; a fresh one handed out later must not run beside it.
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(id)
            .is_some_and(|held| Arc::ptr_eq(held, &lock) && Arc::strong_count(held) == 2)
        {
            locks.remove(id);
        }
        drop(locks);
        if existed {
            info!(instance = id, "instance deleted");
        }
        Ok(existed)
    }

    /// Add one token to `place`. A completed instance becomes active again
    /// so the next tick can discover what the token enabled.
    pub async fn inject_token(
        &self,
        id: &str,
        place: &str,
    ) -> Result<InstanceRecord, SchedulerError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut record = self.load_existing(id).await?;
        if record.status == InstanceStatus::Failed {
            return Err(SchedulerError::InstanceFailed {
                id: id.to_string(),
                reason: record.error.clone().unwrap_or_default(),
            });
        }
        let def = self.definition(&record.definition)?;
        if !def.has_place(place) {
            return Err(DefinitionError::NoSuchPlace {
                net: def.name().to_string(),
                place: place.to_string(),
            }
            .into());
        }

        let now = Utc::now();
        let before = record.state.marking.clone();
        record.state.marking.add(place, 1);
        if record.status == InstanceStatus::Completed {
            info!(instance = id, place, "completed instance reactivated by injection");
            record.status = InstanceStatus::Active;
        }
        record.stalled = false;
        record.timeouts.reconcile(&def, &record.state.marking, now);
        record.updated_at = now;

        self.store
            .append_history(HistoryRow {
                instance_id: id.to_string(),
                kind: HistoryKind::Injected,
                name: place.to_string(),
                marking_before: before,
                marking_after: record.state.marking.clone(),
                timestamp: now,
                duration_ms: 0,
            })
            .await?;
        self.store.save(&record).await?;
        debug!(instance = id, place, "token injected");
        Ok(record)
    }

    /// Shallow-merge `update` into the instance context. Guards see the
    /// new values on the next tick.
    pub async fn update_context(
        &self,
        id: &str,
        update: Context,
    ) -> Result<InstanceRecord, SchedulerError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut record = self.load_existing(id).await?;
        merge_context(&mut record.state.context, update);
        record.stalled = false;
        record.updated_at = Utc::now();
        self.store.save(&record).await?;
        Ok(record)
    }

    /// One step for every active instance, run concurrently.
    pub async fn tick(&self) -> Result<TickReport, SchedulerError> {
        let active = self.store.list_instances(&InstanceFilter::active()).await?;
        let results = join_all(active.iter().map(|r| self.step(&r.id))).await;

        let mut report = TickReport::default();
        for (record, result) in active.iter().zip(results) {
            match result {
                Ok(step) => report.steps.push(step),
                Err(e) => {
                    error!(instance = %record.id, error = %e, "instance step failed");
                    report.errors.push((record.id.clone(), e.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// Tick until no instance makes progress and none has an armed
    /// timeout, or `max_ticks` is reached. When only timeouts remain the
    /// loop sleeps until the earliest deadline. Returns ticks performed.
    pub async fn run_until_quiescent(&self, max_ticks: usize) -> Result<usize, SchedulerError> {
        for n in 1..=max_ticks {
            let report = self.tick().await?;
            if report.progressed() {
                continue;
            }
            match report.next_deadline() {
                Some(deadline) => {
                    let wait = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    debug!(wait_ms = wait.as_millis() as u64, "waiting for next timeout");
                    tokio::time::sleep(wait).await;
                }
                None => return Ok(n),
            }
        }
        warn!(max_ticks, "tick limit reached before quiescence");
        Ok(max_ticks)
    }

    /// Tick every `interval` until `shutdown` resolves.
    pub async fn run(
        &self,
        interval: Duration,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), SchedulerError> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("scheduler shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "tick failed");
                    }
                }
            }
        }
    }

    async fn step(&self, id: &str) -> Result<StepReport, SchedulerError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut record = self.load_existing(id).await?;
        let mut report = StepReport {
            instance: id.to_string(),
            fired: None,
            timed_out: Vec::new(),
            status: record.status,
            stalled: record.stalled,
            next_deadline: record.timeouts.next_deadline(),
        };
        // Another tick may have finished it while we waited for the lock.
        if !record.is_active() {
            return Ok(report);
        }
        let def = self.definition(&record.definition)?;
        let now = Utc::now();

        for expired in record.timeouts.take_expired(&def, &record.state.marking, now) {
            let before = record.state.marking.clone();
            record.state.marking.add(&expired.target_place, 1);
            info!(
                instance = id,
                transition = %expired.transition,
                target = %expired.target_place,
                "timeout expired"
            );
            self.events
                .on_timeout(id, &expired.transition, &expired.target_place);
            self.store
                .append_history(HistoryRow {
                    instance_id: id.to_string(),
                    kind: HistoryKind::TimedOut,
                    name: expired.transition.clone(),
                    marking_before: before,
                    marking_after: record.state.marking.clone(),
                    timestamp: now,
                    duration_ms: 0,
                })
                .await?;
            report.timed_out.push(expired.transition);
        }

        let enabled = guard_enabled(&def, &record.state);
        if let Some(transition) = self.choose(id, &def, &record.state, &enabled).await {
            let name = transition.name();
            let before = record.state.marking.clone();
            let started = Instant::now();
            let result = fire_guarded(transition, &mut record.state).await;
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match result {
                Ok(()) => {
                    record.timeouts.on_fired(name);
                    self.append_fired(id, name, before, &record, duration_ms).await?;
                    debug!(instance = id, transition = name, marking = %record.state.marking, "fired");
                    self.events.on_fire(id, name, &record.state.marking);
                    report.fired = Some(name.to_string());
                }
                Err(FireGuardedError::Execute(e)) => {
                    // The token movement happened and stays recorded.
                    self.append_fired(id, name, before, &record, duration_ms).await?;
                    let message = e.to_string();
                    error!(instance = id, transition = name, error = %message, "instance failed");
                    record.status = InstanceStatus::Failed;
                    record.error = Some(message.clone());
                    record.timeouts = TimeoutTable::new();
                    self.events.on_error(id, &message);
                    report.fired = Some(name.to_string());
                }
                Err(e) => {
                    warn!(instance = id, transition = name, error = %e, "chosen transition did not fire");
                }
            }
        }

        if record.is_active() {
            let changes = record
                .timeouts
                .reconcile(&def, &record.state.marking, Utc::now());
            for name in &changes.armed {
                debug!(instance = id, transition = %name, "timeout armed");
            }
            for name in &changes.cancelled {
                debug!(instance = id, transition = %name, "timeout cancelled");
            }

            let idle = guard_enabled(&def, &record.state).is_empty() && record.timeouts.is_empty();
            if !idle || report.progressed() {
                record.stalled = false;
            }
            if idle {
                if def.terminal_satisfied(&record.state.marking) {
                    info!(instance = id, marking = %record.state.marking, "instance completed");
                    record.status = InstanceStatus::Completed;
                    record.stalled = false;
                    self.events.on_complete(id, &record.state.marking);
                } else if !record.stalled {
                    warn!(
                        instance = id,
                        marking = %record.state.marking,
                        "instance stalled: nothing enabled and terminal places unsatisfied"
                    );
                    record.stalled = true;
                }
            }
        }

        record.updated_at = Utc::now();
        self.store.save(&record).await?;

        report.status = record.status;
        report.stalled = record.stalled;
        report.next_deadline = record.timeouts.next_deadline();
        Ok(report)
    }

    async fn append_fired(
        &self,
        id: &str,
        name: &str,
        before: crate::net::Marking,
        record: &InstanceRecord,
        duration_ms: u64,
    ) -> Result<(), SchedulerError> {
        self.store
            .append_history(HistoryRow {
                instance_id: id.to_string(),
                kind: HistoryKind::Fired,
                name: name.to_string(),
                marking_before: before,
                marking_after: record.state.marking.clone(),
                timestamp: Utc::now(),
                duration_ms,
            })
            .await?;
        Ok(())
    }

    /// Pick among guard-enabled transitions. The provider is consulted
    /// only when there is a real choice.
    async fn choose<'a>(
        &self,
        id: &str,
        def: &NetDefinition,
        state: &NetState,
        enabled: &[&'a Transition],
    ) -> Option<&'a Transition> {
        let first = enabled.first().copied()?;
        if enabled.len() == 1 {
            return Some(first);
        }
        let Some(decider) = self.decider.as_ref() else {
            return Some(first);
        };
        let request = DecisionRequest {
            instance_id: id.to_string(),
            definition: def.name().to_string(),
            enabled: enabled.iter().map(|t| t.name().to_string()).collect(),
            marking: state.marking.clone(),
            context: state.context.clone(),
        };
        match decider.choose(&request).await {
            Ok(decision) => match enabled.iter().find(|t| t.name() == decision.transition) {
                Some(t) => {
                    debug!(instance = id, transition = %decision.transition, reasoning = %decision.reasoning, "decision");
                    Some(*t)
                }
                None => {
                    warn!(
                        instance = id,
                        answer = %decision.transition,
                        fallback = first.name(),
                        "decision names a transition that is not enabled"
                    );
                    Some(first)
                }
            },
            Err(e) => {
                warn!(instance = id, error = %e, fallback = first.name(), "decision provider failed");
                Some(first)
            }
        }
    }
}
