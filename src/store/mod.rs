//! Durable instance storage consumed by the scheduler.
//!
//! Every instance mutation is a read-modify-write of one
//! [`InstanceRecord`]; the scheduler serializes those per instance id,
//! so backends only need to make single calls atomic.

mod file;
mod memory;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::firing::{NetState, TimeoutTable};
use crate::net::Marking;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Lifecycle of an instance. Only `Active` instances are ticked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Active,
    Completed,
    Failed,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceStatus::Active => write!(f, "active"),
            InstanceStatus::Completed => write!(f, "completed"),
            InstanceStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Persisted state of one running net.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: String,
    /// Name of the registered net definition this instance runs.
    pub definition: String,
    pub status: InstanceStatus,
    /// Current marking and context.
    pub state: NetState,
    /// Armed timeout deadlines.
    #[serde(default)]
    pub timeouts: TimeoutTable,
    /// Nothing enabled, nothing armed, terminals unsatisfied.
    #[serde(default)]
    pub stalled: bool,
    /// Why the instance failed, when it did.
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InstanceRecord {
    pub fn is_active(&self) -> bool {
        self.status == InstanceStatus::Active
    }
}

/// What produced a history row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    /// A transition fired; `name` is the transition.
    Fired,
    /// A timeout deadline elapsed; `name` is the transition.
    TimedOut,
    /// A token was injected from outside; `name` is the place.
    Injected,
}

/// One entry of an instance's ordered history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
    pub instance_id: String,
    pub kind: HistoryKind,
    /// Transition or place name, depending on `kind`.
    pub name: String,
    pub marking_before: Marking,
    pub marking_after: Marking,
    pub timestamp: DateTime<Utc>,
    /// Time spent firing, including the execute effect. Zero for
    /// timeouts and injections.
    pub duration_ms: u64,
}

/// Selects instances by status and/or definition; `None` matches any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceFilter {
    pub status: Option<InstanceStatus>,
    pub definition: Option<String>,
}

impl InstanceFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn active() -> Self {
        Self {
            status: Some(InstanceStatus::Active),
            definition: None,
        }
    }

    pub fn matches(&self, record: &InstanceRecord) -> bool {
        self.status.is_none_or(|s| s == record.status)
            && self
                .definition
                .as_deref()
                .is_none_or(|d| d == record.definition)
    }
}

/// Durable storage of instance records and their history.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// `None` when no instance has this id.
    async fn load(&self, id: &str) -> StoreResult<Option<InstanceRecord>>;

    /// Insert or replace the record under `record.id`.
    async fn save(&self, record: &InstanceRecord) -> StoreResult<()>;

    async fn append_history(&self, row: HistoryRow) -> StoreResult<()>;

    /// History rows of one instance in append order.
    async fn history(&self, id: &str) -> StoreResult<Vec<HistoryRow>>;

    /// Matching instances, ordered by id.
    async fn list_instances(&self, filter: &InstanceFilter) -> StoreResult<Vec<InstanceRecord>>;

    /// Whether the instance has any armed deadline. Unknown ids have none.
    async fn has_pending_timeouts(&self, id: &str) -> StoreResult<bool> {
        Ok(self
            .load(id)
            .await?
            .is_some_and(|r| !r.timeouts.is_empty()))
    }

    /// Returns whether the instance existed.
    async fn delete(&self, id: &str) -> StoreResult<bool>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub fn record(id: &str, definition: &str, status: InstanceStatus) -> InstanceRecord {
        let now = Utc::now();
        InstanceRecord {
            id: id.to_string(),
            definition: definition.to_string(),
            status,
            state: NetState {
                marking: Marking::from_iter([("start", 1)]),
                context: Default::default(),
            },
            timeouts: TimeoutTable::new(),
            stalled: false,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn row(id: &str, name: &str) -> HistoryRow {
        HistoryRow {
            instance_id: id.to_string(),
            kind: HistoryKind::Fired,
            name: name.to_string(),
            marking_before: Marking::from_iter([("start", 1)]),
            marking_after: Marking::from_iter([("start", 0)]),
            timestamp: Utc::now(),
            duration_ms: 1,
        }
    }

    /// Behaviour every backend must share.
    pub async fn exercise(store: &dyn InstanceStore) {
        assert!(store.load("a").await.unwrap().is_none());

        store.save(&record("b", "coffee", InstanceStatus::Completed)).await.unwrap();
        store.save(&record("a", "coffee", InstanceStatus::Active)).await.unwrap();
        store.save(&record("c", "tea", InstanceStatus::Active)).await.unwrap();

        let loaded = store.load("a").await.unwrap().unwrap();
        assert_eq!(loaded.definition, "coffee");

        let all: Vec<String> = store
            .list_instances(&InstanceFilter::all())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(all, vec!["a", "b", "c"]);

        let active_coffee = InstanceFilter {
            status: Some(InstanceStatus::Active),
            definition: Some("coffee".into()),
        };
        let ids: Vec<String> = store
            .list_instances(&active_coffee)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["a"]);

        store.append_history(row("a", "heat")).await.unwrap();
        store.append_history(row("a", "pour")).await.unwrap();
        store.append_history(row("c", "steep")).await.unwrap();
        let names: Vec<String> = store
            .history("a")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["heat", "pour"]);

        assert!(!store.has_pending_timeouts("a").await.unwrap());

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert!(store.load("a").await.unwrap().is_none());
        assert!(store.history("a").await.unwrap().is_empty());
    }
}
