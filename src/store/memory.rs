//! In-memory storage for tests and the demo.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{HistoryRow, InstanceFilter, InstanceRecord, InstanceStore, StoreResult};

/// In-process store; contents are lost on drop.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    instances: Arc<RwLock<BTreeMap<String, InstanceRecord>>>,
    history: Arc<RwLock<HashMap<String, Vec<HistoryRow>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstanceStore for MemoryStore {
    async fn load(&self, id: &str) -> StoreResult<Option<InstanceRecord>> {
        let instances = self.instances.read().await;
        Ok(instances.get(id).cloned())
    }

    async fn save(&self, record: &InstanceRecord) -> StoreResult<()> {
        let mut instances = self.instances.write().await;
        instances.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn append_history(&self, row: HistoryRow) -> StoreResult<()> {
        let mut history = self.history.write().await;
        history.entry(row.instance_id.clone()).or_default().push(row);
        Ok(())
    }

    async fn history(&self, id: &str) -> StoreResult<Vec<HistoryRow>> {
        let history = self.history.read().await;
        Ok(history.get(id).cloned().unwrap_or_default())
    }

    async fn list_instances(&self, filter: &InstanceFilter) -> StoreResult<Vec<InstanceRecord>> {
        let instances = self.instances.read().await;
        Ok(instances
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        let existed = self.instances.write().await.remove(id).is_some();
        self.history.write().await.remove(id);
        Ok(existed)
    }
}
