//! One JSON document per instance plus a JSON-lines history file.
//!
//! Layout under the root directory:
//!
//! ```text
//! instances/<id>.json
//! history/<id>.jsonl
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use super::{HistoryRow, InstanceFilter, InstanceRecord, InstanceStore, StoreResult};
use crate::error::StoreError;

/// File-backed store rooted at a directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("instances")).await?;
        fs::create_dir_all(root.join("history")).await?;
        Ok(Self { root })
    }

    fn instance_path(&self, id: &str) -> StoreResult<PathBuf> {
        check_id(id)?;
        Ok(self.root.join("instances").join(format!("{id}.json")))
    }

    fn history_path(&self, id: &str) -> StoreResult<PathBuf> {
        check_id(id)?;
        Ok(self.root.join("history").join(format!("{id}.jsonl")))
    }
}

/// Ids become file names, so keep them to a portable character set.
fn check_id(id: &str) -> StoreResult<()> {
    let ok = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(StoreError::Backend(format!(
            "instance id '{id}' is not usable as a file name"
        )))
    }
}

async fn read_optional(path: &Path) -> StoreResult<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn remove_optional(path: &Path) -> StoreResult<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl InstanceStore for JsonFileStore {
    async fn load(&self, id: &str) -> StoreResult<Option<InstanceRecord>> {
        let path = self.instance_path(id)?;
        match read_optional(&path).await? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, record: &InstanceRecord) -> StoreResult<()> {
        let path = self.instance_path(&record.id)?;
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(record)?;
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn append_history(&self, row: HistoryRow) -> StoreResult<()> {
        let path = self.history_path(&row.instance_id)?;
        let mut line = serde_json::to_vec(&row)?;
        line.push(b'\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn history(&self, id: &str) -> StoreResult<Vec<HistoryRow>> {
        let path = self.history_path(id)?;
        let Some(text) = read_optional(&path).await? else {
            return Ok(Vec::new());
        };
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(StoreError::from))
            .collect()
    }

    async fn list_instances(&self, filter: &InstanceFilter) -> StoreResult<Vec<InstanceRecord>> {
        let mut entries = fs::read_dir(self.root.join("instances")).await?;
        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let text = fs::read_to_string(&path).await?;
            // A damaged document must not hide every other instance;
            // `load` still reports it for its own id.
            let record: InstanceRecord = match serde_json::from_str(&text) {
                Ok(record) => record,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable instance record");
                    continue;
                }
            };
            if filter.matches(&record) {
                out.push(record);
            }
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        let existed = remove_optional(&self.instance_path(id)?).await?;
        remove_optional(&self.history_path(id)?).await?;
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{exercise, record};
    use super::super::InstanceStatus;
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn file_store_contract() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        exercise(&store).await;
    }

    #[tokio::test]
    async fn records_survive_reopening() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        let mut r = record("order-1", "checkout", InstanceStatus::Active);
        r.state.context.insert("total".into(), serde_json::json!(42));
        store.save(&r).await.unwrap();
        drop(store);

        let reopened = JsonFileStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.load("order-1").await.unwrap(), Some(r));
    }

    #[tokio::test]
    async fn rejects_path_like_ids() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        assert!(matches!(
            store.load("../escape").await,
            Err(StoreError::Backend(_))
        ));
        assert!(store.load("").await.is_err());
    }

    #[tokio::test]
    async fn corrupt_document_is_a_json_error() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("instances/bad.json"), "{not json").unwrap();
        assert!(matches!(store.load("bad").await, Err(StoreError::Json(_))));
    }

    #[tokio::test]
    async fn listing_skips_corrupt_documents() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        store
            .save(&record("good", "checkout", InstanceStatus::Active))
            .await
            .unwrap();
        std::fs::write(dir.path().join("instances/bad.json"), "{not json").unwrap();

        let listed = store.list_instances(&InstanceFilter::active()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "good");
    }
}
