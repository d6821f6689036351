//! In-memory run store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::trace::Run;

use super::RunStore;

#[derive(Debug, Default)]
struct RunTable {
    /// run_id -> position in `runs`.
    index: HashMap<String, usize>,
    runs: Vec<Arc<Run>>,
}

/// Run store backed by a locked in-memory table.
///
/// Writers replace whole records under the write lock; readers clone the
/// handle list under the read lock and filter outside it.
#[derive(Debug, Default)]
pub struct MemoryStore {
    table: RwLock<RunTable>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert_sync(&self, run: Run) -> Result<String, StoreError> {
        let run_id = run.run_id.clone();
        let run = Arc::new(run);

        let mut table = self
            .table
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;

        match table.index.get(&run_id).copied() {
            Some(slot) => table.runs[slot] = run,
            None => {
                let slot = table.runs.len();
                table.runs.push(run);
                table.index.insert(run_id.clone(), slot);
            }
        }

        Ok(run_id)
    }

    pub(crate) fn get_sync(&self, run_id: &str) -> Result<Option<Arc<Run>>, StoreError> {
        let table = self
            .table
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        Ok(table.index.get(run_id).map(|&slot| table.runs[slot].clone()))
    }

    pub(crate) fn snapshot_sync(&self) -> Result<Vec<Arc<Run>>, StoreError> {
        let table = self
            .table
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        Ok(table.runs.clone())
    }

    pub(crate) fn len_sync(&self) -> Result<usize, StoreError> {
        let table = self
            .table
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        Ok(table.runs.len())
    }

    pub(crate) fn clear_sync(&self) -> Result<(), StoreError> {
        let mut table = self
            .table
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        table.index.clear();
        table.runs.clear();
        Ok(())
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn insert(&self, run: Run) -> Result<String, StoreError> {
        self.insert_sync(run)
    }

    async fn get(&self, run_id: &str) -> Result<Option<Arc<Run>>, StoreError> {
        self.get_sync(run_id)
    }

    async fn snapshot(&self) -> Result<Vec<Arc<Run>>, StoreError> {
        self.snapshot_sync()
    }

    async fn len(&self) -> Result<usize, StoreError> {
        self.len_sync()
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.clear_sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::RunStatus;
    use serde_json::json;

    fn run(id: &str, status: &str) -> Run {
        serde_json::from_value(json!({"run_id": id, "pipeline": "p", "status": status}))
            .expect("valid run")
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = MemoryStore::new();
        assert!(store.is_empty().await.expect("is_empty"));

        let id = store.insert(run("r1", "completed")).await.expect("insert");
        assert_eq!(id, "r1");
        assert!(store.get("r1").await.expect("get").is_some());
        assert!(store.get("missing").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_duplicate_id_replaces_whole_record_in_place() {
        let store = MemoryStore::new();
        store.insert(run("r1", "failed")).await.expect("insert");
        store.insert(run("r2", "completed")).await.expect("insert");

        let mut replacement = run("r1", "completed");
        replacement.metadata.insert("attempt".into(), json!(2));
        store.insert(replacement).await.expect("insert");

        assert_eq!(store.len().await.expect("len"), 2);
        let snapshot = store.snapshot().await.expect("snapshot");
        assert_eq!(snapshot[0].run_id, "r1");
        assert_eq!(snapshot[0].status, RunStatus::Completed);
        assert_eq!(snapshot[0].metadata["attempt"], json!(2));
        assert_eq!(snapshot[1].run_id, "r2");
    }

    #[tokio::test]
    async fn test_snapshot_is_point_in_time() {
        let store = MemoryStore::new();
        store.insert(run("r1", "completed")).await.expect("insert");

        let snapshot = store.snapshot().await.expect("snapshot");
        store.insert(run("r2", "completed")).await.expect("insert");

        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.len().await.expect("len"), 2);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = MemoryStore::new();
        store.insert(run("r1", "completed")).await.expect("insert");
        store.clear().await.expect("clear");
        assert_eq!(store.len().await.expect("len"), 0);
        assert!(store.get("r1").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_concurrent_writers() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.insert(run(&format!("r{}", i % 4), "completed")).await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("insert");
        }
        assert_eq!(store.len().await.expect("len"), 4);
    }
}
