//! Run storage.
//!
//! Runs are keyed by `run_id`. Inserting an existing id replaces the whole
//! record, which makes resending a buffered run harmless. Readers get
//! point-in-time snapshots of `Arc<Run>` handles and never see a partial run.

pub mod directory;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::trace::Run;

pub use directory::{encode_file_stem, DirectoryStore};
pub use memory::MemoryStore;

/// Backend that holds finalized runs.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Inserts or replaces a run, returning its id.
    async fn insert(&self, run: Run) -> Result<String, StoreError>;

    async fn get(&self, run_id: &str) -> Result<Option<Arc<Run>>, StoreError>;

    /// All runs in insertion order. A replaced run keeps its original slot.
    async fn snapshot(&self) -> Result<Vec<Arc<Run>>, StoreError>;

    async fn len(&self) -> Result<usize, StoreError>;

    async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len().await? == 0)
    }

    /// Removes every run.
    async fn clear(&self) -> Result<(), StoreError>;
}
