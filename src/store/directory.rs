//! Directory-backed run store.
//!
//! Keeps one `<run_id>.json` document per run next to an in-memory index.
//! Every insert is written through to disk before it becomes visible. First
//! inserts are also appended to a hidden `.order` log so insertion order
//! survives a reopen.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::trace::Run;

use super::memory::MemoryStore;
use super::RunStore;

/// Encodes an identifier as a file stem.
///
/// ASCII alphanumerics, `-` and `_` pass through; every other byte is written
/// as `%XX`, so ids like `../x` cannot leave the directory.
pub fn encode_file_stem(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

/// Insertion-order log, one encoded run id per line.
const ORDER_FILE: &str = ".order";

/// Durable run store rooted at a directory.
#[derive(Debug)]
pub struct DirectoryStore {
    dir: PathBuf,
    memory: MemoryStore,
    write_lock: Mutex<()>,
}

impl DirectoryStore {
    /// Opens a store, creating the directory and loading existing runs.
    ///
    /// Loaded runs keep the order in which they were first inserted. Documents
    /// missing from the order log (e.g. copied in by hand) follow, sorted by
    /// `started_at` (runs without a start time first), then by id. Documents
    /// that fail to parse are skipped.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the directory cannot be created or read.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;

        let mut runs = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !is_document(&path) {
                continue;
            }

            let content = fs::read(&path).await?;
            match serde_json::from_slice::<Run>(&content) {
                Ok(run) => runs.push(run),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable run document"),
            }
        }

        let order = read_order(&dir).await?;
        let position = |run: &Run| order.get(&encode_file_stem(&run.run_id)).copied();
        runs.sort_by(|a, b| match (position(a), position(b)) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => match a.started_at.cmp(&b.started_at) {
                Ordering::Equal => a.run_id.cmp(&b.run_id),
                other => other,
            },
        });

        let memory = MemoryStore::new();
        let loaded = runs.len();
        for run in runs {
            memory.insert_sync(run)?;
        }
        debug!(dir = %dir.display(), runs = loaded, "Opened run directory");

        Ok(Self {
            dir,
            memory,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_file_stem(run_id)))
    }

    async fn append_order(&self, run_id: &str) -> Result<(), StoreError> {
        let mut log = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(ORDER_FILE))
            .await?;
        log.write_all(format!("{}\n", encode_file_stem(run_id)).as_bytes())
            .await?;
        log.flush().await?;
        Ok(())
    }
}

/// Maps each encoded run id to its first position in the order log.
async fn read_order(dir: &Path) -> Result<HashMap<String, usize>, StoreError> {
    let content = match fs::read_to_string(dir.join(ORDER_FILE)).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(e.into()),
    };

    let mut order = HashMap::new();
    for (i, stem) in content.lines().filter(|l| !l.is_empty()).enumerate() {
        order.entry(stem.to_string()).or_insert(i);
    }
    Ok(order)
}

fn is_document(path: &Path) -> bool {
    let visible = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| !n.starts_with('.'));
    visible && path.extension().is_some_and(|ext| ext == "json")
}

#[async_trait]
impl RunStore for DirectoryStore {
    async fn insert(&self, run: Run) -> Result<String, StoreError> {
        let json = serde_json::to_vec_pretty(&run)?;
        let path = self.path_for(&run.run_id);
        let tmp = self
            .dir
            .join(format!(".{}.json.tmp", encode_file_stem(&run.run_id)));

        let _guard = self.write_lock.lock().await;
        let is_new = self.memory.get_sync(&run.run_id)?.is_none();
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &path).await?;
        if is_new {
            self.append_order(&run.run_id).await?;
        }
        self.memory.insert_sync(run)
    }

    async fn get(&self, run_id: &str) -> Result<Option<Arc<Run>>, StoreError> {
        self.memory.get_sync(run_id)
    }

    async fn snapshot(&self) -> Result<Vec<Arc<Run>>, StoreError> {
        self.memory.snapshot_sync()
    }

    async fn len(&self) -> Result<usize, StoreError> {
        self.memory.len_sync()
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_document(&path) {
                fs::remove_file(&path).await?;
            }
        }
        match fs::remove_file(self.dir.join(ORDER_FILE)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.memory.clear_sync()
    }
}
