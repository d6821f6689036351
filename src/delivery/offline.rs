//! Local retry area for runs that could not be delivered.
//!
//! Each buffered run is one JSON document. Documents are written to a hidden
//! temporary file and renamed into place, so readers only ever see complete
//! `.json` files.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::fs;
use uuid::Uuid;

use crate::error::DeliveryError;
use crate::store::encode_file_stem;
use crate::trace::Run;

/// Directory of buffered run documents.
#[derive(Debug, Clone)]
pub struct OfflineBuffer {
    dir: PathBuf,
}

impl OfflineBuffer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name unique per run and attempt.
    fn file_name(run: &Run) -> String {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S_%6f");
        let nonce = Uuid::new_v4().simple().to_string();
        format!("{}_{}_{}.json", encode_file_stem(&run.run_id), stamp, &nonce[..8])
    }

    /// Persists a run, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError` if serialization or any filesystem step fails.
    pub async fn save(&self, run: &Run) -> Result<PathBuf, DeliveryError> {
        fs::create_dir_all(&self.dir).await?;

        let name = Self::file_name(run);
        let path = self.dir.join(&name);
        let tmp = self.dir.join(format!(".{}.tmp", name));

        let json = serde_json::to_vec_pretty(run)?;
        fs::write(&tmp, json).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        Ok(path)
    }

    /// Lists complete buffered documents in name order.
    ///
    /// A missing directory is an empty buffer.
    pub async fn list(&self) -> Result<Vec<PathBuf>, DeliveryError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let visible = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !n.starts_with('.'));
            if visible && path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }

        paths.sort();
        Ok(paths)
    }

    pub async fn load(&self, path: &Path) -> Result<Run, DeliveryError> {
        let content = fs::read(path).await?;
        Ok(serde_json::from_slice(&content)?)
    }

    /// Removes a document. Already-removed documents are not an error.
    pub async fn remove(&self, path: &Path) -> Result<(), DeliveryError> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn run(id: &str) -> Run {
        serde_json::from_value(json!({"run_id": id, "pipeline": "p"})).expect("valid run")
    }

    #[tokio::test]
    async fn test_save_list_load_remove() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let buffer = OfflineBuffer::new(temp.path().join("nested").join("offline"));

        let path = buffer.save(&run("run_abc")).await.expect("save");
        assert!(path.exists());

        let listed = buffer.list().await.expect("list");
        assert_eq!(listed, vec![path.clone()]);

        let loaded = buffer.load(&path).await.expect("load");
        assert_eq!(loaded.run_id, "run_abc");

        buffer.remove(&path).await.expect("remove");
        buffer.remove(&path).await.expect("second remove is fine");
        assert!(buffer.list().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn test_each_attempt_gets_its_own_file() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let buffer = OfflineBuffer::new(temp.path());

        buffer.save(&run("same")).await.expect("save");
        buffer.save(&run("same")).await.expect("save");
        assert_eq!(buffer.list().await.expect("list").len(), 2);
    }

    #[tokio::test]
    async fn test_list_ignores_partial_and_foreign_files() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let buffer = OfflineBuffer::new(temp.path());

        std::fs::write(temp.path().join(".half.json.tmp"), "{").expect("write");
        std::fs::write(temp.path().join("notes.txt"), "x").expect("write");
        assert!(buffer.list().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn test_missing_directory_lists_empty() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let buffer = OfflineBuffer::new(temp.path().join("absent"));
        assert!(buffer.list().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn test_run_id_with_path_separator_stays_inside_dir() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let buffer = OfflineBuffer::new(temp.path());

        let path = buffer.save(&run("../escape")).await.expect("save");
        assert_eq!(path.parent(), Some(temp.path()));
    }
}
