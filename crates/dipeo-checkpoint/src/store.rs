//! Snapshot persistence trait and implementations (spec §4.3, §6).
//!
//! Grounded on `langgraph-checkpoint`'s `CheckpointSaver` trait (`get`/
//! `get_tuple` read primitives) and `InMemoryCheckpointSaver` reference
//! implementation; the file-backed store adds the write-temp + rename
//! atomicity spec §5 requires ("Final state is flushed atomically").

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{CheckpointError, Result};
use crate::snapshot::Snapshot;

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, snapshot: Snapshot) -> Result<()>;

    /// Loads a snapshot, applying the V1→V2 migrator if needed.
    async fn load(&self, execution_id: &str) -> Result<Snapshot>;

    async fn delete(&self, execution_id: &str) -> Result<()>;
}

/// In-memory reference implementation — development and tests, matching
/// `langgraph-checkpoint`'s `InMemoryCheckpointSaver` doc guidance (not for
/// production persistence across restarts).
#[derive(Clone, Default)]
pub struct InMemorySnapshotStore {
    snapshots: Arc<RwLock<HashMap<String, Snapshot>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, snapshot: Snapshot) -> Result<()> {
        self.snapshots.write().await.insert(snapshot.execution_id.clone(), snapshot);
        Ok(())
    }

    async fn load(&self, execution_id: &str) -> Result<Snapshot> {
        let snapshot = self
            .snapshots
            .read()
            .await
            .get(execution_id)
            .cloned()
            .ok_or_else(|| CheckpointError::NotFound(execution_id.to_string()))?;
        snapshot.migrate()
    }

    async fn delete(&self, execution_id: &str) -> Result<()> {
        self.snapshots.write().await.remove(execution_id);
        Ok(())
    }
}

/// File-backed store: one JSON file per execution under `base_dir`, written
/// via write-temp + rename so readers never observe a partial file.
pub struct FileSnapshotStore {
    base_dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    fn path_for(&self, execution_id: &str) -> PathBuf {
        self.base_dir.join(format!("{execution_id}.json"))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, snapshot: Snapshot) -> Result<()> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let final_path = self.path_for(&snapshot.execution_id);
        let tmp_path = final_path.with_extension("json.tmp");
        let serialized = serde_json::to_vec_pretty(&snapshot)?;
        tokio::fs::write(&tmp_path, &serialized).await?;
        tokio::fs::rename(&tmp_path, &final_path).await?;
        Ok(())
    }

    async fn load(&self, execution_id: &str) -> Result<Snapshot> {
        let path = self.path_for(execution_id);
        if !Path::new(&path).exists() {
            return Err(CheckpointError::NotFound(execution_id.to_string()));
        }
        let bytes = tokio::fs::read(&path).await?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        snapshot.migrate()
    }

    async fn delete(&self, execution_id: &str) -> Result<()> {
        let path = self.path_for(execution_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CheckpointError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn in_memory_store_round_trips() {
        let store = InMemorySnapshotStore::new();
        store.save(Snapshot::new("e1", json!({"x": 1}))).await.unwrap();
        let loaded = store.load("e1").await.unwrap();
        assert_eq!(loaded.data, json!({"x": 1}));
    }

    #[tokio::test]
    async fn in_memory_store_missing_execution_errors() {
        let store = InMemorySnapshotStore::new();
        assert!(store.load("missing").await.is_err());
    }

    #[tokio::test]
    async fn file_store_round_trips_and_migrates() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        store.save(Snapshot::new("e1", json!({"node_states": {}}))).await.unwrap();
        let loaded = store.load("e1").await.unwrap();
        assert_eq!(loaded.version, crate::snapshot::CURRENT_VERSION);
    }

    #[tokio::test]
    async fn file_store_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        store.delete("never-existed").await.unwrap();
    }
}
