use std::path::{Path, PathBuf};

use ag_core::types::{HelperAgent, MemoryEntry, Task};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("backup failed: {0}")]
pub struct BackupError(pub String);

/// Everything needed to restore one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupBundle {
    pub agent_id: String,
    pub created_at: DateTime<Utc>,
    pub config: serde_json::Value,
    pub memory: Vec<MemoryEntry>,
    pub tasks: Vec<Task>,
    pub helpers: Vec<HelperAgent>,
}

#[async_trait]
pub trait Backup: Send + Sync {
    /// Persist `bundle`, returning where it went.
    async fn snapshot(&self, bundle: &BackupBundle) -> Result<PathBuf, BackupError>;
}

/// Writes bundles as JSON files under `<dir>/<agent_id>/` and prunes all
/// but the newest `keep` of that agent.
pub struct SnapshotBackup {
    dir: PathBuf,
    keep: usize,
}

impl SnapshotBackup {
    pub fn new(dir: impl Into<PathBuf>, keep: usize) -> Self {
        Self {
            dir: dir.into(),
            keep: keep.max(1),
        }
    }

    /// Where snapshots of `agent_id` are written.
    pub fn agent_dir(&self, agent_id: &str) -> PathBuf {
        self.dir.join(agent_id)
    }

    async fn prune(&self, dir: &Path) -> Result<usize, BackupError> {
        let mut snapshots = Vec::new();
        let mut listing = tokio::fs::read_dir(dir).await.map_err(|e| io(dir, e))?;
        while let Some(item) = listing.next_entry().await.map_err(|e| io(dir, e))? {
            let name = item.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') && name.ends_with(".json") {
                snapshots.push(item.path());
            }
        }
        // Names are sortable timestamps.
        snapshots.sort();
        let excess = snapshots.len().saturating_sub(self.keep);
        for old in snapshots.into_iter().take(excess) {
            tokio::fs::remove_file(&old).await.map_err(|e| io(&old, e))?;
            debug!(path = %old.display(), "pruned old snapshot");
        }
        Ok(excess)
    }
}

fn io(path: &Path, e: std::io::Error) -> BackupError {
    BackupError(format!("{}: {e}", path.display()))
}

#[async_trait]
impl Backup for SnapshotBackup {
    async fn snapshot(&self, bundle: &BackupBundle) -> Result<PathBuf, BackupError> {
        let dir = self.agent_dir(&bundle.agent_id);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| io(&dir, e))?;
        let bytes =
            serde_json::to_vec_pretty(bundle).map_err(|e| BackupError(e.to_string()))?;
        let name = format!("{}.json", bundle.created_at.format("%Y%m%dT%H%M%S%.3f"));
        let path = dir.join(&name);
        let tmp = dir.join(format!(".{name}.tmp"));
        tokio::fs::write(&tmp, &bytes).await.map_err(|e| io(&tmp, e))?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| io(&path, e))?;
        let pruned = self.prune(&dir).await?;
        info!(path = %path.display(), entries = bundle.memory.len(), pruned, "snapshot written");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn bundle(at: DateTime<Utc>) -> BackupBundle {
        BackupBundle {
            agent_id: "garden".into(),
            created_at: at,
            config: serde_json::json!({}),
            memory: vec![],
            tasks: vec![],
            helpers: vec![],
        }
    }

    #[tokio::test]
    async fn keeps_only_the_newest_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let backup = SnapshotBackup::new(dir.path(), 2);
        let start = Utc::now();
        let mut paths = Vec::new();
        for i in 0..4 {
            paths.push(backup.snapshot(&bundle(start + Duration::hours(i))).await.unwrap());
        }
        assert!(!paths[0].exists());
        assert!(!paths[1].exists());
        assert!(paths[2].exists());
        assert!(paths[3].exists());
        assert_eq!(paths[3].parent().unwrap(), backup.agent_dir("garden"));

        let restored: BackupBundle =
            serde_json::from_slice(&std::fs::read(&paths[3]).unwrap()).unwrap();
        assert_eq!(restored.agent_id, "garden");
    }
}
