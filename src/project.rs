//! Project-local persistence (C6): `project.json`, `merkle-state.json`,
//! `dirty-queue.json` under a hidden config directory at the project root.
//!
//! Every write goes to a temp file in the same directory followed by a
//! rename, so a crash mid-write never yields a torn file — the same pattern
//! the teacher uses for its workspace registry.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dirty::DirtyQueue;
use crate::error::{AppError, AppResult};
use crate::merkle::{FileLeaf, MerkleTree};

/// Name of the hidden directory created at the project root.
pub const CONFIG_DIR_NAME: &str = ".codeindex";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(rename = "projectId")]
    pub project_id: Uuid,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// Wire/disk shape of a persisted Merkle tree: root + lex-sorted leaves.
#[derive(Debug, Serialize, Deserialize)]
struct MerkleStateFile {
    root: String,
    leaves: Vec<LeafEntry>,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LeafEntry {
    #[serde(rename = "relativePath")]
    relative_path: String,
    hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct DirtyQueueFile {
    #[serde(rename = "lastSync")]
    last_sync: DateTime<Utc>,
    #[serde(rename = "dirtyFiles")]
    dirty_files: Vec<String>,
}

/// Owns the on-disk project state for one project root and keeps the
/// in-memory Merkle tree / dirty queue mirrored to disk on every mutation.
pub struct ProjectStore {
    project_root: PathBuf,
    config_dir: PathBuf,
    config: ProjectConfig,
}

impl ProjectStore {
    fn project_json(&self) -> PathBuf {
        self.config_dir.join("project.json")
    }

    fn merkle_state_json(&self) -> PathBuf {
        self.config_dir.join("merkle-state.json")
    }

    fn dirty_queue_json(&self) -> PathBuf {
        self.config_dir.join("dirty-queue.json")
    }

    pub fn project_id(&self) -> Uuid {
        self.config.project_id
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// True if no config directory exists yet at `project_root`.
    pub fn is_new(project_root: &Path) -> bool {
        !project_root.join(CONFIG_DIR_NAME).join("project.json").exists()
    }

    /// Load the existing project config, or create one (generating a fresh
    /// UUIDv4) if absent. Never deletes the directory.
    pub fn load_or_create(project_root: &Path) -> AppResult<ProjectStore> {
        let config_dir = project_root.join(CONFIG_DIR_NAME);
        fs::create_dir_all(&config_dir)?;

        let project_json = config_dir.join("project.json");
        let config = if project_json.exists() {
            let bytes = fs::read(&project_json)?;
            serde_json::from_slice(&bytes)?
        } else {
            ProjectConfig {
                project_id: Uuid::new_v4(),
                created_at: Utc::now(),
            }
        };

        let store = ProjectStore {
            project_root: project_root.to_path_buf(),
            config_dir,
            config,
        };
        store.save_project_config()?;
        Ok(store)
    }

    fn save_project_config(&self) -> AppResult<()> {
        atomic_write_json(&self.project_json(), &self.config)
    }

    pub fn load_merkle_tree(&self) -> AppResult<MerkleTree> {
        let path = self.merkle_state_json();
        if !path.exists() {
            return Ok(MerkleTree::default());
        }
        let bytes = fs::read(&path)?;
        let file: MerkleStateFile = serde_json::from_slice(&bytes)?;
        let mut tree = MerkleTree::default();
        for leaf in file.leaves {
            let digest = crate::hash::Digest::from_hex(&leaf.hash)
                .ok_or_else(|| AppError::Merkle("malformed leaf hash in merkle-state.json".into()))?;
            tree.update_leaf(&leaf.relative_path, digest);
        }
        Ok(tree)
    }

    pub fn save_merkle_tree(&self, tree: &MerkleTree) -> AppResult<()> {
        let file = MerkleStateFile {
            root: tree.root().to_hex(),
            leaves: tree
                .leaves()
                .iter()
                .map(|l: &FileLeaf| LeafEntry {
                    relative_path: l.relative_path.clone(),
                    hash: l.file_hash.to_hex(),
                })
                .collect(),
            timestamp: Utc::now(),
        };
        atomic_write_json(&self.merkle_state_json(), &file)
    }

    pub fn load_dirty_queue(&self) -> AppResult<DirtyQueue> {
        let path = self.dirty_queue_json();
        if !path.exists() {
            return Ok(DirtyQueue::default());
        }
        let bytes = fs::read(&path)?;
        let file: DirtyQueueFile = serde_json::from_slice(&bytes)?;
        let mut queue = DirtyQueue {
            last_sync: file.last_sync,
            ..DirtyQueue::default()
        };
        for path in file.dirty_files {
            queue.mark(&path);
        }
        Ok(queue)
    }

    pub fn save_dirty_queue(&self, queue: &DirtyQueue) -> AppResult<()> {
        let file = DirtyQueueFile {
            last_sync: queue.last_sync,
            dirty_files: queue.snapshot(),
        };
        atomic_write_json(&self.dirty_queue_json(), &file)
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }
}

/// Serialize `value` to a temp file beside `path` and rename it into place.
fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> AppResult<()> {
    let dir = path.parent().ok_or_else(|| AppError::Internal(anyhow::anyhow!("no parent dir")))?;
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let tmp_path = dir.join(format!(
        ".{}.tmp{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("state"),
        nonce
    ));
    let bytes = serde_json::to_vec_pretty(value)?;
    fs::write(&tmp_path, bytes)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}
