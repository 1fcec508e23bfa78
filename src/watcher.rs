//! Watcher bridge (C5): converts native filesystem events into Merkle/dirty-
//! queue mutations.
//!
//! A cooperative, single-threaded consumer of debounced event batches. Every
//! event in a batch is classified, converted to a relative path, and
//! dispatched against the shared project state before the batch callback
//! returns — no event is dropped to a background task, matching the
//! "process a whole batch before yielding" guidance for cooperative
//! concurrency.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::RecursiveMode;
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, RecommendedCache};
use parking_lot::Mutex;

use crate::config::{is_supported_extension, AppConfig};
use crate::dirty::DirtyQueue;
use crate::hash::file_digest;
use crate::merkle::{to_forward_slash, LeafUpdate, MerkleTree};
use crate::project::ProjectStore;

/// The mutable state a sync orchestrator tick and a watcher callback both
/// touch. A single mutex covers all three, per the concurrency model: the
/// watcher must hold it only long enough to mutate in-memory state and
/// persist, never across blocking I/O beyond the local writes themselves.
pub struct ProjectState {
    pub store: ProjectStore,
    pub tree: MerkleTree,
    pub dirty: DirtyQueue,
}

impl ProjectState {
    pub fn load(project_root: &Path) -> crate::error::AppResult<ProjectState> {
        let store = ProjectStore::load_or_create(project_root)?;
        let tree = store.load_merkle_tree()?;
        let dirty = store.load_dirty_queue()?;
        Ok(ProjectState { store, tree, dirty })
    }

    fn persist_tree(&self) -> crate::error::AppResult<()> {
        self.store.save_merkle_tree(&self.tree)
    }

    fn persist_dirty(&self) -> crate::error::AppResult<()> {
        self.store.save_dirty_queue(&self.dirty)
    }
}

pub type SharedProjectState = Arc<Mutex<ProjectState>>;

/// Called after a batch has mutated state, with the set of relative paths
/// whose leaf actually changed.
pub trait FileChangeSink: Send + Sync {
    fn on_files_changed(&self, changed: &[String], new_root: crate::hash::Digest);
}

pub struct WatcherBridge {
    project_root: PathBuf,
    _debouncer: Debouncer<notify::RecommendedWatcher, RecommendedCache>,
}

impl WatcherBridge {
    /// Perform the initial synchronous directory walk (seeding the
    /// known-paths set from whatever the Merkle tree already has loaded) and
    /// start watching. Events for paths already present at startup arrive as
    /// `create` from the native watcher but are initial state, not
    /// mutations — they're suppressed because `update_leaf` on an unchanged
    /// hash returns `Unchanged` and never marks the dirty queue.
    pub fn start(
        project_root: PathBuf,
        config: &AppConfig,
        state: SharedProjectState,
        sink: Arc<dyn FileChangeSink>,
    ) -> notify::Result<WatcherBridge> {
        let root_for_closure = project_root.clone();
        let state_for_closure = state.clone();
        let debounce_ms = config.watcher_debounce_ms;

        let mut debouncer = new_debouncer(
            std::time::Duration::from_millis(debounce_ms),
            None,
            move |result: DebounceEventResult| {
                if let Ok(events) = result {
                    handle_event_batch(&root_for_closure, &state_for_closure, &sink, events);
                }
            },
        )?;
        debouncer.watch(&project_root, RecursiveMode::Recursive)?;

        Ok(WatcherBridge {
            project_root,
            _debouncer: debouncer,
        })
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }
}

fn handle_event_batch(
    project_root: &Path,
    state: &SharedProjectState,
    sink: &Arc<dyn FileChangeSink>,
    events: Vec<notify_debouncer_full::DebouncedEvent>,
) {
    let mut guard = state.lock();
    let mut touched: Vec<String> = Vec::new();

    for event in events {
        for path in &event.paths {
            let Some(relative) = to_relative_indexable(project_root, path) else {
                continue;
            };

            let is_delete = matches!(event.kind, notify::EventKind::Remove(_));
            let changed = if is_delete || !path.exists() {
                if guard.tree.get(&relative).is_some() {
                    guard.tree.remove_leaf(&relative);
                    true
                } else {
                    false
                }
            } else {
                match std::fs::read(path) {
                    Ok(bytes) => {
                        let digest = file_digest(&relative, &bytes);
                        matches!(guard.tree.update_leaf(&relative, digest), LeafUpdate::Changed(_))
                    }
                    Err(_) => false,
                }
            };

            if changed {
                guard.dirty.mark(&relative);
                touched.push(relative);
            }
        }
    }

    if !touched.is_empty() {
        let _ = guard.persist_tree();
        let _ = guard.persist_dirty();
        let new_root = guard.tree.root();
        drop(guard);
        sink.on_files_changed(&touched, new_root);
    }
}

fn to_relative_indexable(project_root: &Path, abs_path: &Path) -> Option<String> {
    let ext = abs_path.extension()?.to_str()?;
    if !is_supported_extension(ext) {
        return None;
    }
    let relative = abs_path.strip_prefix(project_root).ok()?;
    if relative
        .components()
        .any(|c| c.as_os_str() == crate::project::CONFIG_DIR_NAME)
    {
        return None;
    }
    Some(to_forward_slash(relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn to_relative_indexable_rejects_unsupported_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.bin");
        assert!(to_relative_indexable(dir.path(), &path).is_none());
    }

    #[test]
    fn to_relative_indexable_rejects_config_dir() {
        let dir = tempdir().unwrap();
        let path = dir
            .path()
            .join(crate::project::CONFIG_DIR_NAME)
            .join("merkle-state.json");
        assert!(to_relative_indexable(dir.path(), &path).is_none());
    }

    #[test]
    fn to_relative_indexable_normalizes_supported_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("src").join("a.rs");
        assert_eq!(
            to_relative_indexable(dir.path(), &path),
            Some("src/a.rs".to_string())
        );
    }
}
