//! Set of paths known to differ from the last acknowledged sync (C4).
//!
//! Membership means "this file changed locally since `lastSync`." Both
//! creation/modification and deletion mark; the queue never inspects file
//! bodies, only relative paths.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirtyQueue {
    #[serde(rename = "lastSync")]
    pub last_sync: DateTime<Utc>,
    #[serde(rename = "dirtyFiles")]
    dirty_files: BTreeSet<String>,
}

impl Default for DirtyQueue {
    fn default() -> Self {
        DirtyQueue {
            last_sync: Utc::now(),
            dirty_files: BTreeSet::new(),
        }
    }
}

impl DirtyQueue {
    pub fn mark(&mut self, relative_path: &str) {
        self.dirty_files.insert(relative_path.to_string());
    }

    pub fn clear(&mut self, relative_path: &str) {
        self.dirty_files.remove(relative_path);
    }

    /// Drop every entry and record `now` as the new `lastSync`.
    pub fn clear_all(&mut self, now: DateTime<Utc>) {
        self.dirty_files.clear();
        self.last_sync = now;
    }

    pub fn is_empty(&self) -> bool {
        self.dirty_files.is_empty()
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.dirty_files.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.dirty_files.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_then_snapshot_contains_path() {
        let mut q = DirtyQueue::default();
        q.mark("a.ts");
        assert_eq!(q.snapshot(), vec!["a.ts".to_string()]);
    }

    #[test]
    fn clear_removes_single_entry() {
        let mut q = DirtyQueue::default();
        q.mark("a.ts");
        q.mark("b.ts");
        q.clear("a.ts");
        assert_eq!(q.snapshot(), vec!["b.ts".to_string()]);
    }

    #[test]
    fn clear_all_empties_queue_and_bumps_last_sync() {
        let mut q = DirtyQueue::default();
        q.mark("a.ts");
        let now = Utc::now();
        q.clear_all(now);
        assert!(q.is_empty());
        assert_eq!(q.last_sync, now);
    }

    #[test]
    fn marking_same_path_twice_is_idempotent() {
        let mut q = DirtyQueue::default();
        q.mark("a.ts");
        q.mark("a.ts");
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn snapshot_is_lexicographically_ordered() {
        let mut q = DirtyQueue::default();
        q.mark("z.ts");
        q.mark("a.ts");
        q.mark("m.ts");
        assert_eq!(
            q.snapshot(),
            vec!["a.ts".to_string(), "m.ts".to_string(), "z.ts".to_string()]
        );
    }
}
