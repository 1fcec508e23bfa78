//! Whole-project content digest (C3).
//!
//! An ordered list of `(relativePath, fileHash)` leaves is paired left-to-right
//! at every level; an odd trailing node is promoted unchanged rather than
//! hashed with itself, so appending one file only touches O(log N) ancestors.
//! The root is a pure function of the lex-sorted leaf sequence — nothing here
//! depends on wall-clock time or traversal order.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::hash::{file_digest, pair_digest, Digest};

/// One leaf: a relative path and the digest of its current content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLeaf {
    #[serde(rename = "relativePath")]
    pub relative_path: String,
    #[serde(rename = "fileHash")]
    pub file_hash: Digest,
}

/// Result of a single-leaf mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafUpdate {
    /// The recomputed hash matches what was already stored; nothing changed.
    Unchanged,
    /// The leaf was inserted or its hash changed; carries the new root.
    Changed(Digest),
}

/// Directories that `rebuildFromScan` always excludes, regardless of the
/// extension allow-list, plus the project's own config directory.
const ALWAYS_EXCLUDED_DIRS: &[&str] = &["node_modules", ".git", "dist", "build"];

/// Ordered leaves and their pairwise-hashed root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleTree {
    leaves: Vec<FileLeaf>,
    root: Digest,
}

impl Default for MerkleTree {
    fn default() -> Self {
        MerkleTree {
            leaves: Vec::new(),
            root: Digest::EMPTY,
        }
    }
}

impl MerkleTree {
    pub fn root(&self) -> Digest {
        self.root
    }

    pub fn leaves(&self) -> &[FileLeaf] {
        &self.leaves
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    fn find(&self, relative_path: &str) -> Result<usize, usize> {
        self.leaves
            .binary_search_by(|l| l.relative_path.as_str().cmp(relative_path))
    }

    /// Recompute the root from the current leaf sequence: pair (L, R) -> H(L||R)
    /// at each level, promoting an unpaired trailing node unchanged.
    fn recompute_root(&mut self) {
        if self.leaves.is_empty() {
            self.root = Digest::EMPTY;
            return;
        }
        let mut level: Vec<Digest> = self.leaves.iter().map(|l| l.file_hash).collect();
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            let mut i = 0;
            while i < level.len() {
                if i + 1 < level.len() {
                    next.push(pair_digest(&level[i], &level[i + 1]));
                    i += 2;
                } else {
                    next.push(level[i]);
                    i += 1;
                }
            }
            level = next;
        }
        self.root = level[0];
    }

    /// Insert or update a leaf's hash, maintaining lexicographic order.
    /// Returns `Unchanged` if the recomputed hash equals the stored one.
    pub fn update_leaf(&mut self, relative_path: &str, file_hash: Digest) -> LeafUpdate {
        match self.find(relative_path) {
            Ok(idx) => {
                if self.leaves[idx].file_hash == file_hash {
                    return LeafUpdate::Unchanged;
                }
                self.leaves[idx].file_hash = file_hash;
            }
            Err(idx) => {
                self.leaves.insert(
                    idx,
                    FileLeaf {
                        relative_path: relative_path.to_string(),
                        file_hash,
                    },
                );
            }
        }
        self.recompute_root();
        LeafUpdate::Changed(self.root)
    }

    /// Remove a leaf. Returns the new root (empty digest if no leaves remain).
    /// A no-op removal still returns the (unchanged) current root.
    pub fn remove_leaf(&mut self, relative_path: &str) -> Digest {
        if let Ok(idx) = self.find(relative_path) {
            self.leaves.remove(idx);
            self.recompute_root();
        }
        self.root
    }

    pub fn get(&self, relative_path: &str) -> Option<&FileLeaf> {
        self.find(relative_path).ok().map(|idx| &self.leaves[idx])
    }

    /// Full rescan of `root_dir`, hashing every file whose extension is in
    /// `extensions` and which isn't under an always-excluded or ignored
    /// directory. `config_dir_name` (the project's hidden config directory)
    /// is excluded as well so the tree never hashes its own metadata.
    pub fn rebuild_from_scan(
        root_dir: &Path,
        extensions: &[&str],
        config_dir_name: &str,
    ) -> std::io::Result<MerkleTree> {
        let walker = WalkBuilder::new(root_dir)
            .hidden(false)
            .git_ignore(true)
            .git_exclude(true)
            .build();

        let mut candidates: Vec<(PathBuf, String)> = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let path = entry.path();

            if path.components().any(|c| {
                let s = c.as_os_str().to_string_lossy();
                ALWAYS_EXCLUDED_DIRS.contains(&s.as_ref()) || s == config_dir_name
            }) {
                continue;
            }

            let ext_ok = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| extensions.iter().any(|allowed| allowed.trim_start_matches('.') == e))
                .unwrap_or(false);
            if !ext_ok {
                continue;
            }

            let relative_path = match path.strip_prefix(root_dir) {
                Ok(p) => to_forward_slash(p),
                Err(_) => continue,
            };

            candidates.push((path.to_path_buf(), relative_path));
        }

        // Hashing every file is the expensive part of a full rescan; the walk
        // above is cheap metadata-only I/O, so only the read+hash step is
        // worth handing to rayon.
        let mut leaves: Vec<FileLeaf> = candidates
            .par_iter()
            .filter_map(|(path, relative_path)| {
                let bytes = std::fs::read(path).ok()?;
                Some(FileLeaf {
                    relative_path: relative_path.clone(),
                    file_hash: file_digest(relative_path, &bytes),
                })
            })
            .collect();

        leaves.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        let mut tree = MerkleTree {
            leaves,
            root: Digest::EMPTY,
        };
        tree.recompute_root();
        Ok(tree)
    }
}

/// Normalize a path to a forward-slash-separated string, independent of the
/// host OS's native separator.
pub fn to_forward_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::file_digest;

    fn leaf(path: &str, content: &[u8]) -> (String, Digest) {
        (path.to_string(), file_digest(path, content))
    }

    #[test]
    fn empty_tree_root_is_empty_digest() {
        let tree = MerkleTree::default();
        assert_eq!(tree.root(), Digest::EMPTY);
    }

    #[test]
    fn single_leaf_root_is_the_leaf_hash() {
        let mut tree = MerkleTree::default();
        let (path, hash) = leaf("a.ts", b"export function f(){return 1}");
        tree.update_leaf(&path, hash);
        assert_eq!(tree.root(), hash);
    }

    #[test]
    fn two_leaves_root_is_pairwise_hash() {
        let mut tree = MerkleTree::default();
        let (p1, h1) = leaf("a.ts", b"body");
        let (p2, h2) = leaf("b.ts", b"body");
        tree.update_leaf(&p1, h1);
        tree.update_leaf(&p2, h2);
        assert_eq!(tree.root(), pair_digest(&h1, &h2));
    }

    #[test]
    fn odd_trailing_node_is_promoted_not_self_hashed() {
        let mut tree = MerkleTree::default();
        let (p1, h1) = leaf("a.ts", b"1");
        let (p2, h2) = leaf("b.ts", b"2");
        let (p3, h3) = leaf("c.ts", b"3");
        tree.update_leaf(&p1, h1);
        tree.update_leaf(&p2, h2);
        tree.update_leaf(&p3, h3);
        let expected = pair_digest(&pair_digest(&h1, &h2), &h3);
        assert_eq!(tree.root(), expected);
    }

    #[test]
    fn update_with_identical_hash_is_unchanged() {
        let mut tree = MerkleTree::default();
        let (p, h) = leaf("a.ts", b"same");
        assert!(matches!(tree.update_leaf(&p, h), LeafUpdate::Changed(_)));
        assert_eq!(tree.update_leaf(&p, h), LeafUpdate::Unchanged);
    }

    #[test]
    fn remove_last_leaf_resets_to_empty_root() {
        let mut tree = MerkleTree::default();
        let (p, h) = leaf("a.ts", b"body");
        tree.update_leaf(&p, h);
        let root = tree.remove_leaf(&p);
        assert_eq!(root, Digest::EMPTY);
    }

    #[test]
    fn root_is_order_independent_of_insertion_sequence() {
        let (p1, h1) = leaf("a.ts", b"1");
        let (p2, h2) = leaf("b.ts", b"2");

        let mut t1 = MerkleTree::default();
        t1.update_leaf(&p1, h1);
        t1.update_leaf(&p2, h2);

        let mut t2 = MerkleTree::default();
        t2.update_leaf(&p2, h2);
        t2.update_leaf(&p1, h1);

        assert_eq!(t1.root(), t2.root());
    }

    #[test]
    fn rename_changes_root_because_path_is_salted() {
        let mut tree = MerkleTree::default();
        let (p1, h1) = leaf("a.ts", b"same body");
        tree.update_leaf(&p1, h1);
        let root_before = tree.root();

        let mut renamed = MerkleTree::default();
        let (p2, h2) = leaf("renamed.ts", b"same body");
        renamed.update_leaf(&p2, h2);

        assert_ne!(root_before, renamed.root());
    }

    #[test]
    fn leaves_stay_lexicographically_sorted() {
        let mut tree = MerkleTree::default();
        let (p1, h1) = leaf("z.ts", b"1");
        let (p2, h2) = leaf("a.ts", b"2");
        tree.update_leaf(&p1, h1);
        tree.update_leaf(&p2, h2);
        let paths: Vec<&str> = tree.leaves().iter().map(|l| l.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["a.ts", "z.ts"]);
    }
}
