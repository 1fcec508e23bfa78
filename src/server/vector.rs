//! Vector store adapter (C10): tenant-scoped upsert/query over a single
//! shared HNSW index, the same `usearch` backend the teacher uses for its
//! own per-workspace semantic search, but with tenant isolation done at the
//! metadata-filter layer rather than by index-per-tenant (§4.10 — "the ID
//! prefix is a distribution hint, not a trust boundary").

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use usearch::ffi::{IndexOptions, MetricKind, ScalarKind};

use crate::error::{AppError, AppResult};
use crate::hash::short_hex;
use crate::server::ai::is_zero_vector;

/// Per-vector metadata stored beside the embedding (§3 `ChunkMetadata`,
/// server-side variant, plus the cached `summary`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadataRecord {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "projectId")]
    pub project_id: String,
    pub summary: String,
    pub kind: String,
    pub name: Option<String>,
    #[serde(rename = "languageId")]
    pub language_id: String,
    #[serde(rename = "lineStart")]
    pub line_start: usize,
    #[serde(rename = "lineEnd")]
    pub line_end: usize,
    #[serde(rename = "charCount")]
    pub char_count: u64,
    #[serde(rename = "filePath")]
    pub file_path: String,
}

struct PersistedRecord {
    composite_id: String,
    hash: String,
    meta: ChunkMetadataRecord,
}

/// Build the composite vector ID from §4.10 / GLOSSARY: two 8-hex tenant
/// prefixes plus the first 16 hex characters of the chunk hash. The 16-hex
/// truncation is the source's own choice (§9 Open Questions allows widening
/// to 24 without breaking the ID budget; 16 is kept here to match it).
pub fn composite_id(user_id: &str, project_id: &str, chunk_hash: &str) -> String {
    format!(
        "{}_{}_{}",
        short_hex(user_id, 8),
        short_hex(project_id, 8),
        &chunk_hash[..16.min(chunk_hash.len())]
    )
}

struct Inner {
    index: usearch::Index,
    /// composite id -> usearch key
    ids: DashMap<String, u64>,
    /// usearch key -> (composite id, chunk hash, metadata)
    records: DashMap<u64, PersistedRecord>,
    next_key: AtomicU64,
}

pub struct VectorStore {
    inner: RwLock<Inner>,
    dim: usize,
    index_path: PathBuf,
    meta_path: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct MetaFileEntry {
    key: u64,
    composite_id: String,
    hash: String,
    meta: ChunkMetadataRecord,
}

impl VectorStore {
    pub fn load_or_create(base_dir: &Path, dim: usize) -> AppResult<Self> {
        std::fs::create_dir_all(base_dir)?;
        let index_path = base_dir.join("vectors.usearch");
        let meta_path = base_dir.join("vectors-meta.json");

        let options = IndexOptions {
            dimensions: dim,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F16,
            connectivity: 16,
            expansion_add: 128,
            expansion_search: 64,
            multi: false,
        };
        let index = usearch::Index::new(&options)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("vector index init failed: {e}")))?;

        let ids = DashMap::new();
        let records = DashMap::new();
        let mut max_key = 0u64;

        if index_path.exists() && meta_path.exists() {
            if let Err(e) = index.load(index_path.to_string_lossy().as_ref()) {
                tracing::warn!("failed to load vector index, starting empty: {e}");
                index.reserve(65536).map_err(|e| {
                    AppError::Internal(anyhow::anyhow!("vector index reserve failed: {e}"))
                })?;
            } else if let Ok(bytes) = std::fs::read(&meta_path) {
                if let Ok(entries) = serde_json::from_slice::<Vec<MetaFileEntry>>(&bytes) {
                    for e in entries {
                        max_key = max_key.max(e.key + 1);
                        ids.insert(e.composite_id.clone(), e.key);
                        records.insert(
                            e.key,
                            PersistedRecord {
                                composite_id: e.composite_id,
                                hash: e.hash,
                                meta: e.meta,
                            },
                        );
                    }
                }
            }
        } else {
            index.reserve(65536).map_err(|e| {
                AppError::Internal(anyhow::anyhow!("vector index reserve failed: {e}"))
            })?;
        }

        Ok(VectorStore {
            inner: RwLock::new(Inner {
                index,
                ids,
                records,
                next_key: AtomicU64::new(max_key),
            }),
            dim,
            index_path,
            meta_path,
        })
    }

    /// Insert or overwrite the vector at `id`. Dropped with a warning if the
    /// embedding is all-zero (§4.10 zero-vector policy) or the wrong
    /// dimension.
    pub fn upsert(&self, id: &str, hash: &str, vector: &[f32], meta: ChunkMetadataRecord) -> AppResult<()> {
        if is_zero_vector(vector) {
            tracing::warn!(id, "dropping zero-vector upsert");
            return Ok(());
        }
        if vector.len() != self.dim {
            tracing::warn!(id, expected = self.dim, got = vector.len(), "dropping wrong-dimension vector");
            return Ok(());
        }

        let inner = self.inner.write();
        let key = match inner.ids.get(id) {
            Some(k) => *k,
            None => inner.next_key.fetch_add(1, Ordering::SeqCst),
        };
        // usearch has no in-place update; remove any stale vector under this
        // key before re-adding (a fresh key never existed, so removal is a
        // harmless no-op).
        let _ = inner.index.remove(key);
        inner
            .index
            .add(key, vector)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("vector upsert failed: {e}")))?;
        inner.ids.insert(id.to_string(), key);
        inner.records.insert(
            key,
            PersistedRecord {
                composite_id: id.to_string(),
                hash: hash.to_string(),
                meta,
            },
        );
        Ok(())
    }

    /// Tenant-filtered query: over-fetches (`≈3x topK`, capped) to absorb
    /// post-hoc filter loss, then truncates to `top_k` (§4.10).
    pub fn search(
        &self,
        user_id: &str,
        project_id: &str,
        query_vec: &[f32],
        top_k: usize,
    ) -> AppResult<Vec<(String, f32, ChunkMetadataRecord)>> {
        if is_zero_vector(query_vec) {
            tracing::warn!("dropping zero-vector search query");
            return Ok(Vec::new());
        }

        let inner = self.inner.read();
        if inner.records.is_empty() {
            return Ok(Vec::new());
        }

        let over_fetch = (top_k.saturating_mul(3)).clamp(top_k.max(1), 500);
        let result = inner
            .index
            .search(query_vec, over_fetch)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("vector search failed: {e}")))?;

        let mut hits = Vec::new();
        for (key, distance) in result.keys.iter().zip(result.distances.iter()) {
            let Some(record) = inner.records.get(key) else {
                continue;
            };
            if record.meta.user_id != user_id || record.meta.project_id != project_id {
                continue;
            }
            let score = 1.0 - distance;
            hits.push((record.hash.clone(), score, record.meta.clone()));
            if hits.len() >= top_k {
                break;
            }
        }
        Ok(hits)
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn save(&self) -> AppResult<()> {
        let inner = self.inner.read();
        inner
            .index
            .save(self.index_path.to_string_lossy().as_ref())
            .map_err(|e| AppError::Internal(anyhow::anyhow!("vector index save failed: {e}")))?;

        let entries: Vec<MetaFileEntry> = inner
            .records
            .iter()
            .map(|r| MetaFileEntry {
                key: *r.key(),
                composite_id: r.value().composite_id.clone(),
                hash: r.value().hash.clone(),
                meta: r.value().meta.clone(),
            })
            .collect();
        let bytes = serde_json::to_vec(&entries)?;
        let tmp = self.meta_path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.meta_path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn meta(user: &str, project: &str) -> ChunkMetadataRecord {
        ChunkMetadataRecord {
            user_id: user.to_string(),
            project_id: project.to_string(),
            summary: "a fn".to_string(),
            kind: "function".to_string(),
            name: Some("f".to_string()),
            language_id: "rust".to_string(),
            line_start: 1,
            line_end: 3,
            char_count: 40,
            file_path: "a.rs".to_string(),
        }
    }

    #[test]
    fn composite_id_has_three_underscored_parts() {
        let id = composite_id("user-a", "project-a", &"ab".repeat(32));
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 16);
    }

    #[test]
    fn upsert_then_search_returns_match() {
        let dir = tempdir().unwrap();
        let store = VectorStore::load_or_create(dir.path(), 4).unwrap();
        let id = composite_id("u1", "p1", &"a".repeat(64));
        store.upsert(&id, &"a".repeat(64), &[1.0, 0.0, 0.0, 0.0], meta("u1", "p1")).unwrap();

        let hits = store.search("u1", "p1", &[1.0, 0.0, 0.0, 0.0], 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "a".repeat(64));
    }

    #[test]
    fn search_is_tenant_isolated() {
        let dir = tempdir().unwrap();
        let store = VectorStore::load_or_create(dir.path(), 4).unwrap();
        let id = composite_id("tenant-a", "p1", &"b".repeat(64));
        store.upsert(&id, &"b".repeat(64), &[1.0, 0.0, 0.0, 0.0], meta("tenant-a", "p1")).unwrap();

        let hits = store.search("tenant-b", "p1", &[1.0, 0.0, 0.0, 0.0], 5).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn zero_vector_upsert_is_dropped() {
        let dir = tempdir().unwrap();
        let store = VectorStore::load_or_create(dir.path(), 4).unwrap();
        let id = composite_id("u1", "p1", &"c".repeat(64));
        store.upsert(&id, &"c".repeat(64), &[0.0, 0.0, 0.0, 0.0], meta("u1", "p1")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn re_upsert_same_id_overwrites_not_duplicates() {
        let dir = tempdir().unwrap();
        let store = VectorStore::load_or_create(dir.path(), 4).unwrap();
        let id = composite_id("u1", "p1", &"d".repeat(64));
        store.upsert(&id, &"d".repeat(64), &[1.0, 0.0, 0.0, 0.0], meta("u1", "p1")).unwrap();
        store.upsert(&id, &"d".repeat(64), &[0.0, 1.0, 0.0, 0.0], meta("u1", "p1")).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn persists_and_reloads() {
        let dir = tempdir().unwrap();
        let id = composite_id("u1", "p1", &"e".repeat(64));
        {
            let store = VectorStore::load_or_create(dir.path(), 4).unwrap();
            store.upsert(&id, &"e".repeat(64), &[1.0, 0.0, 0.0, 0.0], meta("u1", "p1")).unwrap();
            store.save().unwrap();
        }
        let reloaded = VectorStore::load_or_create(dir.path(), 4).unwrap();
        assert_eq!(reloaded.len(), 1);
        let hits = reloaded.search("u1", "p1", &[1.0, 0.0, 0.0, 0.0], 5).unwrap();
        assert_eq!(hits.len(), 1);
    }
}
