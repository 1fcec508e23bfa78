//! Embedding cache (C9): tenant-agnostic, content-addressed store from
//! chunk hash to `{summary, embedding}`. Keyed by hash alone — two tenants
//! that write the same key write the same bytes, so a racy write-write is
//! safe (§5 "Cache coherence across tenants").

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingCacheEntry {
    pub summary: String,
    pub embedding: Vec<f32>,
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,
}

/// Content-addressed cache shared across every tenant. Renewed on access so
/// actively-used entries don't expire out from under a busy project.
pub struct EmbeddingCache {
    entries: DashMap<String, EmbeddingCacheEntry>,
    ttl: Duration,
    path: PathBuf,
}

impl EmbeddingCache {
    /// `ttl_days` matches §4.9 step 5's "renewal TTL (e.g. 7-14 days)".
    pub fn load_or_create(path: PathBuf, ttl_days: i64) -> AppResult<Self> {
        let entries = if path.exists() {
            let bytes = std::fs::read(&path)?;
            serde_json::from_slice::<Vec<(String, EmbeddingCacheEntry)>>(&bytes)
                .unwrap_or_default()
                .into_iter()
                .collect()
        } else {
            DashMap::new()
        };
        Ok(EmbeddingCache {
            entries,
            ttl: Duration::days(ttl_days),
            path,
        })
    }

    /// Look up a hash, skipping (and dropping) an entry past its TTL. A hit
    /// renews the TTL so hot entries stay warm.
    pub fn get(&self, hash: &str) -> Option<(String, Vec<f32>)> {
        let now = Utc::now();
        let hit = {
            let mut entry = self.entries.get_mut(hash)?;
            if entry.expires_at < now {
                None
            } else {
                entry.expires_at = now + self.ttl;
                Some((entry.summary.clone(), entry.embedding.clone()))
            }
        };
        if hit.is_none() {
            self.entries.remove(hash);
        }
        hit
    }

    pub fn contains_fresh(&self, hash: &str) -> bool {
        self.entries
            .get(hash)
            .map(|e| e.expires_at >= Utc::now())
            .unwrap_or(false)
    }

    /// Insert or overwrite. Zero-vector embeddings are never cached (§4.9
    /// step 5 / §7 "AI timeout").
    pub fn put(&self, hash: &str, summary: String, embedding: Vec<f32>) {
        if crate::server::ai::is_zero_vector(&embedding) {
            return;
        }
        self.entries.insert(
            hash.to_string(),
            EmbeddingCacheEntry {
                summary,
                embedding,
                expires_at: Utc::now() + self.ttl,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot the whole map to disk via write-temp-then-rename. Cheap
    /// enough at reference scale; a production cache would back this with a
    /// real KV store instead of a full-map dump.
    pub fn persist(&self) -> AppResult<()> {
        let snapshot: Vec<(String, EmbeddingCacheEntry)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        atomic_write_json(&self.path, &snapshot)
    }
}

fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> AppResult<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let tmp_path = path.with_extension(format!("tmp{nonce}"));
    let bytes = serde_json::to_vec(value)?;
    std::fs::write(&tmp_path, bytes)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let cache = EmbeddingCache::load_or_create(dir.path().join("cache.json"), 7).unwrap();
        cache.put("h1", "a summary".into(), vec![0.1, 0.2]);
        let (summary, embedding) = cache.get("h1").unwrap();
        assert_eq!(summary, "a summary");
        assert_eq!(embedding, vec![0.1, 0.2]);
    }

    #[test]
    fn zero_vector_is_never_cached() {
        let dir = tempdir().unwrap();
        let cache = EmbeddingCache::load_or_create(dir.path().join("cache.json"), 7).unwrap();
        cache.put("h1", "s".into(), vec![0.0, 0.0, 0.0]);
        assert!(cache.get("h1").is_none());
    }

    #[test]
    fn miss_on_unknown_hash() {
        let dir = tempdir().unwrap();
        let cache = EmbeddingCache::load_or_create(dir.path().join("cache.json"), 7).unwrap();
        assert!(cache.get("missing").is_none());
    }

    #[test]
    fn persists_and_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let cache = EmbeddingCache::load_or_create(path.clone(), 7).unwrap();
        cache.put("h1", "s".into(), vec![1.0, 2.0]);
        cache.persist().unwrap();

        let reloaded = EmbeddingCache::load_or_create(path, 7).unwrap();
        let (summary, embedding) = reloaded.get("h1").unwrap();
        assert_eq!(summary, "s");
        assert_eq!(embedding, vec![1.0, 2.0]);
    }

    #[test]
    fn expired_entry_is_dropped_on_access() {
        let dir = tempdir().unwrap();
        let cache = EmbeddingCache::load_or_create(dir.path().join("cache.json"), 0).unwrap();
        cache.put("h1", "s".into(), vec![1.0]);
        // TTL of 0 days means `expires_at` is effectively `now`; allow a
        // moment to pass so the entry is definitely expired.
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(cache.get("h1").is_none());
    }
}
