//! Server-side reconciliation core (C8): persists each project's accepted
//! Merkle root, and turns incoming chunks into cache lookups, AI calls, and
//! vector upserts per the two-phase protocol (§4.9).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;
use crate::protocol::{ChunkMetadataWire, ChunkWithCodeWire};
use crate::server::ai::{is_zero_vector, Embedder, Summarizer};
use crate::server::cache::EmbeddingCache;
use crate::server::vector::{composite_id, ChunkMetadataRecord, VectorStore};

/// `(userId, projectId) -> last accepted merkle root`. Persisted so a
/// restarted server still knows what it last saw for `/v1/index/check` and
/// the sync phase-1 comparison (§4.8's "root store").
pub struct RootStore {
    roots: DashMap<(String, Uuid), String>,
    path: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct RootEntry {
    user_id: String,
    project_id: Uuid,
    root: String,
}

impl RootStore {
    pub fn load_or_create(path: PathBuf) -> AppResult<Self> {
        let roots = if path.exists() {
            let bytes = std::fs::read(&path)?;
            let entries: Vec<RootEntry> = serde_json::from_slice(&bytes).unwrap_or_default();
            entries
                .into_iter()
                .map(|e| ((e.user_id, e.project_id), e.root))
                .collect()
        } else {
            DashMap::new()
        };
        Ok(RootStore { roots, path })
    }

    pub fn get(&self, user_id: &str, project_id: Uuid) -> Option<String> {
        self.roots
            .get(&(user_id.to_string(), project_id))
            .map(|r| r.clone())
    }

    pub fn set(&self, user_id: &str, project_id: Uuid, root: String) -> AppResult<()> {
        self.roots.insert((user_id.to_string(), project_id), root);
        self.persist()
    }

    fn persist(&self) -> AppResult<()> {
        let entries: Vec<RootEntry> = self
            .roots
            .iter()
            .map(|r| RootEntry {
                user_id: r.key().0.clone(),
                project_id: r.key().1,
                root: r.value().clone(),
            })
            .collect();
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(&entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Outcome of running a batch of chunks with code through cache lookup, AI,
/// and vector upsert. Shared by `/v1/index/init` and sync phase 2.
pub struct ProcessOutcome {
    pub received: Vec<String>,
    pub ai_processed: usize,
    pub cache_hits: usize,
    pub vectors_stored: usize,
    pub ai_errors: usize,
}

pub struct Reconciler {
    pub roots: RootStore,
    pub cache: EmbeddingCache,
    pub vector_store: VectorStore,
    pub summarizer: Arc<dyn Summarizer>,
    pub embedder: Arc<dyn Embedder>,
    pub ai_timeout: Duration,
}

impl Reconciler {
    /// `/v1/index/sync` phase 1: metadata-only. For each chunk, serve the
    /// embedding out of cache if it's fresh (opportunistically upserting it
    /// into the vector store under this tenant even though phase 2 never
    /// asked for it), and otherwise mark the hash as "needed" for phase 2.
    pub fn phase1(
        &self,
        user_id: &str,
        project_id: Uuid,
        chunks: &[ChunkMetadataWire],
    ) -> AppResult<(Vec<String>, usize, usize)> {
        let mut needed = Vec::new();
        let mut vectorized = 0usize;
        let mut cache_hits = 0usize;

        for chunk in chunks {
            match self.cache.get(&chunk.hash) {
                Some((summary, embedding)) => {
                    cache_hits += 1;
                    let id = composite_id(user_id, &project_id.to_string(), &chunk.hash);
                    let meta = ChunkMetadataRecord {
                        user_id: user_id.to_string(),
                        project_id: project_id.to_string(),
                        summary,
                        kind: chunk.kind.clone(),
                        name: chunk.name.clone(),
                        language_id: chunk.language_id.clone(),
                        line_start: chunk.lines[0],
                        line_end: chunk.lines[1],
                        char_count: chunk.char_count,
                        file_path: chunk.file_path.clone(),
                    };
                    self.vector_store
                        .upsert(&id, &chunk.hash, &embedding, meta)?;
                    vectorized += 1;
                }
                None => needed.push(chunk.hash.clone()),
            }
        }

        Ok((needed, vectorized, cache_hits))
    }

    /// Shared by `/v1/index/init` and sync phase 2: for every chunk not
    /// already fresh in cache, summarize + embed (racing the configured
    /// timeout), cache the result, and upsert into the vector store. Chunks
    /// already cached skip straight to an upsert using the cached embedding.
    pub async fn process_chunks_with_code(
        &self,
        user_id: &str,
        project_id: Uuid,
        chunks: &[ChunkWithCodeWire],
    ) -> AppResult<ProcessOutcome> {
        let mut received = Vec::with_capacity(chunks.len());
        let mut cache_hits = 0usize;
        let mut ai_processed = 0usize;
        let mut ai_errors = 0usize;
        let mut vectors_stored = 0usize;

        let mut to_compute: Vec<&ChunkWithCodeWire> = Vec::new();
        for chunk in chunks {
            received.push(chunk.meta.hash.clone());
            if self.cache.contains_fresh(&chunk.meta.hash) {
                cache_hits += 1;
                if let Some((summary, embedding)) = self.cache.get(&chunk.meta.hash) {
                    self.upsert_from_parts(user_id, project_id, &chunk.meta, summary, embedding)?;
                    vectors_stored += 1;
                }
            } else {
                to_compute.push(chunk);
            }
        }

        if !to_compute.is_empty() {
            let pairs: Vec<(&str, &str)> = to_compute
                .iter()
                .map(|c| (c.meta.hash.as_str(), c.code.as_str()))
                .collect();
            let texts: Vec<String> = to_compute.iter().map(|c| c.code.clone()).collect();

            let summarize_fut = self.summarizer.summarize_batch(&pairs);
            let embed_fut = self.embedder.embed_batch(&texts);

            let timed = tokio::time::timeout(self.ai_timeout, async {
                tokio::try_join!(summarize_fut, embed_fut)
            })
            .await;

            match timed {
                Ok(Ok((summaries, embeddings))) if summaries.len() == to_compute.len()
                    && embeddings.len() == to_compute.len() =>
                {
                    for ((chunk, summary), embedding) in
                        to_compute.iter().zip(summaries).zip(embeddings)
                    {
                        // A zero or wrong-dimension embedding means "AI failed
                        // for this item" (§4.9 step 4): `cache.put`/
                        // `vector_store.upsert` would silently drop it, so it
                        // must not be counted as processed/stored either.
                        if is_zero_vector(&embedding) || embedding.len() != self.vector_store.dimension() {
                            tracing::warn!(hash = %chunk.meta.hash, "dropping degenerate embedding");
                            ai_errors += 1;
                            continue;
                        }
                        self.cache
                            .put(&chunk.meta.hash, summary.clone(), embedding.clone());
                        self.upsert_from_parts(
                            user_id,
                            project_id,
                            &chunk.meta,
                            summary,
                            embedding,
                        )?;
                        ai_processed += 1;
                        vectors_stored += 1;
                    }
                }
                Ok(Ok(_)) => {
                    tracing::warn!("AI batch returned mismatched length, dropping batch");
                    ai_errors += to_compute.len();
                }
                Ok(Err(e)) => {
                    tracing::warn!("AI batch failed: {e}");
                    ai_errors += to_compute.len();
                }
                Err(_) => {
                    tracing::warn!(
                        timeout_secs = self.ai_timeout.as_secs(),
                        "AI batch timed out"
                    );
                    ai_errors += to_compute.len();
                }
            }
        }

        self.vector_store.save()?;
        self.cache.persist()?;

        Ok(ProcessOutcome {
            received,
            ai_processed,
            cache_hits,
            vectors_stored,
            ai_errors,
        })
    }

    fn upsert_from_parts(
        &self,
        user_id: &str,
        project_id: Uuid,
        meta: &ChunkMetadataWire,
        summary: String,
        embedding: Vec<f32>,
    ) -> AppResult<()> {
        let id = composite_id(user_id, &project_id.to_string(), &meta.hash);
        let record = ChunkMetadataRecord {
            user_id: user_id.to_string(),
            project_id: project_id.to_string(),
            summary,
            kind: meta.kind.clone(),
            name: meta.name.clone(),
            language_id: meta.language_id.clone(),
            line_start: meta.lines[0],
            line_end: meta.lines[1],
            char_count: meta.char_count,
            file_path: meta.file_path.clone(),
        };
        self.vector_store.upsert(&id, &meta.hash, &embedding, record)
    }

    pub fn search(
        &self,
        user_id: &str,
        project_id: Uuid,
        query_vec: &[f32],
        top_k: usize,
    ) -> AppResult<Vec<(String, f32, ChunkMetadataRecord)>> {
        self.vector_store
            .search(user_id, &project_id.to_string(), query_vec, top_k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ai::HeuristicSummarizer;
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct FixedEmbedder {
        dim: usize,
        value: f32,
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn dimension(&self) -> usize {
            self.dim
        }
        async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![self.value; self.dim]).collect())
        }
    }

    fn reconciler(dir: &std::path::Path) -> Reconciler {
        reconciler_with_embedder(dir, 0.5)
    }

    fn reconciler_with_embedder(dir: &std::path::Path, value: f32) -> Reconciler {
        Reconciler {
            roots: RootStore::load_or_create(dir.join("roots.json")).unwrap(),
            cache: EmbeddingCache::load_or_create(dir.join("cache.json"), 7).unwrap(),
            vector_store: VectorStore::load_or_create(&dir.join("vectors"), 4).unwrap(),
            summarizer: Arc::new(HeuristicSummarizer::new()),
            embedder: Arc::new(FixedEmbedder { dim: 4, value }),
            ai_timeout: Duration::from_secs(5),
        }
    }

    fn meta_wire(hash: &str) -> ChunkMetadataWire {
        ChunkMetadataWire {
            hash: hash.to_string(),
            kind: "function".to_string(),
            name: Some("f".to_string()),
            language_id: "rust".to_string(),
            lines: [1, 3],
            char_count: 20,
            file_path: "a.rs".to_string(),
        }
    }

    #[test]
    fn phase1_reports_all_as_needed_when_cache_empty() {
        let dir = tempdir().unwrap();
        let r = reconciler(dir.path());
        let chunks = vec![meta_wire("h1"), meta_wire("h2")];
        let (needed, vectorized, hits) =
            r.phase1("u1", Uuid::new_v4(), &chunks).unwrap();
        assert_eq!(needed.len(), 2);
        assert_eq!(vectorized, 0);
        assert_eq!(hits, 0);
    }

    #[tokio::test]
    async fn process_then_phase1_serves_from_cache() {
        let dir = tempdir().unwrap();
        let r = reconciler(dir.path());
        let project_id = Uuid::new_v4();
        let chunk = ChunkWithCodeWire {
            meta: meta_wire("h1"),
            code: "fn f() {}".to_string(),
        };
        let outcome = r
            .process_chunks_with_code("u1", project_id, &[chunk])
            .await
            .unwrap();
        assert_eq!(outcome.ai_processed, 1);
        assert_eq!(outcome.vectors_stored, 1);
        assert_eq!(outcome.ai_errors, 0);

        let (needed, vectorized, hits) =
            r.phase1("u1", project_id, &[meta_wire("h1")]).unwrap();
        assert!(needed.is_empty());
        assert_eq!(vectorized, 1);
        assert_eq!(hits, 1);
    }

    /// §4.9 step 4 / correctness property 5: a zero embedding is "AI failed
    /// for this item" and must not be cached, upserted, or counted as
    /// processed/stored — it becomes an `ai_errors` tally instead.
    #[tokio::test]
    async fn zero_vector_embedding_is_not_counted_as_stored() {
        let dir = tempdir().unwrap();
        let r = reconciler_with_embedder(dir.path(), 0.0);
        let project_id = Uuid::new_v4();
        let chunk = ChunkWithCodeWire {
            meta: meta_wire("h1"),
            code: "fn f() {}".to_string(),
        };
        let outcome = r
            .process_chunks_with_code("u1", project_id, &[chunk])
            .await
            .unwrap();
        assert_eq!(outcome.ai_processed, 0);
        assert_eq!(outcome.vectors_stored, 0);
        assert_eq!(outcome.ai_errors, 1);

        // Not cached either, so a later phase-1 still reports it as needed.
        let (needed, vectorized, hits) =
            r.phase1("u1", project_id, &[meta_wire("h1")]).unwrap();
        assert_eq!(needed, vec!["h1".to_string()]);
        assert_eq!(vectorized, 0);
        assert_eq!(hits, 0);
    }

    #[tokio::test]
    async fn search_is_tenant_scoped_after_processing() {
        let dir = tempdir().unwrap();
        let r = reconciler(dir.path());
        let project_id = Uuid::new_v4();
        let chunk = ChunkWithCodeWire {
            meta: meta_wire("h1"),
            code: "fn f() {}".to_string(),
        };
        r.process_chunks_with_code("u1", project_id, &[chunk])
            .await
            .unwrap();

        let hits = r.search("u1", project_id, &[0.5, 0.5, 0.5, 0.5], 5).unwrap();
        assert_eq!(hits.len(), 1);

        let other_hits = r
            .search("other-user", project_id, &[0.5, 0.5, 0.5, 0.5], 5)
            .unwrap();
        assert!(other_hits.is_empty());
    }

    #[test]
    fn root_store_persists_across_reload() {
        let dir = tempdir().unwrap();
        let project_id = Uuid::new_v4();
        let path = dir.path().join("roots.json");
        {
            let store = RootStore::load_or_create(path.clone()).unwrap();
            store.set("u1", project_id, "abc123".to_string()).unwrap();
        }
        let reloaded = RootStore::load_or_create(path).unwrap();
        assert_eq!(reloaded.get("u1", project_id), Some("abc123".to_string()));
    }
}
