//! Sync orchestrator (C7): the client-side state machine over
//! `{isNew, serverRoot, dirtyQueue}` that picks the minimal work path for
//! each scenario — first-open, reopen, live-edit, no-op (§4.7).

pub mod client;

use std::path::Path;

use uuid::Uuid;

use crate::chunker::{Chunk, Chunker};
use crate::config::{language_for_extension, AppConfig};
use crate::error::AppResult;
use crate::merkle::MerkleTree;
use crate::project::ProjectStore;
use crate::protocol::{ChunkMetadataWire, ChunkWithCodeWire};
use crate::sync::client::SyncClient;

/// Final tally reported after a sync tick, mirroring §7's
/// `{chunksTotal, chunksNeeded, chunksCached, message}`.
#[derive(Debug, Clone)]
pub struct SyncSummary {
    pub path_taken: SyncPath,
    pub chunks_total: usize,
    pub chunks_needed: usize,
    pub chunks_cached: usize,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPath {
    FullInit,
    NoOp,
    Incremental,
    Reopen,
}

pub struct SyncOrchestrator {
    project_root: std::path::PathBuf,
    project_id: Uuid,
    chunker: Chunker,
    client: SyncClient,
}

impl SyncOrchestrator {
    pub fn new(project_root: std::path::PathBuf, project_id: Uuid, config: &AppConfig, client: SyncClient) -> Self {
        SyncOrchestrator {
            project_root,
            project_id,
            chunker: Chunker::new(config.chunker.clone()),
            client,
        }
    }

    /// Run one sync tick against the current project state. `tree` and
    /// `dirty` are provided by the caller (shared with the watcher bridge,
    /// already seeded by the caller's initial directory walk — §4.5) and
    /// mutated only on success — any HTTP failure leaves the dirty queue
    /// untouched so the next tick retries (§4.7 Error policy).
    pub async fn tick(
        &mut self,
        tree: &mut MerkleTree,
        dirty: &mut crate::dirty::DirtyQueue,
    ) -> AppResult<SyncSummary> {
        if ProjectStore::is_new(&self.project_root) {
            return self.full_init(tree, dirty).await;
        }

        let local_root = tree.root().to_hex();
        let check = self.client.check(self.project_id, local_root.clone()).await?;

        match check.server_root {
            None => self.full_init(tree, dirty).await,
            Some(ref server_root) if *server_root == local_root => Ok(SyncSummary {
                path_taken: SyncPath::NoOp,
                chunks_total: 0,
                chunks_needed: 0,
                chunks_cached: 0,
                message: "up to date".to_string(),
            }),
            Some(_) if !dirty.is_empty() => {
                let paths = dirty.snapshot();
                self.two_phase_sync(tree, dirty, &paths, SyncPath::Incremental).await
            }
            Some(_) => {
                let paths: Vec<String> = tree.leaves().iter().map(|l| l.relative_path.clone()).collect();
                self.two_phase_sync(tree, dirty, &paths, SyncPath::Reopen).await
            }
        }
    }

    async fn full_init(
        &mut self,
        tree: &MerkleTree,
        dirty: &mut crate::dirty::DirtyQueue,
    ) -> AppResult<SyncSummary> {
        let paths: Vec<String> = tree.leaves().iter().map(|l| l.relative_path.clone()).collect();
        let chunks = self.chunk_files(&paths);
        let wire: Vec<ChunkWithCodeWire> = chunks
            .iter()
            .map(|(chunk, code)| to_wire_with_code(chunk, code))
            .collect();

        let response = self
            .client
            .init(self.project_id, tree.root().to_hex(), wire)
            .await?;

        dirty.clear_all(chrono::Utc::now());

        Ok(SyncSummary {
            path_taken: SyncPath::FullInit,
            chunks_total: response.chunks_received,
            chunks_needed: response.chunks_received - response.cache_hits,
            chunks_cached: response.cache_hits,
            message: format!("full init: {} chunks, status={}", response.chunks_received, response.status),
        })
    }

    async fn two_phase_sync(
        &mut self,
        tree: &MerkleTree,
        dirty: &mut crate::dirty::DirtyQueue,
        paths: &[String],
        path_taken: SyncPath,
    ) -> AppResult<SyncSummary> {
        let chunks = self.chunk_files(paths);
        let metadata_wire: Vec<ChunkMetadataWire> = chunks
            .iter()
            .map(|(chunk, _)| to_wire_metadata(chunk))
            .collect();

        let local_root = tree.root().to_hex();
        let phase1 = self
            .client
            .sync_phase1(self.project_id, local_root.clone(), metadata_wire)
            .await?;

        let needed: std::collections::HashSet<&str> = phase1.needed.iter().map(|s| s.as_str()).collect();
        let phase2_chunks: Vec<ChunkWithCodeWire> = chunks
            .iter()
            .filter(|(chunk, _)| needed.contains(chunk.hash.to_hex().as_str()))
            .map(|(chunk, code)| to_wire_with_code(chunk, code))
            .collect();

        // Issued even when empty so the server can commit the new root
        // (§4.7: "A phase-2 call with zero needed chunks is still issued").
        let response = self
            .client
            .sync_phase2(self.project_id, local_root, phase2_chunks)
            .await?;

        dirty.clear_all(chrono::Utc::now());

        Ok(SyncSummary {
            path_taken,
            chunks_total: chunks.len(),
            chunks_needed: phase1.needed.len(),
            chunks_cached: phase1.cache_hits,
            message: response.message,
        })
    }

    /// Read and chunk each path, skipping (and logging) any file that
    /// vanished or failed to chunk mid-run rather than aborting the whole
    /// tick (§4.7 Error policy: "Chunking failures on individual files are
    /// logged and skipped").
    fn chunk_files(&self, paths: &[String]) -> Vec<(Chunk, String)> {
        paths
            .iter()
            .filter_map(|relative_path| {
                let abs_path = self.project_root.join(relative_path);
                let source = match std::fs::read_to_string(&abs_path) {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!(path = %relative_path, error = %e, "skipping unreadable file during sync");
                        return None;
                    }
                };
                let language_id = extension_language_id(relative_path);
                let chunks = self
                    .chunker
                    .chunk_file(source.as_bytes(), language_id, relative_path);
                Some(
                    chunks
                        .into_iter()
                        .filter_map(|chunk| {
                            let code = slice_for_reference(&source, &chunk);
                            code.map(|c| (chunk, c))
                        })
                        .collect::<Vec<_>>(),
                )
            })
            .flatten()
            .collect()
    }
}

fn extension_language_id(relative_path: &str) -> Option<&'static str> {
    let ext = Path::new(relative_path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    language_for_extension(ext)
}

fn slice_for_reference(source: &str, chunk: &Chunk) -> Option<String> {
    source
        .get(chunk.reference.char_start..chunk.reference.char_end)
        .map(|s| s.to_string())
}

fn to_wire_metadata(chunk: &Chunk) -> ChunkMetadataWire {
    ChunkMetadataWire {
        hash: chunk.hash.to_hex(),
        kind: format!("{:?}", chunk.kind).to_lowercase(),
        name: chunk.name.clone(),
        language_id: chunk.language_id.clone(),
        lines: [chunk.reference.line_start, chunk.reference.line_end],
        char_count: chunk.char_count,
        file_path: chunk.reference.relative_path.clone(),
    }
}

fn to_wire_with_code(chunk: &Chunk, code: &str) -> ChunkWithCodeWire {
    ChunkWithCodeWire {
        meta: to_wire_metadata(chunk),
        code: code.to_string(),
    }
}
