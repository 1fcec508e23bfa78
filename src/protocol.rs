//! Wire protocol (§6): JSON request/response shapes shared verbatim by the
//! sync client (`sync::client`) and the server handlers (`server`). Keeping
//! one definition on each side of the HTTP boundary means a field rename
//! can't silently drift between the two.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Chunk metadata only — no code. Used by phase 1 of `/v1/index/sync`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadataWire {
    pub hash: String,
    pub kind: String,
    pub name: Option<String>,
    #[serde(rename = "languageId")]
    pub language_id: String,
    /// `[lineStart, lineEnd]`, 1-indexed, end-inclusive.
    pub lines: [usize; 2],
    #[serde(rename = "charCount")]
    pub char_count: u64,
    #[serde(rename = "filePath")]
    pub file_path: String,
}

/// Chunk metadata plus its source text. Used by `/v1/index/init` and phase 2
/// of `/v1/index/sync`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkWithCodeWire {
    #[serde(flatten)]
    pub meta: ChunkMetadataWire,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexInitRequest {
    #[serde(rename = "projectId")]
    pub project_id: Uuid,
    #[serde(rename = "merkleRoot")]
    pub merkle_root: String,
    pub chunks: Vec<ChunkWithCodeWire>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexInitResponse {
    /// `"indexed"` or `"partial"`.
    pub status: String,
    #[serde(rename = "merkleRoot")]
    pub merkle_root: String,
    #[serde(rename = "chunksReceived")]
    pub chunks_received: usize,
    #[serde(rename = "aiProcessed")]
    pub ai_processed: usize,
    #[serde(rename = "cacheHits")]
    pub cache_hits: usize,
    #[serde(rename = "vectorsStored")]
    pub vectors_stored: usize,
    #[serde(rename = "aiErrors", skip_serializing_if = "Option::is_none")]
    pub ai_errors: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexCheckRequest {
    #[serde(rename = "projectId")]
    pub project_id: Uuid,
    #[serde(rename = "merkleRoot")]
    pub merkle_root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexCheckResponse {
    pub changed: bool,
    #[serde(rename = "serverRoot")]
    pub server_root: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPhase1Request {
    /// Always `1`; kept as a plain field (rather than a serde tag) because the
    /// server dispatches on it before it knows which payload shape to expect.
    pub phase: u8,
    #[serde(rename = "projectId")]
    pub project_id: Uuid,
    #[serde(rename = "merkleRoot")]
    pub merkle_root: String,
    pub chunks: Vec<ChunkMetadataWire>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPhase1Response {
    pub needed: Vec<String>,
    pub vectorized: usize,
    #[serde(rename = "cacheHits")]
    pub cache_hits: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPhase2Request {
    /// Always `2`.
    pub phase: u8,
    #[serde(rename = "projectId")]
    pub project_id: Uuid,
    #[serde(rename = "merkleRoot")]
    pub merkle_root: String,
    pub chunks: Vec<ChunkWithCodeWire>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPhase2Response {
    /// `"stored"` or `"partial"`.
    pub status: String,
    pub received: Vec<String>,
    #[serde(rename = "merkleRoot")]
    pub merkle_root: String,
    #[serde(rename = "aiProcessed")]
    pub ai_processed: usize,
    #[serde(rename = "cacheHits")]
    pub cache_hits: usize,
    #[serde(rename = "vectorsStored")]
    pub vectors_stored: usize,
    pub message: String,
    #[serde(rename = "aiErrors", skip_serializing_if = "Option::is_none")]
    pub ai_errors: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(rename = "projectId")]
    pub project_id: Uuid,
    #[serde(rename = "topK")]
    pub top_k: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultWire {
    pub hash: String,
    pub score: f32,
    pub summary: String,
    pub kind: String,
    pub name: Option<String>,
    #[serde(rename = "languageId")]
    pub language_id: String,
    pub lines: [usize; 2],
    #[serde(rename = "filePath")]
    pub file_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResultWire>,
    pub query: String,
    pub took: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
}
