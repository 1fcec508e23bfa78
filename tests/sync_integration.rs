//! End-to-end exercise of the sync orchestrator (C7) against a real,
//! in-process reconciliation server (C8/C9/C10) — the scenarios §8 calls out
//! by name: full init, idempotence (S1), incremental sync (S3), and reopen
//! recovery (S7). The embedder is swapped for a fixed in-memory stand-in so
//! the test never needs network access or a downloaded model; everything
//! else (routing, cache, vector store, merkle/dirty bookkeeping) is real.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::tempdir;
use tokio::net::TcpListener;

use codeindex::config::AppConfig;
use codeindex::error::AppResult;
use codeindex::hash::file_digest;
use codeindex::merkle::MerkleTree;
use codeindex::project::ProjectStore;
use codeindex::server::ai::{Embedder, HeuristicSummarizer};
use codeindex::server::cache::EmbeddingCache;
use codeindex::server::reconciler::{Reconciler, RootStore};
use codeindex::server::vector::VectorStore;
use codeindex::state::{AppState, ServerEvent};
use codeindex::sync::client::SyncClient;
use codeindex::sync::{SyncOrchestrator, SyncPath};

const DIM: usize = 4;

/// Deterministic stand-in embedder: every text maps to a fixed non-zero
/// vector so the reconciler's length/zero-vector checks stay meaningful
/// without needing a real model.
struct FixedEmbedder;

#[async_trait]
impl Embedder for FixedEmbedder {
    fn dimension(&self) -> usize {
        DIM
    }
    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![0.25, 0.5, 0.25, 0.5]).collect())
    }
}

async fn spawn_test_server(data_dir: &Path) -> String {
    let config = AppConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        data_dir: data_dir.to_string_lossy().to_string(),
        max_file_size_bytes: 10 * 1024 * 1024,
        watcher_debounce_ms: 300,
        sync_interval_secs: 600,
        ai_call_timeout_secs: 5,
        chunker: Default::default(),
    };

    let reconciler = Reconciler {
        roots: RootStore::load_or_create(data_dir.join("roots.json")).unwrap(),
        cache: EmbeddingCache::load_or_create(data_dir.join("cache.json"), 7).unwrap(),
        vector_store: VectorStore::load_or_create(&data_dir.join("vectors"), DIM).unwrap(),
        summarizer: Arc::new(HeuristicSummarizer::new()),
        embedder: Arc::new(FixedEmbedder),
        ai_timeout: Duration::from_secs(5),
    };

    let (event_tx, _rx) = tokio::sync::broadcast::channel::<ServerEvent>(1024);
    let state = AppState {
        config,
        reconciler: Arc::new(reconciler),
        event_tx,
    };

    let app = codeindex::server::create_app(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

fn write_file(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

#[tokio::test]
async fn full_init_then_idempotent_resync_then_incremental_edit() {
    let data_dir = tempdir().unwrap();
    let server_url = spawn_test_server(data_dir.path()).await;

    let project_dir = tempdir().unwrap();
    write_file(project_dir.path(), "a.rs", "fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n");
    write_file(project_dir.path(), "b.rs", "fn sub(a: i32, b: i32) -> i32 {\n    a - b\n}\n");

    let project_store = ProjectStore::load_or_create(project_dir.path()).unwrap();
    let project_id = project_store.project_id();

    let mut tree = MerkleTree::rebuild_from_scan(
        project_dir.path(),
        codeindex::config::SUPPORTED_EXTENSIONS,
        codeindex::project::CONFIG_DIR_NAME,
    )
    .unwrap();
    let mut dirty = codeindex::dirty::DirtyQueue::default();

    let config = AppConfig::from_env();
    let client = SyncClient::new(server_url.clone(), "tenant-a");
    let mut orchestrator =
        SyncOrchestrator::new(project_dir.path().to_path_buf(), project_id, &config, client);

    // First tick: no local project config yet -> full-init path.
    let summary = orchestrator.tick(&mut tree, &mut dirty).await.unwrap();
    assert_eq!(summary.path_taken, SyncPath::FullInit);
    assert!(summary.chunks_total > 0);
    assert!(dirty.is_empty());
    project_store.save_merkle_tree(&tree).unwrap();

    // Second tick with nothing changed: server root already matches local
    // root -> no-op, nothing resent (S1 / property 6, idempotence).
    let summary = orchestrator.tick(&mut tree, &mut dirty).await.unwrap();
    assert_eq!(summary.path_taken, SyncPath::NoOp);

    // Edit one file out of two (S3): mark it dirty the way the watcher
    // bridge would, update its leaf, and resync incrementally.
    write_file(project_dir.path(), "a.rs", "fn add(a: i32, b: i32) -> i32 {\n    a + b + 1\n}\n");
    let new_bytes = std::fs::read(project_dir.path().join("a.rs")).unwrap();
    tree.update_leaf("a.rs", file_digest("a.rs", &new_bytes));
    dirty.mark("a.rs");

    let summary = orchestrator.tick(&mut tree, &mut dirty).await.unwrap();
    assert_eq!(summary.path_taken, SyncPath::Incremental);
    // Incremental sync only re-chunks the dirty path (`a.rs`); `b.rs` is
    // untouched and never resent. The edited chunk has a brand new hash, so
    // it's a cache miss, not a hit.
    assert_eq!(summary.chunks_total, summary.chunks_needed);
    assert_eq!(summary.chunks_cached, 0);
    assert!(summary.chunks_needed > 0);
    assert!(dirty.is_empty());
}

#[tokio::test]
async fn reopen_path_resyncs_correctly_when_dirty_queue_is_empty() {
    let data_dir = tempdir().unwrap();
    let server_url = spawn_test_server(data_dir.path()).await;

    let project_dir = tempdir().unwrap();
    write_file(project_dir.path(), "a.rs", "fn one() -> i32 { 1 }\n");

    let project_store = ProjectStore::load_or_create(project_dir.path()).unwrap();
    let project_id = project_store.project_id();

    let mut tree = MerkleTree::rebuild_from_scan(
        project_dir.path(),
        codeindex::config::SUPPORTED_EXTENSIONS,
        codeindex::project::CONFIG_DIR_NAME,
    )
    .unwrap();
    let mut dirty = codeindex::dirty::DirtyQueue::default();

    let config = AppConfig::from_env();
    let client = SyncClient::new(server_url.clone(), "tenant-b");
    let mut orchestrator =
        SyncOrchestrator::new(project_dir.path().to_path_buf(), project_id, &config, client);

    orchestrator.tick(&mut tree, &mut dirty).await.unwrap();
    project_store.save_merkle_tree(&tree).unwrap();

    // Simulate "editor was closed": the file changes on disk, but no watcher
    // was running to mark it dirty or update the leaf, so the in-memory tree
    // root is the stale one the editor last knew about. Roots differ, queue
    // is empty -> reopen path, not no-op.
    write_file(project_dir.path(), "a.rs", "fn one() -> i32 { 2 }\n");
    let rescanned = MerkleTree::rebuild_from_scan(
        project_dir.path(),
        codeindex::config::SUPPORTED_EXTENSIONS,
        codeindex::project::CONFIG_DIR_NAME,
    )
    .unwrap();
    tree = rescanned;
    assert!(dirty.is_empty());

    let summary = orchestrator.tick(&mut tree, &mut dirty).await.unwrap();
    assert_eq!(summary.path_taken, SyncPath::Reopen);
    assert_eq!(summary.chunks_needed, 1);
}

#[tokio::test]
async fn cross_tenant_search_isolation_over_http() {
    let data_dir = tempdir().unwrap();
    let server_url = spawn_test_server(data_dir.path()).await;

    let project_dir = tempdir().unwrap();
    write_file(project_dir.path(), "a.rs", "fn shared() -> i32 { 42 }\n");

    let project_store = ProjectStore::load_or_create(project_dir.path()).unwrap();
    let project_id = project_store.project_id();
    let mut tree = MerkleTree::rebuild_from_scan(
        project_dir.path(),
        codeindex::config::SUPPORTED_EXTENSIONS,
        codeindex::project::CONFIG_DIR_NAME,
    )
    .unwrap();
    let mut dirty = codeindex::dirty::DirtyQueue::default();
    let config = AppConfig::from_env();

    let client_a = SyncClient::new(server_url.clone(), "alice");
    let mut orchestrator_a =
        SyncOrchestrator::new(project_dir.path().to_path_buf(), project_id, &config, client_a);
    orchestrator_a.tick(&mut tree, &mut dirty).await.unwrap();

    let http = reqwest::Client::new();
    let search = |token: &'static str| {
        let http = http.clone();
        let url = format!("{server_url}/v1/search");
        let project_id = project_id;
        async move {
            http.post(url)
                .bearer_auth(token)
                .json(&serde_json::json!({"query": "shared", "projectId": project_id, "topK": 5}))
                .send()
                .await
                .unwrap()
                .json::<serde_json::Value>()
                .await
                .unwrap()
        }
    };

    let as_alice = search("alice").await;
    assert_eq!(as_alice["results"].as_array().unwrap().len(), 1);

    let as_mallory = search("mallory").await;
    assert!(as_mallory["results"].as_array().unwrap().is_empty());
}
