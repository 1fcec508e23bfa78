//! Shared server state: the pieces every axum handler needs a handle to.
//! Mirrors the teacher's `AppState` shape (config + managers + broadcast
//! channel behind `Arc`/`Clone`) with the managers replaced by the
//! reconciliation core this crate actually implements.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::AppResult;
use crate::server::ai::{Embedder, HeuristicSummarizer, LocalEmbedder, Summarizer};
use crate::server::cache::EmbeddingCache;
use crate::server::reconciler::{Reconciler, RootStore};
use crate::server::vector::VectorStore;

/// Broadcast to any connected WebSocket client watching progress (§9
/// supplemented feature — the teacher does the same over its own
/// `ServerEvent` channel).
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "index_initialized")]
    IndexInitialized {
        #[serde(rename = "projectId")]
        project_id: Uuid,
        chunks: usize,
    },
    #[serde(rename = "sync_phase1")]
    SyncPhase1Completed {
        #[serde(rename = "projectId")]
        project_id: Uuid,
        needed: usize,
    },
    #[serde(rename = "sync_phase2")]
    SyncPhase2Completed {
        #[serde(rename = "projectId")]
        project_id: Uuid,
        #[serde(rename = "aiProcessed")]
        ai_processed: usize,
    },
}

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub reconciler: Arc<Reconciler>,
    pub event_tx: broadcast::Sender<ServerEvent>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> AppResult<Self> {
        let (event_tx, _) = broadcast::channel(1024);

        let data_dir = PathBuf::from(&config.data_dir);
        tokio::fs::create_dir_all(&data_dir).await?;

        let embedder: Arc<dyn Embedder> = Arc::new(LocalEmbedder::new());
        let summarizer: Arc<dyn Summarizer> = Arc::new(HeuristicSummarizer::new());

        let reconciler = Reconciler {
            roots: RootStore::load_or_create(data_dir.join("roots.json"))?,
            cache: EmbeddingCache::load_or_create(data_dir.join("embedding-cache.json"), 10)?,
            vector_store: VectorStore::load_or_create(&data_dir.join("vectors"), embedder.dimension())?,
            summarizer,
            embedder,
            ai_timeout: Duration::from_secs(config.ai_call_timeout_secs),
        };

        Ok(AppState {
            config,
            reconciler: Arc::new(reconciler),
            event_tx,
        })
    }
}
