//! HTTP surface (§6): the server side of the wire protocol. Route wiring
//! follows the teacher's `create_app` — CORS + trace + compression layered
//! over a merge of public and bearer-gated routes — but the gate extracts a
//! tenant id per request instead of validating against one shared secret,
//! since this crate's "auth" is inherently multi-tenant (§1 notes token
//! shape itself is out of scope).

pub mod ai;
pub mod cache;
pub mod reconciler;
pub mod vector;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::{AppError, AppResult};
use crate::protocol::{
    HealthResponse, IndexCheckRequest, IndexCheckResponse, IndexInitRequest, IndexInitResponse,
    SearchRequest, SearchResponse, SearchResultWire, SyncPhase1Request, SyncPhase1Response,
    SyncPhase2Request, SyncPhase2Response,
};
use crate::state::{AppState, ServerEvent};

pub fn create_app(state: AppState) -> Router {
    let router = Router::new()
        .route("/v1/health", get(health))
        .route("/v1/index/init", post(index_init))
        .route("/v1/index/check", post(index_check))
        .route("/v1/index/sync", post(index_sync))
        .route("/v1/search", post(search))
        .route("/v1/ws", get(ws_handler))
        .with_state(Arc::new(state));

    router
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
}

/// Extracts the tenant id from `Authorization: Bearer <token>`. The token
/// itself is treated as the opaque user id — §1 leaves token contents out of
/// scope, so this crate cannot validate a signature or claim, only that one
/// was presented.
fn tenant_id(headers: &HeaderMap) -> AppResult<String> {
    let raw = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;
    let token = raw
        .strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))
        .ok_or(AppError::Unauthorized)?
        .trim();
    if token.is_empty() {
        return Err(AppError::Unauthorized);
    }
    Ok(token.to_string())
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn index_init(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<IndexInitRequest>,
) -> AppResult<Json<IndexInitResponse>> {
    let user_id = tenant_id(&headers)?;

    let outcome = state
        .reconciler
        .process_chunks_with_code(&user_id, req.project_id, &req.chunks)
        .await?;

    state
        .reconciler
        .roots
        .set(&user_id, req.project_id, req.merkle_root.clone())?;

    let _ = state.event_tx.send(ServerEvent::IndexInitialized {
        project_id: req.project_id,
        chunks: outcome.received.len(),
    });

    let status = if outcome.ai_errors > 0 { "partial" } else { "indexed" };
    Ok(Json(IndexInitResponse {
        status: status.to_string(),
        merkle_root: req.merkle_root,
        chunks_received: outcome.received.len(),
        ai_processed: outcome.ai_processed,
        cache_hits: outcome.cache_hits,
        vectors_stored: outcome.vectors_stored,
        ai_errors: if outcome.ai_errors > 0 { Some(outcome.ai_errors) } else { None },
    }))
}

async fn index_check(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<IndexCheckRequest>,
) -> AppResult<Json<IndexCheckResponse>> {
    let user_id = tenant_id(&headers)?;
    let server_root = state.reconciler.roots.get(&user_id, req.project_id);
    let changed = server_root.as_deref() != Some(req.merkle_root.as_str());
    Ok(Json(IndexCheckResponse { changed, server_root }))
}

/// `phase` is inspected before the body is fully typed, since phase 1 and
/// phase 2 carry different chunk shapes (metadata-only vs metadata+code).
#[derive(Deserialize)]
struct PhaseProbe {
    phase: u8,
}

async fn index_sync(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> AppResult<axum::response::Response> {
    let user_id = tenant_id(&headers)?;
    let probe: PhaseProbe = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("missing or invalid phase field: {e}")))?;

    match probe.phase {
        1 => {
            let req: SyncPhase1Request = serde_json::from_slice(&body)?;
            let (needed, vectorized, cache_hits) =
                state.reconciler.phase1(&user_id, req.project_id, &req.chunks)?;

            let _ = state.event_tx.send(ServerEvent::SyncPhase1Completed {
                project_id: req.project_id,
                needed: needed.len(),
            });

            Ok(Json(SyncPhase1Response {
                needed,
                vectorized,
                cache_hits,
            })
            .into_response())
        }
        2 => {
            let req: SyncPhase2Request = serde_json::from_slice(&body)?;
            let outcome = state
                .reconciler
                .process_chunks_with_code(&user_id, req.project_id, &req.chunks)
                .await?;
            state
                .reconciler
                .roots
                .set(&user_id, req.project_id, req.merkle_root.clone())?;

            let _ = state.event_tx.send(ServerEvent::SyncPhase2Completed {
                project_id: req.project_id,
                ai_processed: outcome.ai_processed,
            });

            let status = if outcome.ai_errors > 0 { "partial" } else { "stored" };
            let message = if outcome.ai_errors > 0 {
                format!("{} chunk(s) failed AI processing and were not vectorized", outcome.ai_errors)
            } else {
                "synced".to_string()
            };

            Ok(Json(SyncPhase2Response {
                status: status.to_string(),
                received: outcome.received,
                merkle_root: req.merkle_root,
                ai_processed: outcome.ai_processed,
                cache_hits: outcome.cache_hits,
                vectors_stored: outcome.vectors_stored,
                message,
                ai_errors: if outcome.ai_errors > 0 { Some(outcome.ai_errors) } else { None },
            })
            .into_response())
        }
        other => Err(AppError::BadRequest(format!("unknown sync phase: {other}"))),
    }
}

async fn search(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SearchRequest>,
) -> AppResult<Json<SearchResponse>> {
    let user_id = tenant_id(&headers)?;

    if req.query.is_empty() || req.query.len() > crate::config::MAX_SEARCH_QUERY_LENGTH {
        return Err(AppError::BadRequest(format!(
            "query must be 1-{} characters",
            crate::config::MAX_SEARCH_QUERY_LENGTH
        )));
    }

    let start = Instant::now();
    let top_k = req.top_k.unwrap_or(10).clamp(1, 100);

    let query_vec = state
        .reconciler
        .embedder
        .embed_batch(&[req.query.clone()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("embedder returned no vector")))?;

    let hits = state
        .reconciler
        .search(&user_id, req.project_id, &query_vec, top_k)?;

    let results = hits
        .into_iter()
        .map(|(hash, score, meta)| SearchResultWire {
            hash,
            score,
            summary: meta.summary,
            kind: meta.kind,
            name: meta.name,
            language_id: meta.language_id,
            lines: [meta.line_start, meta.line_end],
            file_path: meta.file_path,
        })
        .collect();

    Ok(Json(SearchResponse {
        results,
        query: req.query,
        took: start.elapsed().as_millis() as u64,
    }))
}

/// Progress channel (§9 supplemented feature): broadcasts the per-sync
/// [`ServerEvent`]s a client's `watch` subcommand can print, the same way the
/// teacher pushes `ServerEvent`s to any connected UI. Server -> client only;
/// there is no client command surface to accept here.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let mut rx = state.event_tx.subscribe();
    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let Ok(json) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("progress websocket client lagged, skipped {n} events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        // No client -> server commands are part of this protocol; just drain
        // the socket so pings/closes are handled and the connection doesn't
        // look stalled to the peer.
        while receiver.next().await.is_some() {}
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

