//! HTTP client for the two-phase sync protocol (§6). Every failure — network,
//! non-2xx status, or a body that doesn't parse — collapses to
//! `AppError::Sync` so the orchestrator has one failure mode to react to
//! (leave the dirty queue untouched, retry next tick).

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::protocol::{
    ChunkMetadataWire, ChunkWithCodeWire, IndexCheckRequest, IndexCheckResponse, IndexInitRequest,
    IndexInitResponse, SyncPhase1Request, SyncPhase1Response, SyncPhase2Request,
    SyncPhase2Response,
};

pub struct SyncClient {
    http: Client,
    base_url: String,
    bearer_token: String,
}

impl SyncClient {
    pub fn new(base_url: impl Into<String>, bearer_token: impl Into<String>) -> Self {
        SyncClient {
            http: Client::new(),
            base_url: base_url.into(),
            bearer_token: bearer_token.into(),
        }
    }

    async fn post_json<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        path: &str,
        body: &Req,
    ) -> AppResult<Resp> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.bearer_token)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::Sync(format!("request to {path} failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Sync(format!(
                "{path} returned {status}: {text}"
            )));
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| AppError::Sync(format!("{path} returned an unparseable body: {e}")))
    }

    pub async fn check(&self, project_id: Uuid, merkle_root: String) -> AppResult<IndexCheckResponse> {
        self.post_json(
            "/v1/index/check",
            &IndexCheckRequest {
                project_id,
                merkle_root,
            },
        )
        .await
    }

    pub async fn init(
        &self,
        project_id: Uuid,
        merkle_root: String,
        chunks: Vec<ChunkWithCodeWire>,
    ) -> AppResult<IndexInitResponse> {
        self.post_json(
            "/v1/index/init",
            &IndexInitRequest {
                project_id,
                merkle_root,
                chunks,
            },
        )
        .await
    }

    pub async fn sync_phase1(
        &self,
        project_id: Uuid,
        merkle_root: String,
        chunks: Vec<ChunkMetadataWire>,
    ) -> AppResult<SyncPhase1Response> {
        self.post_json(
            "/v1/index/sync",
            &SyncPhase1Request {
                phase: 1,
                project_id,
                merkle_root,
                chunks,
            },
        )
        .await
    }

    pub async fn sync_phase2(
        &self,
        project_id: Uuid,
        merkle_root: String,
        chunks: Vec<ChunkWithCodeWire>,
    ) -> AppResult<SyncPhase2Response> {
        self.post_json(
            "/v1/index/sync",
            &SyncPhase2Request {
                phase: 2,
                project_id,
                merkle_root,
                chunks,
            },
        )
        .await
    }
}
