//! # Remote Gem Service
//!
//! The authoritative store of gems, unlock state, badges and the leaderboard.
//! The engine only talks to it through [`GemService`]; [`HttpGemService`] is
//! the JSON-over-HTTP implementation.
//!
//! ## Endpoints
//!
//! - `GET  {base}/gems?participantId=<id>` → [`CatalogSnapshot`]
//! - `GET  {base}/gems/leaderboard` → [`LeaderboardSnapshot`]
//! - `POST {base}/gems/unlock` with [`UnlockRequest`] → [`UnlockReceipt`]

use crate::error::{GemError, GemResult};
use crate::geo::Coordinate;
use crate::types::{CatalogSnapshot, LeaderboardEntry, LeaderboardSnapshot, UnlockReceipt, UnlockRequest};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Request/response access to the remote gem authority.
#[async_trait]
pub trait GemService: Send + Sync {
    /// All gems plus the participant's unlocked ids and badges.
    async fn fetch_catalog(&self, participant_id: &str) -> GemResult<CatalogSnapshot>;

    async fn fetch_leaderboard(&self) -> GemResult<Vec<LeaderboardEntry>>;

    /// Asks the service to unlock whatever gem contains `coords`.
    async fn unlock(&self, participant_id: &str, coords: Coordinate) -> GemResult<UnlockReceipt>;
}

/// Connection settings for [`HttpGemService`].
#[derive(Debug, Clone)]
pub struct HttpServiceConfig {
    /// Base URL the endpoint paths are appended to, e.g. `http://127.0.0.1:5000/api`
    pub base_url: String,
    /// Sent as `Authorization: Bearer <token>` when set
    pub auth_token: Option<String>,
    pub request_timeout: Duration,
}

impl Default for HttpServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000/api".to_string(),
            auth_token: None,
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// JSON-over-HTTP client for the gem service.
#[derive(Debug, Clone)]
pub struct HttpGemService {
    client: reqwest::Client,
    config: HttpServiceConfig,
}

impl HttpGemService {
    pub fn new(config: HttpServiceConfig) -> GemResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GemError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> GemResult<(StatusCode, String)> {
        let response = self.authorize(request).send().await.map_err(|e| {
            if e.is_timeout() {
                GemError::Timeout(self.config.request_timeout)
            } else {
                GemError::from(e)
            }
        })?;
        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }
}

/// Pulls the `error` field out of a JSON error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

fn decode<T: DeserializeOwned>(status: StatusCode, body: &str) -> GemResult<T> {
    if !status.is_success() {
        return Err(GemError::Server {
            status: status.as_u16(),
            message: error_message(body),
        });
    }
    serde_json::from_str(body).map_err(|e| {
        warn!("Malformed gem service payload: {}", e);
        GemError::InvalidResponse(e.to_string())
    })
}

#[async_trait]
impl GemService for HttpGemService {
    #[instrument(skip(self))]
    async fn fetch_catalog(&self, participant_id: &str) -> GemResult<CatalogSnapshot> {
        let request = self
            .client
            .get(self.url("gems"))
            .query(&[("participantId", participant_id)]);
        let (status, body) = self.send(request).await?;
        let catalog: CatalogSnapshot = decode(status, &body)?;
        debug!("Fetched {} gems, {} unlocked", catalog.gems.len(), catalog.unlocked.len());
        Ok(catalog)
    }

    #[instrument(skip(self))]
    async fn fetch_leaderboard(&self) -> GemResult<Vec<LeaderboardEntry>> {
        let request = self.client.get(self.url("gems/leaderboard"));
        let (status, body) = self.send(request).await?;
        let snapshot: LeaderboardSnapshot = decode(status, &body)?;
        Ok(snapshot.leaderboard)
    }

    #[instrument(skip(self))]
    async fn unlock(&self, participant_id: &str, coords: Coordinate) -> GemResult<UnlockReceipt> {
        let body = UnlockRequest {
            participant_id: participant_id.to_string(),
            coords,
        };
        let request = self.client.post(self.url("gems/unlock")).json(&body);
        let (status, body) = self.send(request).await?;
        if status == StatusCode::NOT_FOUND {
            return Err(GemError::NoTargetNearby);
        }
        decode(status, &body)
    }
}
