// Pool REST API client
//
// Wraps `reqwest::Client` with pool-specific URL construction and response
// handling. Every read returns the raw JSON snapshot; shaping it into domain
// types is the cache layer's concern.

use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// HTTP client for the pool's REST API.
///
/// Paths are built by appending percent-encoded segments to `base_url`, so a
/// base with a path prefix (`https://pool.example/v2`) works as expected and
/// miner addresses never need manual escaping.
#[derive(Debug, Clone)]
pub struct PoolClient {
    http: reqwest::Client,
    base_url: Url,
}

impl PoolClient {
    /// Create a new client from a `TransportConfig`.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Self::from_reqwest(base_url, http)
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn from_reqwest(base_url: Url, http: reqwest::Client) -> Result<Self, Error> {
        if base_url.cannot_be_a_base() {
            return Err(Error::InvalidBaseUrl(base_url.to_string()));
        }
        Ok(Self { http, base_url })
    }

    /// The API base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Pool-wide resources ──────────────────────────────────────────

    pub async fn pool_overview(&self) -> Result<Value, Error> {
        self.get(&["api", "pool", "overview"]).await
    }

    pub async fn pool_payments(&self) -> Result<Value, Error> {
        self.get(&["api", "pool", "payments"]).await
    }

    pub async fn pool_blocks(&self) -> Result<Value, Error> {
        self.get(&["api", "pool", "blocks"]).await
    }

    pub async fn network_info(&self) -> Result<Value, Error> {
        self.get(&["api", "pool", "network"]).await
    }

    pub async fn pool_stats_24h(&self) -> Result<Value, Error> {
        self.get(&["api", "pool", "stats", "24h"]).await
    }

    pub async fn miners(&self) -> Result<Value, Error> {
        self.get(&["api", "miners"]).await
    }

    // ── Per-miner resources ──────────────────────────────────────────

    pub async fn miner(&self, address: &str) -> Result<Value, Error> {
        self.get(&["api", "miners", address]).await
    }

    pub async fn miner_shares(&self, address: &str) -> Result<Value, Error> {
        self.get(&["api", "miners", address, "shares"]).await
    }

    pub async fn miner_shares_chart(&self, address: &str) -> Result<Value, Error> {
        self.get(&["api", "miners", address, "shares", "chart"]).await
    }

    pub async fn miner_payments(&self, address: &str) -> Result<Value, Error> {
        self.get(&["api", "miners", address, "payments"]).await
    }

    pub async fn miner_rewards(&self, address: &str) -> Result<Value, Error> {
        self.get(&["api", "miners", address, "rewards"]).await
    }

    pub async fn miner_rewards_chart(&self, address: &str) -> Result<Value, Error> {
        self.get(&["api", "miners", address, "rewards", "chart"]).await
    }

    // ── Authenticated mutations ──────────────────────────────────────

    /// Update the account settings of the token's owner.
    pub async fn update_account_settings(
        &self,
        token: &SecretString,
        settings: &impl Serialize,
    ) -> Result<Value, Error> {
        let url = self.endpoint(&["api", "account", "settings"])?;
        debug!("POST {}", url);

        let resp = self
            .http
            .post(url)
            .bearer_auth(token.expose_secret())
            .json(settings)
            .send()
            .await?;

        Self::parse_response(resp).await
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// Build `{base}/{segments...}` with each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, Error> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get(&self, segments: &[&str]) -> Result<Value, Error> {
        let url = self.endpoint(segments)?;
        debug!("GET {}", url);

        let resp = self.http.get(url).send().await?;
        Self::parse_response(resp).await
    }

    async fn parse_response(resp: reqwest::Response) -> Result<Value, Error> {
        let status = resp.status();
        let body = resp.text().await?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::Unauthorized {
                message: error_message(&body, status),
            });
        }
        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                message: error_message(&body, status),
            });
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }
}

/// Pull a human-readable message out of an error body.
///
/// Accepts `{"error": "..."}` / `{"message": "..."}` bodies, falls back to the
/// raw text, then to the status reason.
fn error_message(body: &str, status: StatusCode) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        if let Some(msg) = map
            .get("error")
            .or_else(|| map.get("message"))
            .and_then(Value::as_str)
        {
            return msg.to_owned();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_owned()
    } else {
        trimmed.to_owned()
    }
}
