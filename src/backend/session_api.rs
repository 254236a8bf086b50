//! Collector session creation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::BackendError;

/// Path appended to the endpoint base for session creation.
pub const SESSION_PATH: &str = "collect/session";

#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Create a collector session and return its id.
    async fn create_session(
        &self,
        game_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<String, BackendError>;
}

#[derive(Debug, Serialize)]
struct CreateSessionRequest<'a> {
    game_id: &'a str,
    started_at: String,
}

#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    session_id: Option<String>,
}

/// [`SessionApi`] backed by `POST {endpoint}/collect/session`.
pub struct HttpSessionService {
    client: reqwest::Client,
    url: Url,
}

impl HttpSessionService {
    pub fn new(endpoint_base: &str, timeout: Duration) -> Result<Self, BackendError> {
        let url = session_url(endpoint_base)?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

/// `{endpoint_base}/collect/session`, tolerating a trailing slash on the base.
pub fn session_url(endpoint_base: &str) -> Result<Url, BackendError> {
    let base = format!("{}/", endpoint_base.trim().trim_end_matches('/'));
    Url::parse(&base)
        .and_then(|u| u.join(SESSION_PATH))
        .map_err(|e| BackendError::InvalidEndpoint(endpoint_base.to_string(), e.to_string()))
}

#[async_trait]
impl SessionApi for HttpSessionService {
    async fn create_session(
        &self,
        game_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<String, BackendError> {
        let request = CreateSessionRequest {
            game_id,
            started_at: started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        };

        tracing::debug!("[backend] POST {} (game_id={})", self.url, game_id);
        let response = self.client.post(self.url.clone()).json(&request).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(BackendError::SessionStatus {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: CreateSessionResponse =
            serde_json::from_str(&body).map_err(|_| BackendError::MissingSessionId(body.clone()))?;
        match parsed.session_id {
            Some(id) if !id.trim().is_empty() => Ok(id),
            _ => Err(BackendError::MissingSessionId(body)),
        }
    }
}
