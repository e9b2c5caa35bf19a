//! HTTP client for the dashboard API
//!
//! Paths are appended to `remote.server_url`, which may carry a prefix such
//! as `https://dash.example.com/api`.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::RemoteSink;
use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::types::{DailyHealthSample, DailyUsageSample, ProductivityScore};

pub const HEALTH_SYNC_PATH: &str = "/health/sync";
pub const SCREENTIME_SYNC_PATH: &str = "/screentime/sync";
pub const SCORE_PATH: &str = "/productivity/score";
pub const HEALTH_LATEST_PATH: &str = "/health/latest";

/// Rejection bodies are truncated to this many characters in errors.
const MAX_ERROR_BODY: usize = 200;

/// HTTP implementation of [`RemoteSink`]
pub struct HttpSink {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpSink {
    /// Create a new sink from configuration
    ///
    /// Returns an error if the configuration is invalid or missing required fields.
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        config.validate()?;

        let base_url = config
            .server_url
            .clone()
            .ok_or_else(|| Error::Config("remote.server_url is required".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(api_key) = &config.api_key {
            let auth_value = format!("Bearer {}", api_key);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value)
                    .map_err(|e| Error::Config(format!("invalid api_key: {}", e)))?,
            );
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<T: Serialize + Sync>(&self, path: &str, body: &T) -> Result<()> {
        let response = self
            .http_client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(path, e))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(path, status = status.as_u16(), "Push accepted");
            Ok(())
        } else {
            Err(rejection(path, response).await)
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let response = self
            .http_client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| transport_error(path, e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::NO_CONTENT {
            Ok(None)
        } else if status.is_success() {
            let record = response
                .json()
                .await
                .map_err(|e| Error::Unknown(format!("failed to parse {} response: {}", path, e)))?;
            Ok(Some(record))
        } else {
            Err(rejection(path, response).await)
        }
    }
}

fn transport_error(path: &str, error: reqwest::Error) -> Error {
    if error.is_timeout() {
        Error::Network(format!("{} timed out", path))
    } else {
        Error::Network(format!("HTTP request to {} failed: {}", path, error))
    }
}

async fn rejection(path: &str, response: reqwest::Response) -> Error {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown".to_string());
    let message: String = body.chars().take(MAX_ERROR_BODY).collect();

    tracing::warn!(path, status, "Dashboard rejected request");
    Error::RemoteRejected {
        status,
        message: format!("{}: {}", path, message),
    }
}

#[async_trait]
impl RemoteSink for HttpSink {
    async fn push_health(&self, sample: &DailyHealthSample) -> Result<()> {
        self.post(HEALTH_SYNC_PATH, sample).await
    }

    async fn push_usage(&self, sample: &DailyUsageSample) -> Result<()> {
        self.post(SCREENTIME_SYNC_PATH, sample).await
    }

    async fn push_score(&self, score: &ProductivityScore) -> Result<()> {
        self.post(SCORE_PATH, score).await
    }

    async fn latest_health(&self) -> Result<Option<DailyHealthSample>> {
        self.get(HEALTH_LATEST_PATH).await
    }

    async fn latest_score(&self) -> Result<Option<ProductivityScore>> {
        self.get(SCORE_PATH).await
    }
}
