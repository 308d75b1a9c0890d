//! Client for the signage backend.
//!
//! The engine only sees the [`SignageApi`] trait; [`HttpSignageApi`] is the
//! reqwest-backed implementation used in production. Every call is a single
//! request with no internal retry: the heartbeat cadence is the retry loop.

pub mod endpoints;
pub mod error;
#[cfg(test)]
pub(crate) mod fake;
pub mod log_sink;
pub mod responses;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::json;

use self::endpoints::Endpoints;
pub use self::error::ApiError;
pub use self::responses::{
    Command, CommandReport, CommandStatus, ConfirmResponse, DeviceInfo, HeartbeatResponse,
    LogEntry, PullResponse,
};
use crate::state::Device;

const DEVICE_CODE_HEADER: &str = "X-Device-Code";

/// Server operations the sync engine depends on.
#[async_trait]
pub trait SignageApi: Send + Sync {
    /// Cheap liveness check.
    async fn check_health(&self) -> Result<(), ApiError>;

    async fn heartbeat(&self, info: &DeviceInfo) -> Result<HeartbeatResponse, ApiError>;

    /// Pull the versioned playlist snapshot for this device.
    async fn pull_playlist(&self) -> Result<PullResponse, ApiError>;

    /// Tell the server this device adopted `version`.
    async fn confirm_sync(
        &self,
        version: u64,
        playlist_id: Option<&str>,
    ) -> Result<ConfirmResponse, ApiError>;

    async fn report_command_result(&self, report: &CommandReport) -> Result<(), ApiError>;

    async fn send_log(&self, entry: &LogEntry) -> Result<(), ApiError>;
}

/// reqwest-backed [`SignageApi`].
pub struct HttpSignageApi {
    client: Client,
    endpoints: Endpoints,
    device_code: String,
}

impl std::fmt::Debug for HttpSignageApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSignageApi")
            .field("endpoints", &self.endpoints)
            .field("device_code", &self.device_code)
            .finish_non_exhaustive()
    }
}

impl HttpSignageApi {
    /// Build a client authenticated as `device`.
    pub fn new(server_url: &str, device: &Device, timeout: Duration) -> anyhow::Result<Self> {
        let endpoints = Endpoints::new(server_url)?;

        let mut headers = HeaderMap::new();
        headers.insert(DEVICE_CODE_HEADER, HeaderValue::from_str(&device.code)?);
        if !device.auth_token.is_empty() {
            let mut auth = HeaderValue::from_str(&format!("Bearer {}", device.auth_token))?;
            auth.set_sensitive(true);
            headers.insert(AUTHORIZATION, auth);
        }

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(concat!("signage-sync/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(timeout.min(Duration::from_secs(15)))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            endpoints,
            device_code: device.code.clone(),
        })
    }

    pub fn device_code(&self) -> &str {
        &self.device_code
    }

    /// Send a request and return the raw successful response.
    async fn send(
        &self,
        request: RequestBuilder,
        endpoint: &str,
    ) -> Result<reqwest::Response, ApiError> {
        let response = request.send().await.map_err(|e| ApiError::Network {
            endpoint: endpoint.to_string(),
            source: e,
        })?;
        if !response.status().is_success() {
            return Err(ApiError::HttpStatus {
                status: response.status().as_u16(),
                endpoint: endpoint.to_string(),
            });
        }
        Ok(response)
    }

    /// Send a request and decode a JSON body.
    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        endpoint: &str,
    ) -> Result<T, ApiError> {
        let response = self.send(request, endpoint).await?;
        let body = response.text().await.map_err(|e| ApiError::Network {
            endpoint: endpoint.to_string(),
            source: e,
        })?;
        serde_json::from_str(&body).map_err(|e| ApiError::Protocol {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl SignageApi for HttpSignageApi {
    async fn check_health(&self) -> Result<(), ApiError> {
        let url = self.endpoints.health();
        self.send(self.client.get(&url), &url).await?;
        Ok(())
    }

    async fn heartbeat(&self, info: &DeviceInfo) -> Result<HeartbeatResponse, ApiError> {
        let url = self.endpoints.heartbeat();
        self.send_json(self.client.post(&url).json(info), &url).await
    }

    async fn pull_playlist(&self) -> Result<PullResponse, ApiError> {
        let url = self.endpoints.playlist(&self.device_code);
        self.send_json(self.client.get(&url), &url).await
    }

    async fn confirm_sync(
        &self,
        version: u64,
        playlist_id: Option<&str>,
    ) -> Result<ConfirmResponse, ApiError> {
        let url = self.endpoints.confirm_sync(&self.device_code);
        let body = json!({ "version": version, "playlist_id": playlist_id });
        self.send_json(self.client.post(&url).json(&body), &url).await
    }

    async fn report_command_result(&self, report: &CommandReport) -> Result<(), ApiError> {
        let url = self
            .endpoints
            .command_result(&self.device_code, &report.command_id);
        self.send(self.client.post(&url).json(report), &url).await?;
        Ok(())
    }

    async fn send_log(&self, entry: &LogEntry) -> Result<(), ApiError> {
        let url = self.endpoints.logs(&self.device_code);
        self.send(self.client.post(&url).json(entry), &url).await?;
        Ok(())
    }
}
