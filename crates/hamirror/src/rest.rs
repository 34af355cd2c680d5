// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of HaMirror.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::{debug, error, warn};

use hamirror_core::EntityState;

use crate::config::HaConfig;
use crate::errors::{HaError, HaResult};

/// Home Assistant REST API client.
///
/// Used as the snapshot fallback while the websocket is down; the mirror's
/// primary feed is [`crate::socket::HaSocket`].
#[derive(Clone)]
pub struct HaRestClient {
    base_url: String,
    token: Option<String>,
    client: Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl HaRestClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> HaResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| HaError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into(),
            token,
            client,
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
        })
    }

    pub fn from_config(config: &HaConfig) -> HaResult<Self> {
        Self::new(config.base_url(), config.token.clone())
    }

    /// Set custom retry configuration
    pub fn with_retry_config(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// Full state snapshot from `/api/states`.
    pub async fn get_states(&self) -> HaResult<Vec<EntityState>> {
        let url = format!("{}/api/states", self.base_url);
        debug!("Fetching all entity states");

        let response = self
            .retry_request(|| async {
                let mut request = self.client.get(&url);
                if let Some(token) = &self.token {
                    request = request.bearer_auth(token);
                }
                request.send().await
            })
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response.json::<Vec<EntityState>>().await?),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                error!("Authentication failed fetching states");
                Err(HaError::AuthenticationFailed)
            }
            status => Err(HaError::ApiError {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    /// Health check - ping HA API
    pub async fn ping(&self) -> HaResult<bool> {
        let url = format!("{}/api/", self.base_url);
        debug!("Performing health check");

        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        match request.send().await {
            Ok(response) => {
                let is_ok = response.status().is_success();
                if !is_ok {
                    warn!("Health check failed: status {}", response.status());
                }
                Ok(is_ok)
            }
            Err(e) => {
                warn!("Health check failed: {e}");
                Ok(false) // Don't error on health check failure
            }
        }
    }

    /// Retry a request with exponential backoff
    async fn retry_request<F, Fut>(&self, mut request_fn: F) -> HaResult<reqwest::Response>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
    {
        let mut attempts = 0;
        let mut delay = self.retry_delay;

        loop {
            attempts += 1;
            match request_fn().await {
                Ok(response) => return Ok(response),
                Err(e) if attempts >= self.max_retries => {
                    error!("Request failed after {attempts} attempts: {e}");
                    return Err(HaError::HttpError(e));
                }
                Err(e) => {
                    warn!(
                        "Request failed (attempt {}/{}): {}. Retrying in {:?}",
                        attempts, self.max_retries, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }
}

impl std::fmt::Debug for HaRestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HaRestClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
