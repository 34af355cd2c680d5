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

use tracing::info;

use crate::errors::{HaError, HaResult};

/// Connection configuration for a Home Assistant hub.
#[derive(Debug, Clone)]
pub struct HaConfig {
    /// Base URL, e.g. `http://homeassistant.local:8123` (or a `ws://` URL
    /// pointing straight at the websocket endpoint's host).
    pub url: String,
    /// Long-lived access token. Optional; without it no auth message is sent.
    pub token: Option<String>,
}

impl HaConfig {
    /// A missing URL is a fatal configuration error — callers must not build
    /// a client without one.
    pub fn new(url: impl Into<String>) -> HaResult<Self> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(HaError::ConfigError(
                "Home Assistant URL not provided".to_string(),
            ));
        }
        Ok(Self { url, token: None })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Create configuration from `HA_URL` / `HA_TOKEN` environment variables.
    pub fn from_env() -> HaResult<Self> {
        let url = std::env::var("HA_URL")
            .map_err(|_| HaError::ConfigError("HA_URL environment variable not set".to_string()))?;
        let mut config = Self::new(url)?;
        if let Ok(token) = std::env::var("HA_TOKEN")
            && !token.trim().is_empty()
        {
            config.token = Some(token);
        }
        info!("Initializing HA config from environment: {}", config.url);
        Ok(config)
    }

    /// The websocket endpoint: scheme swapped from `http(s)` to `ws(s)` and
    /// `/api/websocket` appended.
    pub fn ws_url(&self) -> String {
        let base = self.url.trim_end_matches('/');
        let ws_base = match base.strip_prefix("http") {
            Some(rest) => format!("ws{rest}"),
            None => base.to_string(),
        };
        format!("{ws_base}/api/websocket")
    }

    /// Base URL for the REST API, without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    /// REST is only reachable when the configured URL speaks http(s).
    pub fn supports_rest(&self) -> bool {
        self.url.starts_with("http")
    }
}
