//! Centralized logic for initializing the HTTP client, to ensure uniform
//! configuration (timeouts, user agent, redirect policy) across the
//! fetcher, feed cache refresh, and key server lookups.

use std::time::Duration;

use crate::errors::Result;

/// Settings for the shared HTTP client. Any setting that should apply to
/// every request belongs here, to avoid each caller building its own
/// ad-hoc client.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Per-request timeout.
    pub timeout: Duration,
    /// User agent string sent with every request.
    pub user_agent: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        ClientSettings {
            timeout: Duration::from_secs(60),
            user_agent: concat!("zeroinstall-engine/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

impl ClientSettings {
    /// Settings with the defaults (60s timeout, this crate's user agent).
    pub fn new() -> Self {
        Self::default()
    }
}

/// Build the shared blocking HTTP client every network-touching
/// component should reuse, rather than constructing its own.
pub fn create_client(settings: &ClientSettings) -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(settings.timeout)
        .user_agent(&settings.user_agent)
        .build()
        .map_err(|source| crate::errors::EngineError::network("<client init>", source))
}
