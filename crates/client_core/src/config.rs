use std::time::Duration;

use serde::Deserialize;
use shared::domain::ClientId;
use url::Url;

use crate::error::SyncError;

pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Connection settings for a [`crate::SyncClient`].
///
/// `server_url` is the HTTP base of the folder service (`http://host:port`);
/// the socket endpoint is derived from it. `client_id` names the tree REST
/// calls act on and should match the id passed to `SyncClient::open`.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub server_url: String,
    #[serde(default)]
    pub client_id: ClientId,
    #[serde(default = "default_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_reconnect_attempts: u32,
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_RECONNECT_BASE_DELAY_MS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_RECONNECT_ATTEMPTS
}

impl SyncConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            client_id: ClientId::default(),
            reconnect_base_delay_ms: DEFAULT_RECONNECT_BASE_DELAY_MS,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }

    pub fn with_client_id(mut self, client_id: ClientId) -> Self {
        self.client_id = client_id;
        self
    }

    pub fn with_reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.reconnect_base_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn http_base(&self) -> Result<Url, SyncError> {
        let url = Url::parse(self.server_url.trim()).map_err(|err| self.invalid(err.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(self.invalid(format!("unsupported scheme `{other}`"))),
        }
    }

    /// `ws(s)://host:port/<base path>/ws/<client_id>`
    pub fn ws_url(&self, client_id: &ClientId) -> Result<Url, SyncError> {
        let mut url = self.http_base()?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|()| self.invalid(format!("cannot switch scheme to {scheme}")))?;
        url.path_segments_mut()
            .map_err(|()| self.invalid("url cannot be a base"))?
            .pop_if_empty()
            .extend(["ws", client_id.as_str()]);
        Ok(url)
    }

    fn invalid(&self, reason: impl Into<String>) -> SyncError {
        SyncError::InvalidServerUrl {
            url: self.server_url.clone(),
            reason: reason.into(),
        }
    }
}
