// ── Runtime sync configuration ──
//
// Describes *where* the pool lives and how hard to try to stay connected.
// Never touches disk: the CLI builds a `SyncConfig` and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::CoreError;
use crate::store::RetryPolicy;

/// Port the pool's stream server listens on when no stream URL is given.
pub const DEFAULT_STREAM_PORT: u16 = 4000;

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(PathBuf),
    /// Skip verification (self-signed test pools).
    DangerAcceptInvalid,
}

/// Everything a `Dashboard` needs to reach the pool.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// REST base URL (e.g., `https://pool.example`).
    pub api_url: Url,
    /// Stream endpoint. `None` derives it from `api_url`.
    pub stream_url: Option<Url>,
    pub tls: TlsVerification,
    /// HTTP request timeout.
    pub timeout: Duration,
    /// Stream reconnect attempts before giving up.
    pub reconnect_attempts: u32,
    /// Fixed delay between stream reconnect attempts.
    pub reconnect_delay: Duration,
    /// Fetch retry policy applied to every catalog resource.
    pub retry: RetryPolicy,
    /// Disable to rely on the stream alone after the first fetch.
    pub polling_enabled: bool,
}

impl SyncConfig {
    pub fn new(api_url: Url) -> Self {
        Self {
            api_url,
            stream_url: None,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(1),
            retry: RetryPolicy::default(),
            polling_enabled: true,
        }
    }

    /// The configured stream URL, or the default derived from the API URL.
    pub fn resolved_stream_url(&self) -> Result<Url, CoreError> {
        match &self.stream_url {
            Some(url) => Ok(url.clone()),
            None => default_stream_url(&self.api_url),
        }
    }
}

/// Same host as the API, `ws`/`wss` matching `http`/`https`, on port 4000.
pub fn default_stream_url(api_url: &Url) -> Result<Url, CoreError> {
    let scheme = match api_url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(CoreError::Config {
                message: format!("cannot derive a stream URL from a {other}:// API URL"),
            });
        }
    };
    if !api_url.has_host() {
        return Err(CoreError::Config {
            message: format!("API URL has no host: {api_url}"),
        });
    }

    let mut url = api_url.clone();
    let rejected = |what: &str| CoreError::Config {
        message: format!("cannot set {what} on stream URL derived from {api_url}"),
    };
    url.set_scheme(scheme).map_err(|()| rejected("scheme"))?;
    url.set_port(Some(DEFAULT_STREAM_PORT))
        .map_err(|()| rejected("port"))?;
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}
