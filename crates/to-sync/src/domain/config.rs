//! Client configuration and per-call options.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::client::Client;

/// Configuration for one client instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL written into every outgoing request; the signed query
    /// parameters are appended to it per call.
    pub callback_url: String,
    /// Maximum accepted callback body size, in bytes.
    pub max_callback_bytes: u64,
    /// Name of the broker stream used for fan-out.
    pub stream: String,
    /// Default per-call deadline, in seconds.
    pub timeout_seconds: u64,
    /// Signing secret override; the compiled-in default is used when
    /// absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl Config {
    /// Validate all fields; every one is required.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.callback_url).map_err(ConfigError::CallbackUrl)?;
        if self.max_callback_bytes == 0 {
            return Err(ConfigError::MaxCallbackBytes);
        }
        if self.stream.is_empty() {
            return Err(ConfigError::Stream);
        }
        if self.timeout_seconds == 0 {
            return Err(ConfigError::Timeout);
        }
        Ok(())
    }

    /// The default deadline as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Configuration rejected by [`Config::validate`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `callback_url` does not parse as a URL.
    #[error("callback_url is not a valid url: {0}")]
    CallbackUrl(#[source] url::ParseError),

    /// `max_callback_bytes` must be positive.
    #[error("max_callback_bytes must be greater than zero")]
    MaxCallbackBytes,

    /// `stream` must be non-empty.
    #[error("stream must not be empty")]
    Stream,

    /// `timeout_seconds` must be positive.
    #[error("timeout_seconds must be greater than zero")]
    Timeout,
}

/// Per-call overrides. Several may be passed; later entries win.
#[derive(Clone, Default)]
pub struct CallOptions {
    /// Use this client instead of the process-wide default.
    pub client: Option<Arc<Client>>,
    /// Override the client's default deadline.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route the call through an explicit client.
    pub fn with_client(mut self, client: Arc<Client>) -> Self {
        self.client = Some(client);
        self
    }

    /// Override the deadline for this call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Last-writer-wins merge across a list of options.
    pub(crate) fn merged(opts: &[CallOptions]) -> CallOptions {
        let mut merged = CallOptions::default();
        for opt in opts {
            if let Some(client) = &opt.client {
                merged.client = Some(Arc::clone(client));
            }
            if let Some(timeout) = opt.timeout {
                merged.timeout = Some(timeout);
            }
        }
        merged
    }
}
