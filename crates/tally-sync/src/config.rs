//! Engine configuration.

use std::time::Duration;

use crate::error::{Error, Result};

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Configuration for the remote sync endpoint.
///
/// Holds only safe-to-ship connection parameters. Credentials come from the
/// external token-refresh collaborator, never from this struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    endpoint: String,
    timeout: Duration,
}

impl RemoteConfig {
    /// Create a configuration for the given base endpoint.
    ///
    /// The endpoint must carry an `http://` or `https://` scheme; a trailing
    /// slash is stripped so family paths can be appended uniformly.
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        Ok(Self {
            endpoint: normalize_endpoint(endpoint.into())?,
            timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        })
    }

    /// Set the per-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

fn normalize_endpoint(raw: String) -> Result<String> {
    let endpoint = raw.trim();
    if endpoint.is_empty() {
        return Err(Error::InvalidInput(
            "endpoint must not be empty".to_string(),
        ));
    }
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "endpoint must include http:// or https://".to_string(),
        ))
    }
}
