//! Configuration types for Tablekey

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Safety margin before an access token is considered expired
pub const DEFAULT_REFRESH_MARGIN_MS: i64 = 15_000;

/// Safety margin for operator credentials; kept below the panel margin so a
/// 20 minute credential is still usable ten seconds before it lapses
pub const DEFAULT_OPERATOR_MARGIN_MS: i64 = 5_000;

/// Fixed lifetime of an operator credential from issuance
pub const DEFAULT_OPERATOR_TTL_MS: i64 = 20 * 60 * 1000;

/// Main configuration for Tablekey clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Backend base URL, without trailing slash
    pub base_url: String,
    /// Tokens with this much lifetime or less remaining are treated as expired
    pub refresh_margin_ms: i64,
    /// Safety margin applied to the operator credential
    pub operator_margin_ms: i64,
    /// Operator credential lifetime
    pub operator_ttl_ms: i64,
    /// Delay before a device search query is actually sent
    pub search_debounce_ms: u64,
    /// Shortest device search query that reaches the network
    pub min_search_len: usize,
    /// Interval between background pairing probes
    pub probe_interval_secs: u64,
    /// Transport timeout for every outbound request
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            refresh_margin_ms: DEFAULT_REFRESH_MARGIN_MS,
            operator_margin_ms: DEFAULT_OPERATOR_MARGIN_MS,
            operator_ttl_ms: DEFAULT_OPERATOR_TTL_MS,
            search_debounce_ms: 300,
            min_search_len: 2,
            probe_interval_secs: 30,
            request_timeout_secs: 15,
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pattern: set backend base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Builder pattern: set refresh margin
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin_ms = margin.as_millis() as i64;
        self
    }

    /// Builder pattern: set operator credential margin
    pub fn with_operator_margin(mut self, margin: Duration) -> Self {
        self.operator_margin_ms = margin.as_millis() as i64;
        self
    }

    /// Builder pattern: set operator credential lifetime
    pub fn with_operator_ttl(mut self, ttl: Duration) -> Self {
        self.operator_ttl_ms = ttl.as_millis() as i64;
        self
    }

    /// Builder pattern: set device search debounce
    pub fn with_search_debounce(mut self, debounce: Duration) -> Self {
        self.search_debounce_ms = debounce.as_millis() as u64;
        self
    }

    /// Builder pattern: set minimum device search length
    pub fn with_min_search_len(mut self, len: usize) -> Self {
        self.min_search_len = len;
        self
    }

    /// Builder pattern: set background probe interval
    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval_secs = interval.as_secs();
        self
    }

    /// Builder pattern: set request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs();
        self
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Join a request path onto the base URL
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}
