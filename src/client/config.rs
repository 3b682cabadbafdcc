use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::middleware::LogMode;

/// Settings for [`Client::from_config`](super::Client::from_config).
///
/// | Field             | Default |
/// |-------------------|---------|
/// | `base_url`        | none    |
/// | `retry_count`     | `0`     |
/// | `validate_status` | `true`  |
/// | `log_mode`        | `debug` |
/// | `headers`         | empty   |
///
/// # Examples
///
/// ```
/// use reqcache::client::ClientConfig;
///
/// let config: ClientConfig = serde_json::from_str(
///     r#"{"base_url": "http://api.test", "retry_count": 2,
///         "headers": {"Accept": "application/json"}}"#,
/// )
/// .unwrap();
/// assert_eq!(config.retry_count, 2);
/// assert!(config.validate_status);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: Option<String>,
    /// Extra attempts after a failed one.
    pub retry_count: usize,
    pub validate_status: bool,
    pub log_mode: LogMode,
    /// Sent with every request that does not set them itself.
    pub headers: BTreeMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            retry_count: 0,
            validate_status: true,
            log_mode: LogMode::Debug,
            headers: BTreeMap::new(),
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub fn retry_count(mut self, count: usize) -> Self {
        self.retry_count = count;
        self
    }

    #[must_use]
    pub fn validate_status(mut self, validate: bool) -> Self {
        self.validate_status = validate;
        self
    }

    #[must_use]
    pub fn log_mode(mut self, mode: LogMode) -> Self {
        self.log_mode = mode;
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}
