//! Configuration for talking to the recognition service.
//!
//! All client behaviour is controlled through [`ClientConfig`], built via its
//! [`ClientConfigBuilder`]. Setters normalise their input; [`ClientConfigBuilder::build`]
//! rejects combinations that cannot work (no base URL, zero interval).

use crate::error::ConvertError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable holding the service base URL.
///
/// Read at compile time for the default and again at run time by
/// [`ClientConfig::from_env`].
pub const API_URL_ENV: &str = "SCORE2XML_API_URL";

/// Base URL baked in at build time, if `SCORE2XML_API_URL` was set then.
const BUILD_TIME_API_URL: Option<&str> = option_env!("SCORE2XML_API_URL");

/// Configuration for a conversion session.
///
/// # Example
/// ```rust
/// use score2musicxml::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::builder()
///     .base_url("https://omr.example.org/")
///     .poll_interval(Duration::from_secs(2))
///     .max_poll_attempts(120)
///     .build()
///     .unwrap();
/// assert_eq!(config.base_url, "https://omr.example.org");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Service root, without trailing slash. Endpoint paths are appended to it.
    pub base_url: String,

    /// Delay between status checks. Default: 5 s.
    ///
    /// The first check happens one interval after the job is accepted.
    pub poll_interval: Duration,

    /// Give up after this many status checks. Default: None (poll until the
    /// service reports a terminal status).
    pub max_poll_attempts: Option<u32>,

    /// Timeout applied to every HTTP request. Default: None.
    pub request_timeout: Option<Duration>,

    /// Extension given to the downloaded file. Default: `musicxml`.
    pub target_extension: String,

    /// Send `ngrok-skip-browser-warning` on every request. Default: true.
    ///
    /// Development backends sit behind an ngrok tunnel, which otherwise
    /// answers the first request with an HTML interstitial.
    pub tunnel_bypass_header: bool,

    /// Reject files that are not PNG, JPEG, GIF or PDF. Default: false.
    pub validate_format: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: BUILD_TIME_API_URL
                .map(normalise_base_url)
                .unwrap_or_default(),
            poll_interval: Duration::from_secs(5),
            max_poll_attempts: None,
            request_timeout: None,
            target_extension: "musicxml".to_string(),
            tunnel_bypass_header: true,
            validate_format: false,
        }
    }
}

impl ClientConfig {
    /// Create a new builder for `ClientConfig`.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: Self::default(),
        }
    }

    /// Defaults, with the base URL taken from `SCORE2XML_API_URL` at run time
    /// when it is set.
    pub fn from_env() -> Result<Self, ConvertError> {
        let mut builder = Self::builder();
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                builder = builder.base_url(url);
            }
        }
        builder.build()
    }

    /// `POST` endpoint receiving the multipart upload.
    pub fn submit_url(&self) -> String {
        format!("{}/api/sendFile", self.base_url)
    }

    /// `GET` endpoint reporting a job's status message.
    pub fn status_url(&self, job_id: &str) -> String {
        format!("{}/api/checkFileStatus/{}", self.base_url, job_id)
    }

    /// `GET` endpoint serving a finished job's artifact.
    pub fn result_url(&self, job_id: &str) -> String {
        format!("{}/api/getFile/{}", self.base_url, job_id)
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn base_url(mut self, url: impl AsRef<str>) -> Self {
        self.config.base_url = normalise_base_url(url.as_ref());
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn max_poll_attempts(mut self, n: u32) -> Self {
        self.config.max_poll_attempts = Some(n.max(1));
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    pub fn target_extension(mut self, ext: impl AsRef<str>) -> Self {
        self.config.target_extension = ext.as_ref().trim().trim_start_matches('.').to_string();
        self
    }

    pub fn tunnel_bypass_header(mut self, v: bool) -> Self {
        self.config.tunnel_bypass_header = v;
        self
    }

    pub fn validate_format(mut self, v: bool) -> Self {
        self.config.validate_format = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ClientConfig, ConvertError> {
        let c = &self.config;
        if c.base_url.is_empty() {
            return Err(ConvertError::InvalidConfig(format!(
                "no service URL configured; pass --api-url or set {API_URL_ENV}"
            )));
        }
        if !(c.base_url.starts_with("http://") || c.base_url.starts_with("https://")) {
            return Err(ConvertError::InvalidConfig(format!(
                "service URL must start with http:// or https://, got '{}'",
                c.base_url
            )));
        }
        if c.poll_interval.is_zero() {
            return Err(ConvertError::InvalidConfig(
                "poll interval must be greater than zero".into(),
            ));
        }
        if c.target_extension.is_empty() {
            return Err(ConvertError::InvalidConfig(
                "target extension must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

fn normalise_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}
