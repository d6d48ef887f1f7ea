//! Client for the recognition service's three endpoints.
//!
//! [`JobService`] is the seam between the session state machine and the
//! network. [`HttpJobService`] is the real implementation; tests plug in
//! scripted services so the state machine can be driven without sockets.

use crate::config::ClientConfig;
use crate::error::ConvertError;
use crate::file::SelectedFile;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Header that makes an ngrok tunnel skip its browser interstitial.
pub const TUNNEL_BYPASS_HEADER: &str = "ngrok-skip-browser-warning";

/// Body of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub file_id: String,
}

/// Body of a status check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub message: String,
}

/// Operations the session needs from the remote service.
#[async_trait]
pub trait JobService: Send + Sync {
    /// Upload `file`; returns the job id the service assigned.
    async fn submit(&self, file: &SelectedFile) -> Result<String, ConvertError>;

    /// Current status message for `job_id`.
    async fn status(&self, job_id: &str) -> Result<String, ConvertError>;

    /// Where the finished artifact for `job_id` can be fetched.
    fn result_url(&self, job_id: &str) -> String;

    /// Download the artifact at `url` (a value returned by [`Self::result_url`]).
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ConvertError>;
}

/// [`JobService`] over HTTP with reqwest.
#[derive(Debug, Clone)]
pub struct HttpJobService {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpJobService {
    pub fn new(config: &ClientConfig) -> Result<Self, ConvertError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("score2musicxml/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ConvertError::Internal(format!("building HTTP client: {e}")))?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn decorate(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.config.tunnel_bypass_header {
            request.header(TUNNEL_BYPASS_HEADER, "any-value")
        } else {
            request
        }
    }

    async fn send(
        &self,
        url: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ConvertError> {
        let response = self
            .decorate(request)
            .send()
            .await
            .map_err(|e| transport_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConvertError::Server {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl JobService for HttpJobService {
    async fn submit(&self, file: &SelectedFile) -> Result<String, ConvertError> {
        let url = self.config.submit_url();
        let part = Part::bytes(file.bytes.clone())
            .file_name(file.name.clone())
            .mime_str(&file.mime)
            .map_err(|e| ConvertError::Internal(format!("invalid MIME '{}': {e}", file.mime)))?;
        let form = Form::new().part("file", part);

        debug!("POST {} ({} bytes)", url, file.len());
        let response = self.send(&url, self.client.post(&url).multipart(form)).await?;
        let body: SubmitResponse = read_json(&url, response).await?;
        Ok(body.file_id)
    }

    async fn status(&self, job_id: &str) -> Result<String, ConvertError> {
        let url = self.config.status_url(job_id);
        let response = self.send(&url, self.client.get(&url)).await?;
        let body: StatusResponse = read_json(&url, response).await?;
        Ok(body.message)
    }

    fn result_url(&self, job_id: &str) -> String {
        self.config.result_url(job_id)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ConvertError> {
        debug!("GET {}", url);
        let response = self.send(url, self.client.get(url)).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(url, e))?;
        Ok(bytes.to_vec())
    }
}

fn transport_error(url: &str, e: reqwest::Error) -> ConvertError {
    ConvertError::Transport {
        url: url.to_string(),
        reason: e.to_string(),
    }
}

/// Read the body as text first so a non-JSON body (an HTML error page from a
/// proxy, say) is reported as a protocol error rather than a transport one.
async fn read_json<T: serde::de::DeserializeOwned>(
    url: &str,
    response: reqwest::Response,
) -> Result<T, ConvertError> {
    let text = response
        .text()
        .await
        .map_err(|e| transport_error(url, e))?;
    serde_json::from_str(&text).map_err(|e| ConvertError::Protocol {
        url: url.to_string(),
        detail: format!("{e} in body {:?}", truncate(&text, 120)),
    })
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_response_parses_file_id() {
        let body: SubmitResponse = serde_json::from_str(r#"{"file_id":"abc"}"#).unwrap();
        assert_eq!(body.file_id, "abc");
    }

    #[test]
    fn status_response_ignores_extra_fields() {
        let body: StatusResponse =
            serde_json::from_str(r#"{"message":"Extracting noteheads","eta":12}"#).unwrap();
        assert_eq!(body.message, "Extracting noteheads");
    }

    #[test]
    fn status_response_requires_message() {
        assert!(serde_json::from_str::<StatusResponse>(r#"{"status":"ok"}"#).is_err());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }

    #[test]
    fn result_url_uses_config() {
        let config = ClientConfig::builder()
            .base_url("http://svc")
            .build()
            .unwrap();
        let service = HttpJobService::new(&config).unwrap();
        assert_eq!(service.result_url("abc"), "http://svc/api/getFile/abc");
    }
}
