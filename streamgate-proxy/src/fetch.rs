//! Upstream HTTP client
//!
//! Redirects are followed by hand so every hop is checked against the same
//! allowed-host and scheme rules as the original target.

use reqwest::header::{CONTENT_LENGTH, LOCATION};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use streamgate_core::config::PlaybackConfig;
use streamgate_core::models::ResolvedAccess;
use streamgate_core::{Error, Result};

use crate::relay::authorize_target;

const MAX_REDIRECTS: usize = 5;

#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    request_timeout: Duration,
    max_playlist_bytes: usize,
}

impl UpstreamClient {
    pub fn new(config: &PlaybackConfig) -> Result<Self> {
        let request_timeout = Duration::from_secs(config.upstream_timeout_seconds.max(1));
        let client = reqwest::Client::builder()
            .user_agent(concat!("streamgate/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(
                config.upstream_connect_timeout_seconds.max(1),
            ))
            // Segment bodies stream for as long as they keep making progress
            .read_timeout(request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            request_timeout,
            max_playlist_bytes: config.max_manifest_bytes,
        })
    }

    /// Fetch a playlist body, bounded by `max_manifest_bytes`.
    ///
    /// Returns the final URL after redirects, which relative references in the
    /// body resolve against.
    pub async fn fetch_playlist(&self, url: &Url, access: &ResolvedAccess) -> Result<(Url, String)> {
        let (final_url, mut response) = self.send(url, access, Some(self.request_timeout)).await?;

        if let Some(len) = response.content_length() {
            if len > self.max_playlist_bytes as u64 {
                warn!(url = %final_url, len, limit = self.max_playlist_bytes, "Upstream playlist too large");
                return Err(Error::BadGateway("Upstream playlist too large".to_string()));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            warn!(url = %final_url, error = %e, "Failed reading upstream playlist");
            Error::BadGateway("Failed to read upstream playlist".to_string())
        })? {
            if body.len() + chunk.len() > self.max_playlist_bytes {
                warn!(url = %final_url, limit = self.max_playlist_bytes, "Upstream playlist too large");
                return Err(Error::BadGateway("Upstream playlist too large".to_string()));
            }
            body.extend_from_slice(&chunk);
        }

        let text = String::from_utf8(body)
            .map_err(|_| Error::BadGateway("Upstream playlist is not valid UTF-8".to_string()))?;
        Ok((final_url, text))
    }

    /// Open a streaming response for a media segment.
    pub async fn open_segment(&self, url: &Url, access: &ResolvedAccess) -> Result<reqwest::Response> {
        let (_, response) = self.send(url, access, None).await?;
        Ok(response)
    }

    /// GET `url`, following redirects that stay inside the allowed hosts.
    /// Transport failures and statuses >= 400 become `BadGateway`.
    async fn send(
        &self,
        url: &Url,
        access: &ResolvedAccess,
        timeout: Option<Duration>,
    ) -> Result<(Url, reqwest::Response)> {
        let mut current = url.clone();

        for _ in 0..=MAX_REDIRECTS {
            let mut request = self.client.get(current.clone());
            if let Some(timeout) = timeout {
                request = request.timeout(timeout);
            }

            let response = request.send().await.map_err(|e| {
                warn!(url = %current, error = %e, "Upstream request failed");
                Error::BadGateway("Upstream request failed".to_string())
            })?;
            let status = response.status();

            if status.is_redirection() {
                let next = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|location| current.join(location).ok())
                    .ok_or_else(|| {
                        Error::BadGateway(format!("Upstream returned {status} without a usable Location"))
                    })?;

                authorize_target(access, &next)?;
                debug!(from = %current, to = %next, "Following upstream redirect");
                current = next;
                continue;
            }

            if status.as_u16() >= 400 {
                warn!(url = %current, status = status.as_u16(), "Upstream returned error status");
                return Err(Error::BadGateway(format!("Upstream returned status {}", status.as_u16())));
            }

            debug!(
                url = %current,
                status = status.as_u16(),
                content_length = ?response.headers().get(CONTENT_LENGTH),
                "Upstream response"
            );
            return Ok((current, response));
        }

        Err(Error::BadGateway("Too many upstream redirects".to_string()))
    }
}
