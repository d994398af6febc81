//! Stream access resolution and token issuance
//!
//! Every manifest and segment request re-resolves access from scratch: a
//! stream taken down or a token that lapsed mid-session is honored on the very
//! next request. Nothing here is cached across requests.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::models::token::redact;
use crate::models::{IssuedToken, ResolvedAccess, Stream};
use crate::repository::StreamCatalog;
use crate::service::TokenStore;
use crate::{Error, Result};

#[derive(Clone)]
pub struct StreamAccessService {
    catalog: Arc<dyn StreamCatalog>,
    tokens: Arc<dyn TokenStore>,
    token_ttl: Duration,
}

impl std::fmt::Debug for StreamAccessService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamAccessService")
            .field("token_backend", &self.tokens.backend_name())
            .field("token_ttl", &self.token_ttl)
            .finish_non_exhaustive()
    }
}

impl StreamAccessService {
    #[must_use]
    pub fn new(
        catalog: Arc<dyn StreamCatalog>,
        tokens: Arc<dyn TokenStore>,
        token_ttl: Duration,
    ) -> Self {
        Self {
            catalog,
            tokens,
            token_ttl,
        }
    }

    #[must_use]
    pub fn token_ttl(&self) -> Duration {
        self.token_ttl
    }

    #[must_use]
    pub fn token_backend(&self) -> &'static str {
        self.tokens.backend_name()
    }

    /// Look up a stream by id or slug
    pub async fn get_stream(&self, id_or_slug: &str) -> Result<Stream> {
        self.catalog
            .get_stream(id_or_slug)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Stream {id_or_slug} not found")))
    }

    /// Streams currently open for playback
    pub async fn list_available(&self) -> Result<Vec<Stream>> {
        let now = Utc::now();
        let mut streams = self.catalog.list_streams().await?;
        streams.retain(|stream| stream.is_available(now));
        Ok(streams)
    }

    /// Issue a playback token for an available stream.
    ///
    /// The token is bound to the stream's canonical id even when the caller
    /// addressed it by slug.
    pub async fn issue_token(
        &self,
        id_or_slug: &str,
        viewer_id: Option<&str>,
    ) -> Result<(Stream, IssuedToken)> {
        let stream = self.available_stream(id_or_slug, Utc::now()).await?;

        let token = self.tokens.issue(&stream.id, viewer_id, self.token_ttl).await?;
        let ttl = chrono::Duration::from_std(self.token_ttl)
            .map_err(|e| Error::Internal(format!("Token TTL out of range: {e}")))?;

        let issued = IssuedToken {
            token,
            expires_at: Utc::now() + ttl,
        };
        Ok((stream, issued))
    }

    /// Resolve access for one manifest or segment request.
    ///
    /// Fails with `NotFound`, then `Unavailable`, then `Unauthorized`, in that
    /// order of precedence.
    pub async fn resolve(&self, id_or_slug: &str, token: &str) -> Result<ResolvedAccess> {
        self.resolve_at(id_or_slug, token, Utc::now()).await
    }

    pub(crate) async fn resolve_at(
        &self,
        id_or_slug: &str,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<ResolvedAccess> {
        let stream = self.available_stream(id_or_slug, now).await?;

        if !self.tokens.validate(token, &stream.id).await {
            debug!(
                stream_id = %stream.id,
                token = %redact(token),
                "Playback token rejected"
            );
            return Err(Error::Unauthorized("Invalid or expired playback token".to_string()));
        }

        Ok(ResolvedAccess {
            allowed_hosts: stream.allowed_host_set(),
            origin_url: stream.origin_url,
            stream_id: stream.id,
        })
    }

    async fn available_stream(&self, id_or_slug: &str, now: DateTime<Utc>) -> Result<Stream> {
        let stream = self.get_stream(id_or_slug).await?;
        if !stream.is_available(now) {
            return Err(Error::Unavailable(format!(
                "Stream {} is not currently available",
                stream.id
            )));
        }
        Ok(stream)
    }
}
