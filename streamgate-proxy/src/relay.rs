//! Manifest and segment relay
//!
//! Each request re-resolves access on its own. The target checks below hold
//! for hand-crafted targets too, not only for URLs the rewriter produced.

use axum::{
    body::Body,
    http::{
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE},
        HeaderMap, StatusCode,
    },
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use streamgate_core::models::ResolvedAccess;
use streamgate_core::service::StreamAccessService;
use streamgate_core::{Error, Result};

use crate::fetch::UpstreamClient;
use crate::playlist::{is_playlist_url, rewrite_playlist, PLAYLIST_CONTENT_TYPE};

/// What the edge sends back for a successful playback request
#[derive(Debug)]
pub enum RelayResponse {
    /// Rewritten playlist text
    Playlist(String),
    /// Upstream segment, streamed through unbuffered
    Segment(reqwest::Response),
}

impl IntoResponse for RelayResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Playlist(body) => (
                [
                    (CONTENT_TYPE, PLAYLIST_CONTENT_TYPE),
                    // Embeds a playback token
                    (CACHE_CONTROL, "no-store"),
                ],
                body,
            )
                .into_response(),
            Self::Segment(upstream) => {
                let mut headers = HeaderMap::new();
                for name in [CONTENT_TYPE, CONTENT_LENGTH] {
                    if let Some(value) = upstream.headers().get(&name) {
                        headers.insert(name, value.clone());
                    }
                }
                (
                    StatusCode::OK,
                    headers,
                    Body::from_stream(upstream.bytes_stream()),
                )
                    .into_response()
            }
        }
    }
}

/// Parse a relay target, resolving relative targets against the origin.
pub fn resolve_target(raw: &str, origin: &Url) -> Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::InvalidInput("Missing target".to_string()));
    }
    match Url::parse(raw) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => origin
            .join(raw)
            .map_err(|e| Error::InvalidInput(format!("Invalid target: {e}"))),
        Err(e) => Err(Error::InvalidInput(format!("Invalid target: {e}"))),
    }
}

/// The only gate on which hosts the relay may contact: the host must match the
/// allowed set and the scheme must equal the origin's.
pub fn authorize_target(access: &ResolvedAccess, target: &Url) -> Result<()> {
    let Some(host) = target.host_str() else {
        return Err(Error::Forbidden("Target has no host".to_string()));
    };

    if !access.allowed_hosts.contains(host) {
        warn!(stream_id = %access.stream_id, host, "Relay target host not allowed");
        return Err(Error::Forbidden(format!("Target host {host} is not allowed")));
    }

    if target.scheme() != access.origin_url.scheme() {
        warn!(
            stream_id = %access.stream_id,
            scheme = target.scheme(),
            expected = access.origin_url.scheme(),
            "Relay target scheme mismatch"
        );
        return Err(Error::Forbidden(format!(
            "Target scheme {} is not allowed",
            target.scheme()
        )));
    }

    Ok(())
}

#[derive(Debug, Clone)]
pub struct PlaybackRelay {
    access: Arc<StreamAccessService>,
    upstream: UpstreamClient,
}

impl PlaybackRelay {
    #[must_use]
    pub fn new(access: Arc<StreamAccessService>, upstream: UpstreamClient) -> Self {
        Self { access, upstream }
    }

    /// Fetch the stream's origin playlist and rewrite it for the edge.
    pub async fn manifest(&self, stream_id: &str, token: &str) -> Result<RelayResponse> {
        let access = self.access.resolve(stream_id, token).await?;
        self.rewritten_playlist(&access, &access.origin_url, token).await
    }

    /// Relay one segment (or nested playlist) named by `target`.
    pub async fn segment(&self, stream_id: &str, token: &str, target: &str) -> Result<RelayResponse> {
        let access = self.access.resolve(stream_id, token).await?;

        let target = resolve_target(target, &access.origin_url)?;
        authorize_target(&access, &target)?;

        if is_playlist_url(&target) {
            return self.rewritten_playlist(&access, &target, token).await;
        }

        let upstream = self.upstream.open_segment(&target, &access).await?;
        debug!(stream_id = %access.stream_id, target = %target, "Relaying segment");
        Ok(RelayResponse::Segment(upstream))
    }

    async fn rewritten_playlist(
        &self,
        access: &ResolvedAccess,
        url: &Url,
        token: &str,
    ) -> Result<RelayResponse> {
        let (base, text) = self.upstream.fetch_playlist(url, access).await?;
        let rewritten = rewrite_playlist(&text, &base, &access.stream_id, token);
        debug!(stream_id = %access.stream_id, playlist = %base, "Playlist rewritten");
        Ok(RelayResponse::Playlist(rewritten))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use streamgate_core::config::PlaybackConfig;
    use streamgate_core::models::{AllowedHostSet, Stream};
    use streamgate_core::repository::InMemoryStreamCatalog;
    use streamgate_core::service::MemoryTokenStore;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn access(origin: &str, hosts: &[&str]) -> ResolvedAccess {
        let origin_url = Url::parse(origin).unwrap();
        let mut allowed_hosts = AllowedHostSet::new(hosts);
        allowed_hosts.insert(origin_url.host_str().unwrap());
        ResolvedAccess {
            stream_id: "s1".to_string(),
            origin_url,
            allowed_hosts,
        }
    }

    #[test]
    fn test_resolve_target() {
        let origin = Url::parse("https://cdn.test/path/master.m3u8").unwrap();

        assert_eq!(
            resolve_target("seg.ts", &origin).unwrap().as_str(),
            "https://cdn.test/path/seg.ts"
        );
        assert_eq!(
            resolve_target("https://other.test/x.ts", &origin).unwrap().as_str(),
            "https://other.test/x.ts"
        );
        assert!(matches!(
            resolve_target("", &origin).unwrap_err(),
            Error::InvalidInput(_)
        ));
        assert!(matches!(
            resolve_target("http://[::1", &origin).unwrap_err(),
            Error::InvalidInput(_)
        ));
    }

    #[test]
    fn test_authorize_target_host_rules() {
        let access = access("https://origin.test/master.m3u8", &[".cdn.test"]);

        let ok = |u: &str| authorize_target(&access, &Url::parse(u).unwrap());
        assert!(ok("https://origin.test/a.ts").is_ok());
        assert!(ok("https://edge.cdn.test/a.ts").is_ok());
        assert!(matches!(ok("https://evil.test/a.ts"), Err(Error::Forbidden(_))));
        assert!(matches!(ok("https://evilcdn.test/a.ts"), Err(Error::Forbidden(_))));
        // Userinfo does not change the host
        assert!(matches!(
            ok("https://origin.test@evil.test/a.ts"),
            Err(Error::Forbidden(_))
        ));
    }

    #[test]
    fn test_authorize_target_scheme_must_match_origin() {
        let access = access("https://origin.test/master.m3u8", &[]);

        let err = authorize_target(&access, &Url::parse("http://origin.test/a.ts").unwrap());
        assert!(matches!(err, Err(Error::Forbidden(_))));
    }

    #[test]
    fn test_authorize_target_without_host() {
        let access = access("https://origin.test/master.m3u8", &[]);
        let err = authorize_target(&access, &Url::parse("data:text/plain,hi").unwrap());
        assert!(matches!(err, Err(Error::Forbidden(_))));
    }

    struct Fixture {
        server: MockServer,
        relay: PlaybackRelay,
        access: Arc<StreamAccessService>,
    }

    async fn fixture() -> Fixture {
        let server = MockServer::start().await;
        let stream = Stream {
            id: "s1".to_string(),
            slug: "first".to_string(),
            title: "First".to_string(),
            synopsis: String::new(),
            poster_url: None,
            availability_start: None,
            availability_end: None,
            is_visible: true,
            origin_url: Url::parse(&format!("{}/hls/master.m3u8", server.uri())).unwrap(),
            allowed_hosts: Vec::new(),
            captions: Vec::new(),
        };
        let access = Arc::new(StreamAccessService::new(
            Arc::new(InMemoryStreamCatalog::with_streams([stream])),
            Arc::new(MemoryTokenStore::new()),
            Duration::from_secs(300),
        ));
        let upstream = UpstreamClient::new(&PlaybackConfig::default()).unwrap();
        let relay = PlaybackRelay::new(access.clone(), upstream);
        Fixture {
            server,
            relay,
            access,
        }
    }

    async fn token(fx: &Fixture) -> String {
        let (_, issued) = fx.access.issue_token("s1", None).await.unwrap();
        issued.token.into_inner()
    }

    #[tokio::test]
    async fn test_segment_streams_upstream_bytes_and_limited_headers() {
        let fx = fixture().await;
        Mock::given(method("GET"))
            .and(path("/hls/seg1.ts"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(vec![0x47u8, 0x40, 0x00, 0x10], "video/mp2t")
                    .insert_header("Set-Cookie", "upstream=secret")
                    .insert_header("X-Upstream", "1"),
            )
            .mount(&fx.server)
            .await;
        let token = token(&fx).await;

        let response = fx
            .relay
            .segment("s1", &token, "seg1.ts")
            .await
            .unwrap()
            .into_response();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "video/mp2t");
        assert_eq!(response.headers().get(CONTENT_LENGTH).unwrap(), "4");
        assert!(response.headers().get("set-cookie").is_none());
        assert!(response.headers().get("x-upstream").is_none());

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body.as_ref(), &[0x47u8, 0x40, 0x00, 0x10]);
    }

    #[tokio::test]
    async fn test_segment_rejects_disallowed_host_with_valid_token() {
        let fx = fixture().await;
        let token = token(&fx).await;

        let err = fx
            .relay
            .segment("s1", &token, "http://evil.test/seg1.ts")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_segment_rejects_scheme_change_on_allowed_host() {
        let fx = fixture().await;
        let token = token(&fx).await;
        let target = fx.server.uri().replacen("http://", "https://", 1) + "/hls/seg1.ts";

        let err = fx.relay.segment("s1", &token, &target).await.unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_segment_requires_valid_token() {
        let fx = fixture().await;

        let err = fx.relay.segment("s1", "bogus", "seg1.ts").await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_manifest_is_rewritten() {
        let fx = fixture().await;
        Mock::given(method("GET"))
            .and(path("/hls/master.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string("#EXTM3U\nseg1.ts\n"))
            .mount(&fx.server)
            .await;
        let token = token(&fx).await;

        let RelayResponse::Playlist(body) = fx.relay.manifest("first", &token).await.unwrap() else {
            panic!("expected a playlist");
        };
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines[0], "#EXTM3U");
        assert!(lines[1].starts_with("/streams/s1/segment?token="));
    }

    #[tokio::test]
    async fn test_nested_playlist_is_rewritten_against_itself() {
        let fx = fixture().await;
        Mock::given(method("GET"))
            .and(path("/hls/720p/index.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string("#EXTM3U\nchunk0.ts\n"))
            .mount(&fx.server)
            .await;
        let token = token(&fx).await;

        let response = fx
            .relay
            .segment("s1", &token, "720p/index.m3u8")
            .await
            .unwrap()
            .into_response();
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            PLAYLIST_CONTENT_TYPE
        );
        assert_eq!(response.headers().get(CACHE_CONTROL).unwrap(), "no-store");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        let expected = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("target", &format!("{}/hls/720p/chunk0.ts", fx.server.uri()))
            .finish();
        assert!(body.contains(&expected));
    }

    #[tokio::test]
    async fn test_upstream_failure_is_bad_gateway() {
        let fx = fixture().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&fx.server)
            .await;
        let token = token(&fx).await;

        let err = fx.relay.segment("s1", &token, "seg1.ts").await.unwrap_err();
        assert!(matches!(err, Error::BadGateway(_)));
    }
}
