//! Admission control, security headers and client identity helpers

use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{
        header::{COOKIE, REFERRER_POLICY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS},
        HeaderMap, HeaderValue,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::http::{AppError, AppState};

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_VIEWER_ID: &str = "x-viewer-id";
const VIEWER_COOKIE: &str = "viewer_id";

/// Rate limit key for a request: the first `X-Forwarded-For` hop, else the
/// socket address. `None` when neither is known.
pub fn client_key(headers: &HeaderMap, remote: Option<SocketAddr>) -> Option<String> {
    forwarded_for(headers)
        .or_else(|| remote.map(|addr| addr.ip().to_string()))
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get(X_FORWARDED_FOR)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
}

/// Identity a playback token is scoped to.
///
/// `X-Viewer-ID` header, then the `viewer_id` cookie, then `ip:<client ip>`,
/// then `anonymous`. Only scopes issuance; never used for authorization.
pub fn viewer_identity(headers: &HeaderMap, remote: Option<SocketAddr>) -> String {
    if let Some(id) = headers
        .get(X_VIEWER_ID)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return id.to_string();
    }

    if let Some(id) = viewer_cookie(headers) {
        return id;
    }

    let ip = forwarded_for(headers)
        .and_then(|ip| ip.parse::<IpAddr>().ok())
        .or_else(|| remote.map(|addr| addr.ip()));
    match ip {
        Some(ip) => format!("ip:{ip}"),
        None => "anonymous".to_string(),
    }
}

fn viewer_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| name.trim() == VIEWER_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Admission control applied before any playback work.
///
/// Requests with no derivable client key are admitted.
pub async fn admission_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(limiter) = state.limiter.as_ref() else {
        return next.run(request).await;
    };

    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);
    let Some(key) = client_key(request.headers(), remote) else {
        return next.run(request).await;
    };

    if let Err(err) = limiter.allow(&key).await.check() {
        debug!(client = %key, error = %err, "Request rejected by admission limiter");
        return AppError::from(err).into_response();
    }

    next.run(request).await
}

/// Security headers middleware
pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers
        .entry(X_CONTENT_TYPE_OPTIONS)
        .or_insert(HeaderValue::from_static("nosniff"));
    headers
        .entry(X_FRAME_OPTIONS)
        .or_insert(HeaderValue::from_static("DENY"));
    headers
        .entry(REFERRER_POLICY)
        .or_insert(HeaderValue::from_static("no-referrer"));

    response
}
