//! Manifest and segment routes
//!
//! The token travels as a query parameter because the rewritten playlist URLs
//! are fetched by HLS players that cannot add headers.

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;

use crate::http::{
    error::{AppError, AppResult},
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct ManifestQuery {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SegmentQuery {
    pub token: Option<String>,
    pub target: Option<String>,
}

pub fn create_playback_router() -> Router<AppState> {
    Router::new()
        .route("/streams/{id}/manifest.m3u8", get(get_manifest))
        .route("/streams/{id}/segment", get(get_segment))
}

fn required<'a>(value: Option<&'a str>, name: &str) -> AppResult<&'a str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::bad_request(format!("Missing {name} parameter")))
}

/// Fetch the origin playlist rewritten for the edge
pub async fn get_manifest(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ManifestQuery>,
) -> AppResult<Response> {
    let token = required(query.token.as_deref(), "token")?;

    let relayed = state
        .relay
        .manifest(&id, token)
        .await
        .map_err(AppError::playback)?;
    Ok(relayed.into_response())
}

/// Relay one segment or nested playlist
pub async fn get_segment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SegmentQuery>,
) -> AppResult<Response> {
    let token = required(query.token.as_deref(), "token")?;
    let target = required(query.target.as_deref(), "target")?;

    let relayed = state
        .relay
        .segment(&id, token, target)
        .await
        .map_err(AppError::playback)?;
    Ok(relayed.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_required_parameter() {
        assert_eq!(required(Some(" abc "), "token").unwrap(), "abc");

        let err = required(Some("  "), "token").unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("token"));

        assert!(required(None, "target").is_err());
    }
}
