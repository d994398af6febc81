//! Catalog browsing and playback token issuance

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Path, State},
    http::HeaderMap,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use streamgate_core::models::{Caption, Stream};
use streamgate_proxy::manifest_path;

use crate::http::{
    error::{AppError, AppResult},
    middleware::viewer_identity,
    AppState,
};

/// Public view of a stream. Never exposes the origin or its hosts.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSummary {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub synopsis: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_end: Option<DateTime<Utc>>,
    pub available: bool,
    pub captions: Vec<CaptionResponse>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptionResponse {
    pub language_code: String,
    pub label: String,
    pub url: String,
}

impl From<Caption> for CaptionResponse {
    fn from(caption: Caption) -> Self {
        Self {
            language_code: caption.language_code,
            label: caption.label,
            url: caption.caption_url,
        }
    }
}

impl StreamSummary {
    fn from_stream(stream: Stream, now: DateTime<Utc>) -> Self {
        Self {
            available: stream.is_available(now),
            id: stream.id,
            slug: stream.slug,
            title: stream.title,
            synopsis: stream.synopsis,
            poster_url: stream.poster_url,
            availability_start: stream.availability_start,
            availability_end: stream.availability_end,
            captions: stream.captions.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackTokenResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub manifest_url: String,
}

pub fn create_streams_router() -> Router<AppState> {
    Router::new()
        .route("/streams", get(list_streams))
        .route("/streams/{id}", get(get_stream))
        .route("/streams/{id}/playback-token", post(issue_playback_token))
}

/// List streams currently open for playback
pub async fn list_streams(State(state): State<AppState>) -> AppResult<Json<Vec<StreamSummary>>> {
    let now = Utc::now();
    let streams = state.access.list_available().await?;
    Ok(Json(
        streams
            .into_iter()
            .map(|s| StreamSummary::from_stream(s, now))
            .collect(),
    ))
}

/// Public details of one stream. Hidden streams read as unknown.
pub async fn get_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<StreamSummary>> {
    let stream = state.access.get_stream(&id).await?;
    if !stream.is_visible {
        return Err(AppError::not_found(format!("Stream {id} not found")));
    }
    Ok(Json(StreamSummary::from_stream(stream, Utc::now())))
}

/// Issue a playback token scoped to the calling viewer
pub async fn issue_playback_token(
    State(state): State<AppState>,
    Path(id): Path<String>,
    remote: Option<Extension<ConnectInfo<SocketAddr>>>,
    headers: HeaderMap,
) -> AppResult<Json<PlaybackTokenResponse>> {
    let viewer = viewer_identity(&headers, remote.map(|Extension(ConnectInfo(addr))| addr));
    let (stream, issued) = state.access.issue_token(&id, Some(&viewer)).await?;

    info!(
        stream_id = %stream.id,
        viewer = %viewer,
        token = %issued.token.redacted(),
        "Playback token issued"
    );

    Ok(Json(PlaybackTokenResponse {
        manifest_url: manifest_path(&stream.id, issued.token.as_str()),
        token: issued.token.into_inner(),
        expires_at: issued.expires_at,
    }))
}
