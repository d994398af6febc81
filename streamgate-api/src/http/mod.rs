pub mod error;
pub mod health;
pub mod middleware;
pub mod playback;
pub mod streams;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Method, Request, StatusCode},
    Router,
};
use redis::aio::ConnectionManager;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use streamgate_core::bootstrap::Services;
use streamgate_core::config::ServerConfig;
use streamgate_core::service::{AdmissionLimiter, StreamAccessService};
use streamgate_core::Config;
use streamgate_proxy::{PlaybackRelay, UpstreamClient};

pub use error::{AppError, AppResult};

/// Correlation id header, generated when the client sends none
pub const X_CORRELATION_ID: HeaderName = HeaderName::from_static("x-correlation-id");

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub access: Arc<StreamAccessService>,
    pub relay: Arc<PlaybackRelay>,
    pub limiter: Option<Arc<dyn AdmissionLimiter>>,
    pub redis: Option<ConnectionManager>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wire handlers to initialized services
    pub fn new(services: &Services, config: Config) -> streamgate_core::Result<Self> {
        let upstream = UpstreamClient::new(&config.playback)?;
        Ok(Self {
            relay: Arc::new(PlaybackRelay::new(services.access.clone(), upstream)),
            access: services.access.clone(),
            limiter: services.limiter.clone(),
            redis: services.redis.clone(),
            config: Arc::new(config),
        })
    }
}

/// Create the HTTP router with all routes
///
/// Health sits outside admission control; everything under `/streams` is
/// throttled per client.
pub fn create_router(state: AppState) -> Router {
    let throttled = Router::new()
        .merge(streams::create_streams_router())
        .merge(playback::create_playback_router())
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::admission_middleware,
        ));

    let request_timeout = Duration::from_secs(state.config.server.request_timeout_seconds.max(1));
    let cors = cors_layer(&state.config.server);

    let router = Router::new()
        .merge(health::create_health_router())
        .merge(throttled)
        .layer(axum::middleware::from_fn(middleware::security_headers_middleware))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(cors)
        .layer(PropagateRequestIdLayer::new(X_CORRELATION_ID))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            let correlation_id = request
                .headers()
                .get(&X_CORRELATION_ID)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            // Path only: the query carries playback tokens
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                path = %request.uri().path(),
                correlation_id,
            )
        }))
        .layer(SetRequestIdLayer::new(X_CORRELATION_ID, MakeRequestUuid));

    router.with_state(state)
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([X_CORRELATION_ID]);

    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}
