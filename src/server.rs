//! HTTP API
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/get_video?page=N` | Stored videos, insertion order |
//! | `GET`  | `/search_video?query=Q&page=N` | Ranked search |
//! | `POST` | `/add_key?key=K` | Validate and store an API key |
//! | `GET`  | `/health` | Liveness and version |
//! | `GET`  | `/metrics` | Prometheus text format (when enabled) |
//!
//! Errors are rendered as `{ "error": "<message>" }`. Storage and upstream
//! details are logged, never returned.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::QueryRejection, FromRequestParts, MatchedPath, Query, Request, State},
    http::{header, request::Parts, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::{GatewayError, Result};
use crate::keys::{self, KeyValidator};
use crate::metrics;
use crate::query::{VideoQueryService, PAGE_MUST_BE_INTEGER};
use crate::schemas::Video;
use crate::storage::KeyStore;

pub const KEY_REQUIRED: &str = "api_key query param is required";
pub const KEY_INVALID: &str = "invalid api key";
pub const KEY_INSERT_FAILED: &str = "failed to insert api key into the database";
pub const KEY_ADDED: &str = "api key added successfully";
const VIDEOS_UNAVAILABLE: &str = "failed to fetch videos from the database";

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub query: VideoQueryService,
    pub keys: Arc<dyn KeyStore>,
    pub validator: KeyValidator,
    pub call_timeout: Duration,
    pub metrics_enabled: bool,
}

#[derive(Debug, Deserialize)]
struct PageParams {
    page: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    query: Option<String>,
    page: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KeyParams {
    key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VideosBody {
    pub videos: Vec<Video>,
}

#[derive(Debug, Serialize)]
pub struct MessageBody {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthBody {
    pub status: &'static str,
    pub version: &'static str,
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Error that renders as a JSON body with a status code
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// Client input errors keep their message; everything else is logged
    /// and replaced by `fallback`.
    fn from_gateway(e: GatewayError, fallback: &'static str) -> Self {
        match e {
            GatewayError::InvalidInput(message) => Self::bad_request(message),
            other => {
                error!(error = %other, "Request failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, fallback)
            }
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        let detail = rejection.body_text();
        if detail.contains("`page`") {
            Self::bad_request(PAGE_MUST_BE_INTEGER)
        } else {
            Self::bad_request(detail)
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

/// `Query` whose rejection renders as an [`ApiError`] body
pub struct ApiQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

// ============ Handlers ============

async fn get_video(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<PageParams>,
) -> std::result::Result<Json<VideosBody>, ApiError> {
    let videos = state
        .query
        .list(params.page.as_deref())
        .await
        .map_err(|e| ApiError::from_gateway(e, VIDEOS_UNAVAILABLE))?;

    Ok(Json(VideosBody { videos }))
}

async fn search_video(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<SearchParams>,
) -> std::result::Result<Json<VideosBody>, ApiError> {
    let videos = state
        .query
        .search(params.query.as_deref(), params.page.as_deref())
        .await
        .map_err(|e| ApiError::from_gateway(e, VIDEOS_UNAVAILABLE))?;

    Ok(Json(VideosBody { videos }))
}

async fn add_key(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<KeyParams>,
) -> std::result::Result<Json<MessageBody>, ApiError> {
    let key = params
        .key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ApiError::bad_request(KEY_REQUIRED))?;

    match keys::register_key(state.keys.as_ref(), &state.validator, key, state.call_timeout).await {
        Ok(()) => Ok(Json(MessageBody { message: KEY_ADDED })),
        Err(GatewayError::Unauthorized) => Err(ApiError::new(StatusCode::UNAUTHORIZED, KEY_INVALID)),
        Err(e) => Err(ApiError::from_gateway(e, KEY_INSERT_FAILED)),
    }
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn metrics_text() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
}

/// Counts responses per matched route and status.
async fn track_responses(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string());
    let response = next.run(request).await;

    if let Some(route) = route {
        metrics::record_http_response(&route, response.status().as_u16());
    }
    response
}

// ============ Router ============

pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/get_video", get(get_video))
        .route("/search_video", get(search_video))
        .route("/add_key", post(add_key))
        .route("/health", get(health));

    if state.metrics_enabled {
        app = app.route("/metrics", get(metrics_text));
    }

    app.route_layer(middleware::from_fn(track_responses))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the API on `addr` until `shutdown` fires.
pub async fn serve(addr: String, state: AppState, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            info!("HTTP server shutting down");
        })
        .await?;

    Ok(())
}
