use crate::config::ApiConfig;
use crate::error::{PhotoError, Result};
use crate::service::PhotoService;
use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, QueryRejection},
        DefaultBodyLimit, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

pub const CREATED_MESSAGE: &str = "message: created successfully!";
pub const UPDATED_MESSAGE: &str = "message: updated successfully!";
pub const DELETED_MESSAGE: &str = "message: deleted successfully!";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: PhotoService,
}

/// Query parameters for the nearby listing
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub lat: Option<String>,
    pub lng: Option<String>,
}

/// Query parameters for deletion
#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub id: Option<String>,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    // Other verbs on /photos get the method router's 405
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route(
            "/photos",
            get(list_photos)
                .post(create_photo)
                .patch(update_photo)
                .delete(delete_photo),
        )
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "photo-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// GET /photos?lat=..&lng=..
#[instrument(skip(state))]
async fn list_photos(
    State(state): State<AppState>,
    params: std::result::Result<Query<ListQuery>, QueryRejection>,
) -> Result<impl IntoResponse> {
    let Query(params) = params.map_err(query_error)?;
    let lat = parse_coordinate("lat", params.lat.as_deref())?;
    let lng = parse_coordinate("lng", params.lng.as_deref())?;

    let body = state.service.list(lat, lng).await?;

    Ok(([(header::CONTENT_TYPE, "application/json")], body))
}

/// POST /photos
#[instrument(skip(state, headers, body))]
async fn create_photo(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Result<&'static str> {
    let body = body.map_err(body_error)?;
    let encoding = content_encoding(&headers)?;
    state.service.create(&body, encoding).await?;
    Ok(CREATED_MESSAGE)
}

/// PATCH /photos
#[instrument(skip(state, headers, body))]
async fn update_photo(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Result<&'static str> {
    let body = body.map_err(body_error)?;
    let encoding = content_encoding(&headers)?;
    state.service.update(&body, encoding).await?;
    Ok(UPDATED_MESSAGE)
}

/// DELETE /photos?id=..
#[instrument(skip(state))]
async fn delete_photo(
    State(state): State<AppState>,
    params: std::result::Result<Query<DeleteQuery>, QueryRejection>,
) -> Result<&'static str> {
    let Query(params) = params.map_err(query_error)?;
    state
        .service
        .delete(params.id.as_deref().unwrap_or_default())
        .await?;
    Ok(DELETED_MESSAGE)
}

fn query_error(rejection: QueryRejection) -> PhotoError {
    PhotoError::Validation(format!("malformed query string: {}", rejection.body_text()))
}

fn body_error(rejection: BytesRejection) -> PhotoError {
    PhotoError::Decode(format!("failed to read body: {}", rejection.body_text()))
}

/// Parse a decimal query parameter, narrowed to the stored precision
fn parse_coordinate(name: &str, value: Option<&str>) -> Result<f32> {
    let value = value
        .ok_or_else(|| PhotoError::Validation(format!("missing query parameter `{name}`")))?;

    let parsed: f64 = value.trim().parse().map_err(|e| {
        PhotoError::Validation(format!("invalid query parameter `{name}`: {e}"))
    })?;

    Ok(parsed as f32)
}

fn content_encoding(headers: &HeaderMap) -> Result<Option<&str>> {
    match headers.get(header::CONTENT_ENCODING) {
        None => Ok(None),
        Some(value) => value.to_str().map(Some).map_err(|_| {
            warn!("Content-Encoding header is not valid ASCII");
            PhotoError::Decode("invalid Content-Encoding header".to_string())
        }),
    }
}

/// Start the photo API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> anyhow::Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting photo API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
