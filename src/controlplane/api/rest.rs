//! REST API Handlers
//!
//! JSON-over-HTTP surface for the Controller Service. Request and response
//! bodies are the protocol types; errors are reported as
//! [`ApiErrorResponse`] with a status derived from the error code.

use crate::controlplane::protocol::{
    ControllerGetCapabilitiesResponse, ControllerPublishVolumeRequest,
    ControllerPublishVolumeResponse, ControllerUnpublishVolumeRequest, CreateSnapshotRequest,
    CreateSnapshotResponse, CreateVolumeRequest, CreateVolumeResponse, GetCapacityResponse,
    ListSnapshotsRequest, ListSnapshotsResponse, ListVolumesResponse,
    ValidateVolumeCapabilitiesRequest,
};
use crate::controlplane::service::ControllerService;
use crate::error::{Error, ErrorCode};
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

// =============================================================================
// Error Responses
// =============================================================================

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// HTTP status reported for an error code
pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
        ErrorCode::AlreadyExists | ErrorCode::Aborted => StatusCode::CONFLICT,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorCode::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        ErrorCode::Unknown => StatusCode::BAD_GATEWAY,
        ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Controller error carried out of a handler
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let status = status_for(code);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            debug!("Request rejected: {}", self.0);
        }

        let details = self.0.is_retryable().then(|| "retryable".to_string());
        (
            status,
            Json(ApiErrorResponse {
                error: code.as_str().to_string(),
                message: self.0.to_string(),
                details,
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    service: Arc<ControllerService>,
}

impl RestRouter {
    /// Create a new REST router
    pub fn new(service: Arc<ControllerService>) -> Self {
        Self { service }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            service: self.service,
        };

        Router::new()
            // Volume endpoints
            .route("/v1/volumes", post(create_volume).get(list_volumes))
            .route("/v1/volumes/:id", delete(delete_volume))
            .route("/v1/volumes/:id/publish", post(publish_volume))
            .route("/v1/volumes/:id/unpublish", post(unpublish_volume))
            .route("/v1/volumes/:id/validate", post(validate_volume_capabilities))
            // Snapshot endpoints
            .route("/v1/snapshots", post(create_snapshot).get(list_snapshots))
            .route("/v1/snapshots/:id", delete(delete_snapshot))
            // Controller endpoints
            .route("/v1/capacity", get(get_capacity))
            .route("/v1/capabilities", get(get_capabilities))
            // Health endpoint
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    service: Arc<ControllerService>,
}

// =============================================================================
// Handlers
// =============================================================================

async fn create_volume(
    State(state): State<AppState>,
    Json(request): Json<CreateVolumeRequest>,
) -> ApiResult<(StatusCode, Json<CreateVolumeResponse>)> {
    let response = state.service.create_volume(request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn delete_volume(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.service.delete_volume(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// The path id wins over any id in the body
async fn publish_volume(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut request): Json<ControllerPublishVolumeRequest>,
) -> ApiResult<Json<ControllerPublishVolumeResponse>> {
    request.volume_id = id;
    Ok(Json(state.service.controller_publish_volume(request).await?))
}

async fn unpublish_volume(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut request): Json<ControllerUnpublishVolumeRequest>,
) -> ApiResult<StatusCode> {
    request.volume_id = id;
    state.service.controller_unpublish_volume(request).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn validate_volume_capabilities(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut request): Json<ValidateVolumeCapabilitiesRequest>,
) -> ApiResult<StatusCode> {
    request.volume_id = id;
    state.service.validate_volume_capabilities(request).await?;
    Ok(StatusCode::OK)
}

async fn list_volumes(State(state): State<AppState>) -> ApiResult<Json<ListVolumesResponse>> {
    Ok(Json(state.service.list_volumes().await?))
}

async fn get_capacity(State(state): State<AppState>) -> ApiResult<Json<GetCapacityResponse>> {
    Ok(Json(state.service.get_capacity().await?))
}

async fn get_capabilities(
    State(state): State<AppState>,
) -> Json<ControllerGetCapabilitiesResponse> {
    Json(state.service.controller_get_capabilities().await)
}

async fn create_snapshot(
    State(state): State<AppState>,
    Json(request): Json<CreateSnapshotRequest>,
) -> ApiResult<(StatusCode, Json<CreateSnapshotResponse>)> {
    let response = state.service.create_snapshot(request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn delete_snapshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.service.delete_snapshot(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_snapshots(
    State(state): State<AppState>,
    Query(request): Query<ListSnapshotsRequest>,
) -> ApiResult<Json<ListSnapshotsResponse>> {
    Ok(Json(state.service.list_snapshots(request).await?))
}

/// Health check
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness check
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.service.ready().await {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "backend unreachable")
    }
}
