//! REST API handlers for redemption, preview, confirmation, and
//! operational endpoints.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use revisit_core::rewards::{RedeemRequest, RedemptionReceipt, RewardState, VisitRecord};
use revisit_core::RevisitError;
use revisit_loyalty::{ConfirmationHandler, RedemptionCoordinator, ENGINE_VERSION};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, warn};

/// Header set by the authenticating gateway in front of this service.
pub const GUEST_ID_HEADER: &str = "x-guest-id";

/// Maximum length of any identifier accepted at the API boundary.
const MAX_ID_LEN: usize = 128;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<RedemptionCoordinator>,
    pub confirmations: Arc<ConfirmationHandler>,
    pub node_id: String,
    pub start_time: Instant,
}

/// Domain error rendered as a JSON response.
pub struct ApiError(pub RevisitError);

impl From<RevisitError> for ApiError {
    fn from(e: RevisitError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            RevisitError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RevisitError::Unauthenticated => StatusCode::UNAUTHORIZED,
            RevisitError::VenueNotFound(_) | RevisitError::NotFound(_) => StatusCode::NOT_FOUND,
            RevisitError::AccessDenied(_) => StatusCode::FORBIDDEN,
            RevisitError::TooSoon { .. } => StatusCode::TOO_MANY_REQUESTS,
            RevisitError::TransientConflict(_) | RevisitError::InvalidTransition(_) => {
                StatusCode::CONFLICT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "Request failed");
            metrics::counter!("api.errors").increment(1);
            "Internal processing error".to_string()
        } else {
            self.0.to_string()
        };

        let retry_after_secs = match &self.0 {
            RevisitError::TooSoon { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.code().to_string(),
                message,
                retry_after_secs,
            }),
        )
            .into_response()
    }
}

fn validate_id(field: &'static str, value: &str) -> Result<(), ApiError> {
    if value.len() > MAX_ID_LEN {
        warn!(field = field, "Identifier exceeds maximum length");
        return Err(ApiError(RevisitError::InvalidRequest(format!(
            "{field} exceeds maximum length"
        ))));
    }
    Ok(())
}

fn gateway_guest(headers: &HeaderMap) -> Option<String> {
    headers
        .get(GUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// POST /v1/rewards/redeem — Claim the current reward at a venue.
pub async fn handle_redeem(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut request): Json<RedeemRequest>,
) -> Result<Json<RedemptionReceipt>, ApiError> {
    if let Some(guest) = gateway_guest(&headers) {
        request.guest_id = Some(guest);
    }
    validate_id("venueId", &request.venue_id)?;
    if let Some(guest) = &request.guest_id {
        validate_id("guestId", guest)?;
    }

    let receipt = state.coordinator.redeem(&request).await?;
    metrics::counter!("api.redemptions").increment(1);
    Ok(Json(receipt))
}

/// GET /v1/rewards/preview/:venue_id — Current reward of the calling
/// guest, no claim.
pub async fn handle_preview(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(venue_id): Path<String>,
) -> Result<Json<RewardState>, ApiError> {
    let guest_id = gateway_guest(&headers)
        .map(|g| g.trim().to_string())
        .filter(|g| !g.is_empty())
        .ok_or(ApiError(RevisitError::Unauthenticated))?;
    validate_id("venueId", &venue_id)?;
    validate_id("guestId", &guest_id)?;
    let reward = state.coordinator.preview(&guest_id, &venue_id).await?;
    Ok(Json(reward))
}

/// POST /v1/visits/:visit_id/confirm — Staff confirms a pending visit.
pub async fn handle_confirm(
    State(state): State<AppState>,
    Path(visit_id): Path<String>,
) -> Result<Json<VisitRecord>, ApiError> {
    validate_id("visitId", &visit_id)?;
    let record = state.confirmations.confirm(&visit_id).await?;
    Ok(Json(record))
}

/// GET /health — Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        engine_version: ENGINE_VERSION.to_string(),
    })
}

/// GET /live — Liveness probe for Kubernetes.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
    pub engine_version: String,
}
