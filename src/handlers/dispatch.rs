use crate::{
    entities::courier_provider,
    services::dispatch::{DispatchOrdersRequest, DispatchSummary},
    ApiResponse, ApiResult, AppState,
};
use axum::extract::{Json, Path, State};
use serde::Serialize;
use uuid::Uuid;
use validator::Validate;

pub async fn list_providers(State(state): State<AppState>) -> ApiResult<Vec<courier_provider::Model>> {
    let providers = state.services.dispatch.list_active_providers().await?;
    Ok(Json(ApiResponse::success(providers)))
}

/// Sends the selected orders to one courier.
///
/// Per-order failures are part of a successful response; only an unknown or
/// inactive provider fails the request.
pub async fn dispatch_orders(
    State(state): State<AppState>,
    Json(payload): Json<DispatchOrdersRequest>,
) -> ApiResult<DispatchSummary> {
    payload.validate()?;
    let summary = state
        .services
        .dispatch
        .dispatch_orders(payload.provider_id, &payload.order_ids)
        .await?;
    let message = format!(
        "{} dispatched, {} failed",
        summary.succeeded, summary.failed
    );
    Ok(Json(ApiResponse::success_with_message(summary, message)))
}

#[derive(Debug, Serialize)]
pub struct TrackingStatus {
    pub provider_id: Uuid,
    pub tracking_id: String,
    pub status: String,
}

pub async fn track_parcel(
    State(state): State<AppState>,
    Path((provider_id, tracking_id)): Path<(Uuid, String)>,
) -> ApiResult<TrackingStatus> {
    let status = state
        .services
        .dispatch
        .track(provider_id, &tracking_id)
        .await?;
    Ok(Json(ApiResponse::success(TrackingStatus {
        provider_id,
        tracking_id,
        status,
    })))
}
