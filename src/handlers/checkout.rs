use crate::{
    auth::CurrentUser,
    errors::ServiceError,
    services::commerce::{PlaceOrderRequest, PlacedOrder},
    ApiResponse, AppState,
};
use axum::{
    extract::{Json, State},
    http::StatusCode,
};

/// Verifies a cart and creates the order.
///
/// Responds 201 with the server-computed totals.
pub async fn place_order(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(payload): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PlacedOrder>>), ServiceError> {
    let settings = state.services.settings.checkout_settings().await?;
    let placed = state
        .services
        .checkout
        .place_order(payload, user, &settings)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(placed))))
}
