use crate::{
    entities::order,
    services::orders::PaymentConfirmation,
    ApiResponse, ApiResult, AppState,
};
use axum::extract::{Json, Path, State};
use uuid::Uuid;

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<order::Model> {
    let order = state.services.orders.get_order(id).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Payment gateway callback for prepaid orders.
pub async fn confirm_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Option<Json<PaymentConfirmation>>,
) -> ApiResult<order::Model> {
    let confirmation = payload.map(|Json(p)| p).unwrap_or_default();
    let order = state
        .services
        .orders
        .confirm_payment(id, confirmation)
        .await?;
    Ok(Json(ApiResponse::success_with_message(
        order,
        "Payment confirmed",
    )))
}
