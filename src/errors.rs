use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Too Many Requests")
    pub error: String,
    /// Machine-readable error code (e.g., "out_of_stock")
    pub code: String,
    /// Human-readable error description
    pub message: String,
    /// Structured detail for errors that concern a specific cart line or field
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// ISO 8601 timestamp when error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Blocked: {0}")]
    Blocked(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Product {product_id} not found")]
    ProductNotFound { product_id: Uuid },

    #[error("Product '{name}' is not available")]
    ProductUnavailable { product_id: Uuid, name: String },

    #[error("Product '{name}' is out of stock: requested {requested}, available {available}")]
    OutOfStock {
        product_id: Uuid,
        name: String,
        requested: i32,
        available: i32,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError(_) | Self::InvalidOperation(_) => StatusCode::BAD_REQUEST,
            Self::Blocked(_) => StatusCode::FORBIDDEN,
            Self::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::ProductNotFound { .. } | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ProductUnavailable { .. } | Self::OutOfStock { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::InvalidTransition { .. } => StatusCode::CONFLICT,
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_) | Self::PersistenceError(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code, used by clients to pick a UI message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::PersistenceError(_) => "persistence_error",
            Self::ValidationError(_) => "validation_error",
            Self::Blocked(_) => "blocked",
            Self::RateLimitExceeded(_) => "rate_limited",
            Self::ProductNotFound { .. } => "product_not_found",
            Self::ProductUnavailable { .. } => "product_unavailable",
            Self::OutOfStock { .. } => "out_of_stock",
            Self::NotFound(_) => "not_found",
            Self::InvalidOperation(_) => "invalid_operation",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::ExternalServiceError(_) => "external_service_error",
            Self::InternalError(_) => "internal_error",
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::PersistenceError(_) => "Failed to save the order, please try again".to_string(),
            Self::InternalError(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Cart-line errors carry the offending product so the client can adjust the cart.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::ProductNotFound { product_id } => {
                Some(serde_json::json!({ "product_id": product_id }))
            }
            Self::ProductUnavailable { product_id, name } => {
                Some(serde_json::json!({ "product_id": product_id, "name": name }))
            }
            Self::OutOfStock {
                product_id,
                name,
                requested,
                available,
            } => Some(serde_json::json!({
                "product_id": product_id,
                "name": name,
                "requested": requested,
                "available": available,
            })),
            _ => None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.code().to_string(),
            message: self.response_message(),
            details: self.details(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

/// Startup and infrastructure errors that never reach an HTTP client
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn service_error_status_code_mapping() {
        assert_eq!(
            ServiceError::ValidationError("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::Blocked("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ServiceError::RateLimitExceeded("x".into()).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ServiceError::ProductNotFound {
                product_id: Uuid::nil()
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::OutOfStock {
                product_id: Uuid::nil(),
                name: "Kurta".into(),
                requested: 3,
                available: 1,
            }
            .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::PersistenceError("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ServiceError::InvalidTransition {
                from: "shipped".into(),
                to: "confirmed".into()
            }
            .status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn response_message_hides_internal_details() {
        assert_eq!(
            ServiceError::InternalError("sensitive".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::DatabaseError(DbErr::Custom("conn refused".into())).response_message(),
            "Database error"
        );
        assert_eq!(
            ServiceError::ValidationError("phone: invalid".into()).response_message(),
            "Validation error: phone: invalid"
        );
    }

    #[tokio::test]
    async fn out_of_stock_response_names_product_and_quantity() {
        let product_id = Uuid::new_v4();
        let response = ServiceError::OutOfStock {
            product_id,
            name: "Jamdani Saree".into(),
            requested: 4,
            available: 2,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.code, "out_of_stock");
        assert!(payload.message.contains("Jamdani Saree"));
        let details = payload.details.expect("details expected");
        assert_eq!(details["available"], 2);
        assert_eq!(details["product_id"], product_id.to_string());
    }
}
