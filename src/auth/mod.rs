//! Caller identity.
//!
//! Authentication happens upstream; this service only receives an opaque user
//! id in the `X-User-Id` header, or nothing for guest checkouts.

use crate::errors::ServiceError;
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Owner recorded on addresses created by guest checkouts.
pub const GUEST_USER_ID: Uuid = Uuid::nil();

/// The authenticated user, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser(pub Option<Uuid>);

impl CurrentUser {
    pub fn guest() -> Self {
        Self(None)
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.0
    }

    /// Id under which owned records are filed; guests share the nil id.
    pub fn owner_id(&self) -> Uuid {
        self.0.unwrap_or(GUEST_USER_ID)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(USER_ID_HEADER) else {
            return Ok(CurrentUser::guest());
        };

        let raw = value
            .to_str()
            .map_err(|_| ServiceError::ValidationError("X-User-Id is not valid text".into()))?
            .trim();
        if raw.is_empty() {
            return Ok(CurrentUser::guest());
        }

        let id = Uuid::parse_str(raw)
            .map_err(|_| ServiceError::ValidationError("X-User-Id must be a UUID".into()))?;
        Ok(CurrentUser(Some(id)))
    }
}
