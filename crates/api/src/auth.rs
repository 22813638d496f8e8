//! Request identity
//!
//! Authentication itself lives in the fronting auth proxy; by the time a
//! request reaches this service the proxy has verified the session and
//! installed the account id (and role) as trusted headers. These extractors
//! only read them back.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::error::ApiError;

pub const ACCOUNT_HEADER: &str = "x-cirrus-account";
pub const ROLE_HEADER: &str = "x-cirrus-role";

/// The authenticated account on whose behalf the request runs.
#[derive(Debug, Clone, Copy)]
pub struct CurrentAccount(pub Uuid);

impl<S> FromRequestParts<S> for CurrentAccount
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(ACCOUNT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .map(CurrentAccount)
            .ok_or(ApiError::Unauthorized)
    }
}

/// Marker extractor for staff-only endpoints (manual-check deposits,
/// consistency audits).
#[derive(Debug, Clone, Copy)]
pub struct AdminRole;

impl<S> FromRequestParts<S> for AdminRole
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let role = parts
            .headers
            .get(ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        if role == "admin" {
            Ok(AdminRole)
        } else {
            Err(ApiError::Forbidden)
        }
    }
}
