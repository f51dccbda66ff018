//! Trusted identity extraction.
//!
//! Tokens are verified by the proxy in front of the server, which forwards
//! the verified user id in a configurable header. The core only ever sees an
//! [`AuthenticatedUser`] value.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chatwire_core::AuthenticatedUser;
use std::sync::Arc;
use thiserror::Error;

use crate::handlers::AppState;

/// Why a request carries no usable identity.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityRejection {
    #[error("missing identity header {0}")]
    Missing(String),

    #[error("invalid user id in {0}")]
    Invalid(String),
}

impl IntoResponse for IdentityRejection {
    fn into_response(self) -> Response {
        chatwire_core::metrics::record_error("identity");
        (StatusCode::UNAUTHORIZED, self.to_string()).into_response()
    }
}

/// Read the verified user id from `header`.
///
/// # Errors
///
/// Returns a rejection if the header is absent or not a user id.
pub fn from_headers(headers: &HeaderMap, header: &str) -> Result<AuthenticatedUser, IdentityRejection> {
    let value = headers
        .get(header)
        .ok_or_else(|| IdentityRejection::Missing(header.to_string()))?;
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .map(AuthenticatedUser::new)
        .ok_or_else(|| IdentityRejection::Invalid(header.to_string()))
}

/// Extractor for the verified user of a request.
#[derive(Debug, Clone, Copy)]
pub struct TrustedUser(pub AuthenticatedUser);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for TrustedUser {
    type Rejection = IdentityRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        from_headers(&parts.headers, &state.config.transport.identity_header).map(TrustedUser)
    }
}
