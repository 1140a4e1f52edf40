//! Bearer-token authentication for protected routes.
//!
//! - [`jwks`]: fetches and caches the issuer's signing key set.
//! - [`verifier`]: turns an `Authorization` header into a verified [`ClaimSet`].
//!
//! Handlers opt in by taking an [`Authenticated`] argument.

pub mod jwks;
pub mod verifier;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use axum::{
    Json,
    extract::{FromRef, FromRequestParts},
    http::{StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

pub use jwks::{HttpKeySetFetcher, KeySetCache, SystemClock};
pub use verifier::{TokenVerifier, VerifierConfig};

/// Subject returned for every request while the testing bypass is enabled.
pub const TEST_SUBJECT: &str = "test-user";

/// Why a request could not be authenticated.
///
/// The `String` payloads are for the server log only; [`IntoResponse`]
/// never echoes them back to the caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("authentication is misconfigured: {0}")]
    Configuration(String),
    #[error("issuer key set unavailable: {0}")]
    KeySetUnavailable(String),
    #[error("no bearer credential presented")]
    MissingCredential,
    #[error("bearer credential rejected: {0}")]
    InvalidCredential(String),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AuthError::KeySetUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::MissingCredential | AuthError::InvalidCredential(_) => {
                StatusCode::UNAUTHORIZED
            }
        }
    }

    fn public_detail(&self) -> &'static str {
        match self {
            AuthError::Configuration(_) => "Authentication is not configured",
            AuthError::KeySetUnavailable(_) => "Authentication temporarily unavailable",
            AuthError::MissingCredential => "Missing bearer token",
            AuthError::InvalidCredential(_) => "Invalid token",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "detail": self.public_detail() }));
        if status == StatusCode::UNAUTHORIZED {
            (status, [(header::WWW_AUTHENTICATE, "Bearer")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

/// Verified identity assertions of a bearer token.
///
/// Only ever built from a fully verified token (or the testing bypass), so
/// `sub` is always present. Every other claim, including `aud`, `iss` and
/// `exp`, is kept in `other`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimSet {
    pub sub: String,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl ClaimSet {
    pub(crate) fn test_subject() -> Self {
        Self {
            sub: TEST_SUBJECT.to_string(),
            other: Map::new(),
        }
    }
}

/// Extractor guarding a route: resolves to the caller's verified claims or
/// rejects the request with the matching [`AuthError`] response.
#[derive(Debug, Clone)]
pub struct Authenticated(pub ClaimSet);

impl<S> FromRequestParts<S> for Authenticated
where
    Arc<TokenVerifier>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let verifier = Arc::<TokenVerifier>::from_ref(state);
        // A header that is not visible ASCII carries no usable credential.
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        verifier.verify(header_value).await.map(Authenticated)
    }
}
