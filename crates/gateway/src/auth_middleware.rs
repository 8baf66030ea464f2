use axum::{
    extract::{FromRef, FromRequestParts},
    http::{StatusCode, request::Parts},
};
use relaygate_auth::Identity;

use crate::state::AppState;

/// Axum extractor that validates the `Authorization: Bearer <jwt>` header and
/// produces a verified [`Identity`] (`SPEC_FULL.md` §4.C). Rejects with 401
/// on any verification failure.
pub struct BearerIdentity(pub Identity);

impl<S> FromRequestParts<S> for BearerIdentity
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app = AppState::from_ref(state);
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        app.gateway
            .auth
            .verify_http(header)
            .await
            .map(BearerIdentity)
            .map_err(|_| (StatusCode::UNAUTHORIZED, "not authenticated"))
    }
}
