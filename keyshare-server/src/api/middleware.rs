//! Request middleware for the authenticated keyshare endpoints.
//!
//! Two layers run in order:
//!
//! 1. `user_middleware` resolves the `X-IRMA-Keyshare-Username` header to a
//!    user row and attaches it to the request; unknown users are rejected.
//! 2. `authorization_middleware` strips the `Bearer ` prefix from the
//!    `Authorization` header, validates the token against the user's blob
//!    and attaches `{token, valid}`. It never rejects: downstream handlers
//!    decide what an invalid authorization means for them.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::AppState;
use crate::api::errors::ApiErrors;
use crate::services::user_store::{KeyshareUser, UserStoreError};

/// Header naming the keyshare account a request acts on.
pub(crate) const USERNAME_HEADER: &str = "X-IRMA-Keyshare-Username";

/// Bearer token state attached to every authenticated-route request.
#[derive(Clone)]
pub(crate) struct RequestAuthorization {
    pub(crate) token: String,
    pub(crate) valid: bool,
}

pub(crate) async fn user_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiErrors> {
    let username = request
        .headers()
        .get(USERNAME_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned();

    let user = state.users.user(&username).await.map_err(|err| match err {
        UserStoreError::NotFound => {
            tracing::warn!("request for unknown user {username:?}");
            ApiErrors::UserNotRegistered
        }
        backend => ApiErrors::InternalServerError(eyre::Report::new(backend)),
    })?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

pub(crate) async fn authorization_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let token = header.strip_prefix("Bearer ").unwrap_or(header).to_owned();

    let valid = request
        .extensions()
        .get::<KeyshareUser>()
        .map(|user| state.core.validate_jwt(&user.coredata, &token).is_ok())
        .unwrap_or(false);

    request
        .extensions_mut()
        .insert(RequestAuthorization { token, valid });
    next.run(request).await
}
