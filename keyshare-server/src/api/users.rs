//! PIN and authorization endpoints.
//!
//! - `POST /users/verify/pin` – verifies a PIN under the rate-limit
//!   ladder; the success envelope carries a session JWT.
//! - `POST /users/change/pin` – changes a PIN; a wrong old PIN counts
//!   against the same lockout budget.
//! - `POST /users/isAuthorized` – reports whether the presented bearer
//!   token currently authorizes the user.

use axum::extract::State;
use axum::{Extension, Json};
use keyshare_types::api::v1::{
    AuthorizationStatus, KeyshareAuthorization, KeyshareChangePin, KeysharePinMessage, PinResult,
};
use tracing::instrument;

use crate::api::errors::ApiResult;
use crate::api::middleware::RequestAuthorization;
use crate::services::keyshare::KeyshareService;

/// Handles `POST /users/verify/pin`.
#[instrument(level = "debug", skip_all)]
pub(crate) async fn verify_pin(
    State(service): State<KeyshareService>,
    Json(msg): Json<KeysharePinMessage>,
) -> ApiResult<Json<PinResult>> {
    tracing::debug!("received pin verification: {msg:?}");
    let result = service.verify_pin(&msg.username, &msg.pin).await?;
    Ok(Json(result))
}

/// Handles `POST /users/change/pin`.
#[instrument(level = "debug", skip_all)]
pub(crate) async fn change_pin(
    State(service): State<KeyshareService>,
    Json(msg): Json<KeyshareChangePin>,
) -> ApiResult<Json<PinResult>> {
    tracing::debug!("received pin change: {msg:?}");
    let result = service.change_pin(msg).await?;
    Ok(Json(result))
}

/// Handles `POST /users/isAuthorized`. Decides purely on the middleware's
/// validity verdict.
#[instrument(level = "debug", skip_all)]
pub(crate) async fn is_authorized(
    Extension(authorization): Extension<RequestAuthorization>,
) -> Json<KeyshareAuthorization> {
    let status = if authorization.valid {
        AuthorizationStatus::Authorized
    } else {
        AuthorizationStatus::Expired
    };
    Json(KeyshareAuthorization {
        status,
        candidates: vec!["pin".to_owned()],
    })
}
