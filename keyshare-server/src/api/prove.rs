//! Proof protocol endpoints.
//!
//! - `POST /prove/getCommitments` – first move: returns the server's
//!   P-commitments for the requested issuer keys.
//! - `POST /prove/getResponse` – second move: consumes the parked
//!   commitment and returns the response scalar as a decimal string.
//!
//! Both endpoints sit behind the user and authorization middleware.

use axum::extract::State;
use axum::{Extension, Json};
use keyshare_types::PublicKeyIdentifier;
use keyshare_types::api::v1::{Challenge, ProofPCommitmentMap};
use tracing::instrument;

use crate::api::errors::{ApiErrors, ApiResult};
use crate::api::middleware::RequestAuthorization;
use crate::services::keyshare::KeyshareService;
use crate::services::user_store::KeyshareUser;

/// Handles `POST /prove/getCommitments`.
#[instrument(level = "debug", skip_all)]
pub(crate) async fn get_commitments(
    State(service): State<KeyshareService>,
    Extension(user): Extension<KeyshareUser>,
    Extension(authorization): Extension<RequestAuthorization>,
    Json(keys): Json<Vec<PublicKeyIdentifier>>,
) -> ApiResult<Json<ProofPCommitmentMap>> {
    if keys.is_empty() {
        tracing::info!("malformed request: no keys over which to commit specified");
        return Err(ApiErrors::BadRequest("no keys specified".to_string()));
    }
    let commitments = service
        .commitments(&user, &authorization.token, &keys)
        .await?;
    Ok(Json(commitments))
}

/// Handles `POST /prove/getResponse`.
///
/// Requires a valid authorization up front, so an unauthenticated prober
/// cannot learn whether a commitment round is pending for the user.
#[instrument(level = "debug", skip_all)]
pub(crate) async fn get_response(
    State(service): State<KeyshareService>,
    Extension(user): Extension<KeyshareUser>,
    Extension(authorization): Extension<RequestAuthorization>,
    Json(challenge): Json<Challenge>,
) -> ApiResult<String> {
    if !authorization.valid {
        tracing::warn!("refusing keyshare response for invalid authorization");
        return Err(ApiErrors::BadRequest("invalid authorization".to_string()));
    }
    let response = service
        .response(&user, &authorization.token, &challenge.0)
        .await?;
    Ok(response)
}
