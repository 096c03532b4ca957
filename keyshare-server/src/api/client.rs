//! Enrollment endpoint.
//!
//! - `POST /client/register` – creates a keyshare account and returns the
//!   pointer to the issuance session delivering the keyshare credential.

use axum::Json;
use axum::extract::State;
use keyshare_types::api::v1::{KeyshareEnrollment, SessionPointer};
use tracing::instrument;

use crate::api::errors::ApiResult;
use crate::services::keyshare::KeyshareService;

/// Handles `POST /client/register`.
#[instrument(level = "debug", skip_all)]
pub(crate) async fn register(
    State(service): State<KeyshareService>,
    Json(enrollment): Json<KeyshareEnrollment>,
) -> ApiResult<Json<SessionPointer>> {
    tracing::debug!("received enrollment: {enrollment:?}");
    let pointer = service.register(enrollment).await?;
    Ok(Json(pointer))
}
