//! Keyshare protocol orchestration.
//!
//! Responsibilities:
//! - Drive the PIN verify/change ladders: reserve a rate-limit slot,
//!   run the secret-dependent check, and translate the outcome into the
//!   `{status, message}` envelope. The reservation always precedes the
//!   PIN comparison, so guessing cost is independent of crypto timing.
//! - Produce proof commitments via the [`KeyshareCore`] and memo the
//!   resulting commit id in the [`SessionCache`] for the response call.
//! - Run enrollment: account creation, optional verification mail, and
//!   the downstream issuance session.
//!
//! This service is designed to be used behind an HTTP API (via the `api`
//! module); its sentinel errors are digested by `api::errors`.

use std::collections::HashMap;
use std::sync::Arc;

use keyshare_core::{CoreError, KeyshareCore};
use keyshare_types::PublicKeyIdentifier;
use keyshare_types::api::v1::{
    KeyshareChangePin, KeyshareEnrollment, PinResult, ProofPCommitmentMap, SessionPointer,
};
use num_bigint::BigUint;
use tracing::instrument;

use crate::metrics::{
    METRICS_KEY_COMMITMENTS_ISSUED, METRICS_KEY_PIN_CHECK_BLOCKED, METRICS_KEY_PIN_CHECK_FAILED,
    METRICS_KEY_PIN_CHECK_REFUSED, METRICS_KEY_PIN_CHECK_SUCCESS, METRICS_KEY_REGISTRATIONS,
    METRICS_KEY_RESPONSES_ISSUED,
};
use crate::services::enrollment::{
    self, CredentialRequest, MailerService, SessionStarterService,
};
use crate::services::session_cache::SessionCache;
use crate::services::user_store::{
    KeyshareUser, LogEntryKind, UserStoreError, UserStoreService,
};

/// Errors returned by the [`KeyshareService`].
#[derive(Debug, thiserror::Error)]
pub(crate) enum KeyshareServiceError {
    /// No account exists for the presented username.
    #[error("user is not registered")]
    UserNotRegistered,
    /// `getResponse` was called without a live commitment memo.
    #[error("missing previous call to getCommitments")]
    MissingCommitments,
    /// Error from the keyshare core.
    #[error(transparent)]
    Core(#[from] CoreError),
    /// Internal server error.
    #[error(transparent)]
    InternalServerError(#[from] eyre::Report),
}

fn store_error(err: UserStoreError) -> KeyshareServiceError {
    match err {
        UserStoreError::NotFound => KeyshareServiceError::UserNotRegistered,
        backend => KeyshareServiceError::InternalServerError(eyre::Report::new(backend)),
    }
}

/// Main keyshare service managing account and proof-session lifecycle.
///
/// Holds references to the core, the user store, the session cache and the
/// enrollment collaborators. Cloneable for use across multiple tasks and
/// API handlers.
#[derive(Clone)]
pub(crate) struct KeyshareService {
    core: Arc<KeyshareCore>,
    users: UserStoreService,
    session_cache: SessionCache,
    session_starter: SessionStarterService,
    mailer: Option<MailerService>,
    keyshare_credential: String,
    keyshare_attribute: String,
}

impl KeyshareService {
    /// Builds a [`KeyshareService`] from its collaborators.
    pub(crate) fn init(
        core: Arc<KeyshareCore>,
        users: UserStoreService,
        session_cache: SessionCache,
        session_starter: SessionStarterService,
        mailer: Option<MailerService>,
        keyshare_credential: String,
        keyshare_attribute: String,
    ) -> Self {
        Self {
            core,
            users,
            session_cache,
            session_starter,
            mailer,
            keyshare_credential,
            keyshare_attribute,
        }
    }

    /// Creates a fresh keyshare account and starts the issuance session
    /// delivering the keyshare credential to the client.
    #[instrument(level = "debug", skip_all)]
    pub(crate) async fn register(
        &self,
        enrollment: KeyshareEnrollment,
    ) -> Result<SessionPointer, KeyshareServiceError> {
        let username = enrollment::generate_username();
        let coredata = self.core.generate_keyshare_secret(&enrollment.pin)?;
        let user = self
            .users
            .new_user(KeyshareUser {
                username,
                language: enrollment.language.clone(),
                coredata,
            })
            .await
            .map_err(|err| KeyshareServiceError::InternalServerError(eyre::Report::new(err)))?;
        tracing::info!("registered new user {}", user.username);

        match (&self.mailer, enrollment.email.as_deref()) {
            (Some(mailer), Some(email)) if !email.is_empty() => {
                self.send_registration_email(mailer, &user, email).await?;
            }
            _ => {}
        }

        let mut attributes = HashMap::new();
        attributes.insert(self.keyshare_attribute.clone(), user.username.clone());
        let pointer = self
            .session_starter
            .start_issuance(CredentialRequest {
                credential: self.keyshare_credential.clone(),
                attributes,
            })
            .await
            .map_err(|err| {
                tracing::error!("could not start keyshare credential issuance session: {err:?}");
                KeyshareServiceError::InternalServerError(err)
            })?;
        metrics::counter!(METRICS_KEY_REGISTRATIONS).increment(1);
        Ok(pointer)
    }

    async fn send_registration_email(
        &self,
        mailer: &MailerService,
        user: &KeyshareUser,
        email: &str,
    ) -> Result<(), KeyshareServiceError> {
        let token = enrollment::generate_verification_token();
        self.users
            .add_email_verification(&user.username, email, &token)
            .await
            .map_err(store_error)?;
        mailer
            .send_verification_email(&user.language, email, &token)
            .await
            .map_err(|err| {
                tracing::error!("could not send verification mail: {err:?}");
                KeyshareServiceError::InternalServerError(err)
            })
    }

    /// Verifies a PIN under the rate-limit ladder and returns the
    /// `{status, message}` envelope; on success the message is a session
    /// JWT.
    #[instrument(level = "debug", skip_all, fields(username = %username))]
    pub(crate) async fn verify_pin(
        &self,
        username: &str,
        pin: &str,
    ) -> Result<PinResult, KeyshareServiceError> {
        let user = self.users.user(username).await.map_err(store_error)?;
        let reservation = self
            .users
            .reserve_pincheck(username)
            .await
            .map_err(store_error)?;
        if !reservation.allowed {
            metrics::counter!(METRICS_KEY_PIN_CHECK_REFUSED).increment(1);
            self.users
                .add_log(username, LogEntryKind::PinCheckRefused, None)
                .await
                .map_err(store_error)?;
            return Ok(PinResult::error(reservation.wait_seconds));
        }

        // the reservation is spent; now the actual check may happen
        match self.core.validate_pin(&user.coredata, pin, username) {
            Ok(jwt) => {
                if let Err(err) = self.users.clear_pincheck(username).await {
                    tracing::error!("could not reset pin check state: {err:?}");
                }
                if let Err(err) = self.users.set_seen(username).await {
                    tracing::error!("could not mark user as seen: {err:?}");
                }
                self.users
                    .add_log(username, LogEntryKind::PinCheckSuccess, None)
                    .await
                    .map_err(store_error)?;
                metrics::counter!(METRICS_KEY_PIN_CHECK_SUCCESS).increment(1);
                Ok(PinResult::success(jwt))
            }
            Err(CoreError::InvalidPin) => {
                metrics::counter!(METRICS_KEY_PIN_CHECK_FAILED).increment(1);
                self.users
                    .add_log(
                        username,
                        LogEntryKind::PinCheckFailed,
                        Some(reservation.tries_remaining),
                    )
                    .await
                    .map_err(store_error)?;
                if reservation.tries_remaining == 0 {
                    metrics::counter!(METRICS_KEY_PIN_CHECK_BLOCKED).increment(1);
                    self.users
                        .add_log(
                            username,
                            LogEntryKind::PinCheckBlocked,
                            Some(reservation.wait_seconds),
                        )
                        .await
                        .map_err(store_error)?;
                    Ok(PinResult::error(reservation.wait_seconds))
                } else {
                    Ok(PinResult::failure(reservation.tries_remaining))
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Changes a PIN. A wrong old PIN runs through the same ladder as
    /// verification and counts against the lockout budget.
    #[instrument(level = "debug", skip_all, fields(username = %msg.username))]
    pub(crate) async fn change_pin(
        &self,
        msg: KeyshareChangePin,
    ) -> Result<PinResult, KeyshareServiceError> {
        let mut user = self.users.user(&msg.username).await.map_err(store_error)?;
        let reservation = self
            .users
            .reserve_pincheck(&msg.username)
            .await
            .map_err(store_error)?;
        if !reservation.allowed {
            return Ok(PinResult::error(reservation.wait_seconds));
        }

        match self.core.change_pin(&user.coredata, &msg.old_pin, &msg.new_pin) {
            Ok(coredata) => {
                user.coredata = coredata;
                if let Err(err) = self.users.clear_pincheck(&msg.username).await {
                    tracing::error!("could not reset pin check state: {err:?}");
                }
                self.users.update_user(&user).await.map_err(store_error)?;
                Ok(PinResult::success_empty())
            }
            Err(CoreError::InvalidPin) => {
                if reservation.tries_remaining == 0 {
                    Ok(PinResult::error(reservation.wait_seconds))
                } else {
                    Ok(PinResult::failure(reservation.tries_remaining))
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Generates proof commitments for the requested issuer keys and
    /// memoizes the commit id for the follow-up `getResponse`.
    #[instrument(level = "debug", skip_all, fields(username = %user.username))]
    pub(crate) async fn commitments(
        &self,
        user: &KeyshareUser,
        authorization: &str,
        keys: &[PublicKeyIdentifier],
    ) -> Result<ProofPCommitmentMap, KeyshareServiceError> {
        let (commitments, commit_id) =
            self.core
                .generate_commitments(&user.coredata, authorization, keys)?;

        let commitments = keys.iter().cloned().zip(commitments).collect();
        self.session_cache
            .insert(&user.username, commit_id, keys[0].clone());
        metrics::counter!(METRICS_KEY_COMMITMENTS_ISSUED).increment(1);
        Ok(ProofPCommitmentMap { commitments })
    }

    /// Answers the proof challenge with the response scalar for the
    /// memoized commitment round.
    #[instrument(level = "debug", skip_all, fields(username = %user.username))]
    pub(crate) async fn response(
        &self,
        user: &KeyshareUser,
        authorization: &str,
        challenge: &BigUint,
    ) -> Result<String, KeyshareServiceError> {
        let (commit_id, key_id) = self
            .session_cache
            .get(&user.username)
            .ok_or(KeyshareServiceError::MissingCommitments)?;

        if let Err(err) = self.users.set_seen(&user.username).await {
            tracing::error!("could not mark user as seen: {err:?}");
        }
        self.users
            .add_log(&user.username, LogEntryKind::IrmaSession, None)
            .await
            .map_err(store_error)?;

        let response =
            self.core
                .generate_response(&user.coredata, authorization, commit_id, challenge, &key_id)?;
        metrics::counter!(METRICS_KEY_RESPONSES_ISSUED).increment(1);
        Ok(response)
    }
}
