//! # v1 API types
//!
//! Data transfer objects for the keyshare protocol endpoints.
//!
//! This module defines the request and response payloads exchanged between
//! the IRMA client app and the keyshare server: enrollment, PIN
//! verification and change, authorization probing, and the two-move
//! commitment/response proof protocol. Types carrying big integers use the
//! decimal wire encoding of the ABC system.

use std::collections::HashMap;
use std::fmt;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::{PublicKeyIdentifier, bigint};

/// Enrollment request sent by a fresh client to `/client/register`.
#[derive(Clone, Serialize, Deserialize)]
pub struct KeyshareEnrollment {
    /// The PIN the user picked for this keyshare account.
    pub pin: String,
    /// Optional email address for account recovery notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Locale preference, used for mail templates.
    pub language: String,
}

/// PIN verification request for `/users/verify/pin`.
#[derive(Clone, Serialize, Deserialize)]
pub struct KeysharePinMessage {
    /// The keyshare account username.
    pub username: String,
    /// The PIN to verify.
    pub pin: String,
}

/// PIN change request for `/users/change/pin`.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyshareChangePin {
    /// The keyshare account username.
    pub username: String,
    /// The current PIN.
    pub old_pin: String,
    /// The PIN to change to.
    pub new_pin: String,
}

/// Outcome class of a status-bearing keyshare endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinStatus {
    /// The operation succeeded; `message` carries the payload (a JWT for
    /// PIN verification, empty for PIN change).
    Success,
    /// The PIN was wrong; `message` carries the number of tries left.
    Failure,
    /// The account is blocked; `message` carries the wait in seconds.
    Error,
}

/// Uniform `{status, message}` envelope returned by the PIN endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PinResult {
    /// Outcome class.
    pub status: PinStatus,
    /// Status-dependent payload, see [`PinStatus`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PinResult {
    /// Success envelope carrying a payload (e.g. a session JWT).
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: PinStatus::Success,
            message: Some(message.into()),
        }
    }

    /// Success envelope without payload (PIN change).
    pub fn success_empty() -> Self {
        Self {
            status: PinStatus::Success,
            message: None,
        }
    }

    /// Failure envelope carrying the remaining number of tries.
    pub fn failure(tries_remaining: u64) -> Self {
        Self {
            status: PinStatus::Failure,
            message: Some(tries_remaining.to_string()),
        }
    }

    /// Error envelope carrying the wait in whole seconds.
    pub fn error(wait_seconds: u64) -> Self {
        Self {
            status: PinStatus::Error,
            message: Some(wait_seconds.to_string()),
        }
    }
}

/// Response of `/users/isAuthorized`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyshareAuthorization {
    /// `"authorized"` when the presented JWT is valid, `"expired"` otherwise.
    pub status: AuthorizationStatus,
    /// Authentication methods the server accepts to (re)authorize.
    pub candidates: Vec<String>,
}

/// Authorization state reported by `/users/isAuthorized`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    /// The bearer JWT is valid for this user.
    Authorized,
    /// No valid bearer JWT was presented.
    Expired,
}

/// The server's contribution `S^w mod n` to a joint proof commitment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofPCommitment {
    /// The committed value under the issuer key's base `S`.
    #[serde(rename = "Pcommit", with = "bigint::decimal")]
    pub p_commit: BigUint,
}

/// Response of `/prove/getCommitments`: one commitment per requested
/// issuer key, keyed by the key's textual identifier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProofPCommitmentMap {
    /// Commitments by issuer key.
    #[serde(rename = "c")]
    pub commitments: HashMap<PublicKeyIdentifier, ProofPCommitment>,
}

/// The proof challenge posted to `/prove/getResponse`, accepted as a JSON
/// number or decimal string.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct Challenge(
    #[serde(deserialize_with = "bigint::deserialize_decimal_or_number")] pub BigUint,
);

/// Pointer to a downstream issuance session, rendered as a QR code by the
/// client. Field names follow the session protocol wire format.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionPointer {
    /// URL of the session on the issuance server.
    #[serde(rename = "u")]
    pub url: String,
    /// Session type discriminator (`"issuing"` for enrollment).
    #[serde(rename = "irmaqr")]
    pub session_type: String,
}

impl fmt::Debug for KeysharePinMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeysharePinMessage")
            .field("username", &self.username)
            .field("pin", &"omitted")
            .finish()
    }
}

impl fmt::Debug for KeyshareEnrollment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyshareEnrollment")
            .field("pin", &"omitted")
            .field("email", &self.email)
            .field("language", &self.language)
            .finish()
    }
}

impl fmt::Debug for KeyshareChangePin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyshareChangePin")
            .field("username", &self.username)
            .field("old_pin", &"omitted")
            .field("new_pin", &"omitted")
            .finish()
    }
}

impl fmt::Debug for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Challenge").field("value", &"omitted").finish()
    }
}
