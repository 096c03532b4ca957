//! RS256 session tokens.
//!
//! PIN verification yields a short-lived JWT whose `token_id` claim is
//! derived from the sealed blob it was issued against, so a token can never
//! authenticate a different (or re-sealed) blob. The signing key id travels
//! in the `kid` header.

use std::time::{Duration, SystemTime};

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use keyshare_types::KeyId;
use rsa::RsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey, LineEnding};
use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Claims carried by a keyshare session JWT.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Claims {
    /// Configured issuer string.
    pub(crate) iss: String,
    /// Username the token was issued for.
    pub(crate) sub: String,
    /// Issued-at (Unix seconds).
    pub(crate) iat: u64,
    /// Expiry (Unix seconds).
    pub(crate) exp: u64,
    /// Hash of the sealed blob this token authenticates.
    pub(crate) token_id: String,
}

/// Error constructing a [`JwtKey`] from PEM material.
#[derive(Debug, thiserror::Error)]
#[error("cannot load RSA JWT key: {0}")]
pub struct JwtKeyError(String);

/// The RSA signing key of the server plus its identifier.
pub struct JwtKey {
    key_id: KeyId,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtKey {
    /// Parses an RSA private key from PKCS#8 PEM and derives the public
    /// half for verification.
    pub fn from_private_pem(key_id: KeyId, pem: &str) -> Result<Self, JwtKeyError> {
        let private = RsaPrivateKey::from_pkcs8_pem(pem).map_err(|e| JwtKeyError(e.to_string()))?;
        let public_pem = private
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| JwtKeyError(e.to_string()))?;
        let encoding =
            EncodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| JwtKeyError(e.to_string()))?;
        let decoding = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| JwtKeyError(e.to_string()))?;
        Ok(Self {
            key_id,
            encoding,
            decoding,
        })
    }

    /// Signs a session token for `username` bound to `token_id`.
    pub(crate) fn issue(
        &self,
        issuer: &str,
        username: &str,
        token_id: String,
        validity: Duration,
    ) -> Result<String, CoreError> {
        let now = unix_now();
        let claims = Claims {
            iss: issuer.to_owned(),
            sub: username.to_owned(),
            iat: now,
            exp: now + validity.as_secs(),
            token_id,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.key_id.to_string());
        jsonwebtoken::encode(&header, &claims, &self.encoding).map_err(|_| CoreError::Signing)
    }

    /// Verifies signature, issuer, expiry and key id; returns the claims.
    pub(crate) fn verify(&self, issuer: &str, token: &str) -> Result<Claims, CoreError> {
        let header = jsonwebtoken::decode_header(token).map_err(|_| CoreError::InvalidJwt)?;
        if header.kid.as_deref() != Some(&self.key_id.to_string()) {
            return Err(CoreError::InvalidJwt);
        }
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|_| CoreError::InvalidJwt)?;
        Ok(data.claims)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("system time is after unix epoch")
        .as_secs()
}
