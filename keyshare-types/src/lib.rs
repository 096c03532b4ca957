#![deny(missing_docs)]
//! Core type definitions for the keyshare server.
//!
//! This crate groups together the strongly-typed values and message
//! structures used across the keyshare system. It provides:
//!
//! * Thin wrappers around primitive values such as storage key ids,
//!   commitment ids and issuer public-key identifiers, with consistent
//!   serialization and display implementations.
//! * The trusted issuer public-key type used when generating commitments.
//! * API types for client/server communication (see [`api`] module).
//!
//! Use these types to pass, store, and (de)serialize identifiers and
//! cryptographic values in a type-safe way throughout your application.

use std::fmt;
use std::str::FromStr;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize, de};

pub mod api;
pub mod bigint;

/// Identifier of a storage (AES) or JWT signing key.
///
/// Blobs carry the id of the key that sealed them as a 4-byte big-endian
/// prefix; JWTs carry it as the `kid` header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(u32);

impl KeyId {
    /// Creates a new `KeyId` by wrapping a `u32`.
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    /// Converts the key id to a `u32`.
    pub fn into_inner(self) -> u32 {
        self.0
    }

    /// The 4-byte big-endian encoding used as blob prefix.
    pub fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Parses a key id from its 4-byte big-endian encoding.
    pub fn from_be_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_string())
    }
}

/// Identifier of an unconsumed commitment scalar held by the commitment
/// store. Unpredictable, allocated per `getCommitments` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(u64);

impl CommitId {
    /// Creates a new `CommitId` by wrapping a `u64`.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Converts the commit id to a `u64`.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_string())
    }
}

/// Identifies one public key of an issuer in the ABC scheme.
///
/// Serialized on the wire as `"<issuer>-<counter>"`, where the issuer part
/// itself may contain dots (e.g. `"irma-demo.MijnOverheid-2"` is issuer
/// `irma-demo.MijnOverheid`, counter `2`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PublicKeyIdentifier {
    /// Fully qualified issuer identifier.
    pub issuer: String,
    /// Key counter of the issuer; incremented on issuer key rotation.
    pub counter: u32,
}

impl PublicKeyIdentifier {
    /// Creates an identifier from issuer name and key counter.
    pub fn new(issuer: impl Into<String>, counter: u32) -> Self {
        Self {
            issuer: issuer.into(),
            counter,
        }
    }
}

impl fmt::Display for PublicKeyIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.issuer, self.counter)
    }
}

/// Error returned when parsing a [`PublicKeyIdentifier`] from text.
#[derive(Debug, thiserror::Error)]
#[error("malformed public key identifier: {0:?}")]
pub struct ParsePublicKeyIdentifierError(String);

impl FromStr for PublicKeyIdentifier {
    type Err = ParsePublicKeyIdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (issuer, counter) = s
            .rsplit_once('-')
            .ok_or_else(|| ParsePublicKeyIdentifierError(s.to_owned()))?;
        if issuer.is_empty() {
            return Err(ParsePublicKeyIdentifierError(s.to_owned()));
        }
        let counter = counter
            .parse()
            .map_err(|_| ParsePublicKeyIdentifierError(s.to_owned()))?;
        Ok(Self {
            issuer: issuer.to_owned(),
            counter,
        })
    }
}

impl Serialize for PublicKeyIdentifier {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PublicKeyIdentifier {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// The public key of a trusted issuer, as far as the keyshare protocol is
/// concerned: the RSA-group modulus `n` and the base `S` under which the
/// server contributes `S^w mod n` commitments.
///
/// The full issuer key carries further bases used by the ABC runtime; the
/// keyshare server only ever exponentiates `S`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IssuerPublicKey {
    /// The issuer's RSA-group modulus.
    #[serde(rename = "n", with = "bigint::decimal")]
    pub modulus: BigUint,
    /// The base used for commitments to the user secret.
    #[serde(rename = "S", with = "bigint::decimal")]
    pub s: BigUint,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_key_identifier_roundtrip() {
        let id = PublicKeyIdentifier::new("irma-demo.MijnOverheid", 2);
        assert_eq!(id.to_string(), "irma-demo.MijnOverheid-2");
        let parsed: PublicKeyIdentifier = "irma-demo.MijnOverheid-2".parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn public_key_identifier_issuer_with_dashes() {
        let parsed: PublicKeyIdentifier = "irma-demo.some-issuer-7".parse().unwrap();
        assert_eq!(parsed.issuer, "irma-demo.some-issuer");
        assert_eq!(parsed.counter, 7);
    }

    #[test]
    fn public_key_identifier_rejects_garbage() {
        assert!("no-counter-here-".parse::<PublicKeyIdentifier>().is_err());
        assert!("justtext".parse::<PublicKeyIdentifier>().is_err());
        assert!("-2".parse::<PublicKeyIdentifier>().is_err());
    }

    #[test]
    fn public_key_identifier_serde_as_string() {
        let id = PublicKeyIdentifier::new("pbdf.pbdf", 1);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"pbdf.pbdf-1\"");
        let back: PublicKeyIdentifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
