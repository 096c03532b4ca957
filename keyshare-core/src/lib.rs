#![deny(missing_docs)]
//! Cryptographic engine of the keyshare server.
//!
//! A user's long-term credential secret is split between their device and
//! this server; the [`KeyshareCore`] owns the server side of that split. It
//! generates per-user secrets sealed into opaque blobs, authenticates users
//! by PIN, issues short-lived RS256 session tokens bound to the exact blob
//! they were issued for, and participates in Schnorr-style commit/response
//! proofs with the server's share.
//!
//! The core is stateless apart from loaded key material and the delegated
//! [`commitment_store::CommitmentStore`]; it never logs or returns secret
//! material and all PIN comparisons are constant-time.

use std::collections::HashMap;
use std::time::Duration;

use keyshare_types::api::v1::ProofPCommitment;
use keyshare_types::{CommitId, IssuerPublicKey, KeyId, PublicKeyIdentifier};
use num_bigint::BigUint;
use parking_lot::RwLock;
use rand::RngCore;
use rand::rngs::OsRng;

pub mod commitment_store;
mod jwt;
mod proof;
pub mod user_secret;

pub use jwt::{JwtKey, JwtKeyError};
pub use proof::{CHALLENGE_BITS, COMMIT_SCALAR_BITS, SECRET_BITS, STAT_HIDING_BITS};
pub use user_secret::{AesKey, PIN_MAX_BYTES, UserSecretBlob};

use commitment_store::{CommitmentStoreError, CommitmentStoreService};
use user_secret::UserSecretData;

/// Default JWT issuer string.
pub const JWT_ISSUER_DEFAULT: &str = "keyshare_server";

/// Default validity of PIN session tokens.
pub const JWT_PIN_EXPIRY_DEFAULT: Duration = Duration::from_secs(5 * 60);

/// Errors returned by the [`KeyshareCore`].
///
/// `InvalidPin` is a non-fatal outcome the caller uses to drive rate-limit
/// bookkeeping; the remaining sentinels are digested by the API layer. No
/// variant ever carries secret material.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The presented PIN does not match the sealed hash.
    #[error("invalid pin")]
    InvalidPin,
    /// The PIN exceeds the enforced length cap.
    #[error("pin exceeds maximum length")]
    PinTooLong,
    /// Signature, expiry, issuer, key id or blob binding check failed.
    #[error("invalid jwt")]
    InvalidJwt,
    /// The commitment was never stored, already consumed, or expired.
    #[error("invalid commitment session")]
    InvalidCommit,
    /// A commitment request named no issuer keys.
    #[error("no issuer keys requested")]
    EmptyKeyList,
    /// A requested issuer key is not in the trusted set.
    #[error("issuer key is not trusted: {0}")]
    UntrustedKey(PublicKeyIdentifier),
    /// The blob's key-id prefix names a storage key that is not loaded.
    #[error("storage key {0} is not loaded")]
    UnknownStorageKey(KeyId),
    /// The blob failed GCM authentication under its storage key.
    #[error("user secret blob cannot be decrypted")]
    DecryptionFailed,
    /// The blob or its decrypted payload has the wrong shape.
    #[error("user secret blob is malformed")]
    MalformedBlob,
    /// Sealing a fresh blob failed.
    #[error("cannot seal user secret blob")]
    SealFailed,
    /// Signing a session token failed.
    #[error("cannot sign session jwt")]
    Signing,
    /// The commitment store backend failed.
    #[error(transparent)]
    Store(CommitmentStoreError),
}

/// Configuration for constructing a [`KeyshareCore`].
pub struct CoreConfig {
    /// The current storage write key.
    pub decryption_key: AesKey,
    /// Identifier of the current storage key.
    pub decryption_key_id: KeyId,
    /// RSA key signing keyshare session tokens.
    pub jwt_key: JwtKey,
    /// JWT issuer string; [`JWT_ISSUER_DEFAULT`] if `None`.
    pub jwt_issuer: Option<String>,
    /// Session token validity; [`JWT_PIN_EXPIRY_DEFAULT`] if `None`.
    pub jwt_pin_expiry: Option<Duration>,
    /// Store for unconsumed commitments and auth challenges.
    pub store: CommitmentStoreService,
}

struct KeyRing {
    keys: HashMap<KeyId, AesKey>,
    current: KeyId,
}

impl KeyRing {
    fn current_key(&self) -> (KeyId, AesKey) {
        let key = self.keys[&self.current].clone();
        (self.current, key)
    }
}

/// The keyshare engine. See the crate docs for the security model.
///
/// Cheap to share behind an `Arc`; the key ring and trusted-key table are
/// only written by the configuration-reload path, so both sit behind
/// reader-writer locks with short critical sections.
pub struct KeyshareCore {
    keys: RwLock<KeyRing>,
    jwt_key: JwtKey,
    jwt_issuer: String,
    jwt_pin_expiry: Duration,
    trusted_keys: RwLock<HashMap<PublicKeyIdentifier, IssuerPublicKey>>,
    store: CommitmentStoreService,
}

impl KeyshareCore {
    /// Builds a core from its configuration.
    pub fn new(config: CoreConfig) -> Self {
        let mut keys = HashMap::new();
        keys.insert(config.decryption_key_id, config.decryption_key);
        Self {
            keys: RwLock::new(KeyRing {
                keys,
                current: config.decryption_key_id,
            }),
            jwt_key: config.jwt_key,
            jwt_issuer: config
                .jwt_issuer
                .unwrap_or_else(|| JWT_ISSUER_DEFAULT.to_owned()),
            jwt_pin_expiry: config.jwt_pin_expiry.unwrap_or(JWT_PIN_EXPIRY_DEFAULT),
            trusted_keys: RwLock::new(HashMap::new()),
            store: config.store,
        }
    }

    /// Adds a storage key for decryption only; the write key is fixed at
    /// construction.
    ///
    /// Dangerous: every blob that decrypts under this key becomes trusted.
    /// Only call from startup or a verified configuration reload.
    pub fn dangerous_add_decryption_key(&self, key_id: KeyId, key: AesKey) {
        self.keys.write().keys.insert(key_id, key);
    }

    /// Marks an issuer public key as trusted for commitment generation.
    ///
    /// Dangerous: commitments will be produced under this key from now on.
    /// Only call from startup or a verified configuration reload.
    pub fn dangerous_add_trusted_public_key(
        &self,
        key_id: PublicKeyIdentifier,
        key: IssuerPublicKey,
    ) {
        self.trusted_keys.write().insert(key_id, key);
    }

    /// Generates a fresh user secret for `pin` and seals it under the
    /// current storage key.
    pub fn generate_keyshare_secret(&self, pin: &str) -> Result<UserSecretBlob, CoreError> {
        let data = UserSecretData::new(pin, proof::sample_keyshare_secret())?;
        self.seal_current(&data)
    }

    /// Verifies `pin` against the sealed hash and, on success, issues a
    /// session token for `username` bound to this exact blob.
    ///
    /// A mismatching PIN is reported as [`CoreError::InvalidPin`]; the
    /// caller is responsible for rate-limit bookkeeping around this call.
    pub fn validate_pin(
        &self,
        blob: &UserSecretBlob,
        pin: &str,
        username: &str,
    ) -> Result<String, CoreError> {
        let data = self.unseal(blob)?;
        data.verify_pin(pin)?;
        self.jwt_key
            .issue(&self.jwt_issuer, username, blob.token_id(), self.jwt_pin_expiry)
    }

    /// Verifies a session token: signature, issuer, expiry, signing key id,
    /// and that its `token_id` matches `blob`.
    pub fn validate_jwt(&self, blob: &UserSecretBlob, token: &str) -> Result<(), CoreError> {
        let claims = self.jwt_key.verify(&self.jwt_issuer, token)?;
        if claims.token_id != blob.token_id() {
            return Err(CoreError::InvalidJwt);
        }
        Ok(())
    }

    /// Re-seals the user secret under a new PIN (and, opportunistically,
    /// the current storage key). The keyshare secret is preserved; session
    /// tokens issued against the old blob stop validating because the blob
    /// content changes.
    pub fn change_pin(
        &self,
        blob: &UserSecretBlob,
        old_pin: &str,
        new_pin: &str,
    ) -> Result<UserSecretBlob, CoreError> {
        let data = self.unseal(blob)?;
        data.verify_pin(old_pin)?;
        let renewed = UserSecretData::new(new_pin, data.secret)?;
        self.seal_current(&renewed)
    }

    /// Produces the server's proof commitments for the requested issuer
    /// keys and parks the commitment scalar in the store.
    ///
    /// One scalar `w` is shared across all keys; the returned vector is
    /// parallel to `keys`. Refuses the whole request if any key is
    /// untrusted; never commits to a subset.
    pub fn generate_commitments(
        &self,
        blob: &UserSecretBlob,
        token: &str,
        keys: &[PublicKeyIdentifier],
    ) -> Result<(Vec<ProofPCommitment>, CommitId), CoreError> {
        self.validate_jwt(blob, token)?;
        if keys.is_empty() {
            return Err(CoreError::EmptyKeyList);
        }

        let issuer_keys: Vec<IssuerPublicKey> = {
            let trusted = self.trusted_keys.read();
            keys.iter()
                .map(|id| {
                    trusted
                        .get(id)
                        .cloned()
                        .ok_or_else(|| CoreError::UntrustedKey(id.clone()))
                })
                .collect::<Result<_, _>>()?
        };

        let w = proof::sample_commit_scalar();
        let commitments = issuer_keys
            .iter()
            .map(|key| ProofPCommitment {
                p_commit: proof::p_commitment(key, &w),
            })
            .collect();

        let commit_id = CommitId::new(OsRng.next_u64());
        self.store
            .store_commitment(commit_id, w)
            .map_err(CoreError::Store)?;
        tracing::debug!("stored commitment {commit_id}");
        Ok((commitments, commit_id))
    }

    /// Consumes the parked commitment scalar and answers `challenge` with
    /// the response `w + challenge · s`, serialized as a decimal string.
    ///
    /// The consume is an atomic take: a second call for the same commit id
    /// fails with [`CoreError::InvalidCommit`], under any interleaving.
    pub fn generate_response(
        &self,
        blob: &UserSecretBlob,
        token: &str,
        commit_id: CommitId,
        challenge: &BigUint,
        key_id: &PublicKeyIdentifier,
    ) -> Result<String, CoreError> {
        self.validate_jwt(blob, token)?;
        let w = self.store.consume_commitment(commit_id).map_err(|err| match err {
            CommitmentStoreError::NotFound => CoreError::InvalidCommit,
            backend => CoreError::Store(backend),
        })?;
        let data = self.unseal(blob)?;
        if !self.trusted_keys.read().contains_key(key_id) {
            return Err(CoreError::UntrustedKey(key_id.clone()));
        }
        let response = proof::response_scalar(&w, challenge, &data.secret);
        Ok(response.to_str_radix(10))
    }

    fn seal_current(&self, data: &UserSecretData) -> Result<UserSecretBlob, CoreError> {
        let (key_id, key) = self.keys.read().current_key();
        user_secret::seal(&key, key_id, data)
    }

    fn unseal(&self, blob: &UserSecretBlob) -> Result<UserSecretData, CoreError> {
        let key_id = blob.key_id()?;
        let key = self
            .keys
            .read()
            .keys
            .get(&key_id)
            .cloned()
            .ok_or(CoreError::UnknownStorageKey(key_id))?;
        user_secret::unseal(&key, blob)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, LazyLock};

    use num_traits::One;
    use rsa::RsaPrivateKey;
    use rsa::pkcs8::{EncodePrivateKey, LineEnding};

    use crate::commitment_store::{CommitmentStore, MemoryCommitmentStore};

    use super::*;

    // RSA key generation is the slow part of the setup; do it once.
    static TEST_JWT_PEM: LazyLock<String> = LazyLock::new(|| {
        let key = RsaPrivateKey::new(&mut OsRng, 2048).expect("can generate RSA key");
        key.to_pkcs8_pem(LineEnding::LF)
            .expect("can encode RSA key")
            .to_string()
    });

    fn test_issuer_key() -> IssuerPublicKey {
        // any odd modulus exercises the commitment algebra
        IssuerPublicKey {
            modulus: (BigUint::one() << 1024u32) + BigUint::from(1297u32),
            s: BigUint::from(5u32),
        }
    }

    struct TestSetup {
        core: KeyshareCore,
        store: Arc<MemoryCommitmentStore>,
        aes_key: AesKey,
        issuer_key_id: PublicKeyIdentifier,
    }

    impl TestSetup {
        fn new() -> Self {
            Self::with_current_key(AesKey::generate(), KeyId::new(1))
        }

        fn with_current_key(aes_key: AesKey, key_id: KeyId) -> Self {
            let store = Arc::new(MemoryCommitmentStore::default());
            let commitment_store: CommitmentStoreService =
                Arc::clone(&store) as CommitmentStoreService;
            let core = KeyshareCore::new(CoreConfig {
                decryption_key: aes_key.clone(),
                decryption_key_id: key_id,
                jwt_key: JwtKey::from_private_pem(KeyId::new(1), &TEST_JWT_PEM)
                    .expect("can load test JWT key"),
                jwt_issuer: None,
                jwt_pin_expiry: None,
                store: commitment_store,
            });
            let issuer_key_id = PublicKeyIdentifier::new("test.issuer", 0);
            core.dangerous_add_trusted_public_key(issuer_key_id.clone(), test_issuer_key());
            Self {
                core,
                store,
                aes_key,
                issuer_key_id,
            }
        }

        /// Seals a blob with a caller-chosen keyshare secret, so tests can
        /// check the verifier relation against a known `s`.
        fn blob_with_secret(&self, pin: &str, secret: BigUint) -> UserSecretBlob {
            let data = UserSecretData::new(pin, secret).expect("valid pin");
            user_secret::seal(&self.aes_key, KeyId::new(1), &data).expect("can seal")
        }
    }

    #[test]
    fn pin_roundtrip() {
        let setup = TestSetup::new();
        let blob = setup.core.generate_keyshare_secret("12345").unwrap();
        let jwt = setup.core.validate_pin(&blob, "12345", "user").unwrap();
        assert!(setup.core.validate_jwt(&blob, &jwt).is_ok());
        assert!(matches!(
            setup.core.validate_pin(&blob, "54321", "user"),
            Err(CoreError::InvalidPin)
        ));
    }

    #[test]
    fn overlong_pin_is_not_an_account() {
        let setup = TestSetup::new();
        assert!(matches!(
            setup.core.generate_keyshare_secret(&"1".repeat(65)),
            Err(CoreError::PinTooLong)
        ));
    }

    #[test]
    fn jwt_is_bound_to_one_blob() {
        let setup = TestSetup::new();
        let blob_a = setup.core.generate_keyshare_secret("12345").unwrap();
        let blob_b = setup.core.generate_keyshare_secret("12345").unwrap();
        let jwt = setup.core.validate_pin(&blob_a, "12345", "user").unwrap();
        assert!(setup.core.validate_jwt(&blob_a, &jwt).is_ok());
        assert!(matches!(
            setup.core.validate_jwt(&blob_b, &jwt),
            Err(CoreError::InvalidJwt)
        ));
    }

    #[test]
    fn garbage_jwt_is_invalid() {
        let setup = TestSetup::new();
        let blob = setup.core.generate_keyshare_secret("12345").unwrap();
        assert!(matches!(
            setup.core.validate_jwt(&blob, "not.a.jwt"),
            Err(CoreError::InvalidJwt)
        ));
    }

    #[test]
    fn change_pin_preserves_share_and_invalidates_old_jwt() {
        let setup = TestSetup::new();
        let secret = BigUint::from(424_242u32);
        let blob = setup.blob_with_secret("12345", secret.clone());
        let old_jwt = setup.core.validate_pin(&blob, "12345", "user").unwrap();

        let new_blob = setup.core.change_pin(&blob, "12345", "00000").unwrap();
        assert!(setup.core.validate_pin(&new_blob, "00000", "user").is_ok());
        assert!(matches!(
            setup.core.validate_pin(&new_blob, "12345", "user"),
            Err(CoreError::InvalidPin)
        ));
        assert!(matches!(
            setup.core.validate_jwt(&new_blob, &old_jwt),
            Err(CoreError::InvalidJwt)
        ));

        // identical (w, challenge, key) inputs yield the identical response
        // scalar before and after the change: the share is untouched
        let w = BigUint::from(987_654_321u64);
        let challenge = BigUint::from(42u32);
        let jwt_old = setup.core.validate_pin(&blob, "12345", "user").unwrap();
        let jwt_new = setup.core.validate_pin(&new_blob, "00000", "user").unwrap();
        let id_a = CommitId::new(1);
        let id_b = CommitId::new(2);
        setup.store.store_commitment(id_a, w.clone()).unwrap();
        setup.store.store_commitment(id_b, w).unwrap();
        let before = setup
            .core
            .generate_response(&blob, &jwt_old, id_a, &challenge, &setup.issuer_key_id)
            .unwrap();
        let after = setup
            .core
            .generate_response(&new_blob, &jwt_new, id_b, &challenge, &setup.issuer_key_id)
            .unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn wrong_old_pin_refuses_change() {
        let setup = TestSetup::new();
        let blob = setup.core.generate_keyshare_secret("12345").unwrap();
        assert!(matches!(
            setup.core.change_pin(&blob, "99999", "00000"),
            Err(CoreError::InvalidPin)
        ));
    }

    #[test]
    fn commit_and_respond_satisfies_verifier_relation() {
        let setup = TestSetup::new();
        let secret = BigUint::from(0xc0ffeeu32);
        let blob = setup.blob_with_secret("12345", secret.clone());
        let jwt = setup.core.validate_pin(&blob, "12345", "user").unwrap();

        let (commitments, commit_id) = setup
            .core
            .generate_commitments(&blob, &jwt, std::slice::from_ref(&setup.issuer_key_id))
            .unwrap();
        assert_eq!(commitments.len(), 1);

        let challenge = BigUint::from(42u32);
        let response = setup
            .core
            .generate_response(&blob, &jwt, commit_id, &challenge, &setup.issuer_key_id)
            .unwrap();
        let response = BigUint::parse_bytes(response.as_bytes(), 10).unwrap();

        let key = test_issuer_key();
        let lhs = key.s.modpow(&response, &key.modulus);
        let rhs = commitments[0].p_commit.clone()
            * key
                .s
                .modpow(&secret, &key.modulus)
                .modpow(&challenge, &key.modulus)
            % &key.modulus;
        assert_eq!(lhs, rhs);
    }

    #[test]
    fn second_response_for_same_commit_is_refused() {
        let setup = TestSetup::new();
        let blob = setup.core.generate_keyshare_secret("12345").unwrap();
        let jwt = setup.core.validate_pin(&blob, "12345", "user").unwrap();
        let (_, commit_id) = setup
            .core
            .generate_commitments(&blob, &jwt, std::slice::from_ref(&setup.issuer_key_id))
            .unwrap();

        let challenge = BigUint::from(42u32);
        assert!(setup
            .core
            .generate_response(&blob, &jwt, commit_id, &challenge, &setup.issuer_key_id)
            .is_ok());
        assert!(matches!(
            setup
                .core
                .generate_response(&blob, &jwt, commit_id, &challenge, &setup.issuer_key_id),
            Err(CoreError::InvalidCommit)
        ));
    }

    #[test]
    fn untrusted_issuer_key_refuses_whole_request() {
        let setup = TestSetup::new();
        let blob = setup.core.generate_keyshare_secret("12345").unwrap();
        let jwt = setup.core.validate_pin(&blob, "12345", "user").unwrap();

        let unknown = PublicKeyIdentifier::new("test.issuer", 99);
        let mixed = [setup.issuer_key_id.clone(), unknown.clone()];
        assert!(matches!(
            setup.core.generate_commitments(&blob, &jwt, &mixed),
            Err(CoreError::UntrustedKey(id)) if id == unknown
        ));
        // no commitment scalar was parked for the refused request
        assert_eq!(setup.store.pending_commitments(), 0);
    }

    #[test]
    fn empty_key_list_is_refused() {
        let setup = TestSetup::new();
        let blob = setup.core.generate_keyshare_secret("12345").unwrap();
        let jwt = setup.core.validate_pin(&blob, "12345", "user").unwrap();
        assert!(matches!(
            setup.core.generate_commitments(&blob, &jwt, &[]),
            Err(CoreError::EmptyKeyList)
        ));
    }

    #[test]
    fn commitments_require_valid_jwt() {
        let setup = TestSetup::new();
        let blob = setup.core.generate_keyshare_secret("12345").unwrap();
        assert!(matches!(
            setup
                .core
                .generate_commitments(&blob, "garbage", std::slice::from_ref(&setup.issuer_key_id)),
            Err(CoreError::InvalidJwt)
        ));
    }

    #[test]
    fn old_blobs_survive_key_rotation() {
        let old_key = AesKey::generate();
        let old_setup = TestSetup::with_current_key(old_key.clone(), KeyId::new(1));
        let blob = old_setup.core.generate_keyshare_secret("12345").unwrap();
        assert_eq!(blob.key_id().unwrap(), KeyId::new(1));

        // rotated core: key 2 is current, key 1 retained for decryption
        let rotated = TestSetup::with_current_key(AesKey::generate(), KeyId::new(2));
        rotated.core.dangerous_add_decryption_key(KeyId::new(1), old_key);

        assert!(rotated.core.validate_pin(&blob, "12345", "user").is_ok());
        let reencrypted = rotated.core.change_pin(&blob, "12345", "00000").unwrap();
        assert_eq!(reencrypted.key_id().unwrap(), KeyId::new(2));

        let fresh = rotated.core.generate_keyshare_secret("12345").unwrap();
        assert_eq!(fresh.key_id().unwrap(), KeyId::new(2));
    }

    #[test]
    fn unknown_storage_key_is_reported() {
        let setup = TestSetup::new();
        let blob = setup.core.generate_keyshare_secret("12345").unwrap();
        let other = TestSetup::with_current_key(AesKey::generate(), KeyId::new(9));
        assert!(matches!(
            other.core.validate_pin(&blob, "12345", "user"),
            Err(CoreError::UnknownStorageKey(id)) if id == KeyId::new(1)
        ));
    }
}
