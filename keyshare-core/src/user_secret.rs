//! Sealed per-user secret material.
//!
//! A user's secret state is a fixed-width packing of `{pin salt, pin hash,
//! keyshare secret}` sealed with AES-256-GCM under one of the server's
//! storage keys. The sealed blob is opaque to the user store; its only
//! structure visible from outside is the 4-byte big-endian key-id prefix
//! selecting the storage key, followed by the GCM nonce and ciphertext+tag:
//!
//! ```text
//! [key id (4, BE)][nonce (12)][ciphertext || tag]
//! ```
//!
//! The key id prefix is fed to the cipher as associated data, so a blob
//! cannot be re-pointed at a different storage key without failing
//! authentication. Any layout change requires a new key id.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use keyshare_types::KeyId;
use num_bigint::BigUint;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::CoreError;

/// Longest accepted PIN, in bytes. PINs are padded to this width before
/// hashing so the hash input is fixed-size.
pub const PIN_MAX_BYTES: usize = 64;

pub(crate) const SALT_LEN: usize = 32;
pub(crate) const PIN_HASH_LEN: usize = 32;
pub(crate) const SECRET_LEN: usize = 32;
pub(crate) const PLAINTEXT_LEN: usize = SALT_LEN + PIN_HASH_LEN + SECRET_LEN;

const KEY_ID_PREFIX_LEN: usize = 4;
const NONCE_LEN: usize = 12;

/// A 32-byte AES storage key. Not `Debug`/`Display` to avoid accidental
/// leaks; zeroed on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct AesKey([u8; 32]);

impl AesKey {
    /// Wraps raw key bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Samples a fresh random storage key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

/// The sealed user secret as persisted by the user store.
#[derive(Clone, PartialEq, Eq)]
pub struct UserSecretBlob(Vec<u8>);

impl UserSecretBlob {
    /// Wraps blob bytes read back from storage.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The raw blob bytes for persistence.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The id of the storage key this blob is sealed under.
    pub fn key_id(&self) -> Result<KeyId, CoreError> {
        let prefix: [u8; 4] = self.0[..KEY_ID_PREFIX_LEN.min(self.0.len())]
            .try_into()
            .map_err(|_| CoreError::MalformedBlob)?;
        Ok(KeyId::from_be_bytes(prefix))
    }

    /// Deterministic token id binding session JWTs to this exact blob.
    pub(crate) fn token_id(&self) -> String {
        hex::encode(Sha256::digest(&self.0))
    }
}

/// Decrypted user secret state. Only ever lives on the stack inside core
/// operations.
pub(crate) struct UserSecretData {
    pub(crate) salt: [u8; SALT_LEN],
    pub(crate) pin_hash: [u8; PIN_HASH_LEN],
    pub(crate) secret: BigUint,
}

impl UserSecretData {
    /// Builds fresh state for the given PIN and keyshare secret.
    pub(crate) fn new(pin: &str, secret: BigUint) -> Result<Self, CoreError> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let pin_hash = hash_pin(&salt, pin)?;
        Ok(Self {
            salt,
            pin_hash,
            secret,
        })
    }

    /// Constant-time check of a PIN attempt against the stored hash.
    pub(crate) fn verify_pin(&self, pin: &str) -> Result<(), CoreError> {
        let candidate = hash_pin(&self.salt, pin)?;
        if bool::from(candidate.ct_eq(&self.pin_hash)) {
            Ok(())
        } else {
            Err(CoreError::InvalidPin)
        }
    }

    fn pack(&self) -> [u8; PLAINTEXT_LEN] {
        let mut out = [0u8; PLAINTEXT_LEN];
        out[..SALT_LEN].copy_from_slice(&self.salt);
        out[SALT_LEN..SALT_LEN + PIN_HASH_LEN].copy_from_slice(&self.pin_hash);
        let secret = self.secret.to_bytes_be();
        // left-pad the secret into its fixed-width slot
        out[PLAINTEXT_LEN - secret.len()..].copy_from_slice(&secret);
        out
    }

    fn unpack(bytes: &[u8]) -> Result<Self, CoreError> {
        if bytes.len() != PLAINTEXT_LEN {
            return Err(CoreError::MalformedBlob);
        }
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&bytes[..SALT_LEN]);
        let mut pin_hash = [0u8; PIN_HASH_LEN];
        pin_hash.copy_from_slice(&bytes[SALT_LEN..SALT_LEN + PIN_HASH_LEN]);
        let secret = BigUint::from_bytes_be(&bytes[SALT_LEN + PIN_HASH_LEN..]);
        Ok(Self {
            salt,
            pin_hash,
            secret,
        })
    }
}

/// Hashes a PIN with the per-blob salt. The PIN is zero-padded to
/// [`PIN_MAX_BYTES`]; longer PINs fail with [`CoreError::PinTooLong`].
pub(crate) fn hash_pin(salt: &[u8; SALT_LEN], pin: &str) -> Result<[u8; PIN_HASH_LEN], CoreError> {
    if pin.len() > PIN_MAX_BYTES {
        return Err(CoreError::PinTooLong);
    }
    let mut padded = [0u8; PIN_MAX_BYTES];
    padded[..pin.len()].copy_from_slice(pin.as_bytes());
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(padded);
    padded.zeroize();
    Ok(hasher.finalize().into())
}

/// Seals user secret state under the given storage key.
pub(crate) fn seal(
    key: &AesKey,
    key_id: KeyId,
    data: &UserSecretData,
) -> Result<UserSecretBlob, CoreError> {
    let cipher = Aes256Gcm::new_from_slice(&key.0).map_err(|_| CoreError::SealFailed)?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let prefix = key_id.to_be_bytes();
    let mut plaintext = data.pack();
    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: &plaintext,
                aad: &prefix,
            },
        )
        .map_err(|_| CoreError::SealFailed)?;
    plaintext.zeroize();

    let mut blob = Vec::with_capacity(KEY_ID_PREFIX_LEN + NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&prefix);
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(UserSecretBlob(blob))
}

/// Unseals a blob with the storage key matching its key-id prefix.
pub(crate) fn unseal(key: &AesKey, blob: &UserSecretBlob) -> Result<UserSecretData, CoreError> {
    if blob.0.len() < KEY_ID_PREFIX_LEN + NONCE_LEN {
        return Err(CoreError::MalformedBlob);
    }
    let (header, ciphertext) = blob.0.split_at(KEY_ID_PREFIX_LEN + NONCE_LEN);
    let (prefix, nonce_bytes) = header.split_at(KEY_ID_PREFIX_LEN);

    let cipher = Aes256Gcm::new_from_slice(&key.0).map_err(|_| CoreError::DecryptionFailed)?;
    let mut plaintext = cipher
        .decrypt(
            Nonce::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad: prefix,
            },
        )
        .map_err(|_| CoreError::DecryptionFailed)?;
    let data = UserSecretData::unpack(&plaintext);
    plaintext.zeroize();
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_data(pin: &str) -> UserSecretData {
        UserSecretData::new(pin, BigUint::from(0xdead_beefu64)).unwrap()
    }

    #[test]
    fn seal_unseal_roundtrip() {
        let key = AesKey::generate();
        let data = test_data("12345");
        let blob = seal(&key, KeyId::new(1), &data).unwrap();
        assert_eq!(blob.key_id().unwrap(), KeyId::new(1));

        let back = unseal(&key, &blob).unwrap();
        assert_eq!(back.salt, data.salt);
        assert_eq!(back.pin_hash, data.pin_hash);
        assert_eq!(back.secret, data.secret);
    }

    #[test]
    fn wrong_key_fails() {
        let blob = seal(&AesKey::generate(), KeyId::new(1), &test_data("12345")).unwrap();
        assert!(matches!(
            unseal(&AesKey::generate(), &blob),
            Err(CoreError::DecryptionFailed)
        ));
    }

    #[test]
    fn tampered_key_id_prefix_fails() {
        let key = AesKey::generate();
        let blob = seal(&key, KeyId::new(1), &test_data("12345")).unwrap();
        let mut bytes = blob.0.clone();
        bytes[3] ^= 0x01;
        assert!(matches!(
            unseal(&key, &UserSecretBlob(bytes)),
            Err(CoreError::DecryptionFailed)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = AesKey::generate();
        let blob = seal(&key, KeyId::new(1), &test_data("12345")).unwrap();
        let mut bytes = blob.0.clone();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(unseal(&key, &UserSecretBlob(bytes)).is_err());
    }

    #[test]
    fn pin_verification() {
        let data = test_data("12345");
        assert!(data.verify_pin("12345").is_ok());
        assert!(matches!(
            data.verify_pin("12346"),
            Err(CoreError::InvalidPin)
        ));
    }

    #[test]
    fn overlong_pin_rejected() {
        let long = "9".repeat(PIN_MAX_BYTES + 1);
        assert!(matches!(
            UserSecretData::new(&long, BigUint::from(1u8)),
            Err(CoreError::PinTooLong)
        ));
        // exactly at the cap is fine
        let max = "9".repeat(PIN_MAX_BYTES);
        assert!(UserSecretData::new(&max, BigUint::from(1u8)).is_ok());
    }

    #[test]
    fn token_id_tracks_blob_content() {
        let key = AesKey::generate();
        let data = test_data("12345");
        let a = seal(&key, KeyId::new(1), &data).unwrap();
        let b = seal(&key, KeyId::new(1), &data).unwrap();
        // fresh nonce per seal, so even identical state yields a new token id
        assert_ne!(a.token_id(), b.token_id());
        assert_eq!(a.token_id(), a.clone().token_id());
    }
}
