//! Schnorr-style proof participation.
//!
//! The server holds an additive share `s` of the user's credential secret.
//! For a proof session it samples a commitment scalar `w`, publishes
//! `W = S^w mod n` per requested issuer key, and later answers a challenge
//! `c` with the response `r = w + c·s` computed over the integers (the
//! verifier applies `S^r ≡ W · (S^s)^c (mod n)` itself, so no reduction
//! happens here). One `w` is shared across all requested keys: hiding
//! depends only on its distribution, not on per-key uniqueness.

use keyshare_types::IssuerPublicKey;
use num_bigint::{BigUint, RandBigInt};
use rand::rngs::OsRng;

/// Bit length of the user attribute space in the ABC system; the keyshare
/// secret is sampled from this range.
pub const SECRET_BITS: u64 = 256;

/// Bit length of proof challenges.
pub const CHALLENGE_BITS: u64 = 256;

/// Statistical hiding slack on top of secret and challenge lengths.
pub const STAT_HIDING_BITS: u64 = 80;

/// Bit length of commitment scalars: `w` must statistically hide
/// `c·s`, which is at most `CHALLENGE_BITS + SECRET_BITS` bits.
pub const COMMIT_SCALAR_BITS: u64 = SECRET_BITS + CHALLENGE_BITS + STAT_HIDING_BITS;

/// Samples a fresh keyshare secret, uniform in `[0, 2^SECRET_BITS)`.
pub(crate) fn sample_keyshare_secret() -> BigUint {
    OsRng.gen_biguint(SECRET_BITS)
}

/// Samples a fresh commitment scalar, uniform in `[0, 2^COMMIT_SCALAR_BITS)`.
pub(crate) fn sample_commit_scalar() -> BigUint {
    OsRng.gen_biguint(COMMIT_SCALAR_BITS)
}

/// The server's contribution `S^w mod n` under one issuer key.
pub(crate) fn p_commitment(key: &IssuerPublicKey, w: &BigUint) -> BigUint {
    key.s.modpow(w, &key.modulus)
}

/// The response scalar `w + c·s`, over the integers.
pub(crate) fn response_scalar(w: &BigUint, challenge: &BigUint, secret: &BigUint) -> BigUint {
    w + challenge * secret
}
