use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use eyre::Context;
use keyshare_core::{AesKey, JwtKey};
use keyshare_types::KeyId;
use secrecy::{ExposeSecret, SecretString};

/// The configuration for the keyshare server.
///
/// It can be configured via environment variables or command line arguments
/// using `clap`. Key material is referenced by file path and loaded at
/// startup; see [`load_decryption_key`] and [`load_jwt_key`].
#[derive(Parser, Debug)]
pub struct KeyshareConfig {
    /// The bind addr of the AXUM server.
    #[clap(long, env = "KEYSHARE_BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: SocketAddr,

    /// Max size we allow for request bodies in bytes.
    #[clap(long, env = "KEYSHARE_INPUT_MAX_BODY_LIMIT", default_value = "32768")]
    pub input_max_body_limit: usize,

    /// File holding the current 32-byte AES storage key, hex encoded.
    #[clap(long, env = "KEYSHARE_DECRYPTION_KEY_FILE")]
    pub decryption_key_file: PathBuf,

    /// Identifier of the current AES storage key.
    #[clap(long, env = "KEYSHARE_DECRYPTION_KEY_ID", default_value = "1")]
    pub decryption_key_id: u32,

    /// File holding the RSA private key signing session JWTs, PKCS#8 PEM.
    #[clap(long, env = "KEYSHARE_JWT_PRIVATE_KEY_FILE")]
    pub jwt_private_key_file: PathBuf,

    /// Identifier of the JWT signing key, sent as the `kid` header.
    #[clap(long, env = "KEYSHARE_JWT_PRIVATE_KEY_ID", default_value = "1")]
    pub jwt_private_key_id: u32,

    /// Issuer string for session JWTs.
    #[clap(long, env = "KEYSHARE_JWT_ISSUER")]
    pub jwt_issuer: Option<String>,

    /// Validity of session JWTs issued on successful PIN verification.
    #[clap(
        long,
        env = "KEYSHARE_JWT_PIN_EXPIRY",
        default_value = "5min",
        value_parser = humantime::parse_duration
    )]
    pub jwt_pin_expiry: Duration,

    /// Lifetime of unconsumed commitment scalars.
    #[clap(
        long,
        env = "KEYSHARE_COMMITMENT_LIFETIME",
        default_value = "10min",
        value_parser = humantime::parse_duration
    )]
    pub commitment_lifetime: Duration,

    /// Lifetime of session cache entries.
    #[clap(
        long,
        env = "KEYSHARE_SESSION_CACHE_LIFETIME",
        default_value = "10s",
        value_parser = humantime::parse_duration
    )]
    pub session_cache_lifetime: Duration,

    /// Interval of the expiry sweep over session cache and commitment store.
    #[clap(
        long,
        env = "KEYSHARE_SWEEP_INTERVAL",
        default_value = "10s",
        value_parser = humantime::parse_duration
    )]
    pub sweep_interval: Duration,

    /// PIN check attempts granted before an account is blocked.
    #[clap(long, env = "KEYSHARE_PIN_CHECK_MAX_TRIES", default_value = "3")]
    pub pin_check_max_tries: u64,

    /// Base wait after exhausting the PIN check budget; doubles per
    /// subsequent block.
    #[clap(
        long,
        env = "KEYSHARE_PIN_CHECK_BACKOFF",
        default_value = "1min",
        value_parser = humantime::parse_duration
    )]
    pub pin_check_backoff: Duration,

    /// JSON file mapping issuer key identifiers to trusted issuer public
    /// keys, exported from the ABC scheme configuration. Reloaded on SIGHUP.
    #[clap(long, env = "KEYSHARE_TRUSTED_KEYS_FILE")]
    pub trusted_keys_file: Option<PathBuf>,

    /// Base URL of the downstream issuance session server.
    #[clap(long, env = "KEYSHARE_ISSUANCE_SERVER_URL")]
    pub issuance_server_url: String,

    /// Credential type issued to fresh accounts during enrollment.
    #[clap(long, env = "KEYSHARE_CREDENTIAL")]
    pub keyshare_credential: String,

    /// Attribute of the keyshare credential carrying the username.
    #[clap(long, env = "KEYSHARE_ATTRIBUTE")]
    pub keyshare_attribute: String,

    /// Bind addr of the Prometheus scrape endpoint; metrics are disabled
    /// when unset.
    #[clap(long, env = "KEYSHARE_METRICS_BIND_ADDR")]
    pub metrics_bind_addr: Option<SocketAddr>,
}

/// Loads the hex-encoded AES storage key from `path`.
pub fn load_decryption_key(path: &Path) -> eyre::Result<AesKey> {
    let encoded = SecretString::from(
        std::fs::read_to_string(path)
            .with_context(|| format!("while reading AES key from {path:?}"))?,
    );
    let bytes = hex::decode(encoded.expose_secret().trim())
        .context("while decoding AES key hex")?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| eyre::eyre!("AES storage key must be exactly 32 bytes"))?;
    Ok(AesKey::from_bytes(bytes))
}

/// Loads the RSA JWT signing key from the PEM file at `path`.
pub fn load_jwt_key(key_id: KeyId, path: &Path) -> eyre::Result<JwtKey> {
    let pem = SecretString::from(
        std::fs::read_to_string(path)
            .with_context(|| format!("while reading JWT private key from {path:?}"))?,
    );
    JwtKey::from_private_pem(key_id, pem.expose_secret())
        .context("while parsing JWT private key")
}
