//! HTTP keyshare server for an attribute-based credential ecosystem.
//!
//! A user's long-term credential secret is split between their device and
//! this server; neither party alone can prove possession of a credential.
//! This crate wires the `keyshare-core` engine behind the keyshare
//! protocol's HTTP surface:
//!
//! - enrollment (`/client/register`) with an optional verification mail
//!   and the downstream issuance session delivering the keyshare
//!   credential,
//! - PIN verification and change under an atomic rate-limit ladder,
//! - the two-move proof protocol (`/prove/getCommitments`,
//!   `/prove/getResponse`).
//!
//! The server persists only opaque sealed blobs plus rate-limit counters,
//! both behind the [`UserStore`] interface; commitment scalars live in the
//! core's commitment store. A periodic sweep expires the per-user session
//! cache and the in-memory stores.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::FromRef;
use eyre::Context as _;
use keyshare_core::commitment_store::CommitmentStoreService;
use keyshare_core::{CoreConfig, KeyshareCore};
use keyshare_types::{IssuerPublicKey, KeyId, PublicKeyIdentifier};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::services::keyshare::KeyshareService;
use crate::services::session_cache::SessionCache;

pub(crate) mod api;
pub mod config;
pub mod metrics;
pub(crate) mod services;

pub use services::enrollment::{
    CredentialRequest, HttpSessionStarter, Mailer, MailerService, SessionStarter,
    SessionStarterService,
};
pub use services::user_store::{
    KeyshareUser, LogEntryKind, MemoryUserStore, PincheckPolicy, PincheckReservation, UserStore,
    UserStoreError, UserStoreService,
};

/// Returns cargo package name and version of the binary.
pub fn version_info() -> String {
    format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

/// Main application state for the keyshare server used for Axum.
///
/// If Axum should be able to extract services, it should be added to
/// the `AppState`.
#[derive(Clone)]
pub(crate) struct AppState {
    core: Arc<KeyshareCore>,
    users: UserStoreService,
    keyshare: KeyshareService,
}

impl FromRef<AppState> for KeyshareService {
    fn from_ref(input: &AppState) -> Self {
        input.keyshare.clone()
    }
}

/// External collaborators the server is wired with at startup.
pub struct KeyshareDependencies {
    /// Persists user rows and rate-limit state.
    pub user_store: UserStoreService,
    /// Holds unconsumed commitment scalars and auth challenges.
    pub commitment_store: CommitmentStoreService,
    /// Starts issuance sessions on the downstream session server.
    pub session_starter: SessionStarterService,
    /// Sends enrollment verification mails; `None` disables them.
    pub mailer: Option<MailerService>,
    /// Router of the downstream issuance server, mounted at `/irma`.
    pub issuance_router: Option<Router>,
}

/// Loads trusted issuer public keys from the JSON export at `path` into
/// the core. Malformed entries are skipped with a warning; returns the
/// number of keys loaded.
pub fn load_trusted_keys(core: &KeyshareCore, path: &Path) -> eyre::Result<usize> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("while opening trusted keys file {path:?}"))?;
    let keys: HashMap<String, IssuerPublicKey> =
        serde_json::from_reader(file).context("while parsing trusted keys file")?;
    let mut loaded = 0;
    for (id, key) in keys {
        match id.parse::<PublicKeyIdentifier>() {
            Ok(id) => {
                core.dangerous_add_trusted_public_key(id, key);
                loaded += 1;
            }
            Err(err) => tracing::warn!("skipping issuer key: {err}"),
        }
    }
    Ok(loaded)
}

/// Main entry point for the keyshare server.
///
/// Loads key material, builds the core and services, starts the expiry
/// sweep and the configuration-reload listener, and serves the Axum API.
///
/// The function blocks until the shutdown signal is triggered or an error
/// occurs.
///
/// # Arguments
/// * `config` - Service configuration from CLI or environment
/// * `deps` - External collaborators (stores, mailer, issuance server)
/// * `shutdown_signal` - Future that completes when shutdown is requested
pub async fn start(
    config: config::KeyshareConfig,
    deps: KeyshareDependencies,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> eyre::Result<()> {
    tracing::info!("starting keyshare server with config: {config:#?}");

    tracing::info!("loading key material..");
    let decryption_key = config::load_decryption_key(&config.decryption_key_file)?;
    let jwt_key = config::load_jwt_key(
        KeyId::new(config.jwt_private_key_id),
        &config.jwt_private_key_file,
    )?;
    let core = Arc::new(KeyshareCore::new(CoreConfig {
        decryption_key,
        decryption_key_id: KeyId::new(config.decryption_key_id),
        jwt_key,
        jwt_issuer: config.jwt_issuer.clone(),
        jwt_pin_expiry: Some(config.jwt_pin_expiry),
        store: Arc::clone(&deps.commitment_store),
    }));

    if let Some(path) = &config.trusted_keys_file {
        let loaded = load_trusted_keys(&core, path)?;
        tracing::info!("loaded {loaded} trusted issuer keys");
    }

    let cancellation_token = spawn_shutdown_task(shutdown_signal);
    spawn_trusted_key_reload_task(
        Arc::clone(&core),
        config.trusted_keys_file.clone(),
        cancellation_token.clone(),
    );

    let session_cache = SessionCache::new(config.session_cache_lifetime);
    start_sweep_task(
        session_cache.clone(),
        Arc::clone(&deps.commitment_store),
        config.sweep_interval,
        cancellation_token.clone(),
    );

    let keyshare = KeyshareService::init(
        Arc::clone(&core),
        Arc::clone(&deps.user_store),
        session_cache,
        deps.session_starter,
        deps.mailer,
        config.keyshare_credential.clone(),
        config.keyshare_attribute.clone(),
    );
    let app_state = AppState {
        core,
        users: deps.user_store,
        keyshare,
    };

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .context("while binding tcp listener")?;
    let router = api::new_app(app_state, config.input_max_body_limit, deps.issuance_router);
    tracing::info!(
        "starting axum server on {}",
        listener
            .local_addr()
            .map(|x| x.to_string())
            .unwrap_or(String::from("invalid addr"))
    );
    let axum_result = axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancellation_token.cancelled().await })
        .await;
    tracing::info!("axum server shutdown");
    if let Err(err) = axum_result {
        tracing::error!("got error from axum: {err:?}");
    }

    Ok(())
}

/// Spawns a shutdown task and creates an associated [`CancellationToken`].
/// This task will complete when either the provided shutdown_signal future
/// completes or if some other task cancels the shutdown token. The
/// associated shutdown token will be cancelled either way.
///
/// Waiting for the shutdown token is the preferred way to wait for termination.
fn spawn_shutdown_task(
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> CancellationToken {
    let cancellation_token = CancellationToken::new();
    let task_token = cancellation_token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_signal => {
                tracing::info!("Received EXTERNAL shutdown");
                task_token.cancel();
            }
            _ = task_token.cancelled() => {
                tracing::info!("Received INTERNAL shutdown");
            }
        }
    });
    cancellation_token
}

/// Periodically purges the session cache and the commitment store.
fn start_sweep_task(
    session_cache: SessionCache,
    commitment_store: CommitmentStoreService,
    interval: Duration,
    cancellation_token: CancellationToken,
) {
    tokio::spawn(async move {
        let mut sweep_interval = tokio::time::interval(interval);
        // ignore the first tick
        sweep_interval.tick().await;
        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => break,
                _ = sweep_interval.tick() => {
                    let deleted = session_cache.purge_expired();
                    commitment_store.purge_expired();
                    if deleted > 0 {
                        tracing::debug!("removed {deleted} expired session cache entries");
                    }
                }
            }
        }
    });
}

/// Re-reads the trusted issuer keys on SIGHUP, feeding new keys into the
/// core. No-op on non-unix targets or when no keys file is configured.
fn spawn_trusted_key_reload_task(
    core: Arc<KeyshareCore>,
    path: Option<PathBuf>,
    cancellation_token: CancellationToken,
) {
    #[cfg(unix)]
    {
        let Some(path) = path else {
            return;
        };
        tokio::spawn(async move {
            let mut hangup =
                match signal::unix::signal(signal::unix::SignalKind::hangup()) {
                    Ok(signal) => signal,
                    Err(err) => {
                        tracing::error!("cannot install SIGHUP handler: {err}");
                        return;
                    }
                };
            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => break,
                    received = hangup.recv() => {
                        if received.is_none() {
                            break;
                        }
                        match load_trusted_keys(&core, &path) {
                            Ok(loaded) => {
                                tracing::info!("configuration reload: {loaded} trusted issuer keys");
                            }
                            Err(err) => tracing::error!("configuration reload failed: {err:?}"),
                        }
                    }
                }
            }
        });
    }
    #[cfg(not(unix))]
    {
        let _ = (core, path, cancellation_token);
    }
}

/// The default shutdown signal for the keyshare server. Triggered when pressing CTRL+C on most systems.
pub async fn default_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
