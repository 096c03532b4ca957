//! Keyshare Server Binary
//!
//! This is the main entry point for the keyshare server.
//! It initializes tracing and metrics, wires the in-memory stores and the
//! downstream issuance client, and starts the service with configuration
//! from command-line arguments or environment variables.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use eyre::Context;
use keyshare_core::commitment_store::MemoryCommitmentStore;
use keyshare_server::config::KeyshareConfig;
use keyshare_server::{
    HttpSessionStarter, KeyshareDependencies, MemoryUserStore, PincheckPolicy,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn initialize_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_line_number(false),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keyshare_server=debug,warn".into()),
        )
        .init();
}

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    initialize_tracing();
    keyshare_server::metrics::describe_metrics();
    tracing::info!("{}", keyshare_server::version_info());

    let config = KeyshareConfig::parse();

    if let Some(bind_addr) = config.metrics_bind_addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(bind_addr)
            .install()
            .context("during installing Prometheus scrape metrics exporter as global recorder")?;
    }

    let deps = KeyshareDependencies {
        user_store: Arc::new(MemoryUserStore::new(PincheckPolicy {
            max_tries: config.pin_check_max_tries,
            backoff_start: config.pin_check_backoff,
        })),
        commitment_store: Arc::new(MemoryCommitmentStore::new(config.commitment_lifetime)),
        session_starter: Arc::new(HttpSessionStarter::new(config.issuance_server_url.clone())),
        mailer: None,
        issuance_router: None,
    };

    let result = keyshare_server::start(
        config,
        deps,
        keyshare_server::default_shutdown_signal(),
    )
    .await;
    match result {
        Ok(()) => {
            tracing::info!("good night!");
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            // we don't want to double print the error therefore we just return FAILURE
            tracing::error!("{err:?}");
            Ok(ExitCode::FAILURE)
        }
    }
}
