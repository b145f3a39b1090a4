// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{net::SocketAddr, process::ExitCode, sync::Arc};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use webinar_studio_auth::{
    api::router, config::AppConfig, crypto::SecretCipher, state::AppState,
    storage::CredentialStore,
};

const STORE_FILE: &str = "auth.redb";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => builder.json().init(),
        _ => builder.pretty().init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let store_path = config.data_dir.join(STORE_FILE);
    let store = match CredentialStore::open(&store_path) {
        Ok(store) => store,
        Err(e) => {
            error!(path = %store_path.display(), error = %e, "Failed to open credential store");
            return ExitCode::FAILURE;
        }
    };

    let cipher = match SecretCipher::from_config(
        config.encryption_key.as_deref(),
        config.is_production(),
    ) {
        Ok(cipher) => cipher,
        Err(e) => {
            error!(error = %e, "Failed to initialize secret cipher");
            return ExitCode::FAILURE;
        }
    };

    let addr = format!("{}:{}", config.host, config.port);
    let (state, audit_worker) = match AppState::build(config, Arc::new(store), cipher, None) {
        Ok(built) => built,
        Err(e) => {
            error!(error = %e, "Failed to initialize application state");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = CancellationToken::new();
    let audit_handle = tokio::spawn(audit_worker.run(shutdown.clone()));

    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %addr, error = %e, "Failed to bind");
            return ExitCode::FAILURE;
        }
    };
    info!(addr = %addr, "Auth service listening (docs at /docs)");

    let app = router(state);
    let signal = shutdown.clone();
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
        info!("Shutdown signal received");
        signal.cancel();
    })
    .await;

    // Drain queued audit entries before exiting
    shutdown.cancel();
    if let Err(e) = audit_handle.await {
        error!(error = %e, "Audit worker panicked");
    }

    match served {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}
