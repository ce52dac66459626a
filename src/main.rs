// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{env, net::SocketAddr, sync::Arc};

use tokio::net::TcpListener;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use service_account::{
    api::router,
    audit::TracingAuditSink,
    config::{ServiceAccountConfig, HOST_ENV, LOG_FORMAT_ENV, PORT_ENV, SEED_USERS_ENV},
    directory::InMemoryUserDirectory,
    principal::User,
    state::AppState,
    store,
};

const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    match env::var(LOG_FORMAT_ENV).as_deref() {
        Ok("json") => registry.with(fmt::layer().json()).init(),
        _ => registry.with(fmt::layer().pretty()).init(),
    }
}

fn seed_users() -> InMemoryUserDirectory {
    let users = env::var(SEED_USERS_ENV).unwrap_or_default();
    InMemoryUserDirectory::with_users(
        users
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(User::new),
    )
}

fn bind_address() -> Result<SocketAddr, BoxError> {
    let host = env::var(HOST_ENV).unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = match env::var(PORT_ENV) {
        Ok(port) => port.parse()?,
        Err(_) => 8080,
    };
    Ok(format!("{host}:{port}").parse()?)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

async fn run() -> Result<(), BoxError> {
    let config = ServiceAccountConfig::from_env()?;
    tracing::info!(
        backend = config.backend_location.scheme(),
        namespace = %config.namespace,
        token_ttl_secs = config.token_ttl.as_secs(),
        host_allow_list = config.restricts_hosts(),
        "Loaded service account configuration"
    );

    let token_store = store::connect(&config.backend_location, config.store_timeout).await?;
    let directory = seed_users();
    tracing::info!(users = directory.len().await, "User directory seeded");

    let state = AppState::new(
        config,
        token_store,
        Arc::new(directory),
        Arc::new(TracingAuditSink),
    );
    let app = router(state);

    let addr = bind_address()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Service account server listening (OpenAPI at /api-doc/openapi.json)");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Server failed");
            std::process::ExitCode::FAILURE
        }
    }
}
