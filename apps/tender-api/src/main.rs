//! # Tender API Server
//!
//! ## Startup
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Tender API Startup                              │
//! │                                                                         │
//! │  ApiConfig (env) ──► Database (SQLite + migrations)                     │
//! │        │                    │                                           │
//! │        ▼                    ▼                                           │
//! │  PaymentsConfig ──► ProviderClients ──► PaymentOrchestrator ──► axum    │
//! │                           │                     │                       │
//! │                           ▼                     ▼                       │
//! │                ReconciliationWorker     resume pending terminal polls   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tender_api::{router, ApiConfig, AppState};
use tender_db::{Database, DbConfig};
use tender_payments::{PaymentOrchestrator, PaymentsConfig, ProviderClients, ReconciliationWorker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tender=debug,sqlx=warn")),
        )
        .with_target(true)
        .init();

    info!("Starting Tender API server...");

    let config = ApiConfig::load()?;
    let payments = PaymentsConfig::load(config.config_path.clone())?;
    info!(
        port = config.http_port,
        db_path = %config.db_path.display(),
        reconciliation = payments.reconciliation.enabled,
        accounting = payments.accounting.enabled,
        "Configuration loaded"
    );

    let db = Database::new(DbConfig::new(config.db_path.clone()))
        .await
        .context("failed to open database")?;
    info!("Database ready");

    let clients = ProviderClients::from_config(&payments)?;
    let orchestrator = PaymentOrchestrator::from_clients(db.clone(), &clients, &payments)?;

    let reconciliation = if payments.reconciliation.enabled {
        let (worker, handle) = ReconciliationWorker::new(
            db.clone(),
            clients.terminal.clone(),
            clients.accounting.clone(),
            payments.reconciliation.clone(),
        );
        tokio::spawn(worker.run());
        Some(handle)
    } else {
        warn!("Reconciliation worker disabled");
        None
    };

    match orchestrator.resume().await {
        Ok(0) => {}
        Ok(count) => info!(count, "Resumed pending terminal payments"),
        Err(e) => warn!(?e, "Failed to resume pending terminal payments"),
    }

    let app = router(Arc::new(AppState::new(orchestrator)), config.body_limit_bytes);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = reconciliation {
        if let Err(e) = handle.shutdown().await {
            warn!(?e, "Reconciliation worker already stopped");
        }
    }
    db.close().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(?e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(?e, "Failed to install SIGTERM handler");
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

    info!("Shutdown signal received, starting graceful shutdown...");
}
