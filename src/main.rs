use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use loyalty_gateway::accrual::HttpAccrualClient;
use loyalty_gateway::config::AppConfig;
use loyalty_gateway::gateway::{self, AppState};
use loyalty_gateway::logging::init_logging;
use loyalty_gateway::pipeline::{self, PipelineConfig};
use loyalty_gateway::storage::{PgStorage, Repository};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::parse();
    let _log_guard = init_logging(&config);

    tracing::info!(
        run_address = %config.run_address,
        accrual = %config.accrual_address,
        "starting loyalty gateway"
    );

    // A dead database at startup is fatal; at runtime the pipeline treats
    // connection loss as transient.
    let store: Arc<dyn Repository> = Arc::new(
        PgStorage::connect(&config.database_uri)
            .await
            .context("database connection failed")?,
    );

    let client = Arc::new(HttpAccrualClient::new(config.accrual_address.clone()));
    let cancel = CancellationToken::new();
    let pipeline = pipeline::spawn(
        store.clone(),
        client,
        PipelineConfig::default(),
        cancel.clone(),
    );

    let listener = TcpListener::bind(&config.run_address)
        .await
        .with_context(|| format!("failed to bind {}", config.run_address))?;
    tracing::info!(address = %config.run_address, "gateway listening");

    gateway::run_server(listener, AppState::new(store), shutdown_signal())
        .await
        .context("server error")?;

    // The server has drained; now stop the pipeline. Cancellation flows
    // dispatcher → checkers → writer, ending with the writer's final flush.
    tracing::info!("http server stopped; shutting down pipeline");
    cancel.cancel();
    pipeline.join().await;

    tracing::info!("shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received");
}
