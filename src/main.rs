//! Helm Broker - Open Service Broker backed by Helm charts

use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use kube::Client;
use tracing::{info, warn};

use hb_bind::{KubeCredentialSource, Resolver};
use hb_broker::{Broker, Context, HelmCliInstaller};
use hb_common::telemetry::{init_telemetry, TelemetryConfig};
use hb_storage::Storage;

use helm_broker::catalog::{load_catalog, populate};
use helm_broker::config::Cli;
use helm_broker::server::{router, serve, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        format: cli.log_format,
        ..Default::default()
    })?;

    let (storage, bundles, charts) = Storage::in_memory();
    let loaded = load_catalog(&cli.catalog)
        .with_context(|| format!("failed to load catalog from {}", cli.catalog.display()))?;
    populate(&bundles, &charts, loaded);
    info!(bundles = bundles.len(), "catalog loaded");

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    let resolver = Resolver::new(Arc::new(KubeCredentialSource::new(client)));

    let config = cli.broker_config();
    let ctx = Context::builder(
        storage,
        Arc::new(HelmCliInstaller::new(cli.helm_binary.clone())),
        Arc::new(resolver),
    )
    .state_write_retry(config.state_write_retry())
    .build();
    let broker = Arc::new(Broker::new(Arc::new(ctx), config.dispatcher(), config));

    let app = router(AppState {
        broker: broker.clone(),
    });
    serve(cli.addr, app, shutdown_signal())
        .await
        .context("OSB API server failed")?;

    if !broker.shutdown().await {
        warn!("exiting with operations still in progress");
    }
    info!("helm broker stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
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
    info!("shutdown signal received");
}
