//! VPC flow log digest service.
//!
//! Clients ask for a digest of the flow logs covering a time window. The
//! request is queued on a dispatch appliance, which later calls back to
//! have the digest produced from the raw logs and stored in a bucket, where
//! clients can fetch it.

pub mod api;
pub mod config;
pub mod errors;
pub mod id;
pub mod metrics_defs;
pub mod pipeline;
pub mod queuer;
pub mod storage;

#[cfg(test)]
mod testutils;

pub use errors::{DigesterError, Result};

use crate::api::AppState;
use crate::config::Config;
use crate::metrics_defs::{ALL_METRICS, MetricType};
use crate::pipeline::{DigestPipeline, Producer};
use crate::queuer::{DigestQueuer, Queuer};
use crate::storage::{InProgress, LazyStores, ObjectStorage, ProgressMarker};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Serves the digester until SIGINT or SIGTERM.
pub async fn run(config: Config) -> Result<()> {
    serve(config, shutdown_signal()).await
}

/// Serves the digester until `shutdown` completes. In-flight requests are
/// allowed to finish.
pub async fn serve<F>(config: Config, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    config.validate()?;
    describe_metrics();

    let app = api::router(build_state(&config)?);

    let addr = format!("{}:{}", config.listener.host, config.listener.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "Digester listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Digester stopped");
    Ok(())
}

/// Wires the S3 backed stores, the dispatch queuer and the pipeline
/// together. No connection is made until the first request.
pub fn build_state(config: &Config) -> Result<AppState> {
    let mut stores = LazyStores::s3(&config.storage);

    let marker = Arc::new(ProgressMarker::new(
        stores.bucket(&config.storage.progress_bucket),
        Duration::from_secs(config.storage.progress_timeout_secs),
    ));
    let digests = Arc::new(ObjectStorage::new(
        stores.bucket(&config.storage.digest_bucket),
    ));
    let guard = Arc::new(InProgress::new(marker, digests));

    let queuer: Arc<dyn Queuer> = Arc::new(DigestQueuer::new(&config.dispatch)?);
    let producer: Arc<dyn Producer> = Arc::new(DigestPipeline::new(
        stores.bucket(&config.source.bucket),
        &config.source,
        &config.prefetch,
    ));

    Ok(AppState {
        storage: guard.clone(),
        marker: guard,
        queuer,
        producer,
    })
}

fn describe_metrics() {
    for def in ALL_METRICS {
        match def.metric_type {
            MetricType::Counter => metrics::describe_counter!(def.name, def.description),
            MetricType::Histogram => metrics::describe_histogram!(def.name, def.description),
        }
    }
}

/// Completes on the first of SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let interrupt = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "Could not listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "Could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => tracing::info!("Received SIGINT, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
