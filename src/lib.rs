pub mod api;
pub mod config;
pub mod daemon;
pub mod error;
pub mod logic;
pub mod model;
pub mod seed;
pub mod store;

// Export API types
pub use api::handlers;
pub use api::routes;

pub use daemon::{AppState, Daemon, DaemonPhase, Readiness};
pub use error::{Error, Result};

// Export logic types
pub use logic::{
    etag_check, etag_hash, InstanceUpdatePolicy, NewOperation, Operation, OperationJob,
    OperationTracker, RestoreJob, UpdateJob,
};

// Export all model types
pub use model::*;

// Export seed module
pub use seed::*;

// Export store types
pub use store::{MemoryStore, PostgresStore, Store};

use std::sync::Arc;

/// Builds the HTTP application around a daemon
pub fn build_app<S: Store + 'static>(daemon: AppState<S>) -> axum::Router {
    routes::create_router().with_state(daemon)
}

/// Serves the API for `store` until the listener fails.
///
/// Requests are accepted right away; mutations wait on the readiness gate
/// until the schema is in place and seed data (if requested) is loaded.
pub async fn serve_store<S, F, Fut>(
    store: Arc<S>,
    config: &crate::config::AppConfig,
    prepare: F,
) -> anyhow::Result<()>
where
    S: Store + 'static,
    F: FnOnce(Arc<S>) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    use std::future::IntoFuture;
    use tokio::net::TcpListener;

    let daemon = Arc::new(Daemon::new(
        store.clone(),
        &config.server.name,
        config.operation_retention(),
    ));

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    log::info!("instanced listening on http://{}", bind_address);

    let server = tokio::spawn(axum::serve(listener, build_app(daemon.clone())).into_future());

    prepare(store).await?;
    daemon.operations.purge_stale().await?;
    daemon.readiness.mark_ready();

    server.await??;
    Ok(())
}

/// Loads configuration, opens the configured backend and serves the API.
///
/// Expects the caller to have loaded `.env` and installed a logger.
pub async fn run_server() -> anyhow::Result<()> {
    use crate::config::{AppConfig, DatabaseBackend};

    let config = AppConfig::load()?;
    log::info!(
        "Configuration loaded: server={} member={} backend={:?}",
        config.server_address(),
        config.server.name,
        config.database.backend
    );

    let load_seed = std::env::var("LOAD_SEED_DATA").unwrap_or_default() == "true";

    match config.database.backend {
        DatabaseBackend::Memory => {
            serve_store(Arc::new(MemoryStore::new()), &config, |store| async move {
                seed::load_seed_data(&*store).await?;
                if load_seed {
                    log::info!("Loading demo instances...");
                    seed::load_demo_instances(&*store).await?;
                }
                Ok::<(), anyhow::Error>(())
            })
            .await
        }
        DatabaseBackend::Postgres => {
            log::info!("Connecting to PostgreSQL...");
            let database_url = config.database_url()?;
            let max_connections = config.database.max_connections.unwrap_or(20);
            let store = PostgresStore::new(&database_url, max_connections).await?;

            serve_store(Arc::new(store), &config, |store| async move {
                log::info!("Bootstrapping cluster schema...");
                store.migrate().await?;
                if load_seed {
                    log::info!("Loading seed data...");
                    seed::load_seed_data(&*store).await?;
                    seed::load_demo_instances(&*store).await?;
                }
                Ok::<(), anyhow::Error>(())
            })
            .await
        }
    }
}
