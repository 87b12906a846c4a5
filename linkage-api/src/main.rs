//! LINKAGE API Server Entry Point
//!
//! Bootstraps configuration, opens the configured contact store, and
//! starts the Axum HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use linkage_api::telemetry::{init_tracing, TelemetryConfig};
use linkage_api::{
    bind_addr_from_env, create_api_router, ApiConfig, ApiError, ApiResult, AppState, DbConfig,
    PgContactStore, StoreBackend,
};
use linkage_core::ReconcileConfig;
use linkage_resolver::Reconciler;
use linkage_storage::{ContactStore, InMemoryContactStore};

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracing(&telemetry_config)?;

    let api_config = ApiConfig::from_env()?;
    let reconcile_config = ReconcileConfig::from_env()?;

    let store = open_store(api_config.store_backend).await?;
    let state = AppState::new(store, api_config.store_backend, |store| {
        Reconciler::new(store, reconcile_config)
    })?;

    let app: Router = create_api_router(state, &api_config)?;

    let addr = bind_addr_from_env()?;
    tracing::info!(
        %addr,
        backend = %api_config.store_backend,
        environment = %api_config.environment,
        "Starting LINKAGE API server"
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}

async fn open_store(backend: StoreBackend) -> ApiResult<Arc<dyn ContactStore>> {
    match backend {
        StoreBackend::Postgres => {
            let db_config = DbConfig::from_env();
            let store = PgContactStore::from_config(&db_config)?;
            store.ensure_schema().await?;
            tracing::info!(
                host = %db_config.host,
                dbname = %db_config.dbname,
                "Postgres contact store ready"
            );
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory contact store; contacts are lost on restart");
            Ok(Arc::new(InMemoryContactStore::new()))
        }
    }
}
