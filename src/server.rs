/// Server setup and initialization
///
/// Wires together all components: databases, knowledge store, step registry,
/// workflow service, and HTTP routes.

use crate::{
    api::{create_execution_routes, create_workflow_routes, AppState},
    config::{Config, KnowledgeBackend},
    execution::ExecutionStorage,
    knowledge::{InMemoryKnowledgeStore, KnowledgeStore, SqliteKnowledgeStore},
    service::WorkflowService,
    steps::StepRegistry,
    workflow::WorkflowStorage,
};
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Create the main Axum application with all routes
///
/// Opens the databases under the configured data directory, loads the
/// workflow catalog, and mounts the API.
pub async fn create_app(config: Config) -> Result<Router> {
    let data_dir = &config.database.data_dir;
    tracing::info!("📁 Ensuring data directory exists: {}", data_dir);
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir))?;

    tracing::info!("🧠 Initializing {:?} knowledge store", config.database.knowledge_store);
    let knowledge: Arc<dyn KnowledgeStore> = match config.database.knowledge_store {
        KnowledgeBackend::Sqlite => {
            let store = SqliteKnowledgeStore::new(open_pool(&config.database.knowledge_db()).await?);
            store.init_schema().await.context("Failed to initialize knowledge store schema")?;
            Arc::new(store)
        }
        KnowledgeBackend::Memory => Arc::new(InMemoryKnowledgeStore::new()),
    };

    tracing::info!("⚙️ Registering built-in steps");
    let steps = Arc::new(StepRegistry::builtin(knowledge));
    tracing::debug!("📦 Registered actions: {:?}", steps.keys());

    tracing::info!("📋 Initializing workflow service");
    let pool = open_pool(&config.database.definitions_db()).await?;
    let service = WorkflowService::new(
        WorkflowStorage::new(pool.clone()),
        ExecutionStorage::new(pool),
        steps,
    );
    service
        .init()
        .await
        .context("Failed to load workflows from storage")?;

    tracing::info!("✅ Application initialized successfully");
    Ok(router(Arc::new(service)))
}

/// HTTP router over an initialized service
pub fn router(service: Arc<WorkflowService>) -> Router {
    let state = AppState { service };
    Router::new()
        .route("/healthz", get(health_check))
        .merge(create_workflow_routes())
        .merge(create_execution_routes())
        .with_state(state)
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting ontoflow server...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

async fn open_pool(path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    SqlitePool::connect_with(options)
        .await
        .with_context(|| format!("Failed to open database {}", path.display()))
}

async fn health_check() -> &'static str {
    "ok"
}
