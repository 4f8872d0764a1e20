/// Ontoflow: ontology-driven workflow planning and execution engine
///
/// Main entry point. Loads configuration from the environment and starts the
/// HTTP server:
/// - Workflow management API at /api/workflows/*
/// - Planner trigger at /api/planner
/// - Execution at /api/workflows/{id}/execute and /api/executions/{id}
/// - Health check at /healthz

use ontoflow::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
