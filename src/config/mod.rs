/// Configuration management for the ontoflow engine
///
/// Handles server configuration, database locations, and the knowledge store backend.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Where entity instances and relationships live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeBackend {
    Sqlite,
    Memory,
}

impl std::str::FromStr for KnowledgeBackend {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown knowledge store backend: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Base directory for the SQLite databases (default: "data")
    /// Creates: ontoflow.db, knowledge.db
    pub data_dir: String,
    pub knowledge_store: KnowledgeBackend,
}

impl DatabaseConfig {
    /// Workflow definitions and execution records
    pub fn definitions_db(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("ontoflow.db")
    }

    /// Entity instances and relationships
    pub fn knowledge_db(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("knowledge.db")
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("ONTOFLOW_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("ONTOFLOW_PORT")
                    .unwrap_or_else(|_| "3004".to_string())
                    .parse()
                    .unwrap_or(3004),
            },
            database: DatabaseConfig {
                data_dir: std::env::var("ONTOFLOW_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
                knowledge_store: std::env::var("ONTOFLOW_KNOWLEDGE_STORE")
                    .ok()
                    .and_then(|raw| match raw.parse() {
                        Ok(backend) => Some(backend),
                        Err(e) => {
                            tracing::warn!("⚠️ {}; falling back to sqlite", e);
                            None
                        }
                    })
                    .unwrap_or(KnowledgeBackend::Sqlite),
            },
        }
    }
}
