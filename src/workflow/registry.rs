/// Hot-reload catalog of validated workflow graphs
///
/// Every executable graph is validated once, when it enters the catalog, and
/// served as an `Arc<ValidatedGraph>` afterwards. Updates clone the map and
/// swap the pointer, so running executions keep the version they started
/// with.

use crate::workflow::storage::WorkflowStorage;
use crate::workflow::validator::ValidatedGraph;
use anyhow::Result;
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};
use uuid::Uuid;

#[derive(Debug)]
pub struct WorkflowCatalog {
    /// Key: graph id. Only active graphs are present.
    graphs: ArcSwap<HashMap<Uuid, Arc<ValidatedGraph>>>,
    storage: WorkflowStorage,
}

impl WorkflowCatalog {
    pub fn new(storage: WorkflowStorage) -> Self {
        Self {
            graphs: ArcSwap::new(Arc::new(HashMap::new())),
            storage,
        }
    }

    /// Populate the catalog from every active stored graph.
    ///
    /// A stored graph that no longer validates is logged and left out.
    pub async fn init_from_storage(&self) -> Result<()> {
        let stored = self.storage.load_active().await?;
        let mut graphs = HashMap::with_capacity(stored.len());

        for (id, graph) in stored {
            let name = graph.name.clone();
            match graph.validate() {
                Ok(validated) => {
                    graphs.insert(id, Arc::new(validated));
                }
                Err(error) => tracing::warn!("⚠️ Stored workflow '{}' is invalid: {}", name, error),
            }
        }

        self.graphs.store(Arc::new(graphs));
        tracing::info!("📚 Initialized workflow catalog with {} graphs", self.graphs.load().len());
        Ok(())
    }

    /// Install an already validated graph, replacing any previous version.
    pub fn insert(&self, graph: ValidatedGraph) {
        let id = graph.id();
        let name = graph.name().to_string();
        self.graphs.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(id, Arc::new(graph.clone()));
            next
        });
        tracing::info!("🔄 Hot-reloaded workflow '{}' ({})", name, id);
    }

    pub fn remove(&self, id: Uuid) {
        let mut removed = false;
        self.graphs.rcu(|current| {
            let mut next = HashMap::clone(current);
            removed = next.remove(&id).is_some();
            next
        });
        if removed {
            tracing::info!("🗑️ Removed workflow {} from catalog", id);
        }
    }

    /// Lock-free lookup.
    pub fn get(&self, id: Uuid) -> Option<Arc<ValidatedGraph>> {
        self.graphs.load().get(&id).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Arc<ValidatedGraph>> {
        self.graphs.load().values().find(|g| g.name() == name).cloned()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.graphs.load().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.graphs.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{StepSpec, WorkflowGraph};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn catalog() -> WorkflowCatalog {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let storage = WorkflowStorage::new(pool);
        storage.init_schema().await.unwrap();
        WorkflowCatalog::new(storage)
    }

    fn graph(name: &str) -> WorkflowGraph {
        WorkflowGraph::sequential(name, vec![StepSpec::validation("validate-input", "check")])
    }

    #[tokio::test]
    async fn loads_only_active_graphs() {
        let catalog = catalog().await;
        let (active, _) = catalog.storage.upsert_by_name(graph("a")).await.unwrap();
        let (inactive, _) = catalog.storage.upsert_by_name(graph("b")).await.unwrap();
        catalog.storage.deactivate(inactive.id).await.unwrap();

        catalog.init_from_storage().await.unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(catalog.get(active.id).is_some());
        assert!(catalog.get(inactive.id).is_none());
    }

    #[tokio::test]
    async fn insert_and_remove_swap_the_map() {
        let catalog = catalog().await;
        let validated = graph("a").validate().unwrap();
        let id = validated.id();

        catalog.insert(validated);
        assert_eq!(catalog.find_by_name("a").map(|g| g.id()), Some(id));

        catalog.remove(id);
        assert!(catalog.is_empty());
    }
}
