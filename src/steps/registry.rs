/// Step registry
///
/// Maps action keys to step implementations. Built with a
/// `StepRegistryBuilder`; re-registering a key is a configuration error
/// rather than a silent overwrite. Once built the registry is immutable and
/// shared behind an `Arc` by every executor run.

use crate::error::RegistryError;
use crate::knowledge::KnowledgeStore;
use crate::steps::entity::{
    CheckDependencies, CreateEntity, CreateRelationship, DeleteEntity, FindEntities, UpdateEntity,
    UpdateKnowledgeGraph,
};
use crate::steps::query::{FormatEntityData, ParseQuery, RankResults, SearchKnowledgeGraph};
use crate::steps::rules::{ApplyRules, ExecuteCustomAction};
use crate::steps::validate::ValidateInput;
use crate::steps::{ActionKind, Step};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Default)]
pub struct StepRegistryBuilder {
    steps: HashMap<ActionKind, Arc<dyn Step>>,
}

impl StepRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder preloaded with every built-in operation bound to `store`.
    pub fn with_builtins(store: Arc<dyn KnowledgeStore>) -> Self {
        let mut steps: HashMap<ActionKind, Arc<dyn Step>> = HashMap::new();
        steps.insert(ActionKind::ValidateInput, Arc::new(ValidateInput));
        steps.insert(ActionKind::CreateEntity, Arc::new(CreateEntity::new(store.clone())));
        steps.insert(ActionKind::UpdateEntity, Arc::new(UpdateEntity::new(store.clone())));
        steps.insert(ActionKind::FindEntities, Arc::new(FindEntities::new(store.clone())));
        steps.insert(ActionKind::DeleteEntity, Arc::new(DeleteEntity::new(store.clone())));
        steps.insert(ActionKind::ApplyRules, Arc::new(ApplyRules::new(store.clone())));
        steps.insert(
            ActionKind::CreateRelationship,
            Arc::new(CreateRelationship::new(store.clone())),
        );
        steps.insert(
            ActionKind::SearchKnowledgeGraph,
            Arc::new(SearchKnowledgeGraph::new(store.clone())),
        );
        steps.insert(ActionKind::RankResults, Arc::new(RankResults));
        steps.insert(
            ActionKind::UpdateKnowledgeGraph,
            Arc::new(UpdateKnowledgeGraph::new(store.clone())),
        );
        steps.insert(ActionKind::FormatEntityData, Arc::new(FormatEntityData));
        steps.insert(ActionKind::ParseQuery, Arc::new(ParseQuery));
        steps.insert(ActionKind::CheckDependencies, Arc::new(CheckDependencies::new(store)));
        Self { steps }
    }

    /// Register an operation under a new key.
    pub fn register(
        &mut self,
        kind: ActionKind,
        step: Arc<dyn Step>,
    ) -> Result<&mut Self, RegistryError> {
        if self.steps.contains_key(&kind) {
            return Err(RegistryError::DuplicateStep(kind.to_string()));
        }
        tracing::debug!("🔧 Registered step '{}'", kind);
        self.steps.insert(kind, step);
        Ok(self)
    }

    /// Replace a registered operation, e.g. a built-in with a test double.
    pub fn replace(&mut self, kind: ActionKind, step: Arc<dyn Step>) -> &mut Self {
        self.steps.insert(kind, step);
        self
    }

    /// Freeze the registry. Custom operations become reachable both by their
    /// own key and through `execute-custom-action`.
    pub fn build(mut self) -> StepRegistry {
        if !self.steps.contains_key(&ActionKind::ExecuteCustomAction) {
            let handlers: BTreeMap<String, Arc<dyn Step>> = self
                .steps
                .iter()
                .filter(|(kind, _)| kind.is_custom())
                .map(|(kind, step)| (kind.key().to_string(), step.clone()))
                .collect();
            self.steps.insert(
                ActionKind::ExecuteCustomAction,
                Arc::new(ExecuteCustomAction::new(handlers)),
            );
        }

        tracing::info!("🧰 Step registry ready with {} operations", self.steps.len());
        StepRegistry { steps: self.steps }
    }
}

/// Immutable action-key lookup used by the executor.
#[derive(Clone)]
pub struct StepRegistry {
    steps: HashMap<ActionKind, Arc<dyn Step>>,
}

impl StepRegistry {
    /// Registry with the built-ins only.
    pub fn builtin(store: Arc<dyn KnowledgeStore>) -> Self {
        StepRegistryBuilder::with_builtins(store).build()
    }

    pub fn get(&self, kind: &ActionKind) -> Option<Arc<dyn Step>> {
        self.steps.get(kind).cloned()
    }

    pub fn contains(&self, kind: &ActionKind) -> bool {
        self.steps.contains_key(kind)
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.steps.keys().map(|k| k.key().to_string()).collect();
        keys.sort();
        keys
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry").field("keys", &self.keys()).finish()
    }
}
