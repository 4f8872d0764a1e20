/// Ontology-driven workflow planner
///
/// `plan` is a pure function from an ontology to a batch of workflow graphs.
/// It never touches storage; the caller persists the batch afterwards
/// (upserting by the deterministic name). Planning is best-effort per unit:
/// an entity, relation or rule that cannot be turned into a valid graph is
/// logged and reported, and the rest of the batch still goes through.

pub mod crud;
pub mod relations;
pub mod rules;

use crate::error::GraphValidationError;
use crate::ontology::Ontology;
use crate::workflow::types::{Edge, StepSpec, WorkflowGraph};
use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

/// Namespace for name-derived graph ids.
const GRAPH_NAMESPACE: Uuid = Uuid::from_u128(0x6f6e_746f_666c_6f77_8000_0000_0000_0001);

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("name '{0}' does not produce a usable identifier")]
    InvalidName(String),

    #[error("{owner} references unknown entity '{entity_id}'")]
    UnknownEntity { owner: String, entity_id: String },

    #[error("rule '{rule}' references unknown relation '{relation_id}'")]
    UnknownRelation { rule: String, relation_id: String },

    #[error("rule '{0}' is scoped to an entity or relation but names none")]
    MissingTarget(String),

    #[error("generated name '{0}' is produced more than once")]
    DuplicateName(String),

    #[error(transparent)]
    Invalid(#[from] GraphValidationError),
}

/// One unit that could not be planned.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanningFailure {
    pub unit: String,
    pub reason: String,
}

/// Output of a planning pass.
#[derive(Debug, Clone, Default)]
pub struct PlanReport {
    pub graphs: Vec<WorkflowGraph>,
    pub failures: Vec<PlanningFailure>,
}

impl PlanReport {
    pub fn names(&self) -> Vec<&str> {
        self.graphs.iter().map(|g| g.name.as_str()).collect()
    }

    pub fn graph(&self, name: &str) -> Option<&WorkflowGraph> {
        self.graphs.iter().find(|g| g.name == name)
    }

    fn accept(&mut self, seen: &mut HashSet<String>, unit: String, result: Result<Vec<WorkflowGraph>, PlanError>) {
        let graphs = match result {
            Ok(graphs) => graphs,
            Err(error) => return self.reject(unit, error),
        };

        for graph in graphs {
            if !seen.insert(graph.name.clone()) {
                self.reject(unit.clone(), PlanError::DuplicateName(graph.name));
                continue;
            }
            match graph.clone().validate() {
                Ok(_) => self.graphs.push(graph),
                Err(error) => self.reject(unit.clone(), error.into()),
            }
        }
    }

    fn reject(&mut self, unit: String, error: PlanError) {
        tracing::warn!("⚠️ Skipping {}: {}", unit, error);
        self.failures.push(PlanningFailure {
            unit,
            reason: error.to_string(),
        });
    }
}

/// Generate every workflow graph the ontology implies.
pub fn plan(ontology: &Ontology) -> PlanReport {
    let mut report = PlanReport::default();
    let mut seen = HashSet::new();

    for entity in ontology.active_entities() {
        report.accept(&mut seen, format!("entity '{}'", entity.name), crud::entity_graphs(entity));

        for relation in ontology
            .active_relations()
            .filter(|r| r.from_entity_id == entity.id)
        {
            let unit = format!("relation '{}'", relation.name);
            match relations::relationship_graph(ontology, entity, relation) {
                Ok(Some(graph)) => report.accept(&mut seen, unit, Ok(vec![graph])),
                Ok(None) => tracing::debug!("⏭️ {} targets an inactive entity", unit),
                Err(error) => report.reject(unit, error),
            }
        }
    }

    for rule in ontology.active_rules() {
        let unit = format!("rule '{}'", rule.name);
        match rules::rule_graph(ontology, rule) {
            Ok(Some(graph)) => report.accept(&mut seen, unit, Ok(vec![graph])),
            Ok(None) => tracing::debug!("⏭️ {} belongs to an inactive entity or relation", unit),
            Err(error) => report.reject(unit, error),
        }
    }

    for (unit, result) in relations::cross_entity_graphs(ontology) {
        report.accept(&mut seen, unit, result.map(|graph| vec![graph]));
    }

    tracing::info!(
        "🧭 Planned {} workflow graphs ({} units skipped)",
        report.graphs.len(),
        report.failures.len()
    );
    report
}

/// Lowercase identifier fragment: alphanumerics, `-` and `_`; whitespace becomes `-`.
pub fn slug(name: &str) -> Result<String, PlanError> {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            out.push(c.to_ascii_lowercase());
        } else if c.is_whitespace() && !out.ends_with('-') {
            out.push('-');
        }
    }
    if out.is_empty() {
        return Err(PlanError::InvalidName(name.to_string()));
    }
    Ok(out)
}

/// Stable id for a generated graph name.
pub fn graph_id(name: &str) -> Uuid {
    Uuid::new_v5(&GRAPH_NAMESPACE, name.as_bytes())
}

/// Metadata shared by every generated graph.
pub(crate) struct GraphMeta {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub entities: Vec<String>,
    pub relations: Vec<String>,
}

pub(crate) fn generated(meta: GraphMeta, steps: Vec<StepSpec>, edges: Option<Vec<Edge>>) -> WorkflowGraph {
    let mut graph = match edges {
        Some(edges) => WorkflowGraph::new(&meta.name).with_steps(steps).with_edges(edges),
        None => WorkflowGraph::sequential(&meta.name, steps),
    };
    graph.id = graph_id(&meta.name);
    graph.display_name = meta.display_name;
    graph.description = meta.description;
    graph.entities = meta.entities;
    graph.relations = meta.relations;
    graph.is_auto_generated = true;
    graph
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_are_lowercase_identifiers() {
        assert_eq!(slug("Customer").unwrap(), "customer");
        assert_eq!(slug("  Sales Order ").unwrap(), "sales-order");
        assert_eq!(slug("has_orders").unwrap(), "has_orders");
        assert!(slug("???").is_err());
    }

    #[test]
    fn graph_ids_are_stable_per_name() {
        assert_eq!(graph_id("create-customer"), graph_id("create-customer"));
        assert_ne!(graph_id("create-customer"), graph_id("read-customer"));
    }
}
