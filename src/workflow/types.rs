/// Core workflow graph definitions
///
/// A `WorkflowGraph` is the single authoritative representation of one
/// executable business operation: ordered step specs plus an explicit edge
/// list. The "linear steps" and "nodes/positions" views are derived from it,
/// never stored alongside. Graphs are persisted as JSON and validated into a
/// `ValidatedGraph` before the executor sees them.

use crate::steps::ActionKind;
use crate::workflow::template::{ParamExpr, Params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use uuid::Uuid;

/// Explicit terminal marker usable as an edge target.
pub const END: &str = "__end__";

/// What kind of work a step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Validation,
    Action,
    Transformation,
    Condition,
}

/// Canvas position of a node in the visual view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// One node of a workflow graph bound to a step registry operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSpec {
    /// Unique step identifier within the graph (e.g., "create-entity")
    pub id: String,
    #[serde(rename = "type")]
    pub kind: StepKind,
    #[serde(default)]
    pub description: String,
    /// Registry key; validation steps default to `validate-input`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionKind>,
    #[serde(default, skip_serializing_if = "Params::is_empty")]
    pub params: Params,
    /// Predicate body of a condition step, kept verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl StepSpec {
    fn new(id: &str, kind: StepKind, description: &str) -> Self {
        Self {
            id: id.to_string(),
            kind,
            description: description.to_string(),
            action: None,
            params: Params::new(),
            condition: None,
            position: None,
        }
    }

    pub fn validation(id: &str, description: &str) -> Self {
        Self::new(id, StepKind::Validation, description)
    }

    pub fn action(id: &str, description: &str, action: ActionKind) -> Self {
        Self::new(id, StepKind::Action, description).with_action(action)
    }

    pub fn transformation(id: &str, description: &str, action: ActionKind) -> Self {
        Self::new(id, StepKind::Transformation, description).with_action(action)
    }

    pub fn condition(id: &str, description: &str, condition: Value) -> Self {
        let mut step = Self::new(id, StepKind::Condition, description);
        step.condition = Some(condition);
        step
    }

    pub fn with_action(mut self, action: ActionKind) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_param(mut self, name: &str, expr: ParamExpr) -> Self {
        self.params.insert(name.to_string(), expr);
        self
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Some(Position { x, y });
        self
    }

    /// Registry operation invoked for this step. Condition steps are
    /// evaluated by the executor and have none.
    pub fn effective_action(&self) -> Option<ActionKind> {
        match (self.kind, &self.action) {
            (StepKind::Condition, _) => None,
            (_, Some(action)) => Some(action.clone()),
            (StepKind::Validation, None) => Some(ActionKind::ValidateInput),
            _ => None,
        }
    }
}

/// Routing rule carried by an edge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeCondition {
    /// Unconditional; acts as the default inside a guarded branch set
    #[default]
    Always,
    /// Taken when the guard expression holds
    When { expr: String },
    /// Taken only after the source step failed
    OnFailure,
}

impl EdgeCondition {
    pub fn is_always(&self) -> bool {
        matches!(self, EdgeCondition::Always)
    }
}

/// Directed connection between two steps (or a step and `END`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "EdgeCondition::is_always")]
    pub condition: EdgeCondition,
}

impl Edge {
    pub fn always(source: &str, target: &str) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            condition: EdgeCondition::Always,
        }
    }

    pub fn when(source: &str, target: &str, expr: &str) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            condition: EdgeCondition::When {
                expr: expr.to_string(),
            },
        }
    }

    pub fn on_failure(source: &str, target: &str) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            condition: EdgeCondition::OnFailure,
        }
    }

    pub fn targets_end(&self) -> bool {
        self.target == END
    }
}

fn default_active() -> bool {
    true
}

/// A complete workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowGraph {
    pub id: Uuid,
    /// Deterministic machine name, unique across stored graphs (e.g., "create-customer")
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    /// Entity ids this graph touches
    #[serde(default)]
    pub entities: Vec<String>,
    /// Relation ids this graph touches
    #[serde(default)]
    pub relations: Vec<String>,
    #[serde(default)]
    pub is_auto_generated: bool,
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Designated start step; defaults to the unique step without predecessors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    pub steps: Vec<StepSpec>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// Node of the derived visual view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: StepKind,
    pub position: Position,
}

/// Derived `{nodes, edges}` mirror used by editors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphView {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<Edge>,
}

impl WorkflowGraph {
    /// Empty user-authored graph with a random id.
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            display_name: name.to_string(),
            description: String::new(),
            entities: Vec::new(),
            relations: Vec::new(),
            is_auto_generated: false,
            is_active: true,
            start: None,
            steps: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Steps chained `step[i] -> step[i+1]`.
    pub fn sequential(name: &str, steps: Vec<StepSpec>) -> Self {
        let edges = steps
            .windows(2)
            .map(|pair| Edge::always(&pair[0].id, &pair[1].id))
            .collect();
        Self {
            steps,
            edges,
            ..Self::new(name)
        }
    }

    pub fn with_steps(mut self, steps: Vec<StepSpec>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_edges(mut self, edges: Vec<Edge>) -> Self {
        self.edges = edges;
        self
    }

    pub fn step(&self, id: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Steps in dependency order, declaration order breaking ties. Steps on
    /// a cycle are appended in declaration order.
    pub fn linear_steps(&self) -> Vec<&StepSpec> {
        let index: HashMap<&str, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();

        let mut in_degree = vec![0usize; self.steps.len()];
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); self.steps.len()];
        for edge in &self.edges {
            if let (Some(&from), Some(&to)) = (index.get(edge.source.as_str()), index.get(edge.target.as_str())) {
                successors[from].push(to);
                in_degree[to] += 1;
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();
        let mut visited = vec![false; self.steps.len()];
        let mut ordered = Vec::with_capacity(self.steps.len());

        while let Some(Reverse(i)) = ready.pop() {
            visited[i] = true;
            ordered.push(&self.steps[i]);
            for &next in &successors[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        ordered.extend(
            self.steps
                .iter()
                .enumerate()
                .filter(|(i, _)| !visited[*i])
                .map(|(_, s)| s),
        );
        ordered
    }

    /// Nodes with stored positions, or a layout derived from depth.
    pub fn graph_view(&self) -> GraphView {
        let mut depth: HashMap<&str, usize> = HashMap::new();
        for step in self.linear_steps() {
            let d = self
                .edges
                .iter()
                .filter(|e| e.target == step.id)
                .filter_map(|e| depth.get(e.source.as_str()).map(|d| d + 1))
                .max()
                .unwrap_or(0);
            depth.insert(step.id.as_str(), d);
        }

        let mut rows: HashMap<usize, usize> = HashMap::new();
        let nodes = self
            .steps
            .iter()
            .map(|step| {
                let position = step.position.unwrap_or_else(|| {
                    let column = depth.get(step.id.as_str()).copied().unwrap_or(0);
                    let row = rows.entry(column).or_insert(0);
                    let position = Position {
                        x: 100.0 + 200.0 * column as f64,
                        y: 100.0 + 100.0 * *row as f64,
                    };
                    *row += 1;
                    position
                });
                GraphNode {
                    id: step.id.clone(),
                    kind: step.kind,
                    position,
                }
            })
            .collect();

        GraphView {
            nodes,
            edges: self.edges.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sequential_builds_chain_edges() {
        let graph = WorkflowGraph::sequential(
            "chain",
            vec![
                StepSpec::validation("a", ""),
                StepSpec::action("b", "", ActionKind::CreateEntity),
                StepSpec::action("c", "", ActionKind::UpdateKnowledgeGraph),
            ],
        );
        assert_eq!(graph.edges, vec![Edge::always("a", "b"), Edge::always("b", "c")]);
    }

    #[test]
    fn linear_steps_respects_dependencies_before_declaration() {
        let graph = WorkflowGraph::new("out-of-order")
            .with_steps(vec![
                StepSpec::action("last", "", ActionKind::CreateRelationship),
                StepSpec::validation("first", ""),
                StepSpec::action("middle", "", ActionKind::FindEntities),
            ])
            .with_edges(vec![Edge::always("first", "middle"), Edge::always("middle", "last")]);

        let order: Vec<&str> = graph.linear_steps().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(order, vec!["first", "middle", "last"]);
    }

    #[test]
    fn deserializes_camel_case_definition() {
        let graph: WorkflowGraph = serde_json::from_value(json!({
            "id": "5f0c6f5e-8d44-4a36-9a4f-3f4d0b8f2a10",
            "name": "create-customer",
            "isAutoGenerated": true,
            "steps": [
                {"id": "validate-input", "type": "validation", "params": {"data": "{{inputs.data}}"}},
                {"id": "create-entity", "type": "action", "action": "create-entity"}
            ],
            "edges": [
                {"source": "validate-input", "target": "create-entity"},
                {"source": "create-entity", "target": "__end__", "condition": {"type": "on_failure"}}
            ]
        }))
        .unwrap();

        assert!(graph.is_auto_generated);
        assert!(graph.is_active);
        assert_eq!(graph.steps[0].effective_action(), Some(ActionKind::ValidateInput));
        assert_eq!(graph.edges[0].condition, EdgeCondition::Always);
        assert_eq!(graph.edges[1].condition, EdgeCondition::OnFailure);
        assert!(graph.edges[1].targets_end());
    }

    #[test]
    fn graph_view_lays_out_parallel_steps_in_one_column() {
        let graph = WorkflowGraph::new("fan-in")
            .with_steps(vec![
                StepSpec::validation("v", ""),
                StepSpec::action("l", "", ActionKind::FindEntities),
                StepSpec::action("r", "", ActionKind::FindEntities),
                StepSpec::action("j", "", ActionKind::CreateRelationship),
            ])
            .with_edges(vec![
                Edge::always("v", "l"),
                Edge::always("v", "r"),
                Edge::always("l", "j"),
                Edge::always("r", "j"),
            ]);

        let view = graph.graph_view();
        let l = &view.nodes[1].position;
        let r = &view.nodes[2].position;
        assert_eq!(l.x, r.x);
        assert_ne!(l.y, r.y);
        assert_eq!(view.nodes[3].position.x, 500.0);
    }
}
