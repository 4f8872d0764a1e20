/// Save-time graph validation
///
/// Turns a `WorkflowGraph` into a `ValidatedGraph`: index-based adjacency the
/// executor walks, parsed guards, a topological order, and any warnings.
/// Every violated rule is collected before rejecting, so callers see the
/// whole list at once.

use crate::error::GraphValidationError;
use crate::workflow::predicate::Predicate;
use crate::workflow::types::{EdgeCondition, StepKind, StepSpec, WorkflowGraph, END};
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use std::collections::{HashMap, HashSet};
use std::fmt;
use uuid::Uuid;

/// A rule a graph breaks. Any violation rejects the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    Empty,
    DuplicateNodeId(String),
    UnknownEdgeEndpoint { source: String, target: String, missing: String },
    CycleDetected,
    MissingStart,
    AmbiguousStart(Vec<String>),
    UnknownStart(String),
    StartHasIncomingEdges(String),
    Unreachable(String),
    MissingAction(String),
    MissingCondition(String),
    InvalidCondition { step: String, reason: String },
    InvalidGuard { source: String, target: String, reason: String },
    DanglingReference { step: String, reference: String },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Empty => write!(f, "graph has no steps"),
            Violation::DuplicateNodeId(id) => write!(f, "duplicate node id '{}'", id),
            Violation::UnknownEdgeEndpoint { source, target, missing } => write!(
                f,
                "edge {} -> {} references unknown node '{}'",
                source, target, missing
            ),
            Violation::CycleDetected => write!(f, "graph contains a cycle"),
            Violation::MissingStart => write!(f, "no start node: every step has a predecessor"),
            Violation::AmbiguousStart(ids) => write!(
                f,
                "ambiguous start: steps {} have no predecessors and no start is designated",
                ids.join(", ")
            ),
            Violation::UnknownStart(id) => write!(f, "designated start '{}' is not a step", id),
            Violation::StartHasIncomingEdges(id) => {
                write!(f, "start step '{}' has incoming edges", id)
            }
            Violation::Unreachable(id) => write!(f, "step '{}' is unreachable from start", id),
            Violation::MissingAction(id) => write!(f, "step '{}' does not name an action", id),
            Violation::MissingCondition(id) => {
                write!(f, "condition step '{}' has no condition", id)
            }
            Violation::InvalidCondition { step, reason } => {
                write!(f, "condition of step '{}' is invalid: {}", step, reason)
            }
            Violation::InvalidGuard { source, target, reason } => {
                write!(f, "guard on edge {} -> {} is invalid: {}", source, target, reason)
            }
            Violation::DanglingReference { step, reference } => write!(
                f,
                "'{}' reads '{}' which is not produced by an earlier step",
                step, reference
            ),
        }
    }
}

/// Non-fatal findings; logged and kept on the validated graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// Two guards out of one step can match together; the first declared wins.
    AmbiguousBranch { source: String, first: String, second: String },
    /// Guards are not provably exhaustive and no default edge exists.
    NonExhaustiveBranch { source: String },
    /// More than one unguarded edge inside a guarded branch set.
    MultipleDefaults { source: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::AmbiguousBranch { source, first, second } => write!(
                f,
                "branches of '{}' towards '{}' and '{}' may both match; '{}' wins",
                source, first, second, first
            ),
            Warning::NonExhaustiveBranch { source } => write!(
                f,
                "guards out of '{}' are not exhaustive and there is no default edge",
                source
            ),
            Warning::MultipleDefaults { source } => {
                write!(f, "'{}' has several default edges; the first declared is used", source)
            }
        }
    }
}

/// A graph that passed validation, indexed for execution.
#[derive(Debug, Clone)]
pub struct ValidatedGraph {
    graph: WorkflowGraph,
    start: usize,
    order: Vec<usize>,
    outgoing: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
    guards: HashMap<usize, Predicate>,
    conditions: HashMap<usize, Predicate>,
    warnings: Vec<Warning>,
}

impl ValidatedGraph {
    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    pub fn into_graph(self) -> WorkflowGraph {
        self.graph
    }

    pub fn id(&self) -> Uuid {
        self.graph.id
    }

    pub fn name(&self) -> &str {
        &self.graph.name
    }

    pub fn steps(&self) -> &[StepSpec] {
        &self.graph.steps
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edges.len()
    }

    pub fn edge_condition(&self, edge: usize) -> &EdgeCondition {
        &self.graph.edges[edge].condition
    }

    /// Index of the target step, `None` for `END`.
    pub fn edge_target(&self, edge: usize) -> Option<usize> {
        let target = &self.graph.edges[edge].target;
        self.graph.steps.iter().position(|s| &s.id == target)
    }

    pub fn start(&self) -> usize {
        self.start
    }

    /// Topological order, declaration order breaking ties.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Outgoing edge indices of a step, in declaration order (including `END` edges).
    pub fn outgoing(&self, step: usize) -> &[usize] {
        &self.outgoing[step]
    }

    /// Incoming edge indices of a step, in declaration order.
    pub fn incoming(&self, step: usize) -> &[usize] {
        &self.incoming[step]
    }

    pub fn guard(&self, edge: usize) -> Option<&Predicate> {
        self.guards.get(&edge)
    }

    /// Parsed predicate of a condition step.
    pub fn condition(&self, step: usize) -> Option<&Predicate> {
        self.conditions.get(&step)
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }
}

impl WorkflowGraph {
    pub fn validate(self) -> Result<ValidatedGraph, GraphValidationError> {
        validate(self)
    }
}

/// Validate a graph, collecting every violation.
pub fn validate(graph: WorkflowGraph) -> Result<ValidatedGraph, GraphValidationError> {
    let mut violations = Vec::new();

    if graph.steps.is_empty() {
        return Err(GraphValidationError {
            workflow: graph.name,
            violations: vec![Violation::Empty],
        });
    }

    // --- node ids ---
    let mut index: HashMap<&str, usize> = HashMap::new();
    for (i, step) in graph.steps.iter().enumerate() {
        if index.insert(step.id.as_str(), i).is_some() {
            violations.push(Violation::DuplicateNodeId(step.id.clone()));
        }
    }
    // Later duplicates overwrite; keep the first declaration authoritative.
    for (i, step) in graph.steps.iter().enumerate().rev() {
        index.insert(step.id.as_str(), i);
    }

    // --- per-step shape ---
    let mut conditions = HashMap::new();
    for (i, step) in graph.steps.iter().enumerate() {
        match step.kind {
            StepKind::Condition => match &step.condition {
                None => violations.push(Violation::MissingCondition(step.id.clone())),
                Some(raw) => match Predicate::from_value(raw) {
                    Ok(predicate) => {
                        conditions.insert(i, predicate);
                    }
                    Err(e) => violations.push(Violation::InvalidCondition {
                        step: step.id.clone(),
                        reason: e.to_string(),
                    }),
                },
            },
            _ if step.effective_action().is_none() => {
                violations.push(Violation::MissingAction(step.id.clone()))
            }
            _ => {}
        }
    }

    // --- edges ---
    let n = graph.steps.len();
    let mut dag: DiGraph<usize, usize> = DiGraph::with_capacity(n, graph.edges.len());
    let nodes: Vec<NodeIndex> = (0..n).map(|i| dag.add_node(i)).collect();
    let mut outgoing = vec![Vec::new(); n];
    let mut incoming = vec![Vec::new(); n];
    let mut guards = HashMap::new();

    for (e, edge) in graph.edges.iter().enumerate() {
        let source = index.get(edge.source.as_str()).copied();
        let target = index.get(edge.target.as_str()).copied();

        let source = match source {
            Some(s) => s,
            None => {
                violations.push(Violation::UnknownEdgeEndpoint {
                    source: edge.source.clone(),
                    target: edge.target.clone(),
                    missing: edge.source.clone(),
                });
                continue;
            }
        };
        if target.is_none() && !edge.targets_end() {
            violations.push(Violation::UnknownEdgeEndpoint {
                source: edge.source.clone(),
                target: edge.target.clone(),
                missing: edge.target.clone(),
            });
            continue;
        }

        if let EdgeCondition::When { expr } = &edge.condition {
            match Predicate::parse(expr) {
                Ok(predicate) => {
                    guards.insert(e, predicate);
                }
                Err(err) => violations.push(Violation::InvalidGuard {
                    source: edge.source.clone(),
                    target: edge.target.clone(),
                    reason: err.to_string(),
                }),
            }
        }

        outgoing[source].push(e);
        if let Some(t) = target {
            incoming[t].push(e);
            dag.add_edge(nodes[source], nodes[t], e);
        }
    }

    // --- acyclicity ---
    let cyclic = is_cyclic_directed(&dag);
    if cyclic {
        violations.push(Violation::CycleDetected);
    }

    // --- start ---
    let start = match &graph.start {
        Some(id) => match index.get(id.as_str()) {
            Some(&s) => {
                if !incoming[s].is_empty() {
                    violations.push(Violation::StartHasIncomingEdges(id.clone()));
                }
                Some(s)
            }
            None => {
                violations.push(Violation::UnknownStart(id.clone()));
                None
            }
        },
        None => {
            let sources: Vec<usize> = (0..n).filter(|&i| incoming[i].is_empty()).collect();
            match sources.as_slice() {
                [] => {
                    if !cyclic {
                        violations.push(Violation::MissingStart);
                    }
                    None
                }
                [only] => Some(*only),
                many => {
                    violations.push(Violation::AmbiguousStart(
                        many.iter().map(|&i| graph.steps[i].id.clone()).collect(),
                    ));
                    None
                }
            }
        }
    };

    // --- reachability and data dependencies ---
    if let Some(start) = start {
        let mut reached = HashSet::new();
        let mut dfs = Dfs::new(&dag, nodes[start]);
        while let Some(node) = dfs.next(&dag) {
            reached.insert(dag[node]);
        }
        for (i, step) in graph.steps.iter().enumerate() {
            if !reached.contains(&i) {
                violations.push(Violation::Unreachable(step.id.clone()));
            }
        }
    }

    if !cyclic {
        let ancestors_of = |i: usize| -> HashSet<usize> {
            let reversed = Reversed(&dag);
            let mut dfs = Dfs::new(reversed, nodes[i]);
            let mut found = HashSet::new();
            while let Some(node) = dfs.next(reversed) {
                found.insert(dag[node]);
            }
            found
        };

        for (i, step) in graph.steps.iter().enumerate() {
            let ancestors = ancestors_of(i);
            for reference in step.params.values().flat_map(|p| p.references()) {
                if let Some(target) = reference.step_id() {
                    let ok = index
                        .get(target)
                        .is_some_and(|t| *t != i && ancestors.contains(t));
                    if !ok {
                        violations.push(Violation::DanglingReference {
                            step: step.id.clone(),
                            reference: reference.to_string(),
                        });
                    }
                }
            }
        }

        for (e, predicate) in &guards {
            let edge = &graph.edges[*e];
            let Some(&source) = index.get(edge.source.as_str()) else {
                continue;
            };
            let ancestors = ancestors_of(source);
            for reference in predicate.references() {
                if let Some(target) = reference.step_id() {
                    let ok = index.get(target).is_some_and(|t| ancestors.contains(t));
                    if !ok {
                        violations.push(Violation::DanglingReference {
                            step: format!("{} -> {}", edge.source, edge.target),
                            reference: reference.to_string(),
                        });
                    }
                }
            }
        }
    }

    if !violations.is_empty() {
        return Err(GraphValidationError {
            workflow: graph.name,
            violations,
        });
    }

    let Some(start) = start else {
        return Err(GraphValidationError {
            workflow: graph.name,
            violations: vec![Violation::MissingStart],
        });
    };

    let order = graph
        .linear_steps()
        .iter()
        .filter_map(|s| index.get(s.id.as_str()).copied())
        .collect();

    let warnings = branch_warnings(&graph, &outgoing, &guards);
    for warning in &warnings {
        tracing::warn!("⚠️ Workflow '{}': {}", graph.name, warning);
    }

    Ok(ValidatedGraph {
        graph,
        start,
        order,
        outgoing,
        incoming,
        guards,
        conditions,
        warnings,
    })
}

fn branch_warnings(
    graph: &WorkflowGraph,
    outgoing: &[Vec<usize>],
    guards: &HashMap<usize, Predicate>,
) -> Vec<Warning> {
    let mut warnings = Vec::new();

    for (i, edges) in outgoing.iter().enumerate() {
        let source = &graph.steps[i].id;
        let routing: Vec<usize> = edges
            .iter()
            .copied()
            .filter(|&e| graph.edges[e].condition != EdgeCondition::OnFailure)
            .collect();
        let guarded: Vec<(usize, &Predicate)> = routing
            .iter()
            .filter_map(|e| guards.get(e).map(|p| (*e, p)))
            .collect();
        if guarded.is_empty() {
            continue;
        }

        let defaults = routing
            .iter()
            .filter(|&&e| graph.edges[e].condition.is_always())
            .count();
        if defaults > 1 {
            warnings.push(Warning::MultipleDefaults { source: source.clone() });
        }

        for (a, (ea, pa)) in guarded.iter().enumerate() {
            for (eb, pb) in guarded.iter().skip(a + 1) {
                if pa.is_tautology() || pa.to_string() == pb.to_string() {
                    warnings.push(Warning::AmbiguousBranch {
                        source: source.clone(),
                        first: graph.edges[*ea].target.clone(),
                        second: graph.edges[*eb].target.clone(),
                    });
                }
            }
        }

        let predicates: Vec<&Predicate> = guarded.iter().map(|(_, p)| *p).collect();
        if defaults == 0 && !provably_exhaustive(&predicates) {
            warnings.push(Warning::NonExhaustiveBranch { source: source.clone() });
        }
    }

    warnings
}

/// Conservative check: a tautology, or a predicate paired with its negation.
fn provably_exhaustive(predicates: &[&Predicate]) -> bool {
    use crate::workflow::predicate::CompareOp;

    if predicates.iter().any(|p| p.is_tautology()) {
        return true;
    }
    predicates.iter().any(|a| {
        predicates.iter().any(|b| match (a, b) {
            (Predicate::Not(inner), other) => inner.as_ref() == *other,
            (
                Predicate::Compare { left: la, op: CompareOp::Eq, right: ra },
                Predicate::Compare { left: lb, op: CompareOp::Ne, right: rb },
            ) => la == lb && ra == rb,
            _ => false,
        })
    })
}
