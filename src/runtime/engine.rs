/// Step-graph execution engine
///
/// Walks a validated workflow graph in waves. Each wave holds every step
/// whose incoming edges are all resolved with at least one fired; the wave's
/// steps are dispatched together and awaited before any routing decision is
/// made. Edges not taken are marked skipped and the skip propagates, so a
/// join only waits for branches that can still arrive.
///
/// Within a wave, trace entries are appended in the order the steps
/// settled, each stamped with its own start and settle time.
///
/// A failing step stops traversal: nothing downstream of it runs, the error
/// lands in the trace and in `ExecutionState.error`, and only `on_failure`
/// cleanup targets are still invoked before the run is rejected.

use crate::error::{EngineError, RoutingError, StepExecutionError};
use crate::runtime::state::{ExecutionState, Timing};
use crate::steps::{StepInput, StepOutcome, StepRegistry};
use crate::workflow::template::resolve_params;
use crate::workflow::types::{EdgeCondition, StepKind};
use crate::workflow::validator::ValidatedGraph;
use chrono::Utc;
use futures::future::{self, join_all, BoxFuture, FutureExt};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

/// A rejected run, with everything that happened before the failure.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ExecutionFailure {
    #[source]
    pub error: EngineError,
    pub state: ExecutionState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeMark {
    Pending,
    Fired,
    Skipped,
}

type WaveResult = (usize, Timing, Result<StepOutcome, EngineError>);

/// Executes validated graphs against a step registry.
#[derive(Debug, Clone)]
pub struct WorkflowExecutor {
    registry: Arc<StepRegistry>,
}

impl WorkflowExecutor {
    pub fn new(registry: Arc<StepRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    /// Every action the graph names must be registered.
    pub fn check_actions(&self, graph: &ValidatedGraph) -> Result<(), EngineError> {
        for step in graph.steps() {
            if let Some(action) = step.effective_action() {
                if !self.registry.contains(&action) {
                    return Err(EngineError::UnknownStep {
                        step: step.id.clone(),
                        action: action.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Run a graph to completion or failure.
    #[tracing::instrument(skip_all, fields(workflow = %graph.name(), workflow_id = %graph.id()))]
    pub async fn execute(
        &self,
        graph: &ValidatedGraph,
        inputs: Value,
    ) -> Result<ExecutionState, ExecutionFailure> {
        let run_started = std::time::Instant::now();
        tracing::info!("🚀 Starting workflow '{}' with {} steps", graph.name(), graph.steps().len());

        let mut state = ExecutionState::new(inputs);
        if let Err(error) = self.check_actions(graph) {
            tracing::error!("❌ {}", error);
            state.abort(error.to_string());
            return Err(ExecutionFailure { error, state });
        }

        let step_count = graph.steps().len();
        let mut edges = vec![EdgeMark::Pending; graph.edge_count()];
        let mut settled = vec![false; step_count];
        let mut executed = vec![false; step_count];
        let mut failed: Vec<usize> = Vec::new();
        let mut failure: Option<EngineError> = None;

        let mut ready = BTreeSet::from([graph.start()]);
        settled[graph.start()] = true;

        while !ready.is_empty() {
            // BTreeSet order is declaration order.
            let wave: Vec<usize> = std::mem::take(&mut ready).into_iter().collect();
            if wave.len() > 1 {
                tracing::debug!(
                    "⚡ Dispatching {} steps concurrently: {:?}",
                    wave.len(),
                    wave.iter().map(|&i| graph.steps()[i].id.as_str()).collect::<Vec<_>>()
                );
            }

            for (idx, timing, result) in self.run_wave(graph, &wave, &mut state).await {
                executed[idx] = true;
                let step_id = graph.steps()[idx].id.as_str();
                match result {
                    Ok(outcome) => {
                        tracing::info!("✅ Step '{}' completed", step_id);
                        state.complete(step_id, outcome.output, outcome.context, timing);
                    }
                    Err(error) => {
                        tracing::error!("❌ Step '{}' failed: {}", step_id, error);
                        state.fail(step_id, error.to_string(), timing);
                        failed.push(idx);
                        failure.get_or_insert(error);
                    }
                }
            }
            if failure.is_some() {
                break;
            }

            for &idx in &wave {
                match self.route(graph, idx, &state) {
                    Ok(fired) => {
                        for &e in graph.outgoing(idx) {
                            edges[e] = if fired.contains(&e) {
                                EdgeMark::Fired
                            } else {
                                EdgeMark::Skipped
                            };
                        }
                    }
                    Err(error) => {
                        // The step itself completed; only the run records the error.
                        tracing::error!("❌ {}", error);
                        state.abort(error.to_string());
                        failed.push(idx);
                        failure = Some(error.into());
                        break;
                    }
                }
            }
            if failure.is_some() {
                break;
            }

            for &idx in graph.order() {
                if settled[idx] {
                    continue;
                }
                let incoming = graph.incoming(idx);
                if incoming.is_empty() || incoming.iter().any(|&e| edges[e] == EdgeMark::Pending) {
                    continue;
                }
                settled[idx] = true;
                if incoming.iter().any(|&e| edges[e] == EdgeMark::Fired) {
                    ready.insert(idx);
                } else {
                    tracing::debug!("⏭️ Skipping step '{}': no incoming branch was taken", graph.steps()[idx].id);
                    for &e in graph.outgoing(idx) {
                        edges[e] = EdgeMark::Skipped;
                    }
                }
            }
        }

        if let Some(error) = failure {
            let cleanup: Vec<usize> = failed
                .iter()
                .flat_map(|&idx| graph.outgoing(idx).iter().copied())
                .filter(|&e| *graph.edge_condition(e) == EdgeCondition::OnFailure)
                .filter_map(|e| graph.edge_target(e))
                .filter(|&t| !executed[t])
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();

            if !cleanup.is_empty() {
                tracing::warn!("🧹 Running {} cleanup step(s) after failure", cleanup.len());
                for (idx, timing, result) in self.run_wave(graph, &cleanup, &mut state).await {
                    let step_id = graph.steps()[idx].id.as_str();
                    match result {
                        Ok(outcome) => {
                            state.complete(step_id, outcome.output, outcome.context, timing)
                        }
                        Err(cleanup_error) => {
                            tracing::warn!("⚠️ Cleanup step '{}' failed: {}", step_id, cleanup_error);
                            state.fail(step_id, cleanup_error.to_string(), timing);
                        }
                    }
                }
            }

            tracing::error!(
                "💥 Workflow '{}' failed after {:?}: {}",
                graph.name(),
                run_started.elapsed(),
                error
            );
            return Err(ExecutionFailure { error, state });
        }

        tracing::info!(
            "🎉 Workflow '{}' completed {} steps in {:?}",
            graph.name(),
            state.completed_steps().len(),
            run_started.elapsed()
        );
        Ok(state)
    }

    /// Enter every step of a wave, dispatch them together, and return the
    /// results in the order they settled. Ties keep wave order.
    async fn run_wave(
        &self,
        graph: &ValidatedGraph,
        wave: &[usize],
        state: &mut ExecutionState,
    ) -> Vec<WaveResult> {
        let mut calls = Vec::with_capacity(wave.len());

        for &idx in wave {
            let step = &graph.steps()[idx];
            state.enter(&step.id);
            tracing::debug!("▶️ Running step '{}' ({:?})", step.id, step.kind);
            let started_at = Utc::now();
            let call = self.dispatch(graph, idx, state);
            calls.push(async move {
                let result = call.await;
                let timing = Timing {
                    started_at,
                    settled_at: Utc::now(),
                };
                (idx, timing, result)
            });
        }

        let mut results = join_all(calls).await;
        results.sort_by_key(|(_, timing, _)| timing.settled_at);
        results
    }

    /// Build the call for one step. Params are resolved here, against the
    /// state as it was when the wave started.
    fn dispatch(
        &self,
        graph: &ValidatedGraph,
        idx: usize,
        state: &ExecutionState,
    ) -> BoxFuture<'static, Result<StepOutcome, EngineError>> {
        let step = &graph.steps()[idx];
        let step_id = step.id.clone();

        if step.kind == StepKind::Condition {
            let met = graph
                .condition(idx)
                .is_some_and(|predicate| predicate.evaluate(&state.scope()));
            tracing::debug!("🔎 Condition '{}' evaluated to {}", step_id, met);
            return future::ready(Ok(StepOutcome::completed(json!({ "met": met })))).boxed();
        }

        let handler = step
            .effective_action()
            .and_then(|action| self.registry.get(&action).map(|handler| (action, handler)));
        let Some((action, handler)) = handler else {
            return future::ready(Err(EngineError::UnknownStep {
                step: step_id,
                action: step.action.as_ref().map(|a| a.to_string()).unwrap_or_default(),
            }))
            .boxed();
        };

        let input = StepInput {
            step_id: step_id.clone(),
            params: resolve_params(&step.params, &state.scope()),
            inputs: state.inputs().clone(),
            context: state.context().clone(),
        };
        tracing::debug!("📥 Params for '{}': {}", step_id, input.params);

        async move {
            handler.execute(input).await.map_err(|source| {
                EngineError::from(StepExecutionError {
                    step: step_id,
                    action: action.to_string(),
                    source,
                })
            })
        }
        .boxed()
    }

    /// Pick the outgoing edges to fire after a step completed.
    ///
    /// Unguarded sets fire every edge. A set with guards is a choice: the
    /// first guard that holds, else the first unguarded edge.
    fn route(
        &self,
        graph: &ValidatedGraph,
        idx: usize,
        state: &ExecutionState,
    ) -> Result<Vec<usize>, RoutingError> {
        let candidates: Vec<usize> = graph
            .outgoing(idx)
            .iter()
            .copied()
            .filter(|&e| *graph.edge_condition(e) != EdgeCondition::OnFailure)
            .collect();

        let guarded = candidates
            .iter()
            .any(|&e| matches!(graph.edge_condition(e), EdgeCondition::When { .. }));
        if !guarded {
            return Ok(candidates);
        }

        let scope = state.scope();
        for &e in &candidates {
            if let Some(guard) = graph.guard(e) {
                if guard.evaluate(&scope) {
                    tracing::debug!("🔀 '{}' routed via guard `{}`", graph.steps()[idx].id, guard);
                    return Ok(vec![e]);
                }
            }
        }

        if let Some(&default) = candidates
            .iter()
            .find(|&&e| graph.edge_condition(e).is_always())
        {
            tracing::debug!("🔀 '{}' routed via default edge", graph.steps()[idx].id);
            return Ok(vec![default]);
        }

        Err(RoutingError {
            step: graph.steps()[idx].id.clone(),
            reason: format!(
                "none of the {} guarded edge(s) matched and no default edge exists",
                candidates.len()
            ),
        })
    }
}
