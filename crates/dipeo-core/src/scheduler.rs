//! Scheduler / Engine Loop (C7, spec §4.7).
//!
//! Grounded on `langgraph-core`'s `pregel::loop_impl::PregelLoop` superstep
//! loop (read → compute → write → barrier → checkpoint). DiPeO nodes do not
//! wait for a global barrier, so the barrier is replaced with "dispatch
//! everything currently ready, then drain the first completion and
//! re-evaluate readiness" — the `join_all`-based parallel dispatch there
//! becomes an incremental `tokio::task::JoinSet` here so a suspended
//! handler never blocks newly-ready siblings (spec §5).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::cancellation::CancellationToken;
use crate::diagram::{CompiledDiagram, NodeId};
use crate::envelope::TransformError;
use crate::error::{EngineError, Result};
use crate::handler::{ActivationContext, HandlerRegistry};
use crate::input_resolution::{resolve_inputs, OutputSource};
use crate::planner::{plan, ExecutionPlan, NodePolicy};
use crate::retry::{RetryPolicy, RetryState};
use crate::state::{ExecutionStateStore, ExecutionStatus, NodeStatus, TokenUsage};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// `None` means unbounded within a single loop (spec §6 default).
    pub max_parallel: Option<usize>,
    pub timeout_seconds: Option<u64>,
    pub retry_policy: Option<RetryPolicy>,
}

/// A simple in-memory map view used for one resolution pass; refreshed
/// from the state store each time the ready set is re-evaluated.
struct SnapshotOutputs<'a>(&'a HashMap<NodeId, crate::envelope::Envelope>);

impl OutputSource for SnapshotOutputs<'_> {
    fn latest_output(&self, node_id: &str) -> Option<crate::envelope::Envelope> {
        self.0.get(node_id).cloned()
    }
}

/// Validates each node's props against its handler's `props_schema()` before
/// the run starts (spec §4.7 step 2: "validate props against the handler
/// schema"). A handler with no schema, or a kind with no registered handler
/// (caught separately by `diagram.validate()`), is simply skipped.
///
/// Grounded on `langgraph-core`'s `Tool::validate_args`, which compiles and
/// runs the same `jsonschema::JSONSchema` against a single JSON value.
fn validate_node_props(diagram: &CompiledDiagram, handlers: &HandlerRegistry) -> Result<()> {
    for node in diagram.nodes.values() {
        let Some(handler) = handlers.get(&node.kind) else { continue };
        let Some(schema) = handler.props_schema() else { continue };
        let compiled = jsonschema::JSONSchema::compile(schema)
            .map_err(|e| EngineError::Validation(format!("node '{}': invalid props schema: {e}", node.id)))?;
        let validation_result = compiled.validate(&node.props.0);
        if let Err(errors) = validation_result {
            let messages: Vec<String> = errors.map(|e| format!("{}: {}", e.instance_path, e)).collect();
            return Err(EngineError::Validation(format!("node '{}': {}", node.id, messages.join("; "))));
        }
    }
    Ok(())
}

fn topological_ranks(diagram: &CompiledDiagram, plan: &ExecutionPlan) -> HashMap<NodeId, usize> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    for node_id in diagram.nodes.keys() {
        in_degree.insert(node_id.as_str(), 0);
    }
    for arrow in &diagram.arrows {
        if plan.is_feedback(arrow) {
            continue;
        }
        *in_degree.entry(arrow.target_node.as_str()).or_insert(0) += 1;
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut ranks = HashMap::new();
    let mut rank = 0usize;
    while !queue.is_empty() {
        let mut next_queue = VecDeque::new();
        for node_id in queue.drain(..) {
            ranks.insert(node_id.to_string(), rank);
            for arrow in plan.outgoing.get(node_id).into_iter().flatten() {
                if plan.is_feedback(arrow) {
                    continue;
                }
                if let Some(degree) = in_degree.get_mut(arrow.target_node.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        next_queue.push_back(arrow.target_node.as_str());
                    }
                }
            }
        }
        queue = next_queue;
        rank += 1;
    }
    // Nodes on a cycle with no non-feedback predecessor resolvable (should
    // not happen post-planning) fall back to rank 0.
    for node_id in diagram.nodes.keys() {
        ranks.entry(node_id.clone()).or_insert(0);
    }
    ranks
}

struct ReadyQueue {
    priorities: HashMap<NodeId, i64>,
    ranks: HashMap<NodeId, usize>,
    items: Vec<NodeId>,
}

impl ReadyQueue {
    fn new(diagram: &CompiledDiagram, ranks: HashMap<NodeId, usize>) -> Self {
        let priorities = diagram
            .nodes
            .values()
            .map(|n| (n.id.clone(), n.props.0.get("priority").and_then(|v| v.as_i64()).unwrap_or(0)))
            .collect();
        Self { priorities, ranks, items: Vec::new() }
    }

    fn push(&mut self, node_id: NodeId) {
        if !self.items.contains(&node_id) {
            self.items.push(node_id);
        }
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Pops the highest-priority ready node per the §4.7 tie-break:
    /// `(priority, topological_rank, node_id)`, priority descending.
    fn pop(&mut self) -> Option<NodeId> {
        if self.items.is_empty() {
            return None;
        }
        let (index, _) = self
            .items
            .iter()
            .enumerate()
            .min_by_key(|(_, id)| {
                let priority = -self.priorities.get(*id).copied().unwrap_or(0);
                let rank = self.ranks.get(*id).copied().unwrap_or(0);
                (priority, rank, (*id).clone())
            })
            .unwrap();
        Some(self.items.remove(index))
    }
}

struct NodeOutcome {
    node_id: NodeId,
    result: Result<crate::envelope::Envelope>,
}

/// Runs a compiled diagram to completion (spec §4.7). Returns once the run
/// reaches a terminal status; final state is read via `state.get`.
pub async fn run(
    execution_id: &str,
    diagram: Arc<CompiledDiagram>,
    handlers: Arc<HandlerRegistry>,
    state: ExecutionStateStore,
    variables: serde_json::Value,
    options: RunOptions,
    cancellation: CancellationToken,
    template_fn: impl Fn(&str, &serde_json::Value) -> std::result::Result<String, TransformError> + Copy + Send + 'static,
) -> Result<()> {
    diagram.validate()?;
    validate_node_props(&diagram, &handlers)?;
    let execution_plan = plan(&diagram)?;
    let ranks = topological_ranks(&diagram, &execution_plan);

    state.create(execution_id, "diagram", variables.clone()).await;

    let mut ready = ReadyQueue::new(&diagram, ranks);
    for node_id in &execution_plan.start_set {
        state.set_node_status(execution_id, node_id, NodeStatus::Ready, None).await?;
        ready.push(node_id.clone());
    }

    let retry_policy = options.retry_policy.unwrap_or_default();
    let max_parallel = options.max_parallel.unwrap_or(usize::MAX);

    let mut outputs: HashMap<NodeId, crate::envelope::Envelope> = HashMap::new();
    let mut completed_endpoints: HashSet<NodeId> = HashSet::new();
    let mut run_failed: Option<String> = None;
    let mut in_flight: JoinSet<NodeOutcome> = JoinSet::new();
    let mut running_count = 0usize;
    // Attempts made so far per node, carried across failures (spec §4.11
    // "bounded retries"): `RetryPolicy::should_retry` needs the running
    // count, not a fresh one each time a node fails.
    let mut retry_states: HashMap<NodeId, RetryState> = HashMap::new();

    loop {
        if cancellation.is_cancelled() {
            state.complete(execution_id, ExecutionStatus::Aborted, None).await?;
            return Ok(());
        }

        while running_count < max_parallel && !ready.is_empty() {
            let node_id = ready.pop().unwrap();
            let node = diagram.node(&node_id).cloned();
            let node = match node {
                Some(n) => n,
                None => continue,
            };

            let exec_state = state.get(execution_id).await.ok_or_else(|| EngineError::Internal("missing execution state".into()))?;
            let exec_count = exec_state.node_states.get(&node_id).map(|s| s.exec_count).unwrap_or(0);

            let resolved = resolve_inputs(&diagram, &execution_plan, &node_id, exec_count, &SnapshotOutputs(&outputs), template_fn)?;
            let Some(inputs) = resolved else {
                // Not actually ready yet; re-check on the next readiness pass.
                continue;
            };

            let handler = match handlers.get(&node.kind) {
                Some(h) => h.clone(),
                None => {
                    return Err(EngineError::Configuration { node: node_id.clone(), message: format!("no handler registered for kind '{}'", node.kind) });
                }
            };

            state.set_node_status(execution_id, &node_id, NodeStatus::Running, None).await?;
            running_count += 1;

            let diagram_clone = diagram.clone();
            let variables_clone = exec_state.variables.clone();
            let node_id_clone = node_id.clone();
            let execution_id_owned = execution_id.to_string();
            let cancellation_clone = cancellation.clone();
            in_flight.spawn(async move {
                let ctx = ActivationContext {
                    execution_id: &execution_id_owned,
                    node: &node,
                    diagram: &diagram_clone,
                    inputs,
                    exec_count,
                    variables: &variables_clone,
                    cancellation: &cancellation_clone,
                };
                let result = handler.activate(ctx).await;
                NodeOutcome { node_id: node_id_clone, result }
            });
        }

        if running_count == 0 && ready.is_empty() {
            break;
        }

        let Some(joined) = in_flight.join_next().await else {
            break;
        };
        running_count -= 1;
        let outcome = joined.map_err(|e| EngineError::Internal(format!("handler task panicked: {e}")))?;

        match outcome.result {
            Ok(envelope) => {
                // The attempt that just succeeded is one past the failures
                // already recorded for this node, if any (spec §7 "attempt
                // count"; E2E scenario 4: two retries then success => 3).
                let final_attempt = retry_states.get(&outcome.node_id).map(|r| r.attempts + 1).unwrap_or(1);
                retry_states.remove(&outcome.node_id);
                state.set_node_attempt(execution_id, &outcome.node_id, final_attempt).await.ok();
                state.set_node_output(execution_id, &outcome.node_id, envelope.clone()).await?;
                let exec_count = state.increment_exec_count(execution_id, &outcome.node_id).await?;
                if let Some(usage) = envelope.metadata.get("token_usage") {
                    if let Ok(usage) = serde_json::from_value::<TokenUsage>(usage.clone()) {
                        state.add_token_usage(execution_id, &outcome.node_id, usage).await?;
                    }
                }
                outputs.insert(outcome.node_id.clone(), envelope.clone());

                let node_kind = diagram.node(&outcome.node_id).map(|n| n.kind.as_str()).unwrap_or("");
                if node_kind == "endpoint" {
                    completed_endpoints.insert(outcome.node_id.clone());
                }

                let policy = execution_plan.policy(&outcome.node_id);
                let should_reready = policy == NodePolicy::Iterating
                    && !envelope.metadata.get("loop_complete").and_then(|v| v.as_bool()).unwrap_or(false)
                    && !envelope.metadata.get("max_iterations_reached").and_then(|v| v.as_bool()).unwrap_or(false);

                if should_reready {
                    state.set_node_status(execution_id, &outcome.node_id, NodeStatus::Ready, None).await?;
                } else {
                    state.set_node_status(execution_id, &outcome.node_id, NodeStatus::Completed, None).await?;
                }

                if should_reready {
                    // Downstream consumers only see this node's final
                    // output: re-queuing them on every intermediate
                    // iteration would both fire a sink early and, once it
                    // had already gone `Completed`, violate the status FSM
                    // (only `Completed -> Ready` is a legal re-entry).
                    ready.push(outcome.node_id.clone());
                } else {
                    let branch = envelope.branch();
                    for arrow in execution_plan.outgoing.get(&outcome.node_id).into_iter().flatten() {
                        if policy == NodePolicy::Choice {
                            let activates = branch.map(|b| arrow.source_label == if b { "true" } else { "false" }).unwrap_or(false);
                            if !activates {
                                // The non-taken branch's direct target is
                                // explicitly `skipped` rather than left with
                                // no `node_states` entry at all (spec §4.3's
                                // required status set, IP4). Best-effort:
                                // a node already reached via another path
                                // has moved past `pending` and the illegal
                                // transition is simply ignored here.
                                state.set_node_status(execution_id, &arrow.target_node, NodeStatus::Skipped, None).await.ok();
                                continue;
                            }
                        }
                        ready.push(arrow.target_node.clone());
                    }
                }
            }
            Err(err) => {
                let retryable = err.is_retryable();
                let node_id = outcome.node_id.clone();
                let retry_state = retry_states.entry(node_id.clone()).or_default();
                retry_state.record_attempt(Some(err.to_string()));
                let attempts_made = retry_state.attempts;
                let last_error = retry_state.last_error.clone().unwrap_or_default();

                if retryable && retry_policy.should_retry(attempts_made) {
                    // A retry publishes `node_retry` telemetry but never
                    // transitions the node's status away from `running`
                    // (spec §7) — re-calling `set_node_status(Running, ..)`
                    // here would misreport the retry as a fresh start.
                    state.record_retry(execution_id, &node_id, attempts_made, last_error).await.ok();
                    // Retries re-enter the ready queue rather than being
                    // inlined here, so subsequent siblings are not
                    // blocked on this node's backoff sleep.
                    tokio::time::sleep(retry_policy.delay_for(attempts_made - 1)).await;
                    ready.push(node_id.clone());
                    continue;
                }

                let continue_on_error = diagram
                    .node(&node_id)
                    .map(|n| n.props.0.get("continue_on_error").and_then(|v| v.as_bool()).unwrap_or(false))
                    .unwrap_or(false);

                state.set_node_attempt(execution_id, &node_id, attempts_made).await.ok();
                let message = format!("{err} (attempt {attempts_made})");
                state.set_node_status(execution_id, &node_id, NodeStatus::Failed, Some(message)).await?;

                if !continue_on_error {
                    run_failed = Some(err.to_string());
                    break;
                }
            }
        }
    }

    if let Some(error) = run_failed {
        state.complete(execution_id, ExecutionStatus::Failed, Some(error)).await?;
    } else if completed_endpoints.is_empty() && !execution_plan.start_set.is_empty() {
        state
            .complete(execution_id, ExecutionStatus::Failed, Some("run ended with no endpoint completed".into()))
            .await?;
    } else {
        state.complete(execution_id, ExecutionStatus::Completed, None).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagram::{Arrow, DiagramMetadata, Node, NodeProps};
    use crate::envelope::Envelope;
    use crate::event::EventBus;
    use crate::handler::NodeHandler;
    use async_trait::async_trait;
    use std::collections::HashMap as Map;

    fn node(id: &str, kind: &str) -> Node {
        Node { id: id.into(), kind: kind.into(), props: NodeProps::default(), position: None, label: None }
    }

    fn arrow(src: &str, src_label: &str, dst: &str, dst_label: &str) -> Arrow {
        Arrow {
            source_node: src.into(),
            source_label: src_label.into(),
            target_node: dst.into(),
            target_label: dst_label.into(),
            transform_rules: vec![],
            content_type: None,
            label: None,
        }
    }

    fn noop_template(_s: &str, _v: &serde_json::Value) -> std::result::Result<String, TransformError> {
        Ok(String::new())
    }

    struct PassthroughHandler(crate::diagram::NodeKind);

    #[async_trait]
    impl NodeHandler for PassthroughHandler {
        fn kind(&self) -> crate::diagram::NodeKind {
            self.0.clone()
        }

        async fn activate(&self, _ctx: ActivationContext<'_>) -> Result<Envelope> {
            Ok(Envelope::raw_text("ok"))
        }
    }

    struct BranchingHandler;

    #[async_trait]
    impl NodeHandler for BranchingHandler {
        fn kind(&self) -> crate::diagram::NodeKind {
            "condition".into()
        }

        async fn activate(&self, _ctx: ActivationContext<'_>) -> Result<Envelope> {
            Ok(Envelope::object(serde_json::Value::Null).with_metadata("branch", true))
        }
    }

    fn diagram(nodes: Vec<Node>, arrows: Vec<Arrow>) -> Arc<CompiledDiagram> {
        let mut node_map = Map::new();
        for n in nodes {
            node_map.insert(n.id.clone(), n);
        }
        Arc::new(CompiledDiagram {
            nodes: node_map,
            arrows,
            persons: Map::new(),
            api_keys: Map::new(),
            metadata: DiagramMetadata { format_version: "2.0".into(), ..Default::default() },
        })
    }

    #[tokio::test]
    async fn linear_pipeline_reaches_completed() {
        let d = diagram(
            vec![node("s1", "start"), node("mid", "code_job"), node("end1", "endpoint")],
            vec![arrow("s1", "default", "mid", "default"), arrow("mid", "default", "end1", "default")],
        );
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(PassthroughHandler("start".into())));
        registry.register(Arc::new(PassthroughHandler("code_job".into())));
        registry.register(Arc::new(PassthroughHandler("endpoint".into())));

        let state = ExecutionStateStore::new(EventBus::new());
        run(
            "e1",
            d,
            Arc::new(registry),
            state.clone(),
            serde_json::json!({}),
            RunOptions::default(),
            CancellationToken::new(),
            noop_template,
        )
        .await
        .unwrap();

        let final_state = state.get("e1").await.unwrap();
        assert_eq!(final_state.status, ExecutionStatus::Completed);
        assert_eq!(final_state.node_states.get("end1").unwrap().status, Some(NodeStatus::Completed));
    }

    #[tokio::test]
    async fn condition_activates_only_matching_branch() {
        let d = diagram(
            vec![node("s1", "start"), node("cond", "condition"), node("t", "code_job"), node("f", "code_job"), node("end1", "endpoint")],
            vec![
                arrow("s1", "default", "cond", "default"),
                arrow("cond", "true", "t", "default"),
                arrow("cond", "false", "f", "default"),
                arrow("t", "default", "end1", "default"),
            ],
        );
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(PassthroughHandler("start".into())));
        registry.register(Arc::new(BranchingHandler));
        registry.register(Arc::new(PassthroughHandler("code_job".into())));
        registry.register(Arc::new(PassthroughHandler("endpoint".into())));

        let state = ExecutionStateStore::new(EventBus::new());
        run(
            "e1",
            d,
            Arc::new(registry),
            state.clone(),
            serde_json::json!({}),
            RunOptions::default(),
            CancellationToken::new(),
            noop_template,
        )
        .await
        .unwrap();

        let final_state = state.get("e1").await.unwrap();
        assert_eq!(final_state.status, ExecutionStatus::Completed);
        assert!(final_state.node_states.get("t").unwrap().status == Some(NodeStatus::Completed));
        assert_eq!(final_state.node_states.get("f").unwrap().status, Some(NodeStatus::Skipped));
    }

    #[tokio::test]
    async fn cancellation_transitions_to_aborted() {
        let d = diagram(vec![node("s1", "start")], vec![]);
        let registry = HandlerRegistry::new();
        let state = ExecutionStateStore::new(EventBus::new());
        let token = CancellationToken::new();
        token.cancel();

        run("e1", d, Arc::new(registry), state.clone(), serde_json::json!({}), RunOptions::default(), token, noop_template)
            .await
            .unwrap();

        let final_state = state.get("e1").await.unwrap();
        assert_eq!(final_state.status, ExecutionStatus::Aborted);
    }

    struct AlwaysFailingHandler;

    #[async_trait]
    impl NodeHandler for AlwaysFailingHandler {
        fn kind(&self) -> crate::diagram::NodeKind {
            "code_job".into()
        }

        async fn activate(&self, ctx: ActivationContext<'_>) -> Result<Envelope> {
            Err(EngineError::ExternalService { node: ctx.node.id.clone(), message: "unreachable".into() })
        }
    }

    #[tokio::test]
    async fn retry_attempts_are_bounded_then_the_run_fails() {
        let d = diagram(vec![node("s1", "start"), node("mid", "code_job")], vec![arrow("s1", "default", "mid", "default")]);
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(PassthroughHandler("start".into())));
        registry.register(Arc::new(AlwaysFailingHandler));

        let state = ExecutionStateStore::new(EventBus::new());
        let options = RunOptions {
            max_parallel: None,
            timeout_seconds: None,
            retry_policy: Some(RetryPolicy::new(3).with_base_delay(std::time::Duration::from_millis(1)).with_jitter(false)),
        };
        run("e1", d, Arc::new(registry), state.clone(), serde_json::json!({}), options, CancellationToken::new(), noop_template)
            .await
            .unwrap();

        let final_state = state.get("e1").await.unwrap();
        assert_eq!(final_state.status, ExecutionStatus::Failed);
        let mid = final_state.node_states.get("mid").unwrap();
        assert_eq!(mid.status, Some(NodeStatus::Failed));
        assert_eq!(mid.attempt, 3);
        assert!(mid.error.as_deref().unwrap_or_default().contains("attempt 3"));
    }

    struct FailsTwiceThenSucceedsHandler(std::sync::atomic::AtomicUsize);

    #[async_trait]
    impl NodeHandler for FailsTwiceThenSucceedsHandler {
        fn kind(&self) -> crate::diagram::NodeKind {
            "code_job".into()
        }

        async fn activate(&self, ctx: ActivationContext<'_>) -> Result<Envelope> {
            let call = self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if call < 2 {
                Err(EngineError::ExternalService { node: ctx.node.id.clone(), message: "transient".into() })
            } else {
                Ok(Envelope::raw_text("ok"))
            }
        }
    }

    #[tokio::test]
    async fn retry_then_success_emits_two_retry_events_and_reaches_attempt_three() {
        let d = diagram(vec![node("s1", "start"), node("mid", "code_job")], vec![arrow("s1", "default", "mid", "default")]);
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(PassthroughHandler("start".into())));
        registry.register(Arc::new(FailsTwiceThenSucceedsHandler(std::sync::atomic::AtomicUsize::new(0))));

        let events = EventBus::new();
        let sub = events.subscribe("conn", Some("e1".to_string())).await;
        let state = ExecutionStateStore::new(events);
        let options = RunOptions {
            max_parallel: None,
            timeout_seconds: None,
            retry_policy: Some(RetryPolicy::new(3).with_base_delay(std::time::Duration::from_millis(1)).with_jitter(false)),
        };
        run("e1", d, Arc::new(registry), state.clone(), serde_json::json!({}), options, CancellationToken::new(), noop_template)
            .await
            .unwrap();

        let mut retry_events = 0;
        while let Some(event) = sub.recv().await {
            if event.kind == crate::event::EventKind::NodeRetry {
                retry_events += 1;
            }
            if event.kind == crate::event::EventKind::ExecutionCompleted {
                break;
            }
        }
        assert_eq!(retry_events, 2);

        let final_state = state.get("e1").await.unwrap();
        assert_eq!(final_state.status, ExecutionStatus::Completed);
        let mid = final_state.node_states.get("mid").unwrap();
        assert_eq!(mid.status, Some(NodeStatus::Completed));
        assert_eq!(mid.attempt, 3);
    }

    struct SchemaHandler(crate::diagram::NodeKind, serde_json::Value);

    #[async_trait]
    impl NodeHandler for SchemaHandler {
        fn kind(&self) -> crate::diagram::NodeKind {
            self.0.clone()
        }

        fn props_schema(&self) -> Option<&serde_json::Value> {
            Some(&self.1)
        }

        async fn activate(&self, _ctx: ActivationContext<'_>) -> Result<Envelope> {
            Ok(Envelope::raw_text("ok"))
        }
    }

    #[tokio::test]
    async fn a_run_is_rejected_before_it_starts_when_props_fail_their_handler_schema() {
        let mut n = node("mid", "needs_id");
        n.props = NodeProps(serde_json::json!({}));
        let d = diagram(vec![node("s1", "start"), n], vec![arrow("s1", "default", "mid", "default")]);

        let schema = serde_json::json!({"type": "object", "required": ["id"]});
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(PassthroughHandler("start".into())));
        registry.register(Arc::new(SchemaHandler("needs_id".into(), schema)));

        let state = ExecutionStateStore::new(EventBus::new());
        let err = run(
            "e1",
            d,
            Arc::new(registry),
            state.clone(),
            serde_json::json!({}),
            RunOptions::default(),
            CancellationToken::new(),
            noop_template,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        // Rejected before the run was even created.
        assert!(state.get("e1").await.is_none());
    }
}
