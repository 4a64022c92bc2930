//! Transition engine: given a request's current step and an action,
//! decides which steps close, which open, and the resulting status.
//!
//! The engine is stateless apart from the step store it reads for join
//! checks. It writes nothing; callers persist the `TransitionResult`.
//!
//! Edge selection per action:
//! - `approve` -- drop reject edges, keep edges whose guard passes. Fork
//!   nodes keep every passing edge, other nodes only the first.
//! - `reject` -- keep only reject edges, guards ignored. Without any, the
//!   request is rejected outright.
//! - `complete` -- every outgoing edge, guards ignored. Without any, the
//!   request completes.
//!
//! Join targets open only when the join is ready; activations are
//! de-duplicated by step key. The status follows the kind of the first
//! opened target.

use flowgate_types::request::{
    ActivatedStep, RequestStatus, StepInstance, TransitionResult, WorkflowAction,
};
use flowgate_types::workflow::{NodeDefinition, NodeKind};
use serde_json::Value;
use uuid::Uuid;

use super::definition::WorkflowError;
use super::graph::{CompiledEdge, CompiledWorkflow};
use super::join::JoinSynchronizer;
use crate::repository::request::StepRepository;

/// Status a request shows while `kind` is its leading active step.
pub fn status_for(kind: &NodeKind) -> RequestStatus {
    match kind {
        NodeKind::End => RequestStatus::Completed,
        NodeKind::Approval => RequestStatus::AwaitingApproval,
        _ => RequestStatus::InProgress,
    }
}

pub struct TransitionEngine<'a, S: StepRepository> {
    steps: &'a S,
}

impl<'a, S: StepRepository> TransitionEngine<'a, S> {
    pub fn new(steps: &'a S) -> Self {
        Self { steps }
    }

    /// Compute the transition for `action` taken on `current_step_key`.
    ///
    /// `data` is the form data edge guards evaluate against.
    pub async fn compute_transition(
        &self,
        request_id: &Uuid,
        workflow: &CompiledWorkflow,
        current_step_key: &str,
        action: WorkflowAction,
        data: &Value,
    ) -> Result<TransitionResult, WorkflowError> {
        let current = workflow
            .node(current_step_key)
            .ok_or_else(|| WorkflowError::InvalidStep(current_step_key.to_string()))?;
        let outgoing = workflow.outgoing(current_step_key);

        let selected: Vec<CompiledEdge<'_>> = match action {
            WorkflowAction::Approve => keep_for_kind(
                current,
                outgoing
                    .into_iter()
                    .filter(|e| !e.edge.is_reject() && e.condition.evaluate(data)),
            ),
            WorkflowAction::Reject => {
                let rejects: Vec<_> = outgoing.into_iter().filter(|e| e.edge.is_reject()).collect();
                if rejects.is_empty() {
                    return Ok(terminal(RequestStatus::Rejected, current_step_key));
                }
                keep_for_kind(current, rejects.into_iter())
            }
            WorkflowAction::Complete => {
                if outgoing.is_empty() {
                    return Ok(terminal(RequestStatus::Completed, current_step_key));
                }
                outgoing
            }
        };

        if selected.is_empty() {
            // Only `approve` can get here.
            if current.kind == NodeKind::End {
                return Ok(terminal(RequestStatus::Completed, current_step_key));
            }
            return Err(WorkflowError::NoTransition {
                step: current_step_key.to_string(),
            });
        }

        let join = JoinSynchronizer::new(self.steps);
        let mut activated: Vec<ActivatedStep> = Vec::new();
        for edge in selected {
            let target = workflow.node(&edge.edge.target).ok_or_else(|| {
                WorkflowError::ValidationError(format!(
                    "edge '{}' targets unknown node '{}'",
                    edge.edge.id, edge.edge.target
                ))
            })?;
            if activated.iter().any(|s| s.step_key == target.id) {
                continue;
            }
            if target.kind == NodeKind::Join
                && !join
                    .is_join_ready(
                        request_id,
                        &target.id,
                        workflow,
                        Some(current_step_key),
                    )
                    .await?
            {
                continue;
            }
            activated.push(ActivatedStep {
                step_key: target.id.clone(),
                kind: target.kind.clone(),
                role: target.data.role.clone(),
            });
        }

        let next_status = activated
            .first()
            .map(|s| status_for(&s.kind))
            .unwrap_or(RequestStatus::InProgress);

        tracing::debug!(
            %request_id,
            step = current_step_key,
            %action,
            opened = ?activated.iter().map(|s| s.step_key.as_str()).collect::<Vec<_>>(),
            status = %next_status,
            "transition computed"
        );

        Ok(TransitionResult {
            next_status,
            active_steps_to_create: activated,
            steps_to_complete: vec![current_step_key.to_string()],
        })
    }
}

/// Administrative close: completes every active step, opens nothing.
pub fn force_complete(active_steps: &[StepInstance]) -> TransitionResult {
    let mut steps_to_complete: Vec<String> = Vec::new();
    for step in active_steps {
        if !steps_to_complete.contains(&step.step_key) {
            steps_to_complete.push(step.step_key.clone());
        }
    }
    TransitionResult {
        next_status: RequestStatus::Completed,
        active_steps_to_create: vec![],
        steps_to_complete,
    }
}

/// Fork nodes keep every edge, everything else only the first.
fn keep_for_kind<'e>(
    node: &NodeDefinition,
    edges: impl Iterator<Item = CompiledEdge<'e>>,
) -> Vec<CompiledEdge<'e>> {
    if node.kind.is_fork() {
        edges.collect()
    } else {
        edges.take(1).collect()
    }
}

fn terminal(status: RequestStatus, current_step_key: &str) -> TransitionResult {
    TransitionResult {
        next_status: status,
        active_steps_to_create: vec![],
        steps_to_complete: vec![current_step_key.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        MemoryStore, conditional_edge, definition, edge, fork_join_definition, linear_definition,
        node, purchase_definition, reject_edge, role_node,
    };
    use flowgate_types::request::StepStatus;
    use chrono::Utc;
    use serde_json::json;

    fn compiled(def: flowgate_types::workflow::WorkflowDefinition) -> CompiledWorkflow {
        CompiledWorkflow::compile(def).unwrap()
    }

    fn keys(result: &TransitionResult) -> Vec<&str> {
        result
            .active_steps_to_create
            .iter()
            .map(|s| s.step_key.as_str())
            .collect()
    }

    // -----------------------------------------------------------------------
    // approve
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_approve_takes_passing_conditional_edge() {
        let store = MemoryStore::new();
        let wf = compiled(purchase_definition());
        let engine = TransitionEngine::new(&store);

        let result = engine
            .compute_transition(
                &Uuid::now_v7(),
                &wf,
                "manager",
                WorkflowAction::Approve,
                &json!({"amount": 1000}),
            )
            .await
            .unwrap();
        assert_eq!(keys(&result), vec!["finance"]);
        assert_eq!(result.next_status, RequestStatus::AwaitingApproval);
        assert_eq!(result.steps_to_complete, vec!["manager"]);
    }

    #[tokio::test]
    async fn test_approve_first_match_wins_on_plain_node() {
        let store = MemoryStore::new();
        let wf = compiled(purchase_definition());
        let engine = TransitionEngine::new(&store);

        let result = engine
            .compute_transition(
                &Uuid::now_v7(),
                &wf,
                "manager",
                WorkflowAction::Approve,
                &json!({"amount": 100}),
            )
            .await
            .unwrap();
        assert_eq!(keys(&result), vec!["end"]);
        assert_eq!(result.next_status, RequestStatus::Completed);
    }

    #[tokio::test]
    async fn test_approve_without_passing_edge_is_an_error() {
        let store = MemoryStore::new();
        let mut def = linear_definition();
        def.edges[1] = conditional_edge("e2", "review", "end", "amount > 500");
        let wf = compiled(def);
        let engine = TransitionEngine::new(&store);

        let err = engine
            .compute_transition(
                &Uuid::now_v7(),
                &wf,
                "review",
                WorkflowAction::Approve,
                &json!({}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NoTransition { ref step } if step == "review"));
    }

    #[tokio::test]
    async fn test_approve_on_end_completes() {
        let store = MemoryStore::new();
        let wf = compiled(linear_definition());
        let engine = TransitionEngine::new(&store);

        let result = engine
            .compute_transition(&Uuid::now_v7(), &wf, "end", WorkflowAction::Approve, &json!({}))
            .await
            .unwrap();
        assert_eq!(result.next_status, RequestStatus::Completed);
        assert!(result.active_steps_to_create.is_empty());
        assert_eq!(result.steps_to_complete, vec!["end"]);
    }

    #[tokio::test]
    async fn test_unknown_step_is_invalid() {
        let store = MemoryStore::new();
        let wf = compiled(linear_definition());
        let engine = TransitionEngine::new(&store);

        let err = engine
            .compute_transition(&Uuid::now_v7(), &wf, "ghost", WorkflowAction::Approve, &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidStep(ref s) if s == "ghost"));
    }

    // -----------------------------------------------------------------------
    // reject
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_reject_follows_reject_edge() {
        let store = MemoryStore::new();
        let wf = compiled(purchase_definition());
        let engine = TransitionEngine::new(&store);

        let result = engine
            .compute_transition(
                &Uuid::now_v7(),
                &wf,
                "manager",
                WorkflowAction::Reject,
                &json!({"amount": 1000}),
            )
            .await
            .unwrap();
        assert_eq!(keys(&result), vec!["draft"]);
        assert_eq!(result.next_status, RequestStatus::InProgress);
    }

    #[tokio::test]
    async fn test_reject_without_reject_edge_rejects_request() {
        let store = MemoryStore::new();
        let wf = compiled(purchase_definition());
        let engine = TransitionEngine::new(&store);

        let result = engine
            .compute_transition(&Uuid::now_v7(), &wf, "finance", WorkflowAction::Reject, &json!({}))
            .await
            .unwrap();
        assert_eq!(result.next_status, RequestStatus::Rejected);
        assert!(result.active_steps_to_create.is_empty());
        assert_eq!(result.steps_to_complete, vec!["finance"]);
    }

    #[tokio::test]
    async fn test_approve_ignores_reject_edges() {
        let store = MemoryStore::new();
        let def = definition(
            "svc",
            vec![
                node("start", NodeKind::Start),
                role_node("review", NodeKind::Approval, "ops"),
                node("rework", NodeKind::Task),
                node("end", NodeKind::End),
            ],
            vec![
                edge("e1", "start", "review"),
                reject_edge("e2", "review", "rework"),
                edge("e3", "review", "end"),
                edge("e4", "rework", "review"),
            ],
        );
        let wf = compiled(def);
        let engine = TransitionEngine::new(&store);

        let result = engine
            .compute_transition(&Uuid::now_v7(), &wf, "review", WorkflowAction::Approve, &json!({}))
            .await
            .unwrap();
        assert_eq!(keys(&result), vec!["end"]);
    }

    // -----------------------------------------------------------------------
    // complete
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_complete_ignores_conditions() {
        let store = MemoryStore::new();
        let mut def = linear_definition();
        def.edges[1] = conditional_edge("e2", "review", "end", "amount > 500");
        let wf = compiled(def);
        let engine = TransitionEngine::new(&store);

        let result = engine
            .compute_transition(&Uuid::now_v7(), &wf, "review", WorkflowAction::Complete, &json!({}))
            .await
            .unwrap();
        assert_eq!(keys(&result), vec!["end"]);
        assert_eq!(result.next_status, RequestStatus::Completed);
    }

    #[tokio::test]
    async fn test_complete_on_leaf_completes() {
        let store = MemoryStore::new();
        let wf = compiled(linear_definition());
        let engine = TransitionEngine::new(&store);

        let result = engine
            .compute_transition(&Uuid::now_v7(), &wf, "end", WorkflowAction::Complete, &json!({}))
            .await
            .unwrap();
        assert_eq!(result.next_status, RequestStatus::Completed);
        assert!(result.active_steps_to_create.is_empty());
    }

    // -----------------------------------------------------------------------
    // forks and joins
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_fork_opens_every_branch() {
        let store = MemoryStore::new();
        let wf = compiled(fork_join_definition());
        let engine = TransitionEngine::new(&store);

        let result = engine
            .compute_transition(&Uuid::now_v7(), &wf, "fork", WorkflowAction::Approve, &json!({}))
            .await
            .unwrap();
        assert_eq!(keys(&result), vec!["a", "b"]);
        assert_eq!(result.active_steps_to_create[0].role.as_deref(), Some("ops"));
    }

    #[tokio::test]
    async fn test_fork_or_opens_only_passing_branches() {
        let store = MemoryStore::new();
        let mut def = fork_join_definition();
        def.nodes[1] = node("fork", NodeKind::ForkOr);
        def.edges[1] = conditional_edge("e2", "fork", "a", "needs_ops");
        def.edges[2] = conditional_edge("e3", "fork", "b", "needs_legal");
        let wf = compiled(def);
        let engine = TransitionEngine::new(&store);

        let result = engine
            .compute_transition(
                &Uuid::now_v7(),
                &wf,
                "fork",
                WorkflowAction::Approve,
                &json!({"needs_legal": true}),
            )
            .await
            .unwrap();
        assert_eq!(keys(&result), vec!["b"]);
    }

    #[tokio::test]
    async fn test_join_opens_after_last_branch() {
        let store = MemoryStore::new();
        let wf = compiled(fork_join_definition());
        let engine = TransitionEngine::new(&store);
        let request_id = Uuid::now_v7();
        store.insert_step(request_id, "a", StepStatus::Active);
        store.insert_step(request_id, "b", StepStatus::Active);

        let first = engine
            .compute_transition(&request_id, &wf, "a", WorkflowAction::Approve, &json!({}))
            .await
            .unwrap();
        assert!(first.active_steps_to_create.is_empty(), "b still active");
        assert_eq!(first.steps_to_complete, vec!["a"]);
        assert_eq!(first.next_status, RequestStatus::InProgress);

        // Commit a's completion, then finish b.
        store.insert_step(request_id, "a", StepStatus::Completed);
        let second = engine
            .compute_transition(&request_id, &wf, "b", WorkflowAction::Approve, &json!({}))
            .await
            .unwrap();
        assert_eq!(keys(&second), vec!["join"]);
    }

    #[tokio::test]
    async fn test_activations_are_deduplicated() {
        let store = MemoryStore::new();
        let def = definition(
            "svc",
            vec![
                node("start", NodeKind::Start),
                node("fork", NodeKind::ForkAnd),
                node("end", NodeKind::End),
            ],
            vec![
                edge("e1", "start", "fork"),
                edge("e2", "fork", "end"),
                edge("e3", "fork", "end"),
            ],
        );
        let wf = compiled(def);
        let engine = TransitionEngine::new(&store);

        let result = engine
            .compute_transition(&Uuid::now_v7(), &wf, "fork", WorkflowAction::Approve, &json!({}))
            .await
            .unwrap();
        assert_eq!(keys(&result), vec!["end"]);
    }

    #[tokio::test]
    async fn test_subworkflow_target_is_flagged() {
        let store = MemoryStore::new();
        let def = definition(
            "svc",
            vec![
                node("start", NodeKind::Start),
                node(
                    "legal",
                    NodeKind::Subworkflow {
                        service_key: "legal-review".to_string(),
                    },
                ),
                node("end", NodeKind::End),
            ],
            vec![edge("e1", "start", "legal"), edge("e2", "legal", "end")],
        );
        let wf = compiled(def);
        let engine = TransitionEngine::new(&store);

        let result = engine
            .compute_transition(&Uuid::now_v7(), &wf, "start", WorkflowAction::Approve, &json!({}))
            .await
            .unwrap();
        assert_eq!(
            result.active_steps_to_create[0].subworkflow_key(),
            Some("legal-review")
        );
        assert_eq!(result.next_status, RequestStatus::InProgress);
    }

    // -----------------------------------------------------------------------
    // force complete
    // -----------------------------------------------------------------------

    #[test]
    fn test_force_complete_closes_all_active() {
        let request_id = Uuid::now_v7();
        let step = |key: &str| StepInstance {
            id: Uuid::now_v7(),
            request_id,
            step_key: key.to_string(),
            status: StepStatus::Active,
            started_at: Utc::now(),
            completed_at: None,
        };
        let result =
            force_complete(&[step("a"), step("b"), step("a")]);
        assert_eq!(result.next_status, RequestStatus::Completed);
        assert!(result.active_steps_to_create.is_empty());
        assert_eq!(result.steps_to_complete, vec!["a", "b"]);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&NodeKind::End), RequestStatus::Completed);
        assert_eq!(status_for(&NodeKind::Approval), RequestStatus::AwaitingApproval);
        assert_eq!(status_for(&NodeKind::Task), RequestStatus::InProgress);
        assert_eq!(status_for(&NodeKind::Join), RequestStatus::InProgress);
    }

    #[tokio::test]
    async fn test_same_inputs_give_same_result() {
        let request_id = Uuid::now_v7();
        let store = MemoryStore::new();
        store.insert_step(request_id, "b", StepStatus::Completed);
        let engine = TransitionEngine::new(&store);

        let fork = compiled(fork_join_definition());
        let purchase = compiled(purchase_definition());
        let cases = [
            (&fork, "fork", WorkflowAction::Approve, json!({})),
            (&fork, "a", WorkflowAction::Approve, json!({})),
            (&purchase, "manager", WorkflowAction::Approve, json!({"amount": 1000})),
            (&purchase, "manager", WorkflowAction::Approve, json!({"amount": 10})),
            (&purchase, "manager", WorkflowAction::Reject, json!({"amount": 1000})),
        ];

        for (wf, step, action, data) in cases {
            let first = engine
                .compute_transition(&request_id, wf, step, action, &data)
                .await
                .unwrap();
            let second = engine
                .compute_transition(&request_id, wf, step, action, &data)
                .await
                .unwrap();
            assert_eq!(first, second, "{step} {action}");
        }

        // The join case really did consult the store.
        let join = engine
            .compute_transition(&request_id, &fork, "a", WorkflowAction::Approve, &json!({}))
            .await
            .unwrap();
        assert_eq!(keys(&join), vec!["join"]);
    }
}
