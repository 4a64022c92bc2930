//! Request lifecycle service.
//!
//! Orchestrates the transition engine for live requests: loads the request,
//! works out the current step, computes the transition, resolves owners and
//! deadlines for every opened step, and commits the result in one unit.
//!
//! Transitions on the same request are serialized by a per-request async
//! mutex, so a branch's completion is always committed before a sibling's
//! join check reads the store. Repositories add an optimistic version check
//! on top for writers outside this process.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use flowgate_types::config::EngineConfig;
use flowgate_types::request::{
    ActivatedStep, AppliedTransition, RequestEvent, RequestStatus, StepInstance, StepStatus,
    TaskInstance, TaskStatus, TransitionResult, WorkflowAction, WorkflowRequest,
};
use flowgate_types::workflow::{NodeKind, WorkflowDefinition};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::repository::definition::DefinitionRepository;
use crate::repository::directory::{DelegationRepository, DirectoryRepository};
use crate::repository::request::{RequestRepository, StepRepository};
use crate::repository::sla::SlaRepository;
use crate::workflow::assignee::AssigneeResolver;
use crate::workflow::definition::WorkflowError;
use crate::workflow::engine::{self, TransitionEngine, status_for};
use crate::workflow::graph::CompiledWorkflow;
use crate::workflow::sla::{SlaCalculator, escalation_at};
use crate::workflow::subworkflow::resolve_subworkflows;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What one committed action did.
#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    pub request_id: Uuid,
    pub status: RequestStatus,
    pub transition: TransitionResult,
    /// Control nodes advanced through within the same transition.
    pub passed_through: Vec<String>,
    /// Tasks created for the opened steps.
    pub tasks: Vec<TaskInstance>,
}

/// Everything stored about one request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestDetails {
    pub request: WorkflowRequest,
    pub steps: Vec<StepInstance>,
    pub tasks: Vec<TaskInstance>,
    pub events: Vec<RequestEvent>,
}

/// Engine result after advancing through control nodes.
struct Advance {
    result: TransitionResult,
    passed: Vec<String>,
}

/// Who acts on which request, as what, and when.
struct ActionContext<'a> {
    request: &'a WorkflowRequest,
    actor: &'a str,
    action: &'a str,
    now: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// RequestService
// ---------------------------------------------------------------------------

/// Service driving requests through their workflows.
///
/// Generic over repository traits; flowgate-core never depends on
/// flowgate-infra.
pub struct RequestService<R, D, U, L> {
    requests: R,
    definitions: D,
    directory: U,
    sla: L,
    config: EngineConfig,
    compiled: DashMap<(String, u32), Arc<CompiledWorkflow>>,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl<R, D, U, L> RequestService<R, D, U, L>
where
    R: RequestRepository + StepRepository,
    D: DefinitionRepository,
    U: DirectoryRepository + DelegationRepository,
    L: SlaRepository,
{
    /// Create a new RequestService.
    ///
    /// - `requests`: request, step, task, and event persistence
    /// - `definitions`: registered workflow definitions
    /// - `directory`: management chain, roles, and delegations
    /// - `sla`: per-step SLA policies
    pub fn new(requests: R, definitions: D, directory: U, sla: L, config: EngineConfig) -> Self {
        Self {
            requests,
            definitions,
            directory,
            sla,
            config,
            compiled: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    pub fn requests(&self) -> &R {
        &self.requests
    }

    /// Start a request for `service_key` and take the transition out of `start`.
    pub async fn start_request(
        &self,
        service_key: &str,
        requester_id: &str,
        data: Value,
    ) -> Result<ActionOutcome, WorkflowError> {
        let definition = self
            .definitions
            .load_definition(service_key)
            .await?
            .ok_or_else(|| WorkflowError::DefinitionNotFound(service_key.to_string()))?;
        resolve_subworkflows(
            &definition,
            &self.definitions,
            self.config.max_subworkflow_depth,
        )
        .await?;
        let workflow = self.compile(&definition)?;
        let start = workflow
            .start_node()
            .map(|n| n.id.clone())
            .ok_or_else(|| WorkflowError::ValidationError("workflow has no start node".to_string()))?;

        let now = Utc::now();
        let request = WorkflowRequest {
            id: Uuid::now_v7(),
            service_key: service_key.to_string(),
            requester_id: requester_id.to_string(),
            status: RequestStatus::InProgress,
            data,
            definition,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        let advance = self
            .advance(&request.id, &workflow, &start, WorkflowAction::Approve, &request.data)
            .await?;
        let ctx = ActionContext {
            request: &request,
            actor: requester_id,
            action: "start",
            now,
        };
        let applied = self
            .materialize(&ctx, &workflow, &advance, None, TaskStatus::Completed)
            .await?;
        self.requests.create_request(&request, &applied).await?;

        tracing::info!(
            request_id = %request.id,
            service = service_key,
            requester = requester_id,
            status = %applied.status,
            "request started"
        );
        Ok(outcome(applied, advance))
    }

    /// Apply `action` to a request.
    ///
    /// `step_key` names the step being acted on and must be open; when absent
    /// or unknown the current step is recovered from the request's open work. `data` is
    /// merged over the stored form data before edge guards run.
    pub async fn submit_action(
        &self,
        request_id: &Uuid,
        step_key: Option<&str>,
        action: WorkflowAction,
        actor: &str,
        data: Option<Value>,
    ) -> Result<ActionOutcome, WorkflowError> {
        let lock = self.request_lock(request_id);
        let _guard = lock.lock().await;

        let request = self.load_open_request(request_id).await?;
        let workflow = self.compile(&request.definition)?;
        let current = self
            .recover_current_step(&request, &workflow, step_key)
            .await?;

        let merged = data.map(|d| merge_data(&request.data, d));
        let context = merged.as_ref().unwrap_or(&request.data);
        let advance = self
            .advance(&request.id, &workflow, &current, action, context)
            .await?;

        let action_name = action.to_string();
        let ctx = ActionContext {
            request: &request,
            actor,
            action: &action_name,
            now: Utc::now(),
        };
        let applied = self
            .materialize(&ctx, &workflow, &advance, merged, TaskStatus::Completed)
            .await?;
        self.requests.apply_transition(&applied).await?;

        tracing::info!(
            %request_id,
            step = %current,
            %action,
            actor,
            status = %applied.status,
            "action applied"
        );
        if applied.status.is_terminal() {
            self.locks.remove(request_id);
        }
        Ok(outcome(applied, advance))
    }

    /// Close every active step and cancel every pending task.
    pub async fn force_complete(
        &self,
        request_id: &Uuid,
        actor: &str,
    ) -> Result<ActionOutcome, WorkflowError> {
        let lock = self.request_lock(request_id);
        let _guard = lock.lock().await;

        let request = self.load_open_request(request_id).await?;
        let workflow = self.compile(&request.definition)?;
        let active = self.requests.list_active_steps(request_id).await?;
        let advance = Advance {
            result: engine::force_complete(&active),
            passed: vec![],
        };

        let ctx = ActionContext {
            request: &request,
            actor,
            action: "force_complete",
            now: Utc::now(),
        };
        let applied = self
            .materialize(&ctx, &workflow, &advance, None, TaskStatus::Cancelled)
            .await?;
        self.requests.apply_transition(&applied).await?;

        tracing::warn!(
            %request_id,
            actor,
            closed = ?applied.steps_to_complete,
            "request force-completed"
        );
        self.locks.remove(request_id);
        Ok(outcome(applied, advance))
    }

    /// Work out which step an action applies to.
    ///
    /// A requested key must name a step the request currently has open (an
    /// active step or a pending task); a node that is not open is refused
    /// with `StepNotOpen`. A key that names no node at all is ignored.
    /// Otherwise, in order: the step of the first pending task, the first
    /// active step, the `start` node.
    pub async fn recover_current_step(
        &self,
        request: &WorkflowRequest,
        workflow: &CompiledWorkflow,
        requested: Option<&str>,
    ) -> Result<String, WorkflowError> {
        let pending = self.requests.list_pending_tasks(&request.id).await?;
        let active = self.requests.list_active_steps(&request.id).await?;

        if let Some(key) = requested {
            if workflow.node(key).is_some() {
                let open = pending.iter().any(|t| t.step_key == key)
                    || active.iter().any(|s| s.step_key == key);
                if open {
                    return Ok(key.to_string());
                }
                return Err(WorkflowError::StepNotOpen(key.to_string()));
            }
            tracing::warn!(
                request_id = %request.id,
                step = key,
                "step is not part of the workflow; recovering current step"
            );
        }

        if let Some(task) = pending
            .into_iter()
            .find(|t| workflow.node(&t.step_key).is_some())
        {
            return Ok(task.step_key);
        }
        if let Some(step) = active
            .into_iter()
            .find(|s| workflow.node(&s.step_key).is_some())
        {
            return Ok(step.step_key);
        }
        workflow
            .start_node()
            .map(|n| n.id.clone())
            .ok_or_else(|| WorkflowError::InvalidStep(requested.unwrap_or_default().to_string()))
    }

    pub async fn get_request(&self, request_id: &Uuid) -> Result<WorkflowRequest, WorkflowError> {
        self.requests
            .get_request(request_id)
            .await?
            .ok_or(WorkflowError::RequestNotFound(*request_id))
    }

    pub async fn request_details(&self, request_id: &Uuid) -> Result<RequestDetails, WorkflowError> {
        let request = self.get_request(request_id).await?;
        Ok(RequestDetails {
            steps: self.requests.list_steps(request_id).await?,
            tasks: self.requests.list_tasks(request_id).await?,
            events: self.requests.list_events(request_id).await?,
            request,
        })
    }

    /// Pending tasks `user_id` may work on: their own, those of anyone
    /// delegating to them right now, and those of roles they hold.
    pub async fn inbox(&self, user_id: &str) -> Result<Vec<TaskInstance>, WorkflowError> {
        let resolver = AssigneeResolver::new(&self.directory, &self.directory);
        let users = resolver.acting_for(user_id, Utc::now()).await?;
        let roles = self.directory.user_roles(user_id).await?;
        Ok(self.requests.list_open_tasks_for(&users, &roles).await?)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn request_lock(&self, request_id: &Uuid) -> Arc<Mutex<()>> {
        Arc::clone(&self.locks.entry(*request_id).or_default())
    }

    async fn load_open_request(&self, request_id: &Uuid) -> Result<WorkflowRequest, WorkflowError> {
        let request = self.get_request(request_id).await?;
        if request.status.is_terminal() {
            return Err(WorkflowError::RequestClosed {
                id: request.id,
                status: request.status,
            });
        }
        Ok(request)
    }

    /// Compiled form of a definition snapshot, cached by service and version.
    fn compile(&self, def: &WorkflowDefinition) -> Result<Arc<CompiledWorkflow>, WorkflowError> {
        let key = (def.service_key.clone(), def.version);
        if let Some(hit) = self
            .compiled
            .get(&key)
            .filter(|hit| hit.definition() == def)
            .map(|hit| Arc::clone(hit.value()))
        {
            return Ok(hit);
        }
        let compiled = Arc::new(CompiledWorkflow::compile(def.clone())?);
        self.compiled.insert(key, Arc::clone(&compiled));
        Ok(compiled)
    }

    /// Compute the transition, then advance through any fork or join it opens.
    async fn advance(
        &self,
        request_id: &Uuid,
        workflow: &CompiledWorkflow,
        current: &str,
        action: WorkflowAction,
        data: &Value,
    ) -> Result<Advance, WorkflowError> {
        let engine = TransitionEngine::new(&self.requests);
        let first = engine
            .compute_transition(request_id, workflow, current, action, data)
            .await?;

        let mut passed: Vec<String> = Vec::new();
        let mut opened: Vec<ActivatedStep> = Vec::new();
        let mut queue: VecDeque<ActivatedStep> =
            first.active_steps_to_create.iter().cloned().collect();
        let mut hops_left = workflow.definition().nodes.len();

        while let Some(step) = queue.pop_front() {
            if is_control(&step.kind) && hops_left > 0 {
                hops_left -= 1;
                let next = engine
                    .compute_transition(
                        request_id,
                        workflow,
                        &step.step_key,
                        WorkflowAction::Approve,
                        data,
                    )
                    .await?;
                passed.push(step.step_key);
                queue.extend(next.active_steps_to_create);
            } else if !opened.iter().any(|s| s.step_key == step.step_key) {
                opened.push(step);
            }
        }

        let next_status = match opened.first() {
            Some(step) => status_for(&step.kind),
            None if passed.is_empty() => first.next_status,
            None => RequestStatus::InProgress,
        };

        Ok(Advance {
            result: TransitionResult {
                next_status,
                active_steps_to_create: opened,
                steps_to_complete: first.steps_to_complete,
            },
            passed,
        })
    }

    /// Turn an engine result into rows. Fails before anything is written if
    /// any owner cannot be resolved.
    async fn materialize(
        &self,
        ctx: &ActionContext<'_>,
        workflow: &CompiledWorkflow,
        advance: &Advance,
        data: Option<Value>,
        closed_task_status: TaskStatus,
    ) -> Result<AppliedTransition, WorkflowError> {
        let request = ctx.request;
        let resolver = AssigneeResolver::new(&self.directory, &self.directory)
            .with_max_manager_depth(self.config.max_manager_depth);
        let sla = SlaCalculator::new(&self.sla);

        let mut steps_to_open: Vec<StepInstance> = advance
            .passed
            .iter()
            .map(|key| step_row(request.id, key, StepStatus::Completed, ctx.now))
            .collect();
        let mut tasks_to_open = Vec::new();

        for step in &advance.result.active_steps_to_create {
            if step.kind == NodeKind::End {
                steps_to_open.push(step_row(request.id, &step.step_key, StepStatus::Completed, ctx.now));
                continue;
            }
            steps_to_open.push(step_row(request.id, &step.step_key, StepStatus::Active, ctx.now));

            let Some(role) = step.role.as_deref() else {
                continue;
            };
            let node = workflow
                .node(&step.step_key)
                .ok_or_else(|| WorkflowError::InvalidStep(step.step_key.clone()))?;
            let assignee = resolver
                .resolve_assignee_at(&request.id, role, &request.requester_id, ctx.now)
                .await?;
            let due_at = sla
                .deadline_for_node(&request.service_key, node, ctx.now)
                .await?;
            tasks_to_open.push(TaskInstance {
                id: Uuid::now_v7(),
                request_id: request.id,
                step_key: step.step_key.clone(),
                assignee,
                status: TaskStatus::Pending,
                due_at,
                escalate_at: escalation_at(node, ctx.now),
                created_at: ctx.now,
                completed_at: None,
                completed_by: None,
            });
        }

        let status = advance.result.next_status;
        let to_steps = advance
            .passed
            .iter()
            .cloned()
            .chain(
                advance
                    .result
                    .active_steps_to_create
                    .iter()
                    .map(|s| s.step_key.clone()),
            )
            .collect();

        Ok(AppliedTransition {
            request_id: request.id,
            expected_version: request.version,
            status,
            data,
            steps_to_complete: advance.result.steps_to_complete.clone(),
            steps_to_open,
            tasks_to_open,
            closed_task_status,
            cancel_remaining: status.is_terminal(),
            completed_by: ctx.actor.to_string(),
            event: RequestEvent {
                id: Uuid::now_v7(),
                request_id: request.id,
                actor: ctx.actor.to_string(),
                action: ctx.action.to_string(),
                from_steps: advance.result.steps_to_complete.clone(),
                to_steps,
                status,
                at: ctx.now,
            },
        })
    }
}

/// Forks and joins carry no human work; the service advances through them.
fn is_control(kind: &NodeKind) -> bool {
    matches!(kind, NodeKind::ForkAnd | NodeKind::ForkOr | NodeKind::Join)
}

fn step_row(request_id: Uuid, key: &str, status: StepStatus, now: DateTime<Utc>) -> StepInstance {
    StepInstance {
        id: Uuid::now_v7(),
        request_id,
        step_key: key.to_string(),
        status,
        started_at: now,
        completed_at: (status != StepStatus::Active).then_some(now),
    }
}

/// Shallow merge of two objects; anything else replaces.
fn merge_data(base: &Value, update: Value) -> Value {
    match (base, update) {
        (Value::Object(base), Value::Object(update)) => {
            let mut merged = base.clone();
            merged.extend(update);
            Value::Object(merged)
        }
        (_, update) => update,
    }
}

fn outcome(applied: AppliedTransition, advance: Advance) -> ActionOutcome {
    ActionOutcome {
        request_id: applied.request_id,
        status: applied.status,
        transition: advance.result,
        passed_through: advance.passed,
        tasks: applied.tasks_to_open,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
