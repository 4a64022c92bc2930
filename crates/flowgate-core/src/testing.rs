//! Shared test fixtures: definition builders and an in-memory store that
//! implements every repository trait.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use flowgate_types::directory::Delegation;
use flowgate_types::error::RepositoryError;
use flowgate_types::request::{
    AppliedTransition, RequestEvent, StepInstance, StepStatus, TaskInstance, TaskStatus,
    WorkflowRequest,
};
use flowgate_types::workflow::{
    ConditionSpec, EdgeDefinition, NodeData, NodeDefinition, NodeKind, WorkflowDefinition,
};
use uuid::Uuid;

use crate::repository::definition::DefinitionRepository;
use crate::repository::directory::{DelegationRepository, DirectoryRepository};
use crate::repository::request::{RequestRepository, StepRepository};
use crate::repository::sla::SlaRepository;

// ---------------------------------------------------------------------------
// Definition builders
// ---------------------------------------------------------------------------

pub fn node(id: &str, kind: NodeKind) -> NodeDefinition {
    NodeDefinition {
        id: id.to_string(),
        kind,
        data: NodeData::default(),
    }
}

pub fn role_node(id: &str, kind: NodeKind, role: &str) -> NodeDefinition {
    NodeDefinition {
        id: id.to_string(),
        kind,
        data: NodeData {
            role: Some(role.to_string()),
            ..NodeData::default()
        },
    }
}

pub fn edge(id: &str, source: &str, target: &str) -> EdgeDefinition {
    EdgeDefinition {
        id: id.to_string(),
        source: source.to_string(),
        target: target.to_string(),
        condition: None,
        label: None,
    }
}

pub fn conditional_edge(id: &str, source: &str, target: &str, expr: &str) -> EdgeDefinition {
    EdgeDefinition {
        condition: Some(ConditionSpec::Expression(expr.to_string())),
        ..edge(id, source, target)
    }
}

pub fn reject_edge(id: &str, source: &str, target: &str) -> EdgeDefinition {
    EdgeDefinition {
        label: Some("reject".to_string()),
        ..edge(id, source, target)
    }
}

pub fn definition(
    service_key: &str,
    nodes: Vec<NodeDefinition>,
    edges: Vec<EdgeDefinition>,
) -> WorkflowDefinition {
    WorkflowDefinition {
        service_key: service_key.to_string(),
        name: None,
        description: None,
        version: 1,
        nodes,
        edges,
        metadata: HashMap::new(),
    }
}

/// `start -> review (approval, finance-team) -> end`
pub fn linear_definition() -> WorkflowDefinition {
    definition(
        "linear",
        vec![
            node("start", NodeKind::Start),
            role_node("review", NodeKind::Approval, "finance-team"),
            node("end", NodeKind::End),
        ],
        vec![edge("e1", "start", "review"), edge("e2", "review", "end")],
    )
}

/// `start -> fork (and) -> {a, b} -> join -> end`
pub fn fork_join_definition() -> WorkflowDefinition {
    definition(
        "parallel",
        vec![
            node("start", NodeKind::Start),
            node("fork", NodeKind::ForkAnd),
            role_node("a", NodeKind::Task, "ops"),
            role_node("b", NodeKind::Task, "legal"),
            node("join", NodeKind::Join),
            node("end", NodeKind::End),
        ],
        vec![
            edge("e1", "start", "fork"),
            edge("e2", "fork", "a"),
            edge("e3", "fork", "b"),
            edge("e4", "a", "join"),
            edge("e5", "b", "join"),
            edge("e6", "join", "end"),
        ],
    )
}

/// Manager approval, finance above 500, rejection back to a draft step.
///
/// ```text
/// start -> manager --(amount > 500)--> finance -> end
///                  \--------------------------> end
///                  \--reject--> draft -> manager
/// ```
pub fn purchase_definition() -> WorkflowDefinition {
    definition(
        "purchase-order",
        vec![
            node("start", NodeKind::Start),
            role_node("manager", NodeKind::Approval, "DIRECT_MANAGER"),
            role_node("finance", NodeKind::Approval, "finance-team"),
            node("draft", NodeKind::Task),
            node("end", NodeKind::End),
        ],
        vec![
            edge("e1", "start", "manager"),
            conditional_edge("e2", "manager", "finance", "amount > 500"),
            edge("e3", "manager", "end"),
            reject_edge("e4", "manager", "draft"),
            edge("e5", "draft", "manager"),
            edge("e6", "finance", "end"),
        ],
    )
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    definitions: HashMap<String, WorkflowDefinition>,
    requests: HashMap<Uuid, WorkflowRequest>,
    steps: Vec<StepInstance>,
    tasks: Vec<TaskInstance>,
    events: Vec<RequestEvent>,
    managers: HashMap<String, String>,
    roles: HashMap<String, Vec<String>>,
    delegations: Vec<Delegation>,
    sla: HashMap<(String, String), u32>,
}

/// Implements every repository port over plain collections.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_definition(self, def: WorkflowDefinition) -> Self {
        self.lock().definitions.insert(def.service_key.clone(), def);
        self
    }

    pub fn with_manager(self, user: &str, manager: &str) -> Self {
        self.lock()
            .managers
            .insert(user.to_string(), manager.to_string());
        self
    }

    pub fn with_role(self, user: &str, role: &str) -> Self {
        self.lock()
            .roles
            .entry(user.to_string())
            .or_default()
            .push(role.to_string());
        self
    }

    pub fn with_delegation(
        self,
        from: &str,
        to: &str,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Self {
        self.lock().delegations.push(Delegation {
            id: Uuid::now_v7(),
            from_user: from.to_string(),
            to_user: to.to_string(),
            starts_at,
            ends_at,
            active: true,
        });
        self
    }

    pub fn with_sla(self, service_key: &str, step_key: &str, minutes: u32) -> Self {
        self.lock()
            .sla
            .insert((service_key.to_string(), step_key.to_string()), minutes);
        self
    }

    /// Record a step row directly, bypassing transitions.
    pub fn insert_step(&self, request_id: Uuid, step_key: &str, status: StepStatus) {
        let now = Utc::now();
        self.lock().steps.push(StepInstance {
            id: Uuid::now_v7(),
            request_id,
            step_key: step_key.to_string(),
            status,
            started_at: now,
            completed_at: (status != StepStatus::Active).then_some(now),
        });
    }

    /// Step keys of a request with the given status, in insertion order.
    pub fn step_keys(&self, request_id: Uuid, status: StepStatus) -> Vec<String> {
        self.lock()
            .steps
            .iter()
            .filter(|s| s.request_id == request_id && s.status == status)
            .map(|s| s.step_key.clone())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap()
    }
}

impl DefinitionRepository for MemoryStore {
    async fn load_definition(
        &self,
        service_key: &str,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self.lock().definitions.get(service_key).cloned())
    }

    async fn save_definition(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        self.lock()
            .definitions
            .insert(def.service_key.clone(), def.clone());
        Ok(())
    }

    async fn list_definitions(&self) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let mut defs: Vec<_> = self.lock().definitions.values().cloned().collect();
        defs.sort_by(|a, b| a.service_key.cmp(&b.service_key));
        Ok(defs)
    }
}

impl DirectoryRepository for MemoryStore {
    async fn get_manager(&self, user_id: &str) -> Result<Option<String>, RepositoryError> {
        Ok(self.lock().managers.get(user_id).cloned())
    }

    async fn user_roles(&self, user_id: &str) -> Result<Vec<String>, RepositoryError> {
        Ok(self.lock().roles.get(user_id).cloned().unwrap_or_default())
    }
}

impl DelegationRepository for MemoryStore {
    async fn list_active_delegations_from(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<Delegation>, RepositoryError> {
        let mut found: Vec<_> = self
            .lock()
            .delegations
            .iter()
            .filter(|d| d.from_user == user_id && d.covers(at))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.starts_at.cmp(&a.starts_at));
        Ok(found)
    }

    async fn list_active_delegations_to(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<Delegation>, RepositoryError> {
        let mut found: Vec<_> = self
            .lock()
            .delegations
            .iter()
            .filter(|d| d.to_user == user_id && d.covers(at))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.starts_at.cmp(&a.starts_at));
        Ok(found)
    }
}

impl SlaRepository for MemoryStore {
    async fn get_step_duration_minutes(
        &self,
        service_key: &str,
        step_key: &str,
    ) -> Result<Option<u32>, RepositoryError> {
        Ok(self
            .lock()
            .sla
            .get(&(service_key.to_string(), step_key.to_string()))
            .copied())
    }
}

impl StepRepository for MemoryStore {
    async fn list_completed_steps(
        &self,
        request_id: &Uuid,
        step_keys: &[String],
    ) -> Result<HashSet<String>, RepositoryError> {
        Ok(self
            .lock()
            .steps
            .iter()
            .filter(|s| {
                s.request_id == *request_id
                    && s.status == StepStatus::Completed
                    && step_keys.contains(&s.step_key)
            })
            .map(|s| s.step_key.clone())
            .collect())
    }

    async fn list_active_steps(
        &self,
        request_id: &Uuid,
    ) -> Result<Vec<StepInstance>, RepositoryError> {
        Ok(self
            .lock()
            .steps
            .iter()
            .filter(|s| s.request_id == *request_id && s.status == StepStatus::Active)
            .cloned()
            .collect())
    }

    async fn list_pending_tasks(
        &self,
        request_id: &Uuid,
    ) -> Result<Vec<TaskInstance>, RepositoryError> {
        Ok(self
            .lock()
            .tasks
            .iter()
            .filter(|t| t.request_id == *request_id && t.status == TaskStatus::Pending)
            .cloned()
            .collect())
    }
}

impl RequestRepository for MemoryStore {
    async fn create_request(
        &self,
        request: &WorkflowRequest,
        initial: &AppliedTransition,
    ) -> Result<(), RepositoryError> {
        {
            let mut state = self.lock();
            if state.requests.contains_key(&request.id) {
                return Err(RepositoryError::Conflict(format!(
                    "request {} already exists",
                    request.id
                )));
            }
            state.requests.insert(request.id, request.clone());
        }
        self.apply_transition(initial).await
    }

    async fn get_request(&self, id: &Uuid) -> Result<Option<WorkflowRequest>, RepositoryError> {
        Ok(self.lock().requests.get(id).cloned())
    }

    async fn apply_transition(&self, t: &AppliedTransition) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        let now = t.event.at;

        let request = state
            .requests
            .get_mut(&t.request_id)
            .ok_or(RepositoryError::NotFound)?;
        if request.version != t.expected_version {
            return Err(RepositoryError::Conflict(format!(
                "request {} is at version {}, expected {}",
                t.request_id, request.version, t.expected_version
            )));
        }
        request.status = t.status;
        request.version += 1;
        request.updated_at = now;
        if let Some(data) = &t.data {
            request.data = data.clone();
        }

        for step in state.steps.iter_mut().filter(|s| {
            s.request_id == t.request_id && s.status == StepStatus::Active
        }) {
            if t.steps_to_complete.contains(&step.step_key) {
                step.status = StepStatus::Completed;
                step.completed_at = Some(now);
            } else if t.cancel_remaining {
                step.status = StepStatus::Cancelled;
                step.completed_at = Some(now);
            }
        }
        for task in state.tasks.iter_mut().filter(|task| {
            task.request_id == t.request_id && task.status == TaskStatus::Pending
        }) {
            if t.steps_to_complete.contains(&task.step_key) {
                task.status = t.closed_task_status;
                task.completed_at = Some(now);
                if t.closed_task_status == TaskStatus::Completed {
                    task.completed_by = Some(t.completed_by.clone());
                }
            } else if t.cancel_remaining {
                task.status = TaskStatus::Cancelled;
                task.completed_at = Some(now);
            }
        }

        state.steps.extend(t.steps_to_open.iter().cloned());
        state.tasks.extend(t.tasks_to_open.iter().cloned());
        state.events.push(t.event.clone());
        Ok(())
    }

    async fn list_steps(&self, request_id: &Uuid) -> Result<Vec<StepInstance>, RepositoryError> {
        Ok(self
            .lock()
            .steps
            .iter()
            .filter(|s| s.request_id == *request_id)
            .cloned()
            .collect())
    }

    async fn list_tasks(&self, request_id: &Uuid) -> Result<Vec<TaskInstance>, RepositoryError> {
        Ok(self
            .lock()
            .tasks
            .iter()
            .filter(|t| t.request_id == *request_id)
            .cloned()
            .collect())
    }

    async fn list_events(&self, request_id: &Uuid) -> Result<Vec<RequestEvent>, RepositoryError> {
        Ok(self
            .lock()
            .events
            .iter()
            .filter(|e| e.request_id == *request_id)
            .cloned()
            .collect())
    }

    async fn list_open_tasks_for(
        &self,
        user_ids: &[String],
        roles: &[String],
    ) -> Result<Vec<TaskInstance>, RepositoryError> {
        Ok(self
            .lock()
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| {
                t.assignee
                    .user_id()
                    .is_some_and(|u| user_ids.iter().any(|id| id == u))
                    || t.assignee.role().is_some_and(|r| roles.iter().any(|x| x == r))
            })
            .cloned()
            .collect())
    }
}
