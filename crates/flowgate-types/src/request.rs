//! Request execution types: the persisted step/task rows, the request itself,
//! and the transition result the engine hands back to its caller.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::{NodeKind, WorkflowDefinition};

// ---------------------------------------------------------------------------
// Statuses and actions
// ---------------------------------------------------------------------------

/// Visible status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    InProgress,
    AwaitingApproval,
    Completed,
    Rejected,
}

impl RequestStatus {
    /// Completed and rejected requests accept no further actions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Rejected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::InProgress => "in_progress",
            RequestStatus::AwaitingApproval => "awaiting_approval",
            RequestStatus::Completed => "completed",
            RequestStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "in_progress" => Ok(RequestStatus::InProgress),
            "awaiting_approval" => Ok(RequestStatus::AwaitingApproval),
            "completed" => Ok(RequestStatus::Completed),
            "rejected" => Ok(RequestStatus::Rejected),
            other => Err(format!("invalid request status: '{other}'")),
        }
    }
}

/// Action submitted against a request's current step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowAction {
    Approve,
    Reject,
    /// Administrative force-advance: ignores edge conditions.
    Complete,
}

impl fmt::Display for WorkflowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowAction::Approve => write!(f, "approve"),
            WorkflowAction::Reject => write!(f, "reject"),
            WorkflowAction::Complete => write!(f, "complete"),
        }
    }
}

impl FromStr for WorkflowAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "approve" => Ok(WorkflowAction::Approve),
            "reject" => Ok(WorkflowAction::Reject),
            "complete" => Ok(WorkflowAction::Complete),
            other => Err(format!("invalid workflow action: '{other}'")),
        }
    }
}

/// Status of a persisted step instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Active,
    Completed,
    Cancelled,
}

/// Status of a persisted task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
    Cancelled,
}

// ---------------------------------------------------------------------------
// Persisted rows
// ---------------------------------------------------------------------------

/// A request's occupancy of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepInstance {
    pub id: Uuid,
    pub request_id: Uuid,
    pub step_key: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Who owns a task: exactly one user or a whole role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Assignee {
    User { user_id: String },
    Role { role: String },
}

impl Assignee {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Assignee::User { user_id } => Some(user_id),
            Assignee::Role { .. } => None,
        }
    }

    pub fn role(&self) -> Option<&str> {
        match self {
            Assignee::User { .. } => None,
            Assignee::Role { role } => Some(role),
        }
    }
}

impl fmt::Display for Assignee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Assignee::User { user_id } => write!(f, "user:{user_id}"),
            Assignee::Role { role } => write!(f, "role:{role}"),
        }
    }
}

/// Work item for a human actor on an active step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInstance {
    pub id: Uuid,
    pub request_id: Uuid,
    pub step_key: String,
    pub assignee: Assignee,
    pub status: TaskStatus,
    /// SLA deadline, when one is configured for the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    /// Escalation time, when the node declares one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalate_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_by: Option<String>,
}

/// A request moving through a service workflow.
///
/// The request carries no scalar "current step": the set of active
/// `StepInstance` rows is its only position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRequest {
    pub id: Uuid,
    pub service_key: String,
    pub requester_id: String,
    pub status: RequestStatus,
    /// Form data the edge conditions evaluate against.
    pub data: serde_json::Value,
    /// Definition snapshot taken at creation.
    pub definition: WorkflowDefinition,
    /// Optimistic lock counter, bumped by every applied transition.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Audit log entry written with every applied transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEvent {
    pub id: Uuid,
    pub request_id: Uuid,
    pub actor: String,
    /// `start`, `approve`, `reject`, `complete`, or `force_complete`.
    pub action: String,
    pub from_steps: Vec<String>,
    pub to_steps: Vec<String>,
    pub status: RequestStatus,
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Transition results
// ---------------------------------------------------------------------------

/// A step the engine wants opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivatedStep {
    pub step_key: String,
    pub kind: NodeKind,
    /// Role token from the node data, unresolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl ActivatedStep {
    /// Child service to start when this step is a subworkflow hand-off.
    pub fn subworkflow_key(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Subworkflow { service_key } => Some(service_key),
            _ => None,
        }
    }
}

/// What the engine decided for one action. Pure data; the caller persists it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionResult {
    pub next_status: RequestStatus,
    pub active_steps_to_create: Vec<ActivatedStep>,
    pub steps_to_complete: Vec<String>,
}

impl TransitionResult {
    /// First step opened by this transition, if any.
    pub fn next_step_key(&self) -> Option<&str> {
        self.active_steps_to_create
            .first()
            .map(|s| s.step_key.as_str())
    }
}

/// A fully resolved transition, ready to be committed in one unit.
///
/// Built by the request service after every assignee and deadline has been
/// resolved; repositories apply it atomically or not at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedTransition {
    pub request_id: Uuid,
    /// Request version the transition was computed against.
    pub expected_version: i64,
    pub status: RequestStatus,
    /// Replacement form data, when the action carried new data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub steps_to_complete: Vec<String>,
    pub steps_to_open: Vec<StepInstance>,
    pub tasks_to_open: Vec<TaskInstance>,
    /// Status given to pending tasks on the completed steps: `Completed` for
    /// a normal action, `Cancelled` for a force-complete.
    pub closed_task_status: TaskStatus,
    /// Cancel every other active step and pending task. Set when the
    /// request reaches a terminal status.
    #[serde(default)]
    pub cancel_remaining: bool,
    /// Actor recorded on tasks closed by this transition.
    pub completed_by: String,
    pub event: RequestEvent,
}
