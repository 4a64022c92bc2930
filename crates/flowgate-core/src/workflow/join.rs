//! Join synchronization: decides whether a join node may open.

use uuid::Uuid;

use super::definition::WorkflowError;
use super::graph::CompiledWorkflow;
use crate::repository::request::StepRepository;

/// Checks join readiness against the persisted step rows of one request.
///
/// A join is ready when every predecessor (the source of every edge into
/// it) has a completed step instance, except the predecessor currently
/// completing, whose completion is not yet committed.
///
/// The check is a plain read. Two branches finishing at the same time can
/// both see their sibling as still active and both decline to open the
/// join; callers must serialize transitions per request to avoid that.
pub struct JoinSynchronizer<'a, S: StepRepository> {
    steps: &'a S,
}

impl<'a, S: StepRepository> JoinSynchronizer<'a, S> {
    pub fn new(steps: &'a S) -> Self {
        Self { steps }
    }

    /// Whether `join_node_id` may open for `request_id`.
    ///
    /// Returns `true` when the join has no predecessors besides the
    /// excluded one.
    pub async fn is_join_ready(
        &self,
        request_id: &Uuid,
        join_node_id: &str,
        workflow: &CompiledWorkflow,
        exclude_step_key: Option<&str>,
    ) -> Result<bool, WorkflowError> {
        let required: Vec<String> = workflow
            .predecessors(join_node_id)
            .into_iter()
            .filter(|source| Some(*source) != exclude_step_key)
            .map(str::to_string)
            .collect();
        if required.is_empty() {
            return Ok(true);
        }

        let completed = self
            .steps
            .list_completed_steps(request_id, &required)
            .await?;
        let waiting: Vec<&str> = required
            .iter()
            .filter(|key| !completed.contains(*key))
            .map(String::as_str)
            .collect();

        if waiting.is_empty() {
            Ok(true)
        } else {
            tracing::debug!(
                %request_id,
                join = join_node_id,
                waiting = ?waiting,
                "join not ready"
            );
            Ok(false)
        }
    }
}
