//! SLA deadline and escalation computation.

use chrono::{DateTime, Duration, Utc};
use flowgate_types::workflow::NodeDefinition;

use super::definition::WorkflowError;
use crate::repository::sla::SlaRepository;

/// Computes step deadlines from SLA policies.
///
/// Deadlines are plain wall-clock offsets. Nodes flagged
/// `business_hours_only` are logged and otherwise treated the same.
pub struct SlaCalculator<'a, L: SlaRepository> {
    policies: &'a L,
}

impl<'a, L: SlaRepository> SlaCalculator<'a, L> {
    pub fn new(policies: &'a L) -> Self {
        Self { policies }
    }

    /// Deadline for a step starting now, or `None` without a policy.
    pub async fn calculate_deadline(
        &self,
        service_key: &str,
        step_key: &str,
    ) -> Result<Option<DateTime<Utc>>, WorkflowError> {
        self.calculate_deadline_at(service_key, step_key, Utc::now())
            .await
    }

    /// Deadline for a step starting at `started_at`.
    pub async fn calculate_deadline_at(
        &self,
        service_key: &str,
        step_key: &str,
        started_at: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, WorkflowError> {
        let minutes = self
            .policies
            .get_step_duration_minutes(service_key, step_key)
            .await?;
        Ok(minutes.map(|m| started_at + Duration::minutes(i64::from(m))))
    }

    /// Deadline for `node`: the stored policy wins, then the node's own
    /// `sla_minutes`.
    pub async fn deadline_for_node(
        &self,
        service_key: &str,
        node: &NodeDefinition,
        started_at: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, WorkflowError> {
        if node.data.business_hours_only {
            tracing::debug!(
                step = %node.id,
                "business-hours SLA requested; using wall-clock minutes"
            );
        }
        if let Some(deadline) = self
            .calculate_deadline_at(service_key, &node.id, started_at)
            .await?
        {
            return Ok(Some(deadline));
        }
        Ok(node
            .data
            .sla_minutes
            .map(|m| started_at + Duration::minutes(i64::from(m))))
    }
}

/// When `node` escalates, if it declares `escalation_minutes`.
pub fn escalation_at(node: &NodeDefinition, started_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    node.data
        .escalation_minutes
        .map(|m| started_at + Duration::minutes(i64::from(m)))
}
