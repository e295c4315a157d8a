//! Audit trail
//!
//! Append-only record of every state-changing action, for compliance and
//! test verification. Records are never mutated or deleted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use signoff_core::{InstanceId, UserId};
use tracing::info;
use uuid::Uuid;

/// Kinds of state-changing action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    WorkflowInitiated,
    WorkflowAutoApproved,
    StepAssigned,
    StepAutoSkipped,
    ApprovalGranted,
    ApprovalRejected,
    ApprovalDelegated,
    ApprovalEscalated,
    EscalationTargetNotFound,
    WorkflowCompleted,
    WorkflowCancelled,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::WorkflowInitiated => "workflow_initiated",
            AuditAction::WorkflowAutoApproved => "workflow_auto_approved",
            AuditAction::StepAssigned => "step_assigned",
            AuditAction::StepAutoSkipped => "step_auto_skipped",
            AuditAction::ApprovalGranted => "approval_granted",
            AuditAction::ApprovalRejected => "approval_rejected",
            AuditAction::ApprovalDelegated => "approval_delegated",
            AuditAction::ApprovalEscalated => "approval_escalated",
            AuditAction::EscalationTargetNotFound => "escalation_target_not_found",
            AuditAction::WorkflowCompleted => "workflow_completed",
            AuditAction::WorkflowCancelled => "workflow_cancelled",
        }
    }
}

/// One audit entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub instance_id: InstanceId,
    /// `None` for system actions such as escalation
    pub actor: Option<UserId>,
    pub action: AuditAction,
    /// Step name when the action concerns one step
    pub step_name: Option<String>,
    /// Structured details, action-specific
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(instance_id: InstanceId, action: AuditAction) -> Self {
        Self {
            id: format!("aud_{}", Uuid::new_v4().to_string().replace('-', "")),
            instance_id,
            actor: None,
            action,
            step_name: None,
            details: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn with_actor(mut self, actor: UserId) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn with_step_name(mut self, step_name: impl Into<String>) -> Self {
        self.step_name = Some(step_name.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Audit sink for different backends
#[async_trait]
pub trait AuditTrail: Send + Sync {
    /// Append a record. Appends never fail the calling transition.
    async fn append(&self, record: AuditRecord);

    /// All records for an instance, in append order
    async fn for_instance(&self, instance_id: &InstanceId) -> Vec<AuditRecord>;
}

/// In-memory append-only trail
#[derive(Debug, Default)]
pub struct InMemoryAuditTrail {
    records: tokio::sync::RwLock<Vec<AuditRecord>>,
}

impl InMemoryAuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<AuditRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl AuditTrail for InMemoryAuditTrail {
    async fn append(&self, record: AuditRecord) {
        self.records.write().await.push(record);
    }

    async fn for_instance(&self, instance_id: &InstanceId) -> Vec<AuditRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| &r.instance_id == instance_id)
            .cloned()
            .collect()
    }
}

/// Trail that emits records to structured logging only
#[derive(Debug, Clone, Default)]
pub struct TracingAuditTrail;

#[async_trait]
impl AuditTrail for TracingAuditTrail {
    async fn append(&self, record: AuditRecord) {
        info!(
            audit = true,
            instance_id = %record.instance_id,
            action = record.action.as_str(),
            actor = ?record.actor,
            step = ?record.step_name,
            "AUDIT: {}",
            serde_json::to_string(&record).unwrap_or_default()
        );
    }

    async fn for_instance(&self, _instance_id: &InstanceId) -> Vec<AuditRecord> {
        // Log-only backend keeps no queryable state
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_append_and_query() {
        let trail = InMemoryAuditTrail::new();
        let instance_id = InstanceId::new();
        let other = InstanceId::new();

        trail
            .append(
                AuditRecord::new(instance_id, AuditAction::WorkflowInitiated)
                    .with_actor(UserId::new()),
            )
            .await;
        trail
            .append(
                AuditRecord::new(instance_id, AuditAction::StepAssigned)
                    .with_step_name("Manager")
                    .with_details(json!({"approvers": 1})),
            )
            .await;
        trail
            .append(AuditRecord::new(other, AuditAction::WorkflowInitiated))
            .await;

        let records = trail.for_instance(&instance_id).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].action, AuditAction::WorkflowInitiated);
        assert_eq!(records[1].step_name.as_deref(), Some("Manager"));
        assert_eq!(trail.all().await.len(), 3);
    }

    #[tokio::test]
    async fn test_tracing_trail_keeps_no_state() {
        let trail = TracingAuditTrail;
        let instance_id = InstanceId::new();
        trail
            .append(AuditRecord::new(instance_id, AuditAction::WorkflowCompleted))
            .await;
        assert!(trail.for_instance(&instance_id).await.is_empty());
    }
}
