//! Approval records and the ledger invariants
//!
//! One row per (instance, step, approver). The rows with `Pending` action
//! are the outstanding work for a step; a step is complete when no pending
//! rows remain and none was rejected. The engine mutates the ledger only
//! inside an instance's critical section.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use signoff_core::{ApprovalId, InstanceId, UserId};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// The state of one approver's decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    Pending,
    Approved,
    Rejected,
    Delegated,
    Escalated,
}

impl ApprovalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalAction::Pending => "pending",
            ApprovalAction::Approved => "approved",
            ApprovalAction::Rejected => "rejected",
            ApprovalAction::Delegated => "delegated",
            ApprovalAction::Escalated => "escalated",
        }
    }
}

impl std::fmt::Display for ApprovalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One approver's outstanding or completed decision for one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowApproval {
    pub id: ApprovalId,
    pub instance_id: InstanceId,
    pub step_order: u32,
    pub step_name: String,
    pub approver: UserId,
    pub action: ApprovalAction,
    pub comments: Option<String>,
    /// Set when the row was resolved by delegation
    pub delegate_to: Option<UserId>,
    pub assigned_at: DateTime<Utc>,
    pub acted_at: Option<DateTime<Utc>>,
    pub due_date: DateTime<Utc>,
    /// A due-soon reminder has been sent for this row
    pub reminded: bool,
}

impl WorkflowApproval {
    pub fn new(
        instance_id: InstanceId,
        step_order: u32,
        step_name: impl Into<String>,
        approver: UserId,
        due_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ApprovalId::new(),
            instance_id,
            step_order,
            step_name: step_name.into(),
            approver,
            action: ApprovalAction::Pending,
            comments: None,
            delegate_to: None,
            assigned_at: Utc::now(),
            acted_at: None,
            due_date,
            reminded: false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.action == ApprovalAction::Pending
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.due_date < now
    }
}

/// All approval rows, indexed by instance
#[derive(Debug, Default)]
pub struct ApprovalLedger {
    by_instance: RwLock<HashMap<InstanceId, Vec<WorkflowApproval>>>,
}

impl ApprovalLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new row
    pub async fn insert(&self, approval: WorkflowApproval) {
        let mut rows = self.by_instance.write().await;
        rows.entry(approval.instance_id).or_default().push(approval);
    }

    /// Append a batch of rows for one step assignment
    pub async fn insert_all(&self, approvals: Vec<WorkflowApproval>) {
        let mut rows = self.by_instance.write().await;
        for approval in approvals {
            rows.entry(approval.instance_id).or_default().push(approval);
        }
    }

    /// The pending row for (instance, step, approver), if any
    pub async fn find_pending(
        &self,
        instance_id: &InstanceId,
        step_order: u32,
        approver: &UserId,
    ) -> Option<WorkflowApproval> {
        let rows = self.by_instance.read().await;
        rows.get(instance_id)?
            .iter()
            .find(|a| a.step_order == step_order && &a.approver == approver && a.is_pending())
            .cloned()
    }

    /// Resolve a pending row with a final action. Returns the updated row,
    /// or `None` if the row no longer exists or is no longer pending;
    /// callers treat that as losing the race.
    pub async fn resolve(
        &self,
        instance_id: &InstanceId,
        approval_id: &ApprovalId,
        action: ApprovalAction,
        comments: Option<String>,
        delegate_to: Option<UserId>,
    ) -> Option<WorkflowApproval> {
        let mut rows = self.by_instance.write().await;
        let row = rows
            .get_mut(instance_id)?
            .iter_mut()
            .find(|a| &a.id == approval_id && a.is_pending())?;

        row.action = action;
        row.comments = comments;
        row.delegate_to = delegate_to;
        row.acted_at = Some(Utc::now());
        Some(row.clone())
    }

    /// Mark a row as reminded so the sweep sends at most one reminder
    pub async fn mark_reminded(&self, instance_id: &InstanceId, approval_id: &ApprovalId) {
        let mut rows = self.by_instance.write().await;
        if let Some(row) = rows
            .get_mut(instance_id)
            .and_then(|r| r.iter_mut().find(|a| &a.id == approval_id))
        {
            row.reminded = true;
        }
    }

    /// Pending rows for one step
    pub async fn pending_for_step(
        &self,
        instance_id: &InstanceId,
        step_order: u32,
    ) -> Vec<WorkflowApproval> {
        let rows = self.by_instance.read().await;
        rows.get(instance_id)
            .map(|r| {
                r.iter()
                    .filter(|a| a.step_order == step_order && a.is_pending())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// A step is complete when it has no pending rows and no rejected row
    pub async fn step_complete(&self, instance_id: &InstanceId, step_order: u32) -> bool {
        let rows = self.by_instance.read().await;
        match rows.get(instance_id) {
            Some(r) => !r.iter().any(|a| {
                a.step_order == step_order
                    && (a.is_pending() || a.action == ApprovalAction::Rejected)
            }),
            None => true,
        }
    }

    /// All rows for an instance, in assignment order
    pub async fn for_instance(&self, instance_id: &InstanceId) -> Vec<WorkflowApproval> {
        let rows = self.by_instance.read().await;
        rows.get(instance_id).cloned().unwrap_or_default()
    }

    /// Pending rows assigned to one approver, across all instances
    pub async fn pending_for_approver(&self, approver: &UserId) -> Vec<WorkflowApproval> {
        let rows = self.by_instance.read().await;
        rows.values()
            .flatten()
            .filter(|a| &a.approver == approver && a.is_pending())
            .cloned()
            .collect()
    }

    /// Pending rows past their due date
    pub async fn overdue_pending(&self, now: DateTime<Utc>) -> Vec<WorkflowApproval> {
        let rows = self.by_instance.read().await;
        rows.values()
            .flatten()
            .filter(|a| a.is_overdue(now))
            .cloned()
            .collect()
    }

    /// Pending, un-reminded rows entering the reminder window
    pub async fn reminder_due(
        &self,
        now: DateTime<Utc>,
        lead_hours: i64,
    ) -> Vec<WorkflowApproval> {
        let horizon = now + Duration::hours(lead_hours);
        let rows = self.by_instance.read().await;
        rows.values()
            .flatten()
            .filter(|a| a.is_pending() && !a.reminded && a.due_date >= now && a.due_date <= horizon)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(instance_id: InstanceId, step_order: u32, due_in_hours: i64) -> WorkflowApproval {
        WorkflowApproval::new(
            instance_id,
            step_order,
            "Step",
            UserId::new(),
            Utc::now() + Duration::hours(due_in_hours),
        )
    }

    #[tokio::test]
    async fn test_find_and_resolve_pending() {
        let ledger = ApprovalLedger::new();
        let instance_id = InstanceId::new();
        let approval = row(instance_id, 1, 48);
        let approver = approval.approver;
        let approval_id = approval.id;
        ledger.insert(approval).await;

        let found = ledger.find_pending(&instance_id, 1, &approver).await;
        assert!(found.is_some());

        let resolved = ledger
            .resolve(
                &instance_id,
                &approval_id,
                ApprovalAction::Approved,
                Some("ok".to_string()),
                None,
            )
            .await
            .unwrap();
        assert_eq!(resolved.action, ApprovalAction::Approved);
        assert!(resolved.acted_at.is_some());

        // The row is no longer pending, so both lookups miss
        assert!(ledger.find_pending(&instance_id, 1, &approver).await.is_none());
        assert!(ledger
            .resolve(&instance_id, &approval_id, ApprovalAction::Approved, None, None)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_step_completeness_invariant() {
        let ledger = ApprovalLedger::new();
        let instance_id = InstanceId::new();
        let a = row(instance_id, 1, 48);
        let b = row(instance_id, 1, 48);
        let (a_id, b_id) = (a.id, b.id);
        ledger.insert_all(vec![a, b]).await;

        assert!(!ledger.step_complete(&instance_id, 1).await);

        ledger
            .resolve(&instance_id, &a_id, ApprovalAction::Approved, None, None)
            .await
            .unwrap();
        assert!(!ledger.step_complete(&instance_id, 1).await);

        ledger
            .resolve(&instance_id, &b_id, ApprovalAction::Approved, None, None)
            .await
            .unwrap();
        assert!(ledger.step_complete(&instance_id, 1).await);
    }

    #[tokio::test]
    async fn test_rejected_step_never_complete() {
        let ledger = ApprovalLedger::new();
        let instance_id = InstanceId::new();
        let a = row(instance_id, 1, 48);
        let a_id = a.id;
        ledger.insert(a).await;

        ledger
            .resolve(&instance_id, &a_id, ApprovalAction::Rejected, None, None)
            .await
            .unwrap();
        assert!(!ledger.step_complete(&instance_id, 1).await);
    }

    #[tokio::test]
    async fn test_overdue_pending() {
        let ledger = ApprovalLedger::new();
        let instance_id = InstanceId::new();
        ledger.insert(row(instance_id, 1, -2)).await; // overdue
        ledger.insert(row(instance_id, 1, 48)).await; // not due yet

        let overdue = ledger.overdue_pending(Utc::now()).await;
        assert_eq!(overdue.len(), 1);
    }

    #[tokio::test]
    async fn test_reminder_window() {
        let ledger = ApprovalLedger::new();
        let instance_id = InstanceId::new();
        let soon = row(instance_id, 1, 2);
        let soon_id = soon.id;
        ledger.insert(soon).await;
        ledger.insert(row(instance_id, 1, 100)).await; // far in the future

        let due = ledger.reminder_due(Utc::now(), 4).await;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, soon_id);

        ledger.mark_reminded(&instance_id, &soon_id).await;
        assert!(ledger.reminder_due(Utc::now(), 4).await.is_empty());
    }

    #[tokio::test]
    async fn test_pending_for_approver() {
        let ledger = ApprovalLedger::new();
        let approver = UserId::new();
        let instance_a = InstanceId::new();
        let instance_b = InstanceId::new();

        let mut first = row(instance_a, 1, 48);
        first.approver = approver;
        let mut second = row(instance_b, 2, 48);
        second.approver = approver;
        ledger.insert_all(vec![first, second]).await;
        ledger.insert(row(instance_a, 1, 48)).await; // someone else

        let pending = ledger.pending_for_approver(&approver).await;
        assert_eq!(pending.len(), 2);
    }
}
