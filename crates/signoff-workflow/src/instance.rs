//! Workflow instances
//!
//! One running execution of a template against a business subject. The
//! engine is the only writer; once a terminal status is reached the
//! instance is immutable apart from audit appends.

use crate::template::WorkflowStep;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use signoff_core::{InstanceId, RequestData, SubjectRef, TemplateId, UserId};

/// Instance lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    InProgress,
    Approved,
    Rejected,
    Cancelled,
}

impl InstanceStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InstanceStatus::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::InProgress => "in_progress",
            InstanceStatus::Approved => "approved",
            InstanceStatus::Rejected => "rejected",
            InstanceStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The step definition frozen at the moment the step was reached.
///
/// Templates stay versionless: editing a template changes future
/// assignments, never a step already in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub order: u32,
    pub name: String,
    pub required: bool,
    pub timeout_hours: i64,
    pub allow_delegation: bool,
    pub notify_approvers: bool,
    /// When this step was reached
    pub assigned_at: DateTime<Utc>,
}

impl StepSnapshot {
    pub fn from_step(step: &WorkflowStep, assigned_at: DateTime<Utc>) -> Self {
        Self {
            order: step.order,
            name: step.name.clone(),
            required: step.required,
            timeout_hours: step.timeout_hours,
            allow_delegation: step.allow_delegation,
            notify_approvers: step.notify_approvers,
            assigned_at,
        }
    }
}

/// One running approval process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: InstanceId,
    pub template_id: TemplateId,
    pub workflow_type: String,
    /// The business object this process belongs to; never dereferenced here
    pub subject: SubjectRef,
    pub requester: UserId,
    pub status: InstanceStatus,
    /// The step currently awaiting approvals, frozen at assignment time
    pub current_step: Option<StepSnapshot>,
    /// Frozen request data; conditions read this, never the live object
    pub request_data: RequestData,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowInstance {
    pub fn new(
        template_id: TemplateId,
        workflow_type: impl Into<String>,
        subject: SubjectRef,
        requester: UserId,
        request_data: RequestData,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: InstanceId::new(),
            template_id,
            workflow_type: workflow_type.into(),
            subject,
            requester,
            status: InstanceStatus::InProgress,
            current_step: None,
            request_data,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Order of the current step, if one is assigned
    pub fn current_order(&self) -> Option<u32> {
        self.current_step.as_ref().map(|s| s.order)
    }

    /// Move to a later step. Step order only ever increases.
    pub fn assign_step(&mut self, snapshot: StepSnapshot) {
        debug_assert!(
            self.current_order().map_or(true, |o| snapshot.order > o),
            "step order must be strictly increasing"
        );
        self.current_step = Some(snapshot);
        self.updated_at = Utc::now();
    }

    /// Enter a terminal status. May be called once.
    pub fn finish(&mut self, status: InstanceStatus) {
        debug_assert!(status.is_terminal());
        debug_assert!(!self.is_terminal(), "instance already terminal");
        let now = Utc::now();
        self.status = status;
        self.current_step = None;
        self.updated_at = now;
        self.completed_at = Some(now);
    }
}
