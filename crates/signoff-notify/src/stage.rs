//! Lifecycle stages and their message content

use serde::{Deserialize, Serialize};

/// A named event in the instance lifecycle.
///
/// Stages select the message template; the same stage is reused for every
/// recipient of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStage {
    WorkflowInitiated,
    ApprovalAssigned,
    ApprovalApproved,
    ApprovalRejected,
    ApprovalDelegated,
    WorkflowEscalated,
    WorkflowCompleted,
    WorkflowCancelled,
    ReminderPending,
    StepCompleted,
}

impl NotificationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStage::WorkflowInitiated => "workflow_initiated",
            NotificationStage::ApprovalAssigned => "approval_assigned",
            NotificationStage::ApprovalApproved => "approval_approved",
            NotificationStage::ApprovalRejected => "approval_rejected",
            NotificationStage::ApprovalDelegated => "approval_delegated",
            NotificationStage::WorkflowEscalated => "workflow_escalated",
            NotificationStage::WorkflowCompleted => "workflow_completed",
            NotificationStage::WorkflowCancelled => "workflow_cancelled",
            NotificationStage::ReminderPending => "reminder_pending",
            NotificationStage::StepCompleted => "step_completed",
        }
    }
}

impl std::fmt::Display for NotificationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Context used to fill a stage's message template
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagePayload {
    /// Workflow type tag, e.g. "procurement"
    pub workflow_type: String,
    /// Display form of the subject reference, e.g. "purchase_order:42"
    pub subject: String,
    /// Step name, when the stage concerns one step
    pub step_name: Option<String>,
    /// Approver comments, when the stage was caused by an approval action
    pub comments: Option<String>,
}

impl StagePayload {
    pub fn new(workflow_type: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            workflow_type: workflow_type.into(),
            subject: subject.into(),
            step_name: None,
            comments: None,
        }
    }

    pub fn with_step_name(mut self, step_name: impl Into<String>) -> Self {
        self.step_name = Some(step_name.into());
        self
    }

    pub fn with_comments(mut self, comments: Option<String>) -> Self {
        self.comments = comments;
        self
    }
}

/// Rendered message, identical across channels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent {
    pub subject: String,
    pub body: String,
}

impl MessageContent {
    /// Render the fixed template for a stage
    pub fn render(stage: NotificationStage, payload: &StagePayload) -> Self {
        let step = payload.step_name.as_deref().unwrap_or("-");
        let (subject, mut body) = match stage {
            NotificationStage::WorkflowInitiated => (
                format!("{} request submitted", payload.workflow_type),
                format!(
                    "Your {} request ({}) has been submitted for approval.",
                    payload.workflow_type, payload.subject
                ),
            ),
            NotificationStage::ApprovalAssigned => (
                format!("Approval required: {}", payload.workflow_type),
                format!(
                    "A {} request ({}) is waiting for your approval at step '{}'.",
                    payload.workflow_type, payload.subject, step
                ),
            ),
            NotificationStage::ApprovalApproved => (
                format!("Step approved: {}", step),
                format!(
                    "Step '{}' of the {} request ({}) has been approved.",
                    step, payload.workflow_type, payload.subject
                ),
            ),
            NotificationStage::ApprovalRejected => (
                format!("{} request rejected", payload.workflow_type),
                format!(
                    "Your {} request ({}) was rejected at step '{}'.",
                    payload.workflow_type, payload.subject, step
                ),
            ),
            NotificationStage::ApprovalDelegated => (
                format!("Approval delegated: {}", step),
                format!(
                    "An approval for the {} request ({}) at step '{}' has been delegated.",
                    payload.workflow_type, payload.subject, step
                ),
            ),
            NotificationStage::WorkflowEscalated => (
                format!("Approval escalated: {}", step),
                format!(
                    "An overdue approval for the {} request ({}) at step '{}' has been escalated.",
                    payload.workflow_type, payload.subject, step
                ),
            ),
            NotificationStage::WorkflowCompleted => (
                format!("{} request approved", payload.workflow_type),
                format!(
                    "Your {} request ({}) has been fully approved.",
                    payload.workflow_type, payload.subject
                ),
            ),
            NotificationStage::WorkflowCancelled => (
                format!("{} request cancelled", payload.workflow_type),
                format!(
                    "The {} request ({}) has been cancelled.",
                    payload.workflow_type, payload.subject
                ),
            ),
            NotificationStage::ReminderPending => (
                format!("Reminder: approval due soon ({})", step),
                format!(
                    "Your approval for the {} request ({}) at step '{}' is due soon.",
                    payload.workflow_type, payload.subject, step
                ),
            ),
            NotificationStage::StepCompleted => (
                format!("Step completed: {}", step),
                format!(
                    "Step '{}' of the {} request ({}) is complete; the request moved on.",
                    step, payload.workflow_type, payload.subject
                ),
            ),
        };

        if let Some(comments) = payload.comments.as_deref() {
            if !comments.is_empty() {
                body.push_str("\n\nComments: ");
                body.push_str(comments);
            }
        }

        Self { subject, body }
    }
}
