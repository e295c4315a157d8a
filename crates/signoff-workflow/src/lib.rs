//! Approval workflow engine
//!
//! This crate drives multi-step, multi-approver sign-off processes:
//! - Reusable templates with ordered, conditionally-skipped steps
//! - Approver resolution against an injected organizational directory
//! - An approval ledger with a per-step completeness invariant
//! - A state machine owning the instance lifecycle
//! - A periodic escalation sweep for overdue approvals
//! - An append-only audit trail of every transition
//!
//! Notification fan-out is decoupled: transitions commit first, then a
//! request is enqueued to the `signoff-notify` dispatcher.

pub mod approval;
pub mod audit;
pub mod condition;
pub mod engine;
pub mod escalation;
pub mod instance;
pub mod resolver;
pub mod template;

pub use approval::{ApprovalAction, ApprovalLedger, WorkflowApproval};
pub use audit::{AuditAction, AuditRecord, AuditTrail, InMemoryAuditTrail, TracingAuditTrail};
pub use condition::{ConditionOperator, StepCondition};
pub use engine::{
    ApprovalDecision, ApprovalOutcome, InstanceView, PendingApproval, SweepReport, WorkflowEngine,
};
pub use escalation::EscalationSweeper;
pub use instance::{InstanceStatus, StepSnapshot, WorkflowInstance};
pub use resolver::{ApproverPolicy, ApproverPolicyKind, ApproverResolver, ResolverRegistry};
pub use template::{AutoApproveRule, TemplateLibrary, WorkflowStep, WorkflowTemplate};

use signoff_core::{InstanceId, TemplateId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("template not found: {0}")]
    TemplateNotFound(TemplateId),

    #[error("template is inactive: {0}")]
    TemplateInactive(TemplateId),

    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    #[error("instance not found: {0}")]
    InstanceNotFound(InstanceId),

    #[error("no pending approval for this approver at the current step")]
    NoPendingApproval,

    #[error("instance is already {0}")]
    InvalidTransition(instance::InstanceStatus),

    #[error("delegation requires a target user")]
    DelegationTargetRequired,

    #[error("step '{0}' does not allow delegation")]
    DelegationNotAllowed(String),
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
