//! Workflow templates
//!
//! A template is a named, versionless definition: a workflow type tag, an
//! ordered list of steps, and policy knobs. Templates are never versioned;
//! running instances freeze each step at the moment it is reached (see
//! `instance::StepSnapshot`), so editing a template cannot disturb steps
//! already in flight.

use crate::condition::StepCondition;
use crate::resolver::ApproverPolicy;
use crate::{Result, WorkflowError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use signoff_core::{RequestData, TemplateId};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

/// One stage of a template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Position within the template; unique, processed in ascending order
    pub order: u32,
    /// Display name, e.g. "Manager Approval"
    pub name: String,
    /// Who must approve this step
    pub approver_policy: ApproverPolicy,
    /// Optional single-field condition; absent means the step always runs
    pub condition: Option<StepCondition>,
    /// Whether the step is part of the required approval chain
    pub required: bool,
    /// Hours until a pending approval at this step is overdue
    pub timeout_hours: i64,
    /// Whether approvers may hand their approval to someone else
    pub allow_delegation: bool,
    /// Whether approvers are notified on assignment
    pub notify_approvers: bool,
}

impl WorkflowStep {
    pub fn new(order: u32, name: impl Into<String>, approver_policy: ApproverPolicy) -> Self {
        Self {
            order,
            name: name.into(),
            approver_policy,
            condition: None,
            required: true,
            timeout_hours: 48,
            allow_delegation: true,
            notify_approvers: true,
        }
    }

    pub fn with_condition(mut self, condition: StepCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_timeout_hours(mut self, hours: i64) -> Self {
        self.timeout_hours = hours;
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn without_delegation(mut self) -> Self {
        self.allow_delegation = false;
        self
    }

    pub fn silent(mut self) -> Self {
        self.notify_approvers = false;
        self
    }
}

/// Auto-approval policy: requests whose `field` is below `below` skip the
/// approval chain entirely
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoApproveRule {
    pub field: String,
    pub below: f64,
}

impl AutoApproveRule {
    pub fn new(field: impl Into<String>, below: f64) -> Self {
        Self {
            field: field.into(),
            below,
        }
    }

    /// Whether the rule fires for a snapshot. Missing or non-numeric fields
    /// never auto-approve.
    pub fn applies(&self, snapshot: &RequestData) -> bool {
        snapshot
            .get(&self.field)
            .and_then(|v| match v {
                serde_json::Value::Number(n) => n.as_f64(),
                serde_json::Value::String(s) => s.parse::<f64>().ok(),
                _ => None,
            })
            .map(|amount| amount < self.below)
            .unwrap_or(false)
    }
}

/// A reusable approval process definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: TemplateId,
    pub name: String,
    /// Workflow type tag, e.g. "leave_request" or "procurement"
    pub workflow_type: String,
    /// Inactive templates cannot be instantiated
    pub active: bool,
    /// At most one template per workflow type may be the default
    pub is_default: bool,
    /// Steps in ascending `order`
    pub steps: Vec<WorkflowStep>,
    /// Skip the whole chain for small requests
    pub auto_approve: Option<AutoApproveRule>,
    /// Overrides the configured escalation window when set
    pub escalation_window_hours: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowTemplate {
    pub fn new(name: impl Into<String>, workflow_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: TemplateId::new(),
            name: name.into(),
            workflow_type: workflow_type.into(),
            active: true,
            is_default: false,
            steps: Vec::new(),
            auto_approve: None,
            escalation_window_hours: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn add_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn with_auto_approve(mut self, rule: AutoApproveRule) -> Self {
        self.auto_approve = Some(rule);
        self
    }

    pub fn with_escalation_window_hours(mut self, hours: i64) -> Self {
        self.escalation_window_hours = Some(hours);
        self
    }

    /// Steps sorted by order, ready for sequential traversal
    pub fn ordered_steps(&self) -> Vec<&WorkflowStep> {
        let mut steps: Vec<&WorkflowStep> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.order);
        steps
    }

    /// Validate the step list
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(WorkflowError::InvalidTemplate(
                "template has no steps".to_string(),
            ));
        }

        let mut orders: Vec<u32> = self.steps.iter().map(|s| s.order).collect();
        orders.sort_unstable();
        orders.dedup();
        if orders.len() != self.steps.len() {
            return Err(WorkflowError::InvalidTemplate(
                "step orders must be unique within a template".to_string(),
            ));
        }

        if let Some(step) = self.steps.iter().find(|s| s.timeout_hours < 0) {
            return Err(WorkflowError::InvalidTemplate(format!(
                "step '{}' has a negative timeout",
                step.name
            )));
        }

        Ok(())
    }
}

/// Registry of templates, keyed by id, with default-per-type lookup
#[derive(Debug, Default)]
pub struct TemplateLibrary {
    templates: RwLock<HashMap<TemplateId, WorkflowTemplate>>,
}

impl TemplateLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template after validation.
    ///
    /// Rejects a second default for the same workflow type; demote the old
    /// default first.
    pub async fn register(&self, template: WorkflowTemplate) -> Result<TemplateId> {
        template.validate()?;

        let mut templates = self.templates.write().await;

        if template.is_default {
            let clash = templates.values().any(|t| {
                t.workflow_type == template.workflow_type && t.is_default && t.id != template.id
            });
            if clash {
                return Err(WorkflowError::InvalidTemplate(format!(
                    "workflow type '{}' already has a default template",
                    template.workflow_type
                )));
            }
        }

        let id = template.id;
        info!(
            template_id = %id,
            workflow_type = %template.workflow_type,
            steps = template.steps.len(),
            "Template registered"
        );
        templates.insert(id, template);
        Ok(id)
    }

    pub async fn get(&self, id: &TemplateId) -> Result<WorkflowTemplate> {
        let templates = self.templates.read().await;
        templates
            .get(id)
            .cloned()
            .ok_or(WorkflowError::TemplateNotFound(*id))
    }

    /// The default template for a workflow type, if one is registered
    pub async fn default_for_type(&self, workflow_type: &str) -> Option<WorkflowTemplate> {
        let templates = self.templates.read().await;
        templates
            .values()
            .find(|t| t.workflow_type == workflow_type && t.is_default)
            .cloned()
    }

    pub async fn list(&self) -> Vec<WorkflowTemplate> {
        let templates = self.templates.read().await;
        templates.values().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.templates.read().await.len()
    }
}
