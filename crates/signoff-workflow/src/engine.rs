//! The workflow engine state machine
//!
//! Owns instance and ledger mutation. Every instance-scoped mutation runs
//! inside that instance's mutex, so two approvers finishing the same step
//! concurrently, or an approval racing the escalation sweep, produce
//! exactly one winner; the loser observes the already-advanced state.
//! Notification fan-out is collected during the critical section and
//! enqueued only after the transition has committed.

use crate::approval::{ApprovalAction, ApprovalLedger, WorkflowApproval};
use crate::audit::{AuditAction, AuditRecord, AuditTrail, InMemoryAuditTrail};
use crate::instance::{InstanceStatus, StepSnapshot, WorkflowInstance};
use crate::resolver::ResolverRegistry;
use crate::template::{TemplateLibrary, WorkflowTemplate};
use crate::{Result, WorkflowError};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use signoff_core::{ApprovalId, EngineConfig, InstanceId, RequestData, SubjectRef, TemplateId, UserId};
use signoff_directory::DirectoryAdapter;
use signoff_notify::{NotificationRequest, NotificationStage, StagePayload};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// What an approver asks the engine to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Reject,
    Delegate,
}

/// Result of a submitted approval
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalOutcome {
    /// The step still has other pending approvals
    WaitingOnOthers { remaining: usize },
    /// The step completed and a later step was assigned
    StepAdvanced { next_step: String },
    /// The final step completed; the instance is approved
    Completed,
    /// The instance is rejected
    Rejected,
    /// The approval moved to the delegate
    Delegated { to: UserId },
}

/// Read-only snapshot of an instance and its approval history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceView {
    pub instance: WorkflowInstance,
    pub approvals: Vec<WorkflowApproval>,
}

/// One entry in an approver's work list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub instance_id: InstanceId,
    pub workflow_type: String,
    pub subject: SubjectRef,
    pub requester: UserId,
    pub step_name: String,
    pub due_date: DateTime<Utc>,
}

/// Counters from one escalation sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Approvals moved to an escalation target
    pub escalated: usize,
    /// Overdue approvals left pending because no target resolved
    pub unresolved: usize,
    /// Overdue rows skipped because the state had already moved on
    pub skipped: usize,
    /// Due-soon reminders sent
    pub reminders_sent: usize,
}

/// The approval workflow engine
pub struct WorkflowEngine {
    templates: Arc<TemplateLibrary>,
    ledger: Arc<ApprovalLedger>,
    audit: Arc<dyn AuditTrail>,
    directory: Arc<dyn DirectoryAdapter>,
    resolvers: ResolverRegistry,
    notifications: mpsc::Sender<NotificationRequest>,
    instances: DashMap<InstanceId, Arc<Mutex<WorkflowInstance>>>,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(
        directory: Arc<dyn DirectoryAdapter>,
        notifications: mpsc::Sender<NotificationRequest>,
    ) -> Self {
        Self {
            templates: Arc::new(TemplateLibrary::new()),
            ledger: Arc::new(ApprovalLedger::new()),
            audit: Arc::new(InMemoryAuditTrail::new()),
            directory,
            resolvers: ResolverRegistry::standard(),
            notifications,
            instances: DashMap::new(),
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditTrail>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_resolvers(mut self, resolvers: ResolverRegistry) -> Self {
        self.resolvers = resolvers;
        self
    }

    pub fn templates(&self) -> &Arc<TemplateLibrary> {
        &self.templates
    }

    pub fn ledger(&self) -> &Arc<ApprovalLedger> {
        &self.ledger
    }

    pub fn audit_trail(&self) -> &Arc<dyn AuditTrail> {
        &self.audit
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Lifecycle operations ─────────────────────────────────────────

    /// Start a workflow for a business subject.
    ///
    /// Finds the lowest-order step that is condition-matched and has at
    /// least one resolvable approver; steps failing either check are
    /// audited and skipped. If every step skips (or the auto-approve rule
    /// fires) the instance is approved immediately.
    pub async fn initiate(
        &self,
        template_id: &TemplateId,
        subject: SubjectRef,
        requester: UserId,
        request_data: RequestData,
    ) -> Result<InstanceId> {
        let template = self.templates.get(template_id).await?;
        if !template.active {
            return Err(WorkflowError::TemplateInactive(*template_id));
        }

        let mut instance = WorkflowInstance::new(
            template.id,
            template.workflow_type.clone(),
            subject,
            requester,
            request_data,
        );
        let instance_id = instance.id;
        let mut outbox = Vec::new();

        self.audit
            .append(
                AuditRecord::new(instance_id, AuditAction::WorkflowInitiated)
                    .with_actor(requester)
                    .with_details(serde_json::json!({
                        "template": template.name,
                        "subject": instance.subject.to_string(),
                    })),
            )
            .await;
        outbox.push(self.request(&instance, NotificationStage::WorkflowInitiated, vec![requester], None, None));

        let auto_approved = template
            .auto_approve
            .as_ref()
            .map(|rule| rule.applies(&instance.request_data))
            .unwrap_or(false);

        if auto_approved {
            instance.finish(InstanceStatus::Approved);
            self.audit
                .append(AuditRecord::new(instance_id, AuditAction::WorkflowAutoApproved))
                .await;
            outbox.push(self.request(&instance, NotificationStage::WorkflowCompleted, vec![requester], None, None));
        } else {
            match self.activate_next_step(&mut instance, &template, None).await {
                Some((snapshot, approvers)) => {
                    if snapshot.notify_approvers {
                        outbox.push(self.request(
                            &instance,
                            NotificationStage::ApprovalAssigned,
                            approvers,
                            Some(snapshot.name.clone()),
                            None,
                        ));
                    }
                }
                None => {
                    instance.finish(InstanceStatus::Approved);
                    self.audit
                        .append(
                            AuditRecord::new(instance_id, AuditAction::WorkflowCompleted)
                                .with_details(serde_json::json!({"reason": "all_steps_skipped"})),
                        )
                        .await;
                    outbox.push(self.request(&instance, NotificationStage::WorkflowCompleted, vec![requester], None, None));
                }
            }
        }

        info!(
            instance_id = %instance_id,
            workflow_type = %instance.workflow_type,
            subject = %instance.subject,
            status = %instance.status,
            "Workflow initiated"
        );

        self.instances
            .insert(instance_id, Arc::new(Mutex::new(instance)));
        self.flush(outbox);
        Ok(instance_id)
    }

    /// Apply one approver's decision to the current step.
    pub async fn submit_approval(
        &self,
        instance_id: &InstanceId,
        approver: &UserId,
        decision: ApprovalDecision,
        comments: Option<String>,
        delegate_to: Option<UserId>,
    ) -> Result<ApprovalOutcome> {
        let cell = self.instance_cell(instance_id)?;
        let mut instance = cell.lock().await;

        if instance.is_terminal() {
            return Err(WorkflowError::InvalidTransition(instance.status));
        }
        let snapshot = instance
            .current_step
            .clone()
            .ok_or(WorkflowError::NoPendingApproval)?;
        let row = self
            .ledger
            .find_pending(instance_id, snapshot.order, approver)
            .await
            .ok_or(WorkflowError::NoPendingApproval)?;

        let mut outbox = Vec::new();
        let outcome = match decision {
            ApprovalDecision::Reject => {
                self.ledger
                    .resolve(instance_id, &row.id, ApprovalAction::Rejected, comments.clone(), None)
                    .await;
                instance.finish(InstanceStatus::Rejected);

                self.audit
                    .append(
                        AuditRecord::new(*instance_id, AuditAction::ApprovalRejected)
                            .with_actor(*approver)
                            .with_step_name(snapshot.name.clone()),
                    )
                    .await;
                outbox.push(self.request(
                    &instance,
                    NotificationStage::ApprovalRejected,
                    vec![instance.requester],
                    Some(snapshot.name.clone()),
                    comments,
                ));
                ApprovalOutcome::Rejected
            }

            ApprovalDecision::Delegate => {
                let target = delegate_to.ok_or(WorkflowError::DelegationTargetRequired)?;
                if !snapshot.allow_delegation {
                    return Err(WorkflowError::DelegationNotAllowed(snapshot.name.clone()));
                }

                self.ledger
                    .resolve(
                        instance_id,
                        &row.id,
                        ApprovalAction::Delegated,
                        comments.clone(),
                        Some(target),
                    )
                    .await;
                // The delegate inherits the original due date
                self.ledger
                    .insert(WorkflowApproval::new(
                        *instance_id,
                        snapshot.order,
                        snapshot.name.clone(),
                        target,
                        row.due_date,
                    ))
                    .await;

                self.audit
                    .append(
                        AuditRecord::new(*instance_id, AuditAction::ApprovalDelegated)
                            .with_actor(*approver)
                            .with_step_name(snapshot.name.clone())
                            .with_details(serde_json::json!({"delegate_to": target.to_string()})),
                    )
                    .await;
                outbox.push(self.request(
                    &instance,
                    NotificationStage::ApprovalDelegated,
                    vec![*approver, target],
                    Some(snapshot.name.clone()),
                    comments,
                ));
                ApprovalOutcome::Delegated { to: target }
            }

            ApprovalDecision::Approve => {
                self.ledger
                    .resolve(instance_id, &row.id, ApprovalAction::Approved, comments.clone(), None)
                    .await;
                self.audit
                    .append(
                        AuditRecord::new(*instance_id, AuditAction::ApprovalGranted)
                            .with_actor(*approver)
                            .with_step_name(snapshot.name.clone()),
                    )
                    .await;

                if !self.ledger.step_complete(instance_id, snapshot.order).await {
                    let remaining = self
                        .ledger
                        .pending_for_step(instance_id, snapshot.order)
                        .await
                        .len();
                    outbox.push(self.request(
                        &instance,
                        NotificationStage::ApprovalApproved,
                        vec![instance.requester],
                        Some(snapshot.name.clone()),
                        comments,
                    ));
                    ApprovalOutcome::WaitingOnOthers { remaining }
                } else {
                    outbox.push(self.request(
                        &instance,
                        NotificationStage::StepCompleted,
                        vec![instance.requester],
                        Some(snapshot.name.clone()),
                        None,
                    ));

                    let template = self.templates.get(&instance.template_id).await?;
                    match self
                        .activate_next_step(&mut instance, &template, Some(snapshot.order))
                        .await
                    {
                        Some((next, approvers)) => {
                            if next.notify_approvers {
                                outbox.push(self.request(
                                    &instance,
                                    NotificationStage::ApprovalAssigned,
                                    approvers,
                                    Some(next.name.clone()),
                                    None,
                                ));
                            }
                            ApprovalOutcome::StepAdvanced {
                                next_step: next.name,
                            }
                        }
                        None => {
                            instance.finish(InstanceStatus::Approved);
                            self.audit
                                .append(AuditRecord::new(*instance_id, AuditAction::WorkflowCompleted))
                                .await;
                            outbox.push(self.request(
                                &instance,
                                NotificationStage::WorkflowCompleted,
                                vec![instance.requester],
                                None,
                                None,
                            ));
                            ApprovalOutcome::Completed
                        }
                    }
                }
            }
        };

        debug!(
            instance_id = %instance_id,
            approver = %approver,
            decision = ?decision,
            outcome = ?outcome,
            "Approval processed"
        );

        drop(instance);
        self.flush(outbox);
        Ok(outcome)
    }

    /// Cancel a running workflow.
    pub async fn cancel(&self, instance_id: &InstanceId, actor: &UserId) -> Result<()> {
        let cell = self.instance_cell(instance_id)?;
        let mut instance = cell.lock().await;

        if instance.is_terminal() {
            return Err(WorkflowError::InvalidTransition(instance.status));
        }

        instance.finish(InstanceStatus::Cancelled);
        self.audit
            .append(
                AuditRecord::new(*instance_id, AuditAction::WorkflowCancelled).with_actor(*actor),
            )
            .await;
        let request = self.request(
            &instance,
            NotificationStage::WorkflowCancelled,
            vec![instance.requester],
            None,
            None,
        );

        info!(instance_id = %instance_id, actor = %actor, "Workflow cancelled");

        drop(instance);
        self.flush(vec![request]);
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Status, current step, and full approval history for one instance.
    pub async fn get_instance(&self, instance_id: &InstanceId) -> Result<InstanceView> {
        let cell = self.instance_cell(instance_id)?;
        let instance = cell.lock().await.clone();
        let approvals = self.ledger.for_instance(instance_id).await;
        Ok(InstanceView {
            instance,
            approvals,
        })
    }

    /// Outstanding approvals for one approver across running instances.
    pub async fn list_pending_for(&self, approver: &UserId) -> Vec<PendingApproval> {
        let mut pending = Vec::new();
        for row in self.ledger.pending_for_approver(approver).await {
            let Some(cell) = self.instances.get(&row.instance_id).map(|c| Arc::clone(c.value())) else {
                continue;
            };
            let instance = cell.lock().await;
            if instance.is_terminal() {
                continue;
            }
            pending.push(PendingApproval {
                instance_id: row.instance_id,
                workflow_type: instance.workflow_type.clone(),
                subject: instance.subject.clone(),
                requester: instance.requester,
                step_name: row.step_name.clone(),
                due_date: row.due_date,
            });
        }
        pending
    }

    // ── Escalation ───────────────────────────────────────────────────

    /// Escalate overdue approvals and send due-soon reminders.
    ///
    /// Idempotent: an escalated row is no longer pending, so a second
    /// sweep with no intervening action finds nothing to do. Each overdue
    /// row is checked at most once per sweep, and the pending/overdue
    /// state is re-verified inside the instance's critical section before
    /// anything is written.
    pub async fn run_escalation_sweep(&self) -> SweepReport {
        let now = Utc::now();
        let mut report = SweepReport::default();
        let mut checked: HashSet<ApprovalId> = HashSet::new();

        for row in self.ledger.overdue_pending(now).await {
            if !checked.insert(row.id) {
                continue;
            }

            let Some(cell) = self.instances.get(&row.instance_id).map(|c| Arc::clone(c.value())) else {
                continue;
            };
            let instance = cell.lock().await;
            if instance.is_terminal() {
                report.skipped += 1;
                continue;
            }

            // Re-check under the lock: a concurrent approval may have
            // resolved the row between the snapshot and now.
            let still_pending = self
                .ledger
                .find_pending(&row.instance_id, row.step_order, &row.approver)
                .await
                .map(|current| current.id == row.id && current.is_overdue(now))
                .unwrap_or(false);
            if !still_pending {
                report.skipped += 1;
                continue;
            }

            match self.escalation_target(&instance, &row.approver).await {
                Some(target) => {
                    let window = self.escalation_window_hours(&instance).await;
                    self.ledger
                        .resolve(&row.instance_id, &row.id, ApprovalAction::Escalated, None, None)
                        .await;
                    self.ledger
                        .insert(WorkflowApproval::new(
                            row.instance_id,
                            row.step_order,
                            row.step_name.clone(),
                            target,
                            now + Duration::hours(window),
                        ))
                        .await;

                    self.audit
                        .append(
                            AuditRecord::new(row.instance_id, AuditAction::ApprovalEscalated)
                                .with_step_name(row.step_name.clone())
                                .with_details(serde_json::json!({
                                    "from": row.approver.to_string(),
                                    "to": target.to_string(),
                                })),
                        )
                        .await;
                    let request = self.request(
                        &instance,
                        NotificationStage::WorkflowEscalated,
                        vec![row.approver, target],
                        Some(row.step_name.clone()),
                        None,
                    );

                    info!(
                        instance_id = %row.instance_id,
                        step = %row.step_name,
                        from = %row.approver,
                        to = %target,
                        "Approval escalated"
                    );

                    drop(instance);
                    self.flush(vec![request]);
                    report.escalated += 1;
                }
                None => {
                    self.audit
                        .append(
                            AuditRecord::new(row.instance_id, AuditAction::EscalationTargetNotFound)
                                .with_step_name(row.step_name.clone())
                                .with_details(serde_json::json!({
                                    "approver": row.approver.to_string(),
                                })),
                        )
                        .await;
                    warn!(
                        instance_id = %row.instance_id,
                        step = %row.step_name,
                        approver = %row.approver,
                        "No escalation target found; approval left pending"
                    );
                    report.unresolved += 1;
                }
            }
        }

        report.reminders_sent = self.send_reminders(now).await;
        report
    }

    async fn send_reminders(&self, now: DateTime<Utc>) -> usize {
        let lead = self.config.escalation.reminder_lead_hours;
        let mut sent = 0;

        for row in self.ledger.reminder_due(now, lead).await {
            let Some(cell) = self.instances.get(&row.instance_id).map(|c| Arc::clone(c.value())) else {
                continue;
            };
            let instance = cell.lock().await;
            if instance.is_terminal() {
                continue;
            }

            self.ledger.mark_reminded(&row.instance_id, &row.id).await;
            let request = self.request(
                &instance,
                NotificationStage::ReminderPending,
                vec![row.approver],
                Some(row.step_name.clone()),
                None,
            );
            drop(instance);
            self.flush(vec![request]);
            sent += 1;
        }

        sent
    }

    /// Escalation chain: the approver's own manager, then the requester's
    /// department head, then the configured fallback role.
    async fn escalation_target(
        &self,
        instance: &WorkflowInstance,
        approver: &UserId,
    ) -> Option<UserId> {
        if let Ok(Some(manager)) = self.directory.manager_of(approver).await {
            if &manager != approver {
                return Some(manager);
            }
        }

        if let Ok(Some(department)) = self.directory.department_of(&instance.requester).await {
            if let Ok(Some(head)) = self.directory.department_head_of(&department).await {
                if &head != approver {
                    return Some(head);
                }
            }
        }

        match self
            .directory
            .users_with_role(&self.config.escalation.fallback_role)
            .await
        {
            Ok(users) => users.into_iter().find(|u| u != approver),
            Err(e) => {
                warn!(
                    role = %self.config.escalation.fallback_role,
                    error = %e,
                    "Fallback role lookup failed"
                );
                None
            }
        }
    }

    async fn escalation_window_hours(&self, instance: &WorkflowInstance) -> i64 {
        match self.templates.get(&instance.template_id).await {
            Ok(template) => template
                .escalation_window_hours
                .unwrap_or(self.config.escalation.escalation_window_hours),
            Err(_) => self.config.escalation.escalation_window_hours,
        }
    }

    // ── Internals ────────────────────────────────────────────────────

    fn instance_cell(&self, instance_id: &InstanceId) -> Result<Arc<Mutex<WorkflowInstance>>> {
        self.instances
            .get(instance_id)
            .map(|c| Arc::clone(c.value()))
            .ok_or(WorkflowError::InstanceNotFound(*instance_id))
    }

    /// Assign the next condition-matched step with a non-empty approver
    /// set, skipping (and auditing) every step that fails either check.
    async fn activate_next_step(
        &self,
        instance: &mut WorkflowInstance,
        template: &WorkflowTemplate,
        after: Option<u32>,
    ) -> Option<(StepSnapshot, Vec<UserId>)> {
        for step in template.ordered_steps() {
            if let Some(after) = after {
                if step.order <= after {
                    continue;
                }
            }

            if let Some(condition) = &step.condition {
                if !condition.matches(&instance.request_data) {
                    self.audit
                        .append(
                            AuditRecord::new(instance.id, AuditAction::StepAutoSkipped)
                                .with_step_name(step.name.clone())
                                .with_details(serde_json::json!({"reason": "condition_false"})),
                        )
                        .await;
                    continue;
                }
            }

            let approvers = self
                .resolvers
                .resolve(&step.approver_policy, instance, self.directory.as_ref())
                .await;
            if approvers.is_empty() {
                self.audit
                    .append(
                        AuditRecord::new(instance.id, AuditAction::StepAutoSkipped)
                            .with_step_name(step.name.clone())
                            .with_details(serde_json::json!({"reason": "no_approvers"})),
                    )
                    .await;
                continue;
            }

            let now = Utc::now();
            let snapshot = StepSnapshot::from_step(step, now);
            let due_date = now + Duration::hours(step.timeout_hours);
            let rows: Vec<WorkflowApproval> = approvers
                .iter()
                .map(|approver| {
                    WorkflowApproval::new(
                        instance.id,
                        step.order,
                        step.name.clone(),
                        *approver,
                        due_date,
                    )
                })
                .collect();
            self.ledger.insert_all(rows).await;
            instance.assign_step(snapshot.clone());

            self.audit
                .append(
                    AuditRecord::new(instance.id, AuditAction::StepAssigned)
                        .with_step_name(step.name.clone())
                        .with_details(serde_json::json!({"approvers": approvers.len()})),
                )
                .await;

            return Some((snapshot, approvers));
        }

        None
    }

    fn request(
        &self,
        instance: &WorkflowInstance,
        stage: NotificationStage,
        recipients: Vec<UserId>,
        step_name: Option<String>,
        comments: Option<String>,
    ) -> NotificationRequest {
        let mut payload =
            StagePayload::new(instance.workflow_type.clone(), instance.subject.to_string())
                .with_comments(comments);
        if let Some(step_name) = step_name {
            payload = payload.with_step_name(step_name);
        }
        NotificationRequest::new(instance.id, stage, recipients, payload)
    }

    /// Enqueue after commit; a full queue drops with a warning rather than
    /// blocking the caller.
    fn flush(&self, outbox: Vec<NotificationRequest>) {
        for request in outbox {
            if let Err(e) = self.notifications.try_send(request) {
                warn!(error = %e, "Notification queue full; dropping request");
            }
        }
    }
}
