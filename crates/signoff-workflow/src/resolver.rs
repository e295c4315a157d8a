//! Approver resolution
//!
//! Each step names an approver policy; a small resolver per policy variant
//! turns it into a concrete set of users via the directory. Resolvers are
//! registered in a lookup table rather than matched inline, so a deployment
//! can override or extend the set without touching the engine.

use crate::instance::WorkflowInstance;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use signoff_core::UserId;
use signoff_directory::DirectoryAdapter;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Who must approve a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApproverPolicy {
    /// The requester's direct manager
    DirectManager,
    /// The head of the requester's department
    DepartmentHead,
    /// Every user holding the named role
    RoleBased { role: String },
    /// Exactly one named user
    SpecificUser { user: UserId },
    /// Managers of the Finance department
    FinanceManager,
    /// Managers of the HR department
    HrManager,
    /// Managers of the IT department
    ItManager,
    /// Managers of the Procurement department
    ProcurementManager,
    /// Country directors, department-independent
    CountryDirector,
}

impl ApproverPolicy {
    pub fn kind(&self) -> ApproverPolicyKind {
        match self {
            ApproverPolicy::DirectManager => ApproverPolicyKind::DirectManager,
            ApproverPolicy::DepartmentHead => ApproverPolicyKind::DepartmentHead,
            ApproverPolicy::RoleBased { .. } => ApproverPolicyKind::RoleBased,
            ApproverPolicy::SpecificUser { .. } => ApproverPolicyKind::SpecificUser,
            ApproverPolicy::FinanceManager => ApproverPolicyKind::FinanceManager,
            ApproverPolicy::HrManager => ApproverPolicyKind::HrManager,
            ApproverPolicy::ItManager => ApproverPolicyKind::ItManager,
            ApproverPolicy::ProcurementManager => ApproverPolicyKind::ProcurementManager,
            ApproverPolicy::CountryDirector => ApproverPolicyKind::CountryDirector,
        }
    }
}

/// Discriminant used as the registry key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproverPolicyKind {
    DirectManager,
    DepartmentHead,
    RoleBased,
    SpecificUser,
    FinanceManager,
    HrManager,
    ItManager,
    ProcurementManager,
    CountryDirector,
}

/// One resolution strategy.
///
/// Directory failures resolve to the empty set with a warning; the engine's
/// zero-approver auto-skip keeps the workflow moving.
#[async_trait]
pub trait ApproverResolver: Send + Sync {
    async fn resolve(
        &self,
        policy: &ApproverPolicy,
        instance: &WorkflowInstance,
        directory: &dyn DirectoryAdapter,
    ) -> Vec<UserId>;
}

struct DirectManagerResolver;

#[async_trait]
impl ApproverResolver for DirectManagerResolver {
    async fn resolve(
        &self,
        _policy: &ApproverPolicy,
        instance: &WorkflowInstance,
        directory: &dyn DirectoryAdapter,
    ) -> Vec<UserId> {
        match directory.manager_of(&instance.requester).await {
            Ok(Some(manager)) => vec![manager],
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(requester = %instance.requester, error = %e, "Manager lookup failed");
                Vec::new()
            }
        }
    }
}

struct DepartmentHeadResolver;

#[async_trait]
impl ApproverResolver for DepartmentHeadResolver {
    async fn resolve(
        &self,
        _policy: &ApproverPolicy,
        instance: &WorkflowInstance,
        directory: &dyn DirectoryAdapter,
    ) -> Vec<UserId> {
        let department = match directory.department_of(&instance.requester).await {
            Ok(Some(department)) => department,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(requester = %instance.requester, error = %e, "Department lookup failed");
                return Vec::new();
            }
        };

        match directory.department_head_of(&department).await {
            Ok(Some(head)) => vec![head],
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(department = %department, error = %e, "Department head lookup failed");
                Vec::new()
            }
        }
    }
}

struct RoleResolver;

#[async_trait]
impl ApproverResolver for RoleResolver {
    async fn resolve(
        &self,
        policy: &ApproverPolicy,
        _instance: &WorkflowInstance,
        directory: &dyn DirectoryAdapter,
    ) -> Vec<UserId> {
        let ApproverPolicy::RoleBased { role } = policy else {
            return Vec::new();
        };

        match directory.users_with_role(role).await {
            Ok(users) => users,
            Err(e) => {
                warn!(role = %role, error = %e, "Role lookup failed");
                Vec::new()
            }
        }
    }
}

struct SpecificUserResolver;

#[async_trait]
impl ApproverResolver for SpecificUserResolver {
    async fn resolve(
        &self,
        policy: &ApproverPolicy,
        _instance: &WorkflowInstance,
        _directory: &dyn DirectoryAdapter,
    ) -> Vec<UserId> {
        match policy {
            ApproverPolicy::SpecificUser { user } => vec![*user],
            _ => Vec::new(),
        }
    }
}

/// Fixed organizational role: managers of one department, or a
/// department-independent role
struct OrgRoleResolver {
    department: Option<&'static str>,
    role: &'static str,
}

#[async_trait]
impl ApproverResolver for OrgRoleResolver {
    async fn resolve(
        &self,
        _policy: &ApproverPolicy,
        _instance: &WorkflowInstance,
        directory: &dyn DirectoryAdapter,
    ) -> Vec<UserId> {
        let result = match self.department {
            Some(department) => {
                directory
                    .users_in_department_with_role(department, self.role)
                    .await
            }
            None => directory.users_with_role(self.role).await,
        };

        match result {
            Ok(users) => users,
            Err(e) => {
                warn!(
                    department = ?self.department,
                    role = %self.role,
                    error = %e,
                    "Organizational role lookup failed"
                );
                Vec::new()
            }
        }
    }
}

/// Lookup table from policy kind to resolver implementation
pub struct ResolverRegistry {
    table: HashMap<ApproverPolicyKind, Arc<dyn ApproverResolver>>,
}

impl ResolverRegistry {
    /// The standard policy set
    pub fn standard() -> Self {
        let mut registry = Self {
            table: HashMap::new(),
        };

        registry.register(ApproverPolicyKind::DirectManager, Arc::new(DirectManagerResolver));
        registry.register(ApproverPolicyKind::DepartmentHead, Arc::new(DepartmentHeadResolver));
        registry.register(ApproverPolicyKind::RoleBased, Arc::new(RoleResolver));
        registry.register(ApproverPolicyKind::SpecificUser, Arc::new(SpecificUserResolver));
        registry.register(
            ApproverPolicyKind::FinanceManager,
            Arc::new(OrgRoleResolver {
                department: Some("Finance"),
                role: "manager",
            }),
        );
        registry.register(
            ApproverPolicyKind::HrManager,
            Arc::new(OrgRoleResolver {
                department: Some("HR"),
                role: "manager",
            }),
        );
        registry.register(
            ApproverPolicyKind::ItManager,
            Arc::new(OrgRoleResolver {
                department: Some("IT"),
                role: "manager",
            }),
        );
        registry.register(
            ApproverPolicyKind::ProcurementManager,
            Arc::new(OrgRoleResolver {
                department: Some("Procurement"),
                role: "manager",
            }),
        );
        registry.register(
            ApproverPolicyKind::CountryDirector,
            Arc::new(OrgRoleResolver {
                department: None,
                role: "country_director",
            }),
        );

        registry
    }

    /// Register or replace the resolver for a policy kind
    pub fn register(&mut self, kind: ApproverPolicyKind, resolver: Arc<dyn ApproverResolver>) {
        self.table.insert(kind, resolver);
    }

    /// Resolve a policy to its approver set. An unregistered policy kind
    /// resolves to the empty set, which the engine treats as an auto-skip.
    pub async fn resolve(
        &self,
        policy: &ApproverPolicy,
        instance: &WorkflowInstance,
        directory: &dyn DirectoryAdapter,
    ) -> Vec<UserId> {
        match self.table.get(&policy.kind()) {
            Some(resolver) => resolver.resolve(policy, instance, directory).await,
            None => {
                warn!(kind = ?policy.kind(), "No resolver registered for approver policy");
                Vec::new()
            }
        }
    }
}

impl Default for ResolverRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signoff_core::{SubjectRef, TemplateId};
    use signoff_directory::{InMemoryDirectory, OrgUser};

    fn make_instance(requester: UserId) -> WorkflowInstance {
        WorkflowInstance::new(
            TemplateId::new(),
            "procurement",
            SubjectRef::new("purchase_order", "1"),
            requester,
            Default::default(),
        )
    }

    async fn seeded_directory() -> (InMemoryDirectory, UserId, UserId, UserId) {
        let directory = InMemoryDirectory::new();
        let requester = UserId::new();
        let manager = UserId::new();
        let finance_manager = UserId::new();

        directory.upsert_user(OrgUser::new(manager, "Manager")).await;
        directory
            .upsert_user(
                OrgUser::new(requester, "Requester")
                    .with_manager(manager)
                    .with_department("IT"),
            )
            .await;
        directory
            .upsert_user(
                OrgUser::new(finance_manager, "Finance Manager")
                    .with_department("Finance")
                    .with_role("manager"),
            )
            .await;

        (directory, requester, manager, finance_manager)
    }

    #[tokio::test]
    async fn test_direct_manager() {
        let (directory, requester, manager, _) = seeded_directory().await;
        let registry = ResolverRegistry::standard();
        let instance = make_instance(requester);

        let approvers = registry
            .resolve(&ApproverPolicy::DirectManager, &instance, &directory)
            .await;
        assert_eq!(approvers, vec![manager]);
    }

    #[tokio::test]
    async fn test_direct_manager_absent() {
        let (directory, _, manager, _) = seeded_directory().await;
        let registry = ResolverRegistry::standard();
        // The manager has no manager of their own
        let instance = make_instance(manager);

        let approvers = registry
            .resolve(&ApproverPolicy::DirectManager, &instance, &directory)
            .await;
        assert!(approvers.is_empty());
    }

    #[tokio::test]
    async fn test_department_head() {
        let (directory, requester, _, _) = seeded_directory().await;
        let head = UserId::new();
        directory.upsert_user(OrgUser::new(head, "IT Head")).await;
        directory.set_department_head("IT", head).await;

        let registry = ResolverRegistry::standard();
        let instance = make_instance(requester);

        let approvers = registry
            .resolve(&ApproverPolicy::DepartmentHead, &instance, &directory)
            .await;
        assert_eq!(approvers, vec![head]);
    }

    #[tokio::test]
    async fn test_role_based() {
        let (directory, requester, _, _) = seeded_directory().await;
        let auditor = UserId::new();
        directory
            .upsert_user(OrgUser::new(auditor, "Auditor").with_role("auditor"))
            .await;

        let registry = ResolverRegistry::standard();
        let instance = make_instance(requester);

        let approvers = registry
            .resolve(
                &ApproverPolicy::RoleBased {
                    role: "auditor".to_string(),
                },
                &instance,
                &directory,
            )
            .await;
        assert_eq!(approvers, vec![auditor]);
    }

    #[tokio::test]
    async fn test_specific_user() {
        let (directory, requester, _, _) = seeded_directory().await;
        let registry = ResolverRegistry::standard();
        let instance = make_instance(requester);
        let named = UserId::new();

        let approvers = registry
            .resolve(
                &ApproverPolicy::SpecificUser { user: named },
                &instance,
                &directory,
            )
            .await;
        assert_eq!(approvers, vec![named]);
    }

    #[tokio::test]
    async fn test_finance_manager() {
        let (directory, requester, _, finance_manager) = seeded_directory().await;
        let registry = ResolverRegistry::standard();
        let instance = make_instance(requester);

        let approvers = registry
            .resolve(&ApproverPolicy::FinanceManager, &instance, &directory)
            .await;
        assert_eq!(approvers, vec![finance_manager]);
    }

    #[tokio::test]
    async fn test_country_director_ignores_department() {
        let (directory, requester, _, _) = seeded_directory().await;
        let director = UserId::new();
        directory
            .upsert_user(
                OrgUser::new(director, "Director")
                    .with_department("Management")
                    .with_role("country_director"),
            )
            .await;

        let registry = ResolverRegistry::standard();
        let instance = make_instance(requester);

        let approvers = registry
            .resolve(&ApproverPolicy::CountryDirector, &instance, &directory)
            .await;
        assert_eq!(approvers, vec![director]);
    }
}
