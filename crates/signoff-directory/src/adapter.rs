//! The directory lookup contract consumed by the engine

use crate::Result;
use async_trait::async_trait;
use signoff_core::UserId;

/// Read-only organizational lookups.
///
/// Implementations are injected as `Arc<dyn DirectoryAdapter>` so tests can
/// supply a fake directory. All calls are reads; the engine never writes
/// organizational data.
#[async_trait]
pub trait DirectoryAdapter: Send + Sync {
    /// The user's direct manager, if they have one
    async fn manager_of(&self, user: &UserId) -> Result<Option<UserId>>;

    /// The department a user belongs to, if known
    async fn department_of(&self, user: &UserId) -> Result<Option<String>>;

    /// The head of a department, if one is designated
    async fn department_head_of(&self, department: &str) -> Result<Option<UserId>>;

    /// All users holding a role, in stable directory order
    async fn users_with_role(&self, role: &str) -> Result<Vec<UserId>>;

    /// All users holding a role within a department, in stable directory order
    async fn users_in_department_with_role(
        &self,
        department: &str,
        role: &str,
    ) -> Result<Vec<UserId>>;
}
