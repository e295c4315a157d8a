//! In-memory directory implementation

use crate::{DirectoryAdapter, Result};
use async_trait::async_trait;
use signoff_core::UserId;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// A directory record for one user
#[derive(Debug, Clone)]
pub struct OrgUser {
    pub id: UserId,
    pub name: String,
    pub manager: Option<UserId>,
    pub department: Option<String>,
    pub roles: Vec<String>,
}

impl OrgUser {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            manager: None,
            department: None,
            roles: Vec::new(),
        }
    }

    pub fn with_manager(mut self, manager: UserId) -> Self {
        self.manager = Some(manager);
        self
    }

    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }
}

/// In-memory directory backed by user records.
///
/// Insertion order is preserved so role lookups return users in a stable
/// order, which keeps escalation target selection deterministic.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    users: RwLock<Vec<OrgUser>>,
    department_heads: RwLock<HashMap<String, UserId>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a user record
    pub async fn upsert_user(&self, user: OrgUser) {
        let mut users = self.users.write().await;
        if let Some(existing) = users.iter_mut().find(|u| u.id == user.id) {
            *existing = user;
        } else {
            users.push(user);
        }
    }

    /// Designate the head of a department
    pub async fn set_department_head(&self, department: impl Into<String>, head: UserId) {
        let mut heads = self.department_heads.write().await;
        heads.insert(department.into(), head);
    }

    pub async fn user_count(&self) -> usize {
        self.users.read().await.len()
    }
}

#[async_trait]
impl DirectoryAdapter for InMemoryDirectory {
    async fn manager_of(&self, user: &UserId) -> Result<Option<UserId>> {
        let users = self.users.read().await;
        Ok(users
            .iter()
            .find(|u| &u.id == user)
            .and_then(|u| u.manager))
    }

    async fn department_of(&self, user: &UserId) -> Result<Option<String>> {
        let users = self.users.read().await;
        Ok(users
            .iter()
            .find(|u| &u.id == user)
            .and_then(|u| u.department.clone()))
    }

    async fn department_head_of(&self, department: &str) -> Result<Option<UserId>> {
        let heads = self.department_heads.read().await;
        Ok(heads.get(department).copied())
    }

    async fn users_with_role(&self, role: &str) -> Result<Vec<UserId>> {
        let users = self.users.read().await;
        Ok(users
            .iter()
            .filter(|u| u.roles.iter().any(|r| r == role))
            .map(|u| u.id)
            .collect())
    }

    async fn users_in_department_with_role(
        &self,
        department: &str,
        role: &str,
    ) -> Result<Vec<UserId>> {
        let users = self.users.read().await;
        Ok(users
            .iter()
            .filter(|u| {
                u.department.as_deref() == Some(department)
                    && u.roles.iter().any(|r| r == role)
            })
            .map(|u| u.id)
            .collect())
    }
}
