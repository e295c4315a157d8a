//! Organizational directory boundary
//!
//! The approval engine never owns organizational data. It consumes a small
//! read-only lookup interface (who manages whom, who heads a department,
//! who holds a role) and the hosting application supplies the
//! implementation. An in-memory implementation is provided for tests and
//! small deployments.

pub mod adapter;
pub mod memory;

pub use adapter::DirectoryAdapter;
pub use memory::{InMemoryDirectory, OrgUser};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory backend unavailable: {0}")]
    Unavailable(String),

    #[error("unknown user: {0}")]
    UnknownUser(String),
}

pub type Result<T> = std::result::Result<T, DirectoryError>;
