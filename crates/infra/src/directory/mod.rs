//! Read-only view of the external user store.
//!
//! The trust core never creates or edits principals; it only needs to find
//! them at login, re-check them at refresh, and resolve their station for
//! request scoping.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use precinct_auth::Principal;
use precinct_core::{OrgUnitId, PrincipalId};

pub use in_memory::InMemoryPrincipalDirectory;
pub use postgres::PostgresPrincipalDirectory;

/// A principal plus the credential material needed to authenticate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalRecord {
    pub principal: Principal,
    /// Argon2 PHC string.
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("corrupt principal record: {0}")]
    Corrupt(String),
    #[error("storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    async fn find_by_badge(&self, badge: &str) -> Result<Option<PrincipalRecord>, DirectoryError>;

    async fn find_by_id(&self, id: PrincipalId) -> Result<Option<PrincipalRecord>, DirectoryError>;

    /// Station the principal belongs to. `Ok(None)` means unscoped.
    async fn org_unit_of(&self, id: PrincipalId) -> Result<Option<OrgUnitId>, DirectoryError>;
}
