use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use precinct_auth::Principal;
use precinct_core::{OrgUnitId, PrincipalId};

use super::{DirectoryError, PrincipalDirectory, PrincipalRecord};

/// In-memory principal directory.
///
/// Intended for tests/dev. Badges are matched case-insensitively.
#[derive(Debug, Default)]
pub struct InMemoryPrincipalDirectory {
    records: RwLock<HashMap<PrincipalId, PrincipalRecord>>,
    /// Ids whose org-unit lookup should fail, to exercise degraded lookups.
    unavailable: RwLock<Vec<PrincipalId>>,
}

impl InMemoryPrincipalDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, principal: Principal, password_hash: impl Into<String>) {
        let record = PrincipalRecord {
            principal,
            password_hash: password_hash.into(),
        };
        self.records.write().insert(record.principal.id, record);
    }

    /// Make `org_unit_of` fail for this principal.
    pub fn fail_lookups_for(&self, id: PrincipalId) {
        self.unavailable.write().push(id);
    }
}

#[async_trait]
impl PrincipalDirectory for InMemoryPrincipalDirectory {
    async fn find_by_badge(&self, badge: &str) -> Result<Option<PrincipalRecord>, DirectoryError> {
        let badge = badge.trim();
        Ok(self
            .records
            .read()
            .values()
            .find(|r| r.principal.badge.eq_ignore_ascii_case(badge))
            .cloned())
    }

    async fn find_by_id(&self, id: PrincipalId) -> Result<Option<PrincipalRecord>, DirectoryError> {
        Ok(self.records.read().get(&id).cloned())
    }

    async fn org_unit_of(&self, id: PrincipalId) -> Result<Option<OrgUnitId>, DirectoryError> {
        if self.unavailable.read().contains(&id) {
            return Err(DirectoryError::Storage("directory unavailable".to_string()));
        }
        Ok(self
            .records
            .read()
            .get(&id)
            .and_then(|r| r.principal.org_unit_id))
    }
}
