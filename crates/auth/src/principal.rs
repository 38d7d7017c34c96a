use serde::{Deserialize, Serialize};

use precinct_core::{OrgUnitId, PrincipalId};

use crate::Role;

/// A user account as seen by the trust core.
///
/// Owned by the external user store; read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    pub badge: String,
    pub role: Role,
    /// Station the principal is attached to, if any.
    pub org_unit_id: Option<OrgUnitId>,
    pub active: bool,
}

impl Principal {
    pub fn new(badge: impl Into<String>, role: Role) -> Self {
        Self {
            id: PrincipalId::new(),
            badge: badge.into(),
            role,
            org_unit_id: None,
            active: true,
        }
    }

    pub fn with_org_unit(mut self, org_unit_id: OrgUnitId) -> Self {
        self.org_unit_id = Some(org_unit_id);
        self
    }

    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }
}
