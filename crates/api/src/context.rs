use serde::Serialize;

use precinct_auth::{AccessClaims, Role, VerifiedCredential};
use precinct_core::{OrgUnitId, PrincipalId};

/// Organizational scope of a request.
///
/// `Unscoped` is a legitimate state (admins, or principals with no station);
/// downstream queries must treat it as "no station filter" only where the
/// caller's role allows cross-station access.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "org_unit_id", rename_all = "snake_case")]
pub enum OrgScope {
    Scoped(OrgUnitId),
    Unscoped,
}

impl OrgScope {
    pub fn org_unit_id(&self) -> Option<OrgUnitId> {
        match self {
            Self::Scoped(id) => Some(*id),
            Self::Unscoped => None,
        }
    }
}

impl From<Option<OrgUnitId>> for OrgScope {
    fn from(value: Option<OrgUnitId>) -> Self {
        value.map_or(Self::Unscoped, Self::Scoped)
    }
}

/// Authenticated caller, attached to the request by the guard.
///
/// Immutable for the lifetime of the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub principal_id: PrincipalId,
    pub badge: String,
    pub role: Role,
    pub claims: AccessClaims,
    pub org_scope: OrgScope,
}

impl RequestContext {
    pub fn new(credential: VerifiedCredential, org_scope: OrgScope) -> Self {
        Self {
            principal_id: credential.principal_id,
            badge: credential.badge,
            role: credential.role,
            claims: credential.claims,
            org_scope,
        }
    }
}

/// Context for routes that work with or without a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionalContext(pub Option<RequestContext>);

impl OptionalContext {
    pub fn get(&self) -> Option<&RequestContext> {
        self.0.as_ref()
    }
}
