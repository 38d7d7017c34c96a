use serde::Serialize;
use thiserror::Error;

use crate::table::RolePermissionTable;
use crate::{Permission, Role};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{0}'")]
    MissingPermission(Permission),

    #[error("forbidden: role '{0}' not allowed")]
    RoleNotAllowed(Role),
}

/// Authorize a role for one permission.
///
/// - No IO
/// - No panics
/// - Deny unless the static table grants exactly `required`
pub fn authorize(role: Role, required: &Permission) -> Result<(), AuthzError> {
    if RolePermissionTable::global()
        .permissions_for(role)
        .contains(required)
    {
        Ok(())
    } else {
        Err(AuthzError::MissingPermission(required.clone()))
    }
}

/// Allow-list check for role-gated routes.
pub fn authorize_role(role: Role, allowed: &[Role]) -> Result<(), AuthzError> {
    if allowed.contains(&role) {
        Ok(())
    } else {
        Err(AuthzError::RoleNotAllowed(role))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation (Audit Trail)
// ─────────────────────────────────────────────────────────────────────────────

/// Auditable record of a permission decision.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub required_permission: String,
    pub role: Role,
    pub granted: bool,
    pub reason: String,
    pub effective_permission_count: usize,
    /// Roles that would have been granted the permission (empty when granted).
    pub suggestions: Vec<String>,
}

/// Explain why `role` is (or is not) granted `required`.
pub fn explain_authorization(role: Role, required: &Permission) -> AuthorizationExplanation {
    let table = RolePermissionTable::global();
    let effective = table.permissions_for(role);
    let granted = effective.contains(required);

    let (reason, suggestions) = if granted {
        (format!("role '{role}' grants '{required}'"), Vec::new())
    } else {
        let granting: Vec<String> = table
            .roles_granting(required)
            .into_iter()
            .map(|r| r.as_str().to_string())
            .collect();
        let suggestions = if granting.is_empty() {
            vec![format!("no role grants '{required}'; check the route's resource name")]
        } else {
            vec![format!("roles granting '{required}': {}", granting.join(", "))]
        };
        (format!("role '{role}' does not grant '{required}'"), suggestions)
    };

    AuthorizationExplanation {
        required_permission: required.as_str().to_string(),
        role,
        granted,
        reason,
        effective_permission_count: effective.len(),
        suggestions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorize_uses_the_static_table() {
        assert_eq!(authorize(Role::Admin, &Permission::new("users:delete")), Ok(()));
        assert_eq!(
            authorize(Role::Agent, &Permission::new("users:delete")),
            Err(AuthzError::MissingPermission(Permission::new("users:delete")))
        );
    }

    #[test]
    fn role_allow_list() {
        let allowed = [Role::Admin, Role::Commissaire];
        assert!(authorize_role(Role::Commissaire, &allowed).is_ok());
        assert_eq!(
            authorize_role(Role::Agent, &allowed),
            Err(AuthzError::RoleNotAllowed(Role::Agent))
        );
        assert!(authorize_role(Role::Admin, &[]).is_err());
    }

    #[test]
    fn explanation_suggests_granting_roles() {
        let e = explain_authorization(Role::Agent, &Permission::new("controles:delete"));
        assert!(!e.granted);
        assert!(e.suggestions[0].contains("admin"));
        assert!(e.suggestions[0].contains("commissaire"));
        assert!(!e.suggestions[0].contains("agent"));
    }

    #[test]
    fn explanation_for_granted_permission_has_no_suggestions() {
        let e = explain_authorization(Role::Officier, &Permission::new("incidents:update"));
        assert!(e.granted);
        assert!(e.suggestions.is_empty());
        assert!(e.effective_permission_count > 0);
    }
}
