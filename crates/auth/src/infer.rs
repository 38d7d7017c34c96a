//! HTTP endpoint → required permission inference.
//!
//! Pure string mapping: no IO, no routing table. The first path segment after a
//! known API prefix names the resource; the HTTP method names the action.

use thiserror::Error;

use crate::permissions::{Action, Permission};

/// Prefixes stripped before the resource segment is read, longest first.
const KNOWN_PREFIXES: [&str; 2] = ["/api/v1", "/api"];

/// Resource whose routes never require a permission (login, refresh, ...).
const AUTH_RESOURCE: &str = "auth";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InferError {
    /// The route is part of the authentication flow; callers allow it through.
    #[error("no permission required")]
    NoPermissionRequired,

    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("invalid path: {0:?}")]
    InvalidPath(String),
}

/// Infer the permission required to call `method path`.
pub fn infer_permission(method: &str, path: &str) -> Result<Permission, InferError> {
    let resource = resource_segment(path)?;

    if resource == AUTH_RESOURCE {
        return Err(InferError::NoPermissionRequired);
    }

    let action = action_for(method)?;
    Ok(Permission::of(resource, action))
}

fn resource_segment(path: &str) -> Result<&str, InferError> {
    let without_query = path.split(['?', '#']).next().unwrap_or_default();
    let mut rest = without_query.trim_end_matches('/');

    for prefix in KNOWN_PREFIXES {
        if let Some(stripped) = rest.strip_prefix(prefix) {
            if stripped.is_empty() || stripped.starts_with('/') {
                rest = stripped;
                break;
            }
        }
    }

    rest.split('/')
        .find(|segment| !segment.is_empty())
        .ok_or_else(|| InferError::InvalidPath(path.to_string()))
}

fn action_for(method: &str) -> Result<Action, InferError> {
    match method.trim().to_ascii_uppercase().as_str() {
        "GET" => Ok(Action::Read),
        "POST" => Ok(Action::Create),
        "PUT" | "PATCH" => Ok(Action::Update),
        "DELETE" => Ok(Action::Delete),
        _ => Err(InferError::UnsupportedMethod(method.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn get_collection_is_read() {
        assert_eq!(
            infer_permission("GET", "/api/v1/users").unwrap().as_str(),
            "users:read"
        );
    }

    #[test]
    fn delete_member_is_delete_on_collection() {
        assert_eq!(
            infer_permission("DELETE", "/api/v1/controles/123").unwrap().as_str(),
            "controles:delete"
        );
    }

    #[test]
    fn auth_routes_need_no_permission() {
        assert_eq!(
            infer_permission("POST", "/api/v1/auth/login"),
            Err(InferError::NoPermissionRequired)
        );
        assert_eq!(
            infer_permission("HEAD", "/api/auth/refresh"),
            Err(InferError::NoPermissionRequired)
        );
    }

    #[test]
    fn head_is_unsupported() {
        assert_eq!(
            infer_permission("HEAD", "/users"),
            Err(InferError::UnsupportedMethod("HEAD".to_string()))
        );
    }

    #[test]
    fn put_and_patch_are_updates() {
        assert_eq!(infer_permission("PUT", "/api/v1/amendes/9").unwrap().as_str(), "amendes:update");
        assert_eq!(infer_permission("patch", "/api/v1/amendes/9").unwrap().as_str(), "amendes:update");
    }

    #[test]
    fn root_and_bare_prefix_are_invalid() {
        for path in ["", "/", "/api", "/api/v1/", "//"] {
            assert!(
                matches!(infer_permission("GET", path), Err(InferError::InvalidPath(_))),
                "{path:?} should be invalid"
            );
        }
    }

    #[test]
    fn query_string_and_trailing_slash_are_ignored() {
        assert_eq!(
            infer_permission("GET", "/api/v1/incidents/?page=2").unwrap().as_str(),
            "incidents:read"
        );
    }

    #[test]
    fn unprefixed_and_lookalike_prefixes_use_first_segment() {
        assert_eq!(infer_permission("GET", "/objets/4").unwrap().as_str(), "objets:read");
        // "/apis" is not the "/api" prefix.
        assert_eq!(infer_permission("GET", "/apis/x").unwrap().as_str(), "apis:read");
    }

    proptest! {
        #[test]
        fn inferred_permission_names_first_segment(
            resource in "[a-z]{1,16}",
            id in "[0-9]{0,6}",
            method in prop::sample::select(vec!["GET", "POST", "PUT", "PATCH", "DELETE"]),
        ) {
            prop_assume!(resource != "auth" && resource != "api");
            let path = format!("/api/v1/{resource}/{id}");
            let p = infer_permission(method, &path).unwrap();
            prop_assert_eq!(p.resource(), resource.as_str());
            prop_assert!(p.action().is_some());
        }
    }
}
