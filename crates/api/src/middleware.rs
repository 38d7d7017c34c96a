//! Request guard: the per-request trust pipeline.
//!
//! Extraction -> verification -> context enrichment -> authorization, each
//! step short-circuiting. [`Guard::evaluate`] holds the whole decision and is
//! framework-agnostic; [`guard_middleware`] adapts it to axum and does the
//! denial logging.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, OriginalUri, Request, State},
    http::{HeaderMap, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{debug, info, warn};

use precinct_auth::{
    authorize, authorize_role, infer_permission, CredentialError, CredentialVerifier, InferError,
    Role,
};
use precinct_infra::PrincipalDirectory;

use crate::app::errors::json_error;
use crate::context::{OptionalContext, OrgScope, RequestContext};

/// Route prefixes that bypass the guard entirely.
pub const DEFAULT_SKIPPABLE: [&str; 3] = ["/health", "/api/v1/auth/login", "/api/v1/auth/refresh"];

/// What a guarded route demands of its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// Any valid credential.
    Authenticated,
    /// Valid credential whose role is in the allow-list.
    Roles(Vec<Role>),
    /// Valid credential whose role grants the permission inferred from method + path.
    Permission,
    /// Context is attached when a valid credential is present; never rejects.
    Optional,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardRejection {
    #[error("missing bearer credential")]
    MissingCredential,

    #[error("credential rejected: {0}")]
    InvalidCredential(CredentialError),

    #[error("role '{role}' lacks '{required}'")]
    Forbidden { role: Role, required: String },

    /// Organizational scope could not be resolved for a permission-gated route.
    #[error("organizational scope unavailable")]
    ScopeUnavailable,
}

impl GuardRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingCredential | Self::InvalidCredential(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::ScopeUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Short machine-readable cause for logs. Never contains token material.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::InvalidCredential(CredentialError::Expired) => "expired",
            Self::InvalidCredential(CredentialError::SignatureInvalid) => "signature_invalid",
            Self::InvalidCredential(_) => "malformed",
            Self::Forbidden { .. } => "forbidden",
            Self::ScopeUnavailable => "scope_unavailable",
        }
    }
}

impl IntoResponse for GuardRejection {
    // Bodies are identical within a status so callers cannot tell why they
    // were turned away.
    fn into_response(self) -> Response {
        match self.status() {
            StatusCode::UNAUTHORIZED => {
                json_error(StatusCode::UNAUTHORIZED, "unauthenticated", "authentication required")
            }
            StatusCode::FORBIDDEN => json_error(StatusCode::FORBIDDEN, "forbidden", "access denied"),
            status => json_error(status, "unavailable", "service temporarily unavailable"),
        }
    }
}

/// One configured guard; clone it per route with a different requirement.
#[derive(Clone)]
pub struct Guard {
    verifier: Arc<dyn CredentialVerifier>,
    directory: Arc<dyn PrincipalDirectory>,
    skippable: Arc<[String]>,
    requirement: Requirement,
}

impl core::fmt::Debug for Guard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Guard")
            .field("skippable", &self.skippable)
            .field("requirement", &self.requirement)
            .finish()
    }
}

impl Guard {
    pub fn new(verifier: Arc<dyn CredentialVerifier>, directory: Arc<dyn PrincipalDirectory>) -> Self {
        Self {
            verifier,
            directory,
            skippable: DEFAULT_SKIPPABLE.iter().map(|s| s.to_string()).collect(),
            requirement: Requirement::Authenticated,
        }
    }

    pub fn with_skippable<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skippable = prefixes.into_iter().map(Into::into).collect();
        self
    }

    pub fn requirement(&self) -> &Requirement {
        &self.requirement
    }

    fn with_requirement(&self, requirement: Requirement) -> Self {
        Self {
            requirement,
            ..self.clone()
        }
    }

    pub fn require_authenticated(&self) -> Self {
        self.with_requirement(Requirement::Authenticated)
    }

    pub fn require_role(&self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.with_requirement(Requirement::Roles(roles.into_iter().collect()))
    }

    pub fn require_permission(&self) -> Self {
        self.with_requirement(Requirement::Permission)
    }

    pub fn optional_authenticated(&self) -> Self {
        self.with_requirement(Requirement::Optional)
    }

    fn is_skippable(&self, path: &str) -> bool {
        self.skippable.iter().any(|prefix| {
            path.strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
    }

    /// Run the pipeline for one request.
    ///
    /// `Ok(None)` means the request proceeds without a caller (skippable
    /// route, or an optional route with no valid credential).
    pub async fn evaluate(
        &self,
        method: &Method,
        path: &str,
        headers: &HeaderMap,
    ) -> Result<Option<RequestContext>, GuardRejection> {
        if self.is_skippable(path) {
            return Ok(None);
        }
        let optional = self.requirement == Requirement::Optional;

        let token = match extract_bearer(headers) {
            Some(token) => token,
            None if optional => return Ok(None),
            None => return Err(GuardRejection::MissingCredential),
        };

        let credential = match self.verifier.verify(token) {
            Ok(c) => c,
            Err(e) if optional => {
                debug!(reason = %e, "ignoring invalid credential on optional route");
                return Ok(None);
            }
            Err(e) => return Err(GuardRejection::InvalidCredential(e)),
        };

        let org_scope = match self.directory.org_unit_of(credential.principal_id).await {
            Ok(unit) => OrgScope::from(unit),
            Err(e) if self.requirement == Requirement::Permission => {
                warn!(principal_id = %credential.principal_id, error = %e, "org unit lookup failed; denying");
                return Err(GuardRejection::ScopeUnavailable);
            }
            Err(e) => {
                warn!(principal_id = %credential.principal_id, error = %e, "org unit lookup failed; proceeding unscoped");
                OrgScope::Unscoped
            }
        };

        let ctx = RequestContext::new(credential, org_scope);

        match &self.requirement {
            Requirement::Authenticated | Requirement::Optional => {}
            Requirement::Roles(allowed) => {
                authorize_role(ctx.role, allowed).map_err(|_| GuardRejection::Forbidden {
                    role: ctx.role,
                    required: format!(
                        "role:{}",
                        allowed.iter().map(|r| r.as_str()).collect::<Vec<_>>().join("|")
                    ),
                })?;
            }
            Requirement::Permission => match infer_permission(method.as_str(), path) {
                Ok(permission) => {
                    authorize(ctx.role, &permission).map_err(|_| GuardRejection::Forbidden {
                        role: ctx.role,
                        required: permission.to_string(),
                    })?;
                }
                Err(InferError::NoPermissionRequired) => {}
                Err(e) => {
                    return Err(GuardRejection::Forbidden {
                        role: ctx.role,
                        required: format!("uninferable ({e})"),
                    });
                }
            },
        }

        Ok(Some(ctx))
    }
}

/// axum adapter: `from_fn_with_state(guard, guard_middleware)`.
pub async fn guard_middleware(State(guard): State<Guard>, mut req: Request, next: Next) -> Response {
    let path = req
        .extensions()
        .get::<OriginalUri>()
        .map(|u| u.0.path().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let method = req.method().clone();

    match guard.evaluate(&method, &path, req.headers()).await {
        Ok(ctx) => {
            if guard.requirement == Requirement::Optional {
                req.extensions_mut().insert(OptionalContext(ctx.clone()));
            }
            if let Some(ctx) = ctx {
                req.extensions_mut().insert(ctx);
            }
            next.run(req).await
        }
        Err(rejection) => {
            let peer = req.extensions().get::<ConnectInfo<SocketAddr>>().map(|c| c.0);
            let origin = client_origin(req.headers(), peer);
            log_denial(&rejection, &method, &path, origin.as_deref());
            rejection.into_response()
        }
    }
}

fn log_denial(rejection: &GuardRejection, method: &Method, path: &str, origin: Option<&str>) {
    let origin = origin.unwrap_or("unknown");
    match rejection {
        GuardRejection::Forbidden { role, required } => warn!(
            reason = rejection.reason(),
            role = role.as_str(),
            required = %required,
            %method,
            path,
            origin,
            "request denied"
        ),
        GuardRejection::ScopeUnavailable => warn!(
            reason = rejection.reason(),
            %method,
            path,
            origin,
            "request denied"
        ),
        _ => info!(
            reason = rejection.reason(),
            %method,
            path,
            origin,
            "request unauthenticated"
        ),
    }
}

/// Bearer token from the `Authorization` header, if well-formed.
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?;
    let header = header.to_str().ok()?;
    let token = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then_some(token)
}

/// Best-effort client address: first `x-forwarded-for` hop, else the peer.
pub fn client_origin(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|p| p.ip().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::Duration;
    use precinct_auth::{Hs256CredentialCodec, Principal};
    use precinct_core::{ManualClock, OrgUnitId};
    use precinct_infra::InMemoryPrincipalDirectory;

    const SECRET: &[u8] = b"guard-test-secret-guard-test-secret!";

    struct Fixture {
        codec: Arc<Hs256CredentialCodec>,
        directory: Arc<InMemoryPrincipalDirectory>,
        guard: Guard,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::starting_now();
        let codec = Arc::new(Hs256CredentialCodec::new(SECRET, Duration::minutes(15), clock.clone()).unwrap());
        let directory = Arc::new(InMemoryPrincipalDirectory::new());
        let guard = Guard::new(codec.clone(), directory.clone());
        Fixture {
            codec,
            directory,
            guard,
            clock,
        }
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        h
    }

    fn token_for(f: &Fixture, principal: &Principal) -> String {
        f.codec.issue(principal.id, &principal.badge, principal.role).unwrap().token
    }

    #[tokio::test]
    async fn missing_and_bad_credentials_are_unauthenticated() {
        let f = fixture();
        let g = f.guard.require_authenticated();

        let err = g.evaluate(&Method::GET, "/api/v1/sessions", &HeaderMap::new()).await.unwrap_err();
        assert_eq!(err, GuardRejection::MissingCredential);
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        let err = g.evaluate(&Method::GET, "/api/v1/sessions", &bearer("garbage")).await.unwrap_err();
        assert_eq!(err, GuardRejection::InvalidCredential(CredentialError::Malformed));
    }

    #[tokio::test]
    async fn expired_credential_is_rejected() {
        let f = fixture();
        let p = Principal::new("AG-1", Role::Agent);
        let token = token_for(&f, &p);
        f.clock.advance(Duration::minutes(16));

        let err = f
            .guard
            .require_authenticated()
            .evaluate(&Method::GET, "/api/v1/sessions", &bearer(&token))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "expired");
    }

    #[tokio::test]
    async fn skippable_routes_bypass_the_pipeline() {
        let f = fixture();
        let g = f.guard.require_permission();
        assert_eq!(g.evaluate(&Method::POST, "/api/v1/auth/login", &HeaderMap::new()).await, Ok(None));
        assert_eq!(g.evaluate(&Method::GET, "/health", &HeaderMap::new()).await, Ok(None));
        // Prefix match is segment-aware.
        assert!(g.evaluate(&Method::GET, "/healthz", &HeaderMap::new()).await.is_err());
    }

    #[tokio::test]
    async fn context_carries_identity_and_scope() {
        let f = fixture();
        let unit = OrgUnitId::new();
        let p = Principal::new("OF-9", Role::Officier).with_org_unit(unit);
        f.directory.insert(p.clone(), "h");

        let ctx = f
            .guard
            .require_authenticated()
            .evaluate(&Method::GET, "/api/v1/sessions", &bearer(&token_for(&f, &p)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ctx.principal_id, p.id);
        assert_eq!(ctx.badge, "OF-9");
        assert_eq!(ctx.role, Role::Officier);
        assert_eq!(ctx.org_scope, OrgScope::Scoped(unit));
    }

    #[tokio::test]
    async fn unknown_principal_is_unscoped_not_rejected() {
        let f = fixture();
        let p = Principal::new("AD-1", Role::Admin);
        let ctx = f
            .guard
            .require_permission()
            .evaluate(&Method::GET, "/api/v1/users", &bearer(&token_for(&f, &p)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ctx.org_scope, OrgScope::Unscoped);
    }

    #[tokio::test]
    async fn permission_routes_fail_closed_when_scope_lookup_fails() {
        let f = fixture();
        let p = Principal::new("CO-1", Role::Commissaire);
        f.directory.insert(p.clone(), "h");
        f.directory.fail_lookups_for(p.id);
        let headers = bearer(&token_for(&f, &p));

        let err = f
            .guard
            .require_permission()
            .evaluate(&Method::GET, "/api/v1/incidents", &headers)
            .await
            .unwrap_err();
        assert_eq!(err, GuardRejection::ScopeUnavailable);
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);

        let ctx = f
            .guard
            .require_authenticated()
            .evaluate(&Method::GET, "/api/v1/sessions", &headers)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ctx.org_scope, OrgScope::Unscoped);
    }

    #[tokio::test]
    async fn permission_gate_uses_inferred_permission() {
        let f = fixture();
        let agent = Principal::new("AG-2", Role::Agent);
        let headers = bearer(&token_for(&f, &agent));
        let g = f.guard.require_permission();

        assert!(g.evaluate(&Method::POST, "/api/v1/controles", &headers).await.is_ok());
        let err = g.evaluate(&Method::DELETE, "/api/v1/users/42", &headers).await.unwrap_err();
        assert_eq!(
            err,
            GuardRejection::Forbidden {
                role: Role::Agent,
                required: "users:delete".into()
            }
        );
        // Unsupported method denies rather than allowing through.
        assert_eq!(
            g.evaluate(&Method::OPTIONS, "/api/v1/controles", &headers).await.unwrap_err().status(),
            StatusCode::FORBIDDEN
        );
    }

    #[tokio::test]
    async fn auth_resource_needs_no_permission() {
        let f = fixture();
        let clerk = Principal::new("SE-1", Role::Secretaire);
        let ctx = f
            .guard
            .require_permission()
            .evaluate(&Method::POST, "/api/v1/auth/logout", &bearer(&token_for(&f, &clerk)))
            .await
            .unwrap();
        assert!(ctx.is_some());
    }

    #[tokio::test]
    async fn role_gate_checks_allow_list() {
        let f = fixture();
        let g = f.guard.require_role([Role::Admin, Role::Commissaire]);
        let admin = Principal::new("AD-2", Role::Admin);
        let agent = Principal::new("AG-3", Role::Agent);

        assert!(g.evaluate(&Method::DELETE, "/x", &bearer(&token_for(&f, &admin))).await.is_ok());
        let err = g
            .evaluate(&Method::DELETE, "/x", &bearer(&token_for(&f, &agent)))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn optional_never_rejects() {
        let f = fixture();
        let g = f.guard.optional_authenticated();
        assert_eq!(g.evaluate(&Method::GET, "/api/v1/whoami", &HeaderMap::new()).await, Ok(None));
        assert_eq!(g.evaluate(&Method::GET, "/api/v1/whoami", &bearer("nope")).await, Ok(None));

        let p = Principal::new("AG-4", Role::Agent);
        let ctx = g
            .evaluate(&Method::GET, "/api/v1/whoami", &bearer(&token_for(&f, &p)))
            .await
            .unwrap();
        assert_eq!(ctx.map(|c| c.principal_id), Some(p.id));
    }

    #[test]
    fn bearer_extraction() {
        assert_eq!(extract_bearer(&bearer("abc")), Some("abc"));
        let mut h = HeaderMap::new();
        h.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer(&h), None);
        h.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert_eq!(extract_bearer(&h), None);
    }

    #[test]
    fn origin_prefers_forwarded_header() {
        let mut h = HeaderMap::new();
        let peer: SocketAddr = "192.0.2.1:5555".parse().unwrap();
        assert_eq!(client_origin(&h, Some(peer)).as_deref(), Some("192.0.2.1"));
        h.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        assert_eq!(client_origin(&h, Some(peer)).as_deref(), Some("203.0.113.9"));
    }

    #[test]
    fn rejection_bodies_do_not_leak_the_cause() {
        let a = GuardRejection::MissingCredential.into_response();
        let b = GuardRejection::InvalidCredential(CredentialError::Expired).into_response();
        assert_eq!(a.status(), b.status());
    }
}
