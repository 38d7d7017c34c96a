use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use precinct_auth::{IssuedCredential, Role};
use precinct_core::{DeviceId, OrgUnitId, PrincipalId, SessionId};
use precinct_infra::{DeviceInfo, Session, SessionGrant, SessionPolicy, SessionStatus};

use crate::context::{OrgScope, RequestContext};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub badge: String,
    pub password: String,
    pub device_id: String,
    pub device_name: Option<String>,
    pub device_platform: Option<String>,
}

impl LoginRequest {
    pub fn device(&self) -> Result<DeviceInfo, precinct_core::DomainError> {
        Ok(DeviceInfo {
            id: DeviceId::new(&self.device_id)?,
            name: non_blank(self.device_name.as_deref()),
            platform: non_blank(self.device_platform.as_deref()),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
    pub device_id: String,
}

#[derive(Debug, Deserialize)]
pub struct LogoutRequest {
    pub session_id: SessionId,
}

#[derive(Debug, Deserialize)]
pub struct RevokeOthersRequest {
    pub keep_session_id: SessionId,
}

#[derive(Debug, Deserialize)]
pub struct ExplainQuery {
    pub permission: String,
    pub role: Option<String>,
}

fn non_blank(v: Option<&str>) -> Option<String> {
    v.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

// -------------------------
// Response DTOs
// -------------------------

/// Body of a successful login or refresh.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub session_id: SessionId,
    /// Access-token expiry.
    pub expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    pub token_type: &'static str,
}

impl TokenResponse {
    pub fn new(access: IssuedCredential, grant: SessionGrant) -> Self {
        Self {
            access_token: access.token,
            refresh_token: grant.refresh_token.into_inner(),
            session_id: grant.session_id,
            expires_at: access.expires_at,
            refresh_expires_at: grant.expires_at,
            token_type: "Bearer",
        }
    }
}

/// A session as shown to its owner or an administrator. Never includes token material.
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub session_id: SessionId,
    pub device_id: String,
    pub device_name: Option<String>,
    pub device_platform: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub last_origin: Option<String>,
    pub refresh_expires_at: DateTime<Utc>,
    pub status: SessionStatus,
}

impl SessionView {
    pub fn new(s: Session, now: DateTime<Utc>, policy: &SessionPolicy) -> Self {
        let status = s.status(now, policy);
        Self {
            session_id: s.id,
            device_id: s.device.id.to_string(),
            device_name: s.device.name,
            device_platform: s.device.platform,
            started_at: s.started_at,
            last_activity_at: s.last_activity_at,
            last_origin: s.last_origin,
            refresh_expires_at: s.refresh_expires_at,
            status,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RevokedCount {
    pub revoked: u64,
}

#[derive(Debug, Serialize)]
pub struct RevokedOne {
    pub session_id: SessionId,
    /// `false` when the session was already revoked.
    pub revoked: bool,
}

#[derive(Debug, Serialize)]
pub struct WhoAmI {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal_id: Option<PrincipalId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_scope: Option<OrgScope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_unit_id: Option<OrgUnitId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl WhoAmI {
    pub fn anonymous() -> Self {
        Self {
            authenticated: false,
            principal_id: None,
            badge: None,
            role: None,
            org_scope: None,
            org_unit_id: None,
            expires_at: None,
        }
    }

    pub fn from_context(ctx: &RequestContext) -> Self {
        Self {
            authenticated: true,
            principal_id: Some(ctx.principal_id),
            badge: Some(ctx.badge.clone()),
            role: Some(ctx.role),
            org_scope: Some(ctx.org_scope),
            org_unit_id: ctx.org_scope.org_unit_id(),
            expires_at: Some(ctx.claims.expires_at()),
        }
    }
}
