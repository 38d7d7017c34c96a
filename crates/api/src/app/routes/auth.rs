//! Login, refresh and logout.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode},
    Json,
};
use tracing::{info, warn};

use precinct_auth::{verify_password, Principal, DECOY_PASSWORD_HASH};
use precinct_core::DeviceId;
use precinct_infra::{PrincipalRecord, RevocationReason};

use crate::app::dto::{LoginRequest, LogoutRequest, RefreshRequest, TokenResponse};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::RequestContext;
use crate::middleware::client_origin;

/// POST /api/v1/auth/login
pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let device = req.device()?;
    let origin = client_origin(&headers, peer.map(|c| c.0));

    let record = services.directory.find_by_badge(&req.badge).await?;
    let principal = check_credentials(record, &req.password, verify_password)?;

    let grant = services
        .sessions
        .open_session(principal.id, device, origin.as_deref())
        .await?;
    let access = services
        .codec
        .issue(principal.id, &principal.badge, principal.role)?;

    info!(principal_id = %principal.id, session_id = %grant.session_id, role = principal.role.as_str(), "login");
    Ok(Json(TokenResponse::new(access, grant)))
}

/// Decide a login attempt.
///
/// `verify` runs exactly once whatever the outcome, against the decoy hash
/// when the badge is unknown, so response time does not reveal which badges
/// exist or are disabled.
fn check_credentials(
    record: Option<PrincipalRecord>,
    password: &str,
    verify: impl Fn(&str, &str) -> bool,
) -> Result<Principal, ApiError> {
    let Some(record) = record else {
        std::hint::black_box(verify(DECOY_PASSWORD_HASH, password));
        return Err(ApiError::InvalidCredentials);
    };
    let matched = verify(&record.password_hash, password);
    if !matched || !record.principal.active {
        info!(principal_id = %record.principal.id, "login rejected");
        return Err(ApiError::InvalidCredentials);
    }
    Ok(record.principal)
}

/// POST /api/v1/auth/refresh
///
/// Any failure is reported as "re-authenticate"; the cause only goes to the logs.
pub async fn refresh(
    Extension(services): Extension<Arc<AppServices>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let device_id = DeviceId::new(&req.device_id).map_err(|_| ApiError::Reauthenticate)?;
    let origin = client_origin(&headers, peer.map(|c| c.0));

    let (session, grant) = services
        .sessions
        .exchange_refresh(&req.refresh_token, &device_id)
        .await?;

    // Role and badge are re-read so changes apply from this token on.
    let principal = match services.directory.find_by_id(session.principal_id).await? {
        Some(record) if record.principal.active => record.principal,
        _ => {
            warn!(principal_id = %session.principal_id, session_id = %session.id, "refresh for missing or inactive principal");
            services
                .sessions
                .revoke(session.id, RevocationReason::AdminRevoked)
                .await?;
            return Err(ApiError::Reauthenticate);
        }
    };

    if let Err(e) = services.sessions.touch(session.id, origin.as_deref()).await {
        warn!(session_id = %session.id, error = %e, "failed to record refresh origin");
    }

    let access = services
        .codec
        .issue(principal.id, &principal.badge, principal.role)?;
    Ok(Json(TokenResponse::new(access, grant)))
}

/// POST /api/v1/auth/logout
///
/// Only the caller's own sessions can be logged out here.
pub async fn logout(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<LogoutRequest>,
) -> Result<StatusCode, ApiError> {
    let session = services
        .sessions
        .get(req.session_id)
        .await?
        .filter(|s| s.principal_id == ctx.principal_id)
        .ok_or(ApiError::NotFound)?;

    services
        .sessions
        .revoke(session.id, RevocationReason::ExplicitLogout)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
