//! Session listing and revocation.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    Json,
};
use tracing::info;

use precinct_core::{Clock, PrincipalId, SessionId};
use precinct_infra::RevocationReason;

use crate::app::dto::{RevokeOthersRequest, RevokedCount, RevokedOne, SessionView};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::RequestContext;

async fn active_views(services: &AppServices, principal_id: PrincipalId) -> Result<Vec<SessionView>, ApiError> {
    let now = services.clock.now();
    let policy = *services.sessions.policy();
    let sessions = services.sessions.list_active(principal_id).await?;
    Ok(sessions
        .into_iter()
        .map(|s| SessionView::new(s, now, &policy))
        .collect())
}

/// GET /api/v1/sessions
pub async fn list_own(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Vec<SessionView>>, ApiError> {
    Ok(Json(active_views(&services, ctx.principal_id).await?))
}

/// GET /api/v1/users/:id/sessions
pub async fn list_for_user(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<SessionView>>, ApiError> {
    let principal_id: PrincipalId = id.parse()?;
    Ok(Json(active_views(&services, principal_id).await?))
}

/// POST /api/v1/sessions/revoke-others
pub async fn revoke_others(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<RevokeOthersRequest>,
) -> Result<Json<RevokedCount>, ApiError> {
    services
        .sessions
        .get(req.keep_session_id)
        .await?
        .filter(|s| s.principal_id == ctx.principal_id && s.is_live())
        .ok_or(ApiError::NotFound)?;

    let revoked = services
        .sessions
        .revoke_all_except(ctx.principal_id, req.keep_session_id, RevocationReason::ExplicitLogout)
        .await?;
    Ok(Json(RevokedCount { revoked }))
}

/// DELETE /api/v1/users/:id/sessions
pub async fn revoke_all_for_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Json<RevokedCount>, ApiError> {
    let principal_id: PrincipalId = id.parse()?;
    let revoked = services
        .sessions
        .revoke_all(principal_id, RevocationReason::AdminRevokedAll)
        .await?;
    info!(actor = %ctx.principal_id, %principal_id, revoked, "admin revoked all sessions");
    Ok(Json(RevokedCount { revoked }))
}

/// DELETE /api/v1/sessions/:id
pub async fn revoke_one(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Json<RevokedOne>, ApiError> {
    let session_id: SessionId = id.parse()?;
    let revoked = services
        .sessions
        .revoke(session_id, RevocationReason::AdminRevoked)
        .await?;
    info!(actor = %ctx.principal_id, %session_id, revoked, "admin revoked session");
    Ok(Json(RevokedOne { session_id, revoked }))
}
