use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    Json,
};

use precinct_auth::{explain_authorization, AuthorizationExplanation, Permission, Role};

use crate::app::dto::{ExplainQuery, WhoAmI};
use crate::app::errors::ApiError;
use crate::context::{OptionalContext, RequestContext};

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /api/v1/whoami (optional authentication)
pub async fn whoami(Extension(ctx): Extension<OptionalContext>) -> Json<WhoAmI> {
    Json(ctx.get().map_or_else(WhoAmI::anonymous, WhoAmI::from_context))
}

/// GET /api/v1/authz/explain?permission=..&role=..
///
/// Explains a decision for the caller's own role unless another role is named.
pub async fn explain(
    Extension(ctx): Extension<RequestContext>,
    Query(q): Query<ExplainQuery>,
) -> Result<Json<AuthorizationExplanation>, ApiError> {
    let role = match q.role.as_deref() {
        Some(name) => Role::parse(name).ok_or_else(|| ApiError::Validation(format!("unknown role '{name}'")))?,
        None => ctx.role,
    };
    let permission = q.permission.trim();
    if !permission.contains(':') {
        return Err(ApiError::Validation(
            "permission must look like '<resource>:<action>'".to_string(),
        ));
    }
    Ok(Json(explain_authorization(role, &Permission::new(permission.to_string()))))
}
