use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Router,
};

use precinct_auth::Role;

use crate::middleware::{guard_middleware, Guard};

pub mod auth;
pub mod sessions;
pub mod system;

/// Roles allowed to terminate every session of another principal.
pub const SESSION_ADMIN_ROLES: [Role; 2] = [Role::Admin, Role::Commissaire];

/// Full route table; each handler carries its own guard requirement.
pub fn router(guard: &Guard) -> Router {
    let authenticated = guard.require_authenticated();
    let by_permission = guard.require_permission();
    let by_role = guard.require_role(SESSION_ADMIN_ROLES);
    let optional = guard.optional_authenticated();

    Router::new()
        .route("/health", get(system::health))
        .route("/api/v1/auth/login", post(auth::login))
        .route("/api/v1/auth/refresh", post(auth::refresh))
        .route(
            "/api/v1/auth/logout",
            post(auth::logout).route_layer(from_fn_with_state(authenticated.clone(), guard_middleware)),
        )
        .route(
            "/api/v1/whoami",
            get(system::whoami).route_layer(from_fn_with_state(optional, guard_middleware)),
        )
        .route(
            "/api/v1/authz/explain",
            get(system::explain).route_layer(from_fn_with_state(authenticated.clone(), guard_middleware)),
        )
        .route(
            "/api/v1/sessions",
            get(sessions::list_own).route_layer(from_fn_with_state(authenticated.clone(), guard_middleware)),
        )
        .route(
            "/api/v1/sessions/revoke-others",
            post(sessions::revoke_others)
                .route_layer(from_fn_with_state(authenticated, guard_middleware)),
        )
        .route(
            "/api/v1/sessions/:id",
            delete(sessions::revoke_one)
                .route_layer(from_fn_with_state(by_permission.clone(), guard_middleware)),
        )
        .route(
            "/api/v1/users/:id/sessions",
            get(sessions::list_for_user)
                .route_layer(from_fn_with_state(by_permission, guard_middleware))
                .merge(
                    delete(sessions::revoke_all_for_user)
                        .route_layer(from_fn_with_state(by_role, guard_middleware)),
                ),
        )
}
