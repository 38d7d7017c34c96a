//! HTTP API: request guard, typed request context, auth/session routes.

pub mod app;
pub mod context;
pub mod middleware;

pub use context::{OptionalContext, OrgScope, RequestContext};
pub use middleware::{guard_middleware, Guard, GuardRejection, Requirement};
