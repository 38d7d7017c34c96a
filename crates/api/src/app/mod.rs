//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: codec, session store and directory wiring
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router};
use tower::ServiceBuilder;

use crate::middleware::Guard;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{build_services, AppServices, ServiceError};

/// Build the full HTTP router around already-wired services.
pub fn build_app(services: Arc<AppServices>) -> Router {
    let guard = Guard::new(services.verifier(), services.directory.clone());

    routes::router(&guard)
        .layer(Extension(services))
        .layer(ServiceBuilder::new())
}
