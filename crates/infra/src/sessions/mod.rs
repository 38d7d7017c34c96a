//! Durable multi-device sessions with rotating refresh tokens.
//!
//! ## Lifecycle
//!
//! `Active -> Active` on refresh or activity, `Active -> Revoked` on logout,
//! admin action, device mismatch, lifetime/inactivity expiry, quota eviction
//! or a new login on the same device. Revocation is terminal; revoked and
//! expired records are hard-deleted only by [`SessionStore::sweep`].
//!
//! ## Components
//!
//! - `SessionStore`: the store contract, shared by every backend
//! - `InMemorySessionStore`: tests/dev
//! - `PostgresSessionStore`: durable backend (`sqlx`)
//! - `RefreshToken`: raw token handed out once; only its hash is stored

pub mod in_memory;
pub mod postgres;
pub mod store;
pub mod token;
pub mod types;

pub use in_memory::InMemorySessionStore;
pub use postgres::PostgresSessionStore;
pub use store::{SessionStore, SessionStoreError};
pub use token::{hash_refresh_token, RefreshToken};
pub use types::{
    DeviceInfo, RefreshRejection, RevocationReason, Session, SessionGrant, SessionPolicy,
    SessionStatus,
};
