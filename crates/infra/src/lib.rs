//! Infrastructure layer: session persistence, principal lookup, config,
//! background workers.

pub mod config;
pub mod directory;
pub mod sessions;
pub mod workers;

pub use config::{AuthConfig, ConfigError};
pub use directory::{
    DirectoryError, InMemoryPrincipalDirectory, PostgresPrincipalDirectory, PrincipalDirectory,
    PrincipalRecord,
};
pub use sessions::{
    DeviceInfo, InMemorySessionStore, PostgresSessionStore, RefreshToken, RevocationReason, Session,
    SessionGrant, SessionPolicy, SessionStatus, SessionStore, SessionStoreError,
};
pub use workers::{SessionSweeper, SweeperHandle};
