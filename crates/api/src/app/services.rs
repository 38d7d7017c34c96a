//! Service wiring: credential codec, session store, principal directory.
//!
//! With `DATABASE_URL` set, sessions and principals live in Postgres;
//! otherwise everything is in memory (dev/test).

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tracing::{info, warn};

use precinct_auth::{CredentialError, CredentialVerifier, Hs256CredentialCodec};
use precinct_core::{Clock, SystemClock};
use precinct_infra::{
    AuthConfig, InMemoryPrincipalDirectory, InMemorySessionStore, PostgresPrincipalDirectory,
    PostgresSessionStore, PrincipalDirectory, SessionStore, SessionStoreError,
};

const MAX_DB_CONNECTIONS: u32 = 10;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("credential codec: {0}")]
    Credential(#[from] CredentialError),
    #[error("database connection failed: {0}")]
    Database(String),
    #[error("schema setup failed: {0}")]
    Schema(#[from] SessionStoreError),
}

/// Everything request handlers need, shared behind an `Arc`.
pub struct AppServices {
    pub codec: Arc<Hs256CredentialCodec>,
    pub sessions: Arc<dyn SessionStore>,
    pub directory: Arc<dyn PrincipalDirectory>,
    pub clock: Arc<dyn Clock>,
}

impl AppServices {
    /// In-memory stores around an injected directory and clock.
    pub fn in_memory(
        config: &AuthConfig,
        directory: Arc<dyn PrincipalDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ServiceError> {
        let codec = Hs256CredentialCodec::new(&config.signing_key, config.access_ttl, clock.clone())?;
        let sessions = InMemorySessionStore::new(config.session_policy, clock.clone());
        Ok(Self {
            codec: Arc::new(codec),
            sessions: Arc::new(sessions),
            directory,
            clock,
        })
    }

    pub async fn postgres(config: &AuthConfig, database_url: &str) -> Result<Self, ServiceError> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_DB_CONNECTIONS)
            .connect(database_url)
            .await
            .map_err(|e| ServiceError::Database(e.to_string()))?;

        let clock = SystemClock::arc();
        let codec = Hs256CredentialCodec::new(&config.signing_key, config.access_ttl, clock.clone())?;
        let sessions = PostgresSessionStore::new(pool.clone(), config.session_policy, clock.clone());
        sessions.ensure_schema().await?;

        Ok(Self {
            codec: Arc::new(codec),
            sessions: Arc::new(sessions),
            directory: Arc::new(PostgresPrincipalDirectory::new(pool)),
            clock,
        })
    }

    pub fn verifier(&self) -> Arc<dyn CredentialVerifier> {
        self.codec.clone()
    }
}

pub async fn build_services(config: &AuthConfig) -> Result<AppServices, ServiceError> {
    match config.database_url.as_deref() {
        Some(url) => {
            info!("using Postgres session store and principal directory");
            AppServices::postgres(config, url).await
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory stores with an empty principal directory");
            AppServices::in_memory(
                config,
                Arc::new(InMemoryPrincipalDirectory::new()),
                SystemClock::arc(),
            )
        }
    }
}
