//! Configuration loading and representation.
//!
//! Everything comes from environment variables. Numeric settings that are
//! unset, unparsable or zero fall back to safe defaults with a warning; the
//! signing key has no default and its absence is fatal at startup.

use std::net::SocketAddr;
use std::time::Duration as StdDuration;

use chrono::Duration;
use thiserror::Error;
use tracing::warn;

use crate::sessions::SessionPolicy;

pub const ENV_SIGNING_KEY: &str = "PRECINCT_SIGNING_KEY";
pub const ENV_ACCESS_TTL_SECS: &str = "PRECINCT_ACCESS_TTL_SECS";
pub const ENV_REFRESH_TTL_SECS: &str = "PRECINCT_REFRESH_TTL_SECS";
pub const ENV_MAX_SESSION_SECS: &str = "PRECINCT_MAX_SESSION_SECS";
pub const ENV_INACTIVITY_SECS: &str = "PRECINCT_INACTIVITY_SECS";
pub const ENV_MAX_DEVICES: &str = "PRECINCT_MAX_DEVICES";
pub const ENV_SWEEP_INTERVAL_SECS: &str = "PRECINCT_SWEEP_INTERVAL_SECS";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_BIND_ADDR: &str = "PRECINCT_BIND_ADDR";

const DEFAULT_ACCESS_TTL_SECS: u64 = 15 * 60;
const DEFAULT_REFRESH_TTL_SECS: u64 = 7 * 24 * 3600;
const DEFAULT_MAX_SESSION_SECS: u64 = 30 * 24 * 3600;
const DEFAULT_INACTIVITY_SECS: u64 = 3 * 24 * 3600;
const DEFAULT_MAX_DEVICES: u64 = 3;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("PRECINCT_SIGNING_KEY must be set to a non-empty value")]
    MissingSigningKey,
    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Settings consumed by the trust core and its HTTP host.
#[derive(Clone)]
pub struct AuthConfig {
    pub signing_key: Vec<u8>,
    pub access_ttl: Duration,
    pub session_policy: SessionPolicy,
    pub sweep_interval: StdDuration,
    pub database_url: Option<String>,
    pub bind_addr: SocketAddr,
}

impl core::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("signing_key", &"<redacted>")
            .field("access_ttl", &self.access_ttl)
            .field("session_policy", &self.session_policy)
            .field("sweep_interval", &self.sweep_interval)
            .field("database_url", &self.database_url.as_ref().map(|_| "<set>"))
            .field("bind_addr", &self.bind_addr)
            .finish()
    }
}

impl AuthConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable lookup (tests inject a map here).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let signing_key = lookup(ENV_SIGNING_KEY)
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingSigningKey)?
            .into_bytes();

        let secs = |name: &'static str, default: u64| positive_or_default(&lookup, name, default);

        let session_policy = SessionPolicy {
            refresh_ttl: Duration::seconds(secs(ENV_REFRESH_TTL_SECS, DEFAULT_REFRESH_TTL_SECS) as i64),
            max_session_duration: Duration::seconds(
                secs(ENV_MAX_SESSION_SECS, DEFAULT_MAX_SESSION_SECS) as i64,
            ),
            inactivity_timeout: Duration::seconds(secs(ENV_INACTIVITY_SECS, DEFAULT_INACTIVITY_SECS) as i64),
            max_devices: secs(ENV_MAX_DEVICES, DEFAULT_MAX_DEVICES) as usize,
        };

        let bind_raw = lookup(ENV_BIND_ADDR).unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw.parse().map_err(|e| ConfigError::Invalid {
            name: ENV_BIND_ADDR,
            reason: format!("'{bind_raw}': {e}"),
        })?;

        Ok(Self {
            signing_key,
            access_ttl: Duration::seconds(secs(ENV_ACCESS_TTL_SECS, DEFAULT_ACCESS_TTL_SECS) as i64),
            session_policy,
            sweep_interval: StdDuration::from_secs(secs(ENV_SWEEP_INTERVAL_SECS, DEFAULT_SWEEP_INTERVAL_SECS)),
            database_url: lookup(ENV_DATABASE_URL).filter(|u| !u.trim().is_empty()),
            bind_addr,
        })
    }
}

// Upper bound keeps second counts inside chrono's range.
const MAX_SECS: u64 = 100 * 365 * 24 * 3600;

fn positive_or_default(lookup: &impl Fn(&str) -> Option<String>, name: &'static str, default: u64) -> u64 {
    let Some(raw) = lookup(name) else {
        return default;
    };
    match raw.trim().parse::<u64>() {
        Ok(v) if v > 0 && v <= MAX_SECS => v,
        _ => {
            warn!(variable = name, value = %raw, default, "invalid setting; using default");
            default
        }
    }
}
