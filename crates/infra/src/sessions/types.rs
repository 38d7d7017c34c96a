//! Session records and the lifecycle rules applied to them.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use precinct_core::{DeviceId, PrincipalId, SessionId};

use super::token::RefreshToken;

// ─────────────────────────────────────────────────────────────────────────────
// Policy
// ─────────────────────────────────────────────────────────────────────────────

/// Lifetime and quota limits enforced by every session store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Validity of one refresh token; renewed on every rotation.
    pub refresh_ttl: Duration,
    /// Absolute cap measured from login, regardless of refreshes.
    pub max_session_duration: Duration,
    /// Maximum gap between two activities before the session dies.
    pub inactivity_timeout: Duration,
    /// Maximum concurrently live sessions per principal.
    pub max_devices: usize,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            refresh_ttl: Duration::days(7),
            max_session_duration: Duration::days(30),
            inactivity_timeout: Duration::days(3),
            max_devices: 3,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Revocation
// ─────────────────────────────────────────────────────────────────────────────

/// Why a session was terminated. Revocation is terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    ExplicitLogout,
    AdminRevoked,
    AdminRevokedAll,
    DeviceMismatch,
    MaxSessionDuration,
    Inactivity,
    MaxSessions,
    NewLoginSameDevice,
}

impl RevocationReason {
    pub const ALL: [RevocationReason; 8] = [
        RevocationReason::ExplicitLogout,
        RevocationReason::AdminRevoked,
        RevocationReason::AdminRevokedAll,
        RevocationReason::DeviceMismatch,
        RevocationReason::MaxSessionDuration,
        RevocationReason::Inactivity,
        RevocationReason::MaxSessions,
        RevocationReason::NewLoginSameDevice,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExplicitLogout => "explicit_logout",
            Self::AdminRevoked => "admin_revoked",
            Self::AdminRevokedAll => "admin_revoked_all",
            Self::DeviceMismatch => "device_mismatch",
            Self::MaxSessionDuration => "max_session_duration",
            Self::Inactivity => "inactivity",
            Self::MaxSessions => "max_sessions",
            Self::NewLoginSameDevice => "new_login_same_device",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == s)
    }
}

impl core::fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// Device that opened a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: Option<String>,
    pub platform: Option<String>,
}

impl DeviceInfo {
    pub fn new(id: DeviceId) -> Self {
        Self {
            id,
            name: None,
            platform: None,
        }
    }
}

/// Coarse lifecycle view used by listings.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    /// Not revoked yet, but a refresh would be refused on time grounds.
    Expired,
    Revoked,
}

/// Durable record of one authenticated device.
///
/// Only the hash of the refresh token is ever held here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub principal_id: PrincipalId,
    pub device: DeviceInfo,
    pub refresh_token_hash: String,
    pub refresh_expires_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub last_origin: Option<String>,
    pub active: bool,
    pub revoked: bool,
    pub revoked_reason: Option<RevocationReason>,
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Why a refresh was refused after the token itself matched.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RefreshRejection {
    DeviceMismatch,
    RefreshExpired,
    MaxSessionDuration,
    Inactivity,
}

impl RefreshRejection {
    /// Revocation the store must apply before reporting the rejection.
    pub fn revocation(self) -> Option<RevocationReason> {
        match self {
            Self::DeviceMismatch => Some(RevocationReason::DeviceMismatch),
            Self::RefreshExpired => None,
            Self::MaxSessionDuration => Some(RevocationReason::MaxSessionDuration),
            Self::Inactivity => Some(RevocationReason::Inactivity),
        }
    }
}

impl Session {
    /// Build a new live session; the caller stores it.
    pub fn open(
        principal_id: PrincipalId,
        device: DeviceInfo,
        origin: Option<&str>,
        now: DateTime<Utc>,
        policy: &SessionPolicy,
    ) -> (Self, RefreshToken) {
        let token = RefreshToken::generate();
        let session = Self {
            id: SessionId::new(),
            principal_id,
            device,
            refresh_token_hash: token.hash(),
            refresh_expires_at: now + policy.refresh_ttl,
            started_at: now,
            last_activity_at: now,
            last_origin: origin.map(str::to_string),
            active: true,
            revoked: false,
            revoked_reason: None,
            revoked_at: None,
        };
        (session, token)
    }

    pub fn is_live(&self) -> bool {
        self.active && !self.revoked
    }

    /// Terminate the session. Returns `false` if it was already revoked.
    pub fn revoke(&mut self, reason: RevocationReason, now: DateTime<Utc>) -> bool {
        if self.revoked {
            return false;
        }
        self.active = false;
        self.revoked = true;
        self.revoked_reason = Some(reason);
        self.revoked_at = Some(now);
        true
    }

    /// Install a new refresh token and bump activity.
    pub fn rotate(&mut self, now: DateTime<Utc>, policy: &SessionPolicy) -> RefreshToken {
        let token = RefreshToken::generate();
        self.refresh_token_hash = token.hash();
        self.refresh_expires_at = now + policy.refresh_ttl;
        self.last_activity_at = now;
        token
    }

    pub fn touch(&mut self, now: DateTime<Utc>, origin: Option<&str>) {
        self.last_activity_at = now;
        if let Some(origin) = origin {
            self.last_origin = Some(origin.to_string());
        }
    }

    pub fn max_lifetime_exceeded(&self, now: DateTime<Utc>, policy: &SessionPolicy) -> bool {
        now > self.started_at + policy.max_session_duration
    }

    pub fn inactive_too_long(&self, now: DateTime<Utc>, policy: &SessionPolicy) -> bool {
        now > self.last_activity_at + policy.inactivity_timeout
    }

    pub fn refresh_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.refresh_expires_at
    }

    /// Checks applied to a matched, live session during refresh, in order:
    /// device binding, refresh expiry, absolute lifetime, inactivity.
    pub fn check_refresh(
        &self,
        device_id: &DeviceId,
        now: DateTime<Utc>,
        policy: &SessionPolicy,
    ) -> Result<(), RefreshRejection> {
        if &self.device.id != device_id {
            return Err(RefreshRejection::DeviceMismatch);
        }
        if self.refresh_expired(now) {
            return Err(RefreshRejection::RefreshExpired);
        }
        if self.max_lifetime_exceeded(now, policy) {
            return Err(RefreshRejection::MaxSessionDuration);
        }
        if self.inactive_too_long(now, policy) {
            return Err(RefreshRejection::Inactivity);
        }
        Ok(())
    }

    /// Whether the sweep may hard-delete this record.
    pub fn is_sweepable(&self, now: DateTime<Utc>, policy: &SessionPolicy) -> bool {
        self.revoked || self.refresh_expired(now) || self.max_lifetime_exceeded(now, policy)
    }

    pub fn status(&self, now: DateTime<Utc>, policy: &SessionPolicy) -> SessionStatus {
        if !self.is_live() {
            SessionStatus::Revoked
        } else if self.refresh_expired(now)
            || self.max_lifetime_exceeded(now, policy)
            || self.inactive_too_long(now, policy)
        {
            SessionStatus::Expired
        } else {
            SessionStatus::Active
        }
    }
}

/// What the client receives when a session is opened or its token rotated.
///
/// The raw token exists only here; it cannot be recovered later.
#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub session_id: SessionId,
    pub refresh_token: RefreshToken,
    pub expires_at: DateTime<Utc>,
}
