//! Session store abstraction.

use async_trait::async_trait;
use thiserror::Error;

use precinct_core::{DeviceId, PrincipalId, SessionId};

use super::types::{DeviceInfo, RefreshRejection, RevocationReason, Session, SessionGrant, SessionPolicy};

/// Session store error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionStoreError {
    /// Unknown, rotated-away, or revoked refresh token.
    #[error("invalid refresh token")]
    InvalidRefreshToken,
    #[error("refresh token expired")]
    RefreshExpired,
    /// Absolute lifetime or inactivity limit reached; the session is now revoked.
    #[error("session expired")]
    SessionExpired,
    /// Token presented from another device; the session is now revoked.
    #[error("device mismatch")]
    DeviceMismatch,
    #[error("session not found: {0}")]
    NotFound(SessionId),
    #[error("storage error: {0}")]
    Storage(String),
}

impl SessionStoreError {
    /// Whether the client has to log in again (as opposed to a transient failure).
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            Self::InvalidRefreshToken | Self::RefreshExpired | Self::SessionExpired | Self::DeviceMismatch
        )
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl From<RefreshRejection> for SessionStoreError {
    fn from(r: RefreshRejection) -> Self {
        match r {
            RefreshRejection::DeviceMismatch => Self::DeviceMismatch,
            RefreshRejection::RefreshExpired => Self::RefreshExpired,
            RefreshRejection::MaxSessionDuration | RefreshRejection::Inactivity => Self::SessionExpired,
        }
    }
}

/// Durable per-device sessions with rotating refresh tokens.
///
/// Implementations must make each operation atomic with respect to the
/// others for the same principal; in particular, the device quota must hold
/// under concurrent logins.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session for a principal on a device.
    ///
    /// A live session on the same device is revoked first
    /// (`new_login_same_device`), then the oldest sessions by last activity
    /// are revoked (`max_sessions`) until the new one fits the quota.
    async fn open_session(
        &self,
        principal_id: PrincipalId,
        device: DeviceInfo,
        origin: Option<&str>,
    ) -> Result<SessionGrant, SessionStoreError>;

    /// Validate a presented refresh token and find its session.
    ///
    /// On success the session is returned unchanged; the caller follows up
    /// with [`SessionStore::refresh`] to rotate the token.
    async fn rotate_on_refresh(
        &self,
        refresh_token: &str,
        device_id: &DeviceId,
    ) -> Result<Session, SessionStoreError>;

    /// Issue a new refresh token for a live session; the old one stops working.
    async fn refresh(&self, session_id: SessionId) -> Result<SessionGrant, SessionStoreError>;

    /// Rotate only while `refresh_token` is still the session's current token.
    ///
    /// Compare-and-swap on the stored hash: of several callers that validated
    /// the same token, exactly one rotates and the rest get
    /// `InvalidRefreshToken`.
    async fn refresh_if_current(
        &self,
        session_id: SessionId,
        refresh_token: &str,
    ) -> Result<SessionGrant, SessionStoreError>;

    /// Revoke one session. `Ok(false)` when it was already revoked.
    async fn revoke(
        &self,
        session_id: SessionId,
        reason: RevocationReason,
    ) -> Result<bool, SessionStoreError>;

    /// Revoke every live session of a principal; returns how many.
    async fn revoke_all(
        &self,
        principal_id: PrincipalId,
        reason: RevocationReason,
    ) -> Result<u64, SessionStoreError>;

    /// Revoke every live session of a principal except `keep`.
    async fn revoke_all_except(
        &self,
        principal_id: PrincipalId,
        keep: SessionId,
        reason: RevocationReason,
    ) -> Result<u64, SessionStoreError>;

    /// Unrevoked sessions of a principal, most recently active first.
    ///
    /// Sessions past their refresh expiry, inactivity or maximum duration are
    /// still listed (and still count toward the device quota) until a refresh
    /// attempt revokes them or the sweep removes them; `Session::status`
    /// reports them as expired.
    async fn list_active(&self, principal_id: PrincipalId) -> Result<Vec<Session>, SessionStoreError>;

    /// Record activity on a live session.
    async fn touch(&self, session_id: SessionId, origin: Option<&str>) -> Result<(), SessionStoreError>;

    async fn get(&self, session_id: SessionId) -> Result<Option<Session>, SessionStoreError>;

    /// Hard-delete revoked or expired sessions; returns how many were removed.
    async fn sweep(&self) -> Result<u64, SessionStoreError>;

    fn policy(&self) -> &SessionPolicy;

    /// Full refresh flow: validate the presented token, then rotate it.
    ///
    /// The rotation is conditional on the presented token, so a replayed
    /// token racing the legitimate client yields at most one grant. Stores
    /// override this to run both steps under one lock or transaction.
    async fn exchange_refresh(
        &self,
        refresh_token: &str,
        device_id: &DeviceId,
    ) -> Result<(Session, SessionGrant), SessionStoreError> {
        let session = self.rotate_on_refresh(refresh_token, device_id).await?;
        let grant = self.refresh_if_current(session.id, refresh_token).await?;
        Ok((session, grant))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_token_failures_force_a_new_login() {
        assert!(SessionStoreError::DeviceMismatch.requires_reauthentication());
        assert!(SessionStoreError::SessionExpired.requires_reauthentication());
        assert!(!SessionStoreError::Storage("down".into()).requires_reauthentication());
        assert!(SessionStoreError::Storage("down".into()).is_retriable());
        assert!(!SessionStoreError::NotFound(SessionId::new()).is_retriable());
    }

    #[test]
    fn rejections_map_to_store_errors() {
        assert_eq!(
            SessionStoreError::from(RefreshRejection::Inactivity),
            SessionStoreError::SessionExpired
        );
        assert_eq!(
            SessionStoreError::from(RefreshRejection::RefreshExpired),
            SessionStoreError::RefreshExpired
        );
    }
}
