use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use precinct_core::{Clock, DeviceId, PrincipalId, SessionId, SystemClock};

use super::store::{SessionStore, SessionStoreError};
use super::token::hash_refresh_token;
use super::types::{
    DeviceInfo, RefreshRejection, RevocationReason, Session, SessionGrant, SessionPolicy,
};

#[derive(Debug, Default)]
struct Table {
    sessions: HashMap<SessionId, Session>,
    /// Current refresh-token hash -> session. Revoked sessions stay indexed
    /// until swept; rotation drops the previous hash.
    by_token_hash: HashMap<String, SessionId>,
}

impl Table {
    fn revoke_where(
        &mut self,
        reason: RevocationReason,
        now: chrono::DateTime<chrono::Utc>,
        mut pred: impl FnMut(&Session) -> bool,
    ) -> u64 {
        let mut count = 0;
        for s in self.sessions.values_mut() {
            if s.is_live() && pred(s) && s.revoke(reason, now) {
                count += 1;
            }
        }
        count
    }

    /// Run the refresh policy for the session holding `hash`, applying the
    /// revocation a rejection implies.
    fn check_presented(
        &mut self,
        hash: &str,
        device_id: &DeviceId,
        now: chrono::DateTime<chrono::Utc>,
        policy: &SessionPolicy,
    ) -> Result<Session, SessionStoreError> {
        let id = *self
            .by_token_hash
            .get(hash)
            .ok_or(SessionStoreError::InvalidRefreshToken)?;
        let session = self
            .sessions
            .get_mut(&id)
            .filter(|s| s.is_live())
            .ok_or(SessionStoreError::InvalidRefreshToken)?;

        if let Err(rejection) = session.check_refresh(device_id, now, policy) {
            if let Some(reason) = rejection.revocation() {
                session.revoke(reason, now);
            }
            if rejection == RefreshRejection::DeviceMismatch {
                warn!(
                    principal_id = %session.principal_id,
                    session_id = %session.id,
                    bound_device = %session.device.id,
                    presented_device = %device_id,
                    reason = RevocationReason::DeviceMismatch.as_str(),
                    "refresh token presented from another device; session revoked"
                );
            } else {
                info!(session_id = %session.id, ?rejection, "refresh rejected");
            }
            return Err(rejection.into());
        }

        Ok(session.clone())
    }

    fn rotate(
        &mut self,
        session_id: SessionId,
        now: chrono::DateTime<chrono::Utc>,
        policy: &SessionPolicy,
    ) -> Option<SessionGrant> {
        let session = self.sessions.get_mut(&session_id).filter(|s| s.is_live())?;
        let old_hash = session.refresh_token_hash.clone();
        let token = session.rotate(now, policy);
        let new_hash = session.refresh_token_hash.clone();
        let expires_at = session.refresh_expires_at;

        self.by_token_hash.remove(&old_hash);
        self.by_token_hash.insert(new_hash, session_id);

        Some(SessionGrant {
            session_id,
            refresh_token: token,
            expires_at,
        })
    }

    fn rotate_if_current(
        &mut self,
        session_id: SessionId,
        presented_hash: &str,
        now: chrono::DateTime<chrono::Utc>,
        policy: &SessionPolicy,
    ) -> Result<SessionGrant, SessionStoreError> {
        let current = self
            .sessions
            .get(&session_id)
            .is_some_and(|s| s.is_live() && s.refresh_token_hash == presented_hash);
        if !current {
            warn!(%session_id, "refresh token already rotated; rejecting concurrent use");
            return Err(SessionStoreError::InvalidRefreshToken);
        }
        self.rotate(session_id, now, policy)
            .ok_or(SessionStoreError::InvalidRefreshToken)
    }
}

/// In-memory session store.
///
/// Intended for tests/dev. Every operation holds the table lock for its whole
/// duration, so `open_session` never overshoots the device quota.
#[derive(Debug)]
pub struct InMemorySessionStore {
    table: RwLock<Table>,
    policy: SessionPolicy,
    clock: Arc<dyn Clock>,
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(SessionPolicy::default(), SystemClock::arc())
    }
}

impl InMemorySessionStore {
    pub fn new(policy: SessionPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            table: RwLock::new(Table::default()),
            policy,
            clock,
        }
    }

    /// Number of stored records, live or not.
    pub fn len(&self) -> usize {
        self.table.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn open_session(
        &self,
        principal_id: PrincipalId,
        device: DeviceInfo,
        origin: Option<&str>,
    ) -> Result<SessionGrant, SessionStoreError> {
        let now = self.clock.now();
        let mut t = self.table.write();

        let replaced = t.revoke_where(RevocationReason::NewLoginSameDevice, now, |s| {
            s.principal_id == principal_id && s.device.id == device.id
        });
        if replaced > 0 {
            info!(%principal_id, device_id = %device.id, "replaced session on same device");
        }

        let mut live: Vec<(SessionId, chrono::DateTime<chrono::Utc>)> = t
            .sessions
            .values()
            .filter(|s| s.principal_id == principal_id && s.is_live())
            .map(|s| (s.id, s.last_activity_at))
            .collect();
        live.sort_by_key(|(_, last)| *last);

        let quota = self.policy.max_devices.max(1);
        let excess = (live.len() + 1).saturating_sub(quota);
        for (id, _) in live.into_iter().take(excess) {
            if let Some(s) = t.sessions.get_mut(&id) {
                s.revoke(RevocationReason::MaxSessions, now);
                warn!(
                    %principal_id,
                    session_id = %id,
                    reason = RevocationReason::MaxSessions.as_str(),
                    "session evicted: device quota reached"
                );
            }
        }

        let (session, token) = Session::open(principal_id, device, origin, now, &self.policy);
        let grant = SessionGrant {
            session_id: session.id,
            refresh_token: token,
            expires_at: session.refresh_expires_at,
        };
        t.by_token_hash.insert(session.refresh_token_hash.clone(), session.id);
        t.sessions.insert(session.id, session);

        debug!(%principal_id, session_id = %grant.session_id, "session opened");
        Ok(grant)
    }

    async fn rotate_on_refresh(
        &self,
        refresh_token: &str,
        device_id: &DeviceId,
    ) -> Result<Session, SessionStoreError> {
        let now = self.clock.now();
        let hash = hash_refresh_token(refresh_token);
        self.table
            .write()
            .check_presented(&hash, device_id, now, &self.policy)
    }

    async fn refresh(&self, session_id: SessionId) -> Result<SessionGrant, SessionStoreError> {
        let now = self.clock.now();
        self.table
            .write()
            .rotate(session_id, now, &self.policy)
            .ok_or(SessionStoreError::NotFound(session_id))
    }

    async fn refresh_if_current(
        &self,
        session_id: SessionId,
        refresh_token: &str,
    ) -> Result<SessionGrant, SessionStoreError> {
        let now = self.clock.now();
        let hash = hash_refresh_token(refresh_token);
        self.table
            .write()
            .rotate_if_current(session_id, &hash, now, &self.policy)
    }

    async fn exchange_refresh(
        &self,
        refresh_token: &str,
        device_id: &DeviceId,
    ) -> Result<(Session, SessionGrant), SessionStoreError> {
        let now = self.clock.now();
        let hash = hash_refresh_token(refresh_token);
        let mut t = self.table.write();
        let session = t.check_presented(&hash, device_id, now, &self.policy)?;
        let grant = t.rotate_if_current(session.id, &hash, now, &self.policy)?;
        Ok((session, grant))
    }

    async fn revoke(
        &self,
        session_id: SessionId,
        reason: RevocationReason,
    ) -> Result<bool, SessionStoreError> {
        let now = self.clock.now();
        let mut t = self.table.write();
        let session = t
            .sessions
            .get_mut(&session_id)
            .ok_or(SessionStoreError::NotFound(session_id))?;
        let changed = session.revoke(reason, now);
        if changed {
            info!(%session_id, reason = reason.as_str(), "session revoked");
        }
        Ok(changed)
    }

    async fn revoke_all(
        &self,
        principal_id: PrincipalId,
        reason: RevocationReason,
    ) -> Result<u64, SessionStoreError> {
        let now = self.clock.now();
        let count = self
            .table
            .write()
            .revoke_where(reason, now, |s| s.principal_id == principal_id);
        info!(%principal_id, count, reason = reason.as_str(), "sessions revoked");
        Ok(count)
    }

    async fn revoke_all_except(
        &self,
        principal_id: PrincipalId,
        keep: SessionId,
        reason: RevocationReason,
    ) -> Result<u64, SessionStoreError> {
        let now = self.clock.now();
        let count = self
            .table
            .write()
            .revoke_where(reason, now, |s| s.principal_id == principal_id && s.id != keep);
        info!(%principal_id, kept = %keep, count, reason = reason.as_str(), "other sessions revoked");
        Ok(count)
    }

    async fn list_active(&self, principal_id: PrincipalId) -> Result<Vec<Session>, SessionStoreError> {
        let t = self.table.read();
        let mut out: Vec<Session> = t
            .sessions
            .values()
            .filter(|s| s.principal_id == principal_id && s.is_live())
            .cloned()
            .collect();
        out.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(out)
    }

    async fn touch(&self, session_id: SessionId, origin: Option<&str>) -> Result<(), SessionStoreError> {
        let now = self.clock.now();
        let mut t = self.table.write();
        let session = t
            .sessions
            .get_mut(&session_id)
            .filter(|s| s.is_live())
            .ok_or(SessionStoreError::NotFound(session_id))?;
        session.touch(now, origin);
        Ok(())
    }

    async fn get(&self, session_id: SessionId) -> Result<Option<Session>, SessionStoreError> {
        Ok(self.table.read().sessions.get(&session_id).cloned())
    }

    async fn sweep(&self) -> Result<u64, SessionStoreError> {
        let now = self.clock.now();
        let mut t = self.table.write();

        let doomed: Vec<(SessionId, String)> = t
            .sessions
            .values()
            .filter(|s| s.is_sweepable(now, &self.policy))
            .map(|s| (s.id, s.refresh_token_hash.clone()))
            .collect();

        for (id, hash) in &doomed {
            t.sessions.remove(id);
            if t.by_token_hash.get(hash) == Some(id) {
                t.by_token_hash.remove(hash);
            }
        }

        let count = doomed.len() as u64;
        if count > 0 {
            debug!(count, "swept sessions");
        }
        Ok(count)
    }

    fn policy(&self) -> &SessionPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use precinct_core::ManualClock;

    use crate::sessions::types::SessionStatus;

    fn device(id: &str) -> DeviceInfo {
        DeviceInfo::new(DeviceId::new(id).unwrap())
    }

    fn store_with(policy: SessionPolicy) -> (InMemorySessionStore, Arc<ManualClock>) {
        let clock = ManualClock::starting_now();
        (InMemorySessionStore::new(policy, clock.clone()), clock)
    }

    fn store() -> (InMemorySessionStore, Arc<ManualClock>) {
        store_with(SessionPolicy::default())
    }

    #[tokio::test]
    async fn second_login_on_same_device_replaces_the_first() {
        let (store, clock) = store();
        let p = PrincipalId::new();

        let first = store.open_session(p, device("A"), None).await.unwrap();
        clock.advance(Duration::minutes(1));
        let second = store.open_session(p, device("A"), None).await.unwrap();

        let active = store.list_active(p).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.session_id);

        let old = store.get(first.session_id).await.unwrap().unwrap();
        assert_eq!(old.revoked_reason, Some(RevocationReason::NewLoginSameDevice));

        let err = store
            .rotate_on_refresh(first.refresh_token.expose(), &DeviceId::new("A").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err, SessionStoreError::InvalidRefreshToken);
    }

    #[tokio::test]
    async fn quota_evicts_least_recently_active_device() {
        let policy = SessionPolicy {
            max_devices: 2,
            ..SessionPolicy::default()
        };
        let (store, clock) = store_with(policy);
        let p = PrincipalId::new();

        let a = store.open_session(p, device("A"), None).await.unwrap();
        clock.advance(Duration::minutes(1));
        let b = store.open_session(p, device("B"), None).await.unwrap();
        clock.advance(Duration::minutes(1));
        // A was opened first but is used more recently than B.
        store.touch(a.session_id, Some("10.0.0.1")).await.unwrap();
        clock.advance(Duration::minutes(1));
        let c = store.open_session(p, device("C"), None).await.unwrap();

        let ids: Vec<SessionId> = store.list_active(p).await.unwrap().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![c.session_id, a.session_id]);

        let evicted = store.get(b.session_id).await.unwrap().unwrap();
        assert_eq!(evicted.revoked_reason, Some(RevocationReason::MaxSessions));
    }

    #[tokio::test]
    async fn live_sessions_never_exceed_quota() {
        let (store, clock) = store();
        let p = PrincipalId::new();
        for i in 0..10 {
            store.open_session(p, device(&format!("d{i}")), None).await.unwrap();
            clock.advance(Duration::seconds(1));
            assert!(store.list_active(p).await.unwrap().len() <= store.policy().max_devices);
        }
    }

    #[tokio::test]
    async fn quota_is_per_principal() {
        let policy = SessionPolicy {
            max_devices: 1,
            ..SessionPolicy::default()
        };
        let (store, _clock) = store_with(policy);
        let (p1, p2) = (PrincipalId::new(), PrincipalId::new());
        store.open_session(p1, device("A"), None).await.unwrap();
        store.open_session(p2, device("A"), None).await.unwrap();
        assert_eq!(store.list_active(p1).await.unwrap().len(), 1);
        assert_eq!(store.list_active(p2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn wrong_device_revokes_and_poisons_the_token() {
        let (store, _clock) = store();
        let p = PrincipalId::new();
        let grant = store.open_session(p, device("A"), None).await.unwrap();
        let token = grant.refresh_token.expose();

        let err = store
            .rotate_on_refresh(token, &DeviceId::new("B").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err, SessionStoreError::DeviceMismatch);

        let session = store.get(grant.session_id).await.unwrap().unwrap();
        assert!(session.revoked);
        assert_eq!(session.revoked_reason, Some(RevocationReason::DeviceMismatch));

        let retry = store
            .rotate_on_refresh(token, &DeviceId::new("A").unwrap())
            .await
            .unwrap_err();
        assert_eq!(retry, SessionStoreError::InvalidRefreshToken);
    }

    #[tokio::test]
    async fn inactivity_expires_and_revokes() {
        let (store, clock) = store();
        let p = PrincipalId::new();
        let grant = store.open_session(p, device("A"), None).await.unwrap();

        clock.advance(store.policy().inactivity_timeout + Duration::seconds(1));
        let err = store
            .rotate_on_refresh(grant.refresh_token.expose(), &DeviceId::new("A").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err, SessionStoreError::SessionExpired);

        let session = store.get(grant.session_id).await.unwrap().unwrap();
        assert_eq!(session.revoked_reason, Some(RevocationReason::Inactivity));
    }

    #[tokio::test]
    async fn max_duration_expires_even_when_kept_busy() {
        let policy = SessionPolicy {
            refresh_ttl: Duration::days(2),
            max_session_duration: Duration::days(5),
            inactivity_timeout: Duration::days(1),
            max_devices: 3,
        };
        let (store, clock) = store_with(policy);
        let p = PrincipalId::new();
        let a = DeviceId::new("A").unwrap();
        let mut grant = store.open_session(p, device("A"), None).await.unwrap();

        for _ in 0..5 {
            clock.advance(Duration::hours(23));
            let (_, next) = store
                .exchange_refresh(grant.refresh_token.expose(), &a)
                .await
                .unwrap();
            grant = next;
        }
        clock.advance(Duration::hours(23));
        let err = store
            .rotate_on_refresh(grant.refresh_token.expose(), &a)
            .await
            .unwrap_err();
        assert_eq!(err, SessionStoreError::SessionExpired);
        let session = store.get(grant.session_id).await.unwrap().unwrap();
        assert_eq!(session.revoked_reason, Some(RevocationReason::MaxSessionDuration));
    }

    #[tokio::test]
    async fn refresh_expiry_is_reported_without_revoking() {
        let policy = SessionPolicy {
            refresh_ttl: Duration::hours(1),
            ..SessionPolicy::default()
        };
        let (store, clock) = store_with(policy);
        let grant = store.open_session(PrincipalId::new(), device("A"), None).await.unwrap();

        clock.advance(Duration::hours(1));
        let err = store
            .rotate_on_refresh(grant.refresh_token.expose(), &DeviceId::new("A").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err, SessionStoreError::RefreshExpired);
        assert!(!store.get(grant.session_id).await.unwrap().unwrap().revoked);
    }

    #[tokio::test]
    async fn rotation_invalidates_the_previous_token() {
        let (store, clock) = store();
        let a = DeviceId::new("A").unwrap();
        let grant = store.open_session(PrincipalId::new(), device("A"), None).await.unwrap();

        clock.advance(Duration::minutes(10));
        let (session, next) = store.exchange_refresh(grant.refresh_token.expose(), &a).await.unwrap();
        assert_eq!(session.id, grant.session_id);
        assert_ne!(next.refresh_token, grant.refresh_token);
        assert!(next.expires_at > grant.expires_at);

        let err = store
            .rotate_on_refresh(grant.refresh_token.expose(), &a)
            .await
            .unwrap_err();
        assert_eq!(err, SessionStoreError::InvalidRefreshToken);
        assert!(store.rotate_on_refresh(next.refresh_token.expose(), &a).await.is_ok());
    }

    #[tokio::test]
    async fn one_token_validated_twice_rotates_once() {
        let (store, _clock) = store();
        let a = DeviceId::new("A").unwrap();
        let grant = store.open_session(PrincipalId::new(), device("A"), None).await.unwrap();
        let token = grant.refresh_token.expose();

        // Both holders pass validation before either rotates.
        let first = store.rotate_on_refresh(token, &a).await.unwrap();
        let second = store.rotate_on_refresh(token, &a).await.unwrap();

        let winner = store.refresh_if_current(first.id, token).await.unwrap();
        assert_eq!(
            store.refresh_if_current(second.id, token).await.unwrap_err(),
            SessionStoreError::InvalidRefreshToken
        );
        assert!(store.rotate_on_refresh(winner.refresh_token.expose(), &a).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_exchanges_of_one_token_yield_one_grant() {
        let (store, _clock) = store();
        let store = Arc::new(store);
        let grant = store.open_session(PrincipalId::new(), device("A"), None).await.unwrap();
        let token = grant.refresh_token.expose().to_string();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let token = token.clone();
                tokio::spawn(async move {
                    store
                        .exchange_refresh(&token, &DeviceId::new("A").unwrap())
                        .await
                })
            })
            .collect();

        let mut granted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => granted += 1,
                Err(e) => assert_eq!(e, SessionStoreError::InvalidRefreshToken),
            }
        }
        assert_eq!(granted, 1);
    }

    #[tokio::test]
    async fn stale_sessions_stay_listed_as_expired_until_swept() {
        let policy = SessionPolicy {
            refresh_ttl: Duration::hours(1),
            ..SessionPolicy::default()
        };
        let (store, clock) = store_with(policy);
        let p = PrincipalId::new();
        let grant = store.open_session(p, device("A"), None).await.unwrap();

        clock.advance(Duration::hours(2));
        let listed = store.list_active(p).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status(clock.now(), &policy), SessionStatus::Expired);

        assert_eq!(store.sweep().await.unwrap(), 1);
        assert!(store.get(grant.session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn raw_token_is_never_stored() {
        let (store, _clock) = store();
        let grant = store.open_session(PrincipalId::new(), device("A"), None).await.unwrap();
        let session = store.get(grant.session_id).await.unwrap().unwrap();
        assert_ne!(session.refresh_token_hash, grant.refresh_token.expose());
        assert_eq!(session.refresh_token_hash, grant.refresh_token.hash());
    }

    #[tokio::test]
    async fn revoke_semantics() {
        let (store, _clock) = store();
        let grant = store.open_session(PrincipalId::new(), device("A"), None).await.unwrap();

        assert!(store.revoke(grant.session_id, RevocationReason::AdminRevoked).await.unwrap());
        assert!(!store.revoke(grant.session_id, RevocationReason::ExplicitLogout).await.unwrap());
        assert_eq!(
            store.get(grant.session_id).await.unwrap().unwrap().revoked_reason,
            Some(RevocationReason::AdminRevoked)
        );

        let unknown = SessionId::new();
        assert_eq!(
            store.revoke(unknown, RevocationReason::AdminRevoked).await,
            Err(SessionStoreError::NotFound(unknown))
        );
        assert_eq!(
            store.refresh(grant.session_id).await.unwrap_err(),
            SessionStoreError::NotFound(grant.session_id)
        );
    }

    #[tokio::test]
    async fn revoke_all_and_except() {
        let (store, clock) = store();
        let p = PrincipalId::new();
        let a = store.open_session(p, device("A"), None).await.unwrap();
        clock.advance(Duration::seconds(1));
        store.open_session(p, device("B"), None).await.unwrap();
        clock.advance(Duration::seconds(1));
        store.open_session(p, device("C"), None).await.unwrap();

        let n = store
            .revoke_all_except(p, a.session_id, RevocationReason::ExplicitLogout)
            .await
            .unwrap();
        assert_eq!(n, 2);
        let active = store.list_active(p).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, a.session_id);

        assert_eq!(store.revoke_all(p, RevocationReason::AdminRevokedAll).await.unwrap(), 1);
        assert!(store.list_active(p).await.unwrap().is_empty());
        assert_eq!(store.revoke_all(p, RevocationReason::AdminRevokedAll).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn touch_updates_origin_and_activity() {
        let (store, clock) = store();
        let grant = store.open_session(PrincipalId::new(), device("A"), Some("10.1.1.1")).await.unwrap();
        clock.advance(Duration::minutes(3));
        store.touch(grant.session_id, Some("10.2.2.2")).await.unwrap();

        let s = store.get(grant.session_id).await.unwrap().unwrap();
        assert_eq!(s.last_origin.as_deref(), Some("10.2.2.2"));
        assert_eq!(s.last_activity_at, clock.now());
        assert!(s.last_activity_at > s.started_at);
    }

    #[tokio::test]
    async fn sweep_removes_only_terminal_or_expired_sessions() {
        let (store, clock) = store();
        let p = PrincipalId::new();
        let revoked = store.open_session(p, device("A"), None).await.unwrap();
        store.revoke(revoked.session_id, RevocationReason::ExplicitLogout).await.unwrap();
        let live = store.open_session(p, device("B"), None).await.unwrap();

        assert_eq!(store.sweep().await.unwrap(), 1);
        assert_eq!(store.sweep().await.unwrap(), 0);
        assert!(store.get(revoked.session_id).await.unwrap().is_none());
        assert!(store.get(live.session_id).await.unwrap().is_some());

        clock.advance(store.policy().refresh_ttl);
        assert_eq!(store.sweep().await.unwrap(), 1);
        assert!(store.is_empty());
    }
}
