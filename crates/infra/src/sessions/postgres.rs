//! Postgres-backed session store.
//!
//! ## Quota under concurrent logins
//!
//! `open_session` takes a transaction-scoped advisory lock keyed on the
//! principal id before counting live sessions, so two concurrent logins for
//! the same principal are serialized and the device quota cannot be
//! overshot.
//!
//! ## Refresh-token rotation
//!
//! `exchange_refresh` locks the row matching the presented hash with
//! `FOR UPDATE`, runs the refresh policy and rotates in the same
//! transaction. The rotating `UPDATE` is additionally guarded on the
//! presented hash, so a token replayed concurrently with its legitimate use
//! finds no matching row once the winner commits.
//!
//! ## Error Mapping
//!
//! Every SQLx error becomes `SessionStoreError::Storage`. Callers treat it as
//! retriable for reads only; rotations and revocations are never retried
//! automatically.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use precinct_core::{Clock, DeviceId, PrincipalId, SessionId};

use super::store::{SessionStore, SessionStoreError};
use super::token::{hash_refresh_token, RefreshToken};
use super::types::{
    DeviceInfo, RefreshRejection, RevocationReason, Session, SessionGrant, SessionPolicy,
};

/// DDL for the `sessions` table, applied by [`PostgresSessionStore::ensure_schema`].
pub const SCHEMA: &str = include_str!("schema.sql");

const SELECT_SESSION: &str = r#"
    SELECT
        id,
        principal_id,
        device_id,
        device_name,
        device_platform,
        refresh_token_hash,
        refresh_expires_at,
        started_at,
        last_activity_at,
        last_origin,
        active,
        revoked,
        revoked_reason,
        revoked_at
    FROM sessions
"#;

const LIVE: &str = "active AND NOT revoked";

#[derive(Debug, Clone)]
pub struct PostgresSessionStore {
    pool: Arc<PgPool>,
    policy: SessionPolicy,
    clock: Arc<dyn Clock>,
}

impl PostgresSessionStore {
    pub fn new(pool: PgPool, policy: SessionPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool: Arc::new(pool),
            policy,
            clock,
        }
    }

    /// Create the `sessions` table and its indexes if missing.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), SessionStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn revoke_ids(
        tx: &mut sqlx::PgConnection,
        ids: &[Uuid],
        reason: RevocationReason,
        now: DateTime<Utc>,
    ) -> Result<u64, SessionStoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "UPDATE sessions SET active = FALSE, revoked = TRUE, revoked_reason = $2, revoked_at = $3 \
             WHERE id = ANY($1) AND {LIVE}"
        );
        let result = sqlx::query(&sql)
            .bind(ids)
            .bind(reason.as_str())
            .bind(now)
            .execute(tx)
            .await
            .map_err(|e| map_sqlx_error("revoke_ids", e))?;
        Ok(result.rows_affected())
    }

    /// Lock the session holding `hash` and run the refresh policy against it.
    ///
    /// A rejection's revocation is written to `conn` but not committed.
    async fn check_presented(
        &self,
        conn: &mut sqlx::PgConnection,
        hash: &str,
        device_id: &DeviceId,
        now: DateTime<Utc>,
    ) -> Result<RefreshCheck, SessionStoreError> {
        let row = sqlx::query(&format!(
            "{SELECT_SESSION} WHERE refresh_token_hash = $1 FOR UPDATE"
        ))
        .bind(hash)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("select_by_token", e))?;

        let session = match row {
            Some(row) => decode(&row)?,
            None => return Ok(RefreshCheck::Rejected(SessionStoreError::InvalidRefreshToken)),
        };
        if !session.is_live() {
            return Ok(RefreshCheck::Rejected(SessionStoreError::InvalidRefreshToken));
        }

        let Err(rejection) = session.check_refresh(device_id, now, &self.policy) else {
            return Ok(RefreshCheck::Accepted(session));
        };
        if let Some(reason) = rejection.revocation() {
            Self::revoke_ids(conn, &[*session.id.as_uuid()], reason, now).await?;
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
        Ok(RefreshCheck::Rejected(rejection.into()))
    }

    /// Rotate `session_id` only while `presented_hash` is its current token.
    async fn rotate_current(
        &self,
        conn: &mut sqlx::PgConnection,
        session_id: SessionId,
        presented_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionGrant, SessionStoreError> {
        let token = RefreshToken::generate();
        let expires_at = now + self.policy.refresh_ttl;

        let result = sqlx::query(&format!(
            "UPDATE sessions SET refresh_token_hash = $3, refresh_expires_at = $4, last_activity_at = $5 \
             WHERE id = $1 AND refresh_token_hash = $2 AND {LIVE}"
        ))
        .bind(session_id.as_uuid())
        .bind(presented_hash)
        .bind(token.hash())
        .bind(expires_at)
        .bind(now)
        .execute(conn)
        .await
        .map_err(|e| map_sqlx_error("rotate_current", e))?;

        if result.rows_affected() == 0 {
            warn!(%session_id, "refresh token already rotated; rejecting concurrent use");
            return Err(SessionStoreError::InvalidRefreshToken);
        }
        Ok(SessionGrant {
            session_id,
            refresh_token: token,
            expires_at,
        })
    }
}

/// Outcome of the refresh policy inside a rotation transaction.
enum RefreshCheck {
    Accepted(Session),
    /// Any revocation the rejection implies is pending in the transaction.
    Rejected(SessionStoreError),
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    #[instrument(skip(self, device, origin), fields(principal_id = %principal_id), err)]
    async fn open_session(
        &self,
        principal_id: PrincipalId,
        device: DeviceInfo,
        origin: Option<&str>,
    ) -> Result<SessionGrant, SessionStoreError> {
        let now = self.clock.now();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(principal_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("advisory_lock", e))?;

        let same_device: Vec<Uuid> = sqlx::query(&format!(
            "SELECT id FROM sessions WHERE principal_id = $1 AND device_id = $2 AND {LIVE}"
        ))
        .bind(principal_id.as_uuid())
        .bind(device.id.as_str())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("select_same_device", e))?
        .iter()
        .map(|row| row.try_get::<Uuid, _>("id"))
        .collect::<Result<_, _>>()
        .map_err(|e| map_sqlx_error("select_same_device", e))?;

        let replaced =
            Self::revoke_ids(&mut tx, &same_device, RevocationReason::NewLoginSameDevice, now).await?;
        if replaced > 0 {
            info!(%principal_id, device_id = %device.id, "replaced session on same device");
        }

        let live: Vec<Uuid> = sqlx::query(&format!(
            "SELECT id FROM sessions WHERE principal_id = $1 AND {LIVE} ORDER BY last_activity_at ASC"
        ))
        .bind(principal_id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("select_live", e))?
        .iter()
        .map(|row| row.try_get::<Uuid, _>("id"))
        .collect::<Result<_, _>>()
        .map_err(|e| map_sqlx_error("select_live", e))?;

        let quota = self.policy.max_devices.max(1);
        let excess = (live.len() + 1).saturating_sub(quota);
        let evicted = &live[..excess];
        Self::revoke_ids(&mut tx, evicted, RevocationReason::MaxSessions, now).await?;
        for id in evicted {
            warn!(
                %principal_id,
                session_id = %id,
                reason = RevocationReason::MaxSessions.as_str(),
                "session evicted: device quota reached"
            );
        }

        let (session, token) = Session::open(principal_id, device, origin, now, &self.policy);
        sqlx::query(
            r#"
            INSERT INTO sessions (
                id,
                principal_id,
                device_id,
                device_name,
                device_platform,
                refresh_token_hash,
                refresh_expires_at,
                started_at,
                last_activity_at,
                last_origin,
                active,
                revoked
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, TRUE, FALSE)
            "#,
        )
        .bind(session.id.as_uuid())
        .bind(session.principal_id.as_uuid())
        .bind(session.device.id.as_str())
        .bind(session.device.name.as_deref())
        .bind(session.device.platform.as_deref())
        .bind(&session.refresh_token_hash)
        .bind(session.refresh_expires_at)
        .bind(session.started_at)
        .bind(session.last_activity_at)
        .bind(session.last_origin.as_deref())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_session", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;

        debug!(%principal_id, session_id = %session.id, "session opened");
        Ok(SessionGrant {
            session_id: session.id,
            refresh_token: token,
            expires_at: session.refresh_expires_at,
        })
    }

    #[instrument(skip(self, refresh_token), fields(device_id = %device_id), err)]
    async fn rotate_on_refresh(
        &self,
        refresh_token: &str,
        device_id: &DeviceId,
    ) -> Result<Session, SessionStoreError> {
        let now = self.clock.now();
        let hash = hash_refresh_token(refresh_token);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        let check = self.check_presented(&mut tx, &hash, device_id, now).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;

        match check {
            RefreshCheck::Accepted(session) => Ok(session),
            RefreshCheck::Rejected(err) => Err(err),
        }
    }

    #[instrument(skip(self), fields(session_id = %session_id), err)]
    async fn refresh(&self, session_id: SessionId) -> Result<SessionGrant, SessionStoreError> {
        let now = self.clock.now();
        let token = RefreshToken::generate();
        let expires_at = now + self.policy.refresh_ttl;

        let result = sqlx::query(&format!(
            "UPDATE sessions SET refresh_token_hash = $2, refresh_expires_at = $3, last_activity_at = $4 \
             WHERE id = $1 AND {LIVE}"
        ))
        .bind(session_id.as_uuid())
        .bind(token.hash())
        .bind(expires_at)
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("refresh", e))?;

        if result.rows_affected() == 0 {
            return Err(SessionStoreError::NotFound(session_id));
        }
        Ok(SessionGrant {
            session_id,
            refresh_token: token,
            expires_at,
        })
    }

    #[instrument(skip(self, refresh_token), fields(session_id = %session_id), err)]
    async fn refresh_if_current(
        &self,
        session_id: SessionId,
        refresh_token: &str,
    ) -> Result<SessionGrant, SessionStoreError> {
        let now = self.clock.now();
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        self.rotate_current(&mut conn, session_id, &hash_refresh_token(refresh_token), now)
            .await
    }

    #[instrument(skip(self, refresh_token), fields(device_id = %device_id), err)]
    async fn exchange_refresh(
        &self,
        refresh_token: &str,
        device_id: &DeviceId,
    ) -> Result<(Session, SessionGrant), SessionStoreError> {
        let now = self.clock.now();
        let hash = hash_refresh_token(refresh_token);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let session = match self.check_presented(&mut tx, &hash, device_id, now).await? {
            RefreshCheck::Accepted(session) => session,
            RefreshCheck::Rejected(err) => {
                tx.commit()
                    .await
                    .map_err(|e| map_sqlx_error("commit", e))?;
                return Err(err);
            }
        };
        let grant = self.rotate_current(&mut tx, session.id, &hash, now).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
        Ok((session, grant))
    }

    #[instrument(skip(self), fields(session_id = %session_id, reason = reason.as_str()), err)]
    async fn revoke(
        &self,
        session_id: SessionId,
        reason: RevocationReason,
    ) -> Result<bool, SessionStoreError> {
        let now = self.clock.now();
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;

        let changed = Self::revoke_ids(&mut conn, &[*session_id.as_uuid()], reason, now).await?;
        if changed > 0 {
            info!(%session_id, reason = reason.as_str(), "session revoked");
            return Ok(true);
        }

        let exists = sqlx::query("SELECT 1 FROM sessions WHERE id = $1")
            .bind(session_id.as_uuid())
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("revoke_lookup", e))?
            .is_some();
        if exists {
            Ok(false)
        } else {
            Err(SessionStoreError::NotFound(session_id))
        }
    }

    #[instrument(skip(self), fields(principal_id = %principal_id, reason = reason.as_str()), err)]
    async fn revoke_all(
        &self,
        principal_id: PrincipalId,
        reason: RevocationReason,
    ) -> Result<u64, SessionStoreError> {
        let result = sqlx::query(&format!(
            "UPDATE sessions SET active = FALSE, revoked = TRUE, revoked_reason = $2, revoked_at = $3 \
             WHERE principal_id = $1 AND {LIVE}"
        ))
        .bind(principal_id.as_uuid())
        .bind(reason.as_str())
        .bind(self.clock.now())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("revoke_all", e))?;

        let count = result.rows_affected();
        info!(%principal_id, count, reason = reason.as_str(), "sessions revoked");
        Ok(count)
    }

    #[instrument(skip(self), fields(principal_id = %principal_id, keep = %keep), err)]
    async fn revoke_all_except(
        &self,
        principal_id: PrincipalId,
        keep: SessionId,
        reason: RevocationReason,
    ) -> Result<u64, SessionStoreError> {
        let result = sqlx::query(&format!(
            "UPDATE sessions SET active = FALSE, revoked = TRUE, revoked_reason = $3, revoked_at = $4 \
             WHERE principal_id = $1 AND id <> $2 AND {LIVE}"
        ))
        .bind(principal_id.as_uuid())
        .bind(keep.as_uuid())
        .bind(reason.as_str())
        .bind(self.clock.now())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("revoke_all_except", e))?;

        let count = result.rows_affected();
        info!(%principal_id, kept = %keep, count, reason = reason.as_str(), "other sessions revoked");
        Ok(count)
    }

    #[instrument(skip(self), fields(principal_id = %principal_id), err)]
    async fn list_active(&self, principal_id: PrincipalId) -> Result<Vec<Session>, SessionStoreError> {
        let rows = sqlx::query(&format!(
            "{SELECT_SESSION} WHERE principal_id = $1 AND {LIVE} ORDER BY last_activity_at DESC"
        ))
        .bind(principal_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_active", e))?;

        rows.iter().map(decode).collect()
    }

    #[instrument(skip(self, origin), fields(session_id = %session_id), err)]
    async fn touch(&self, session_id: SessionId, origin: Option<&str>) -> Result<(), SessionStoreError> {
        let result = sqlx::query(&format!(
            "UPDATE sessions SET last_activity_at = $2, last_origin = COALESCE($3, last_origin) \
             WHERE id = $1 AND {LIVE}"
        ))
        .bind(session_id.as_uuid())
        .bind(self.clock.now())
        .bind(origin)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("touch", e))?;

        if result.rows_affected() == 0 {
            return Err(SessionStoreError::NotFound(session_id));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(session_id = %session_id), err)]
    async fn get(&self, session_id: SessionId) -> Result<Option<Session>, SessionStoreError> {
        let row = sqlx::query(&format!("{SELECT_SESSION} WHERE id = $1"))
            .bind(session_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        row.as_ref().map(decode).transpose()
    }

    #[instrument(skip(self), err)]
    async fn sweep(&self) -> Result<u64, SessionStoreError> {
        let now = self.clock.now();
        let started_before = now - self.policy.max_session_duration;

        let result = sqlx::query(
            r#"
            DELETE FROM sessions
            WHERE revoked
               OR NOT active
               OR refresh_expires_at <= $1
               OR started_at < $2
            "#,
        )
        .bind(now)
        .bind(started_before)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("sweep", e))?;

        let count = result.rows_affected();
        if count > 0 {
            debug!(count, "swept sessions");
        }
        Ok(count)
    }

    fn policy(&self) -> &SessionPolicy {
        &self.policy
    }
}

#[derive(Debug)]
struct SessionRow {
    id: Uuid,
    principal_id: Uuid,
    device_id: String,
    device_name: Option<String>,
    device_platform: Option<String>,
    refresh_token_hash: String,
    refresh_expires_at: DateTime<Utc>,
    started_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    last_origin: Option<String>,
    active: bool,
    revoked: bool,
    revoked_reason: Option<String>,
    revoked_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for SessionRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(SessionRow {
            id: row.try_get("id")?,
            principal_id: row.try_get("principal_id")?,
            device_id: row.try_get("device_id")?,
            device_name: row.try_get("device_name")?,
            device_platform: row.try_get("device_platform")?,
            refresh_token_hash: row.try_get("refresh_token_hash")?,
            refresh_expires_at: row.try_get("refresh_expires_at")?,
            started_at: row.try_get("started_at")?,
            last_activity_at: row.try_get("last_activity_at")?,
            last_origin: row.try_get("last_origin")?,
            active: row.try_get("active")?,
            revoked: row.try_get("revoked")?,
            revoked_reason: row.try_get("revoked_reason")?,
            revoked_at: row.try_get("revoked_at")?,
        })
    }
}

impl TryFrom<SessionRow> for Session {
    type Error = SessionStoreError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let device_id = DeviceId::new(&row.device_id)
            .map_err(|e| SessionStoreError::Storage(format!("corrupt device_id on session {}: {e}", row.id)))?;
        let revoked_reason = row
            .revoked_reason
            .map(|r| {
                RevocationReason::parse(&r).ok_or_else(|| {
                    SessionStoreError::Storage(format!("unknown revoked_reason '{r}' on session {}", row.id))
                })
            })
            .transpose()?;

        Ok(Session {
            id: SessionId::from_uuid(row.id),
            principal_id: PrincipalId::from_uuid(row.principal_id),
            device: DeviceInfo {
                id: device_id,
                name: row.device_name,
                platform: row.device_platform,
            },
            refresh_token_hash: row.refresh_token_hash,
            refresh_expires_at: row.refresh_expires_at,
            started_at: row.started_at,
            last_activity_at: row.last_activity_at,
            last_origin: row.last_origin,
            active: row.active,
            revoked: row.revoked,
            revoked_reason,
            revoked_at: row.revoked_at,
        })
    }
}

fn decode(row: &sqlx::postgres::PgRow) -> Result<Session, SessionStoreError> {
    let raw = SessionRow::from_row(row).map_err(|e| map_sqlx_error("decode_session", e))?;
    Session::try_from(raw)
}

/// Map SQLx errors to `SessionStoreError::Storage`, keeping the failing operation.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> SessionStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // Refresh-token hash collision; never retried automatically.
                Some("23505") => SessionStoreError::Storage(format!("{msg} (unique violation)")),
                _ => SessionStoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            SessionStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::PoolTimedOut => {
            SessionStoreError::Storage(format!("connection pool timed out in {}", operation))
        }
        _ => SessionStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_declares_unique_token_hash() {
        assert!(SCHEMA.contains("CREATE UNIQUE INDEX IF NOT EXISTS sessions_refresh_token_hash_idx"));
        assert!(SCHEMA.contains("refresh_token_hash  TEXT NOT NULL"));
    }

    fn row(reason: Option<&str>, device: &str) -> SessionRow {
        let now = Utc::now();
        SessionRow {
            id: Uuid::now_v7(),
            principal_id: Uuid::now_v7(),
            device_id: device.to_string(),
            device_name: Some("Pixel".into()),
            device_platform: None,
            refresh_token_hash: "ab".repeat(32),
            refresh_expires_at: now,
            started_at: now,
            last_activity_at: now,
            last_origin: None,
            active: reason.is_none(),
            revoked: reason.is_some(),
            revoked_reason: reason.map(str::to_string),
            revoked_at: reason.map(|_| now),
        }
    }

    #[test]
    fn rows_decode_into_sessions() {
        let s = Session::try_from(row(Some("device_mismatch"), "tablet")).unwrap();
        assert_eq!(s.revoked_reason, Some(RevocationReason::DeviceMismatch));
        assert_eq!(s.device.id.as_str(), "tablet");
        assert_eq!(s.device.name.as_deref(), Some("Pixel"));
    }

    #[test]
    fn corrupt_rows_are_storage_errors() {
        assert!(matches!(
            Session::try_from(row(Some("stolen"), "tablet")),
            Err(SessionStoreError::Storage(_))
        ));
        assert!(matches!(
            Session::try_from(row(None, "  ")),
            Err(SessionStoreError::Storage(_))
        ));
    }
}
