//! Read-only adapter over the external `users` table.
//!
//! Expected columns: `id UUID`, `badge TEXT`, `role TEXT`,
//! `commissariat_id UUID NULL`, `active BOOLEAN`, `password_hash TEXT`.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{FromRow, PgPool, Row};
use tracing::{instrument, warn};
use uuid::Uuid;

use precinct_auth::{Principal, Role};
use precinct_core::{OrgUnitId, PrincipalId};

use super::{DirectoryError, PrincipalDirectory, PrincipalRecord};

const SELECT_USER: &str = r#"
    SELECT id, badge, role, commissariat_id, active, password_hash
    FROM users
"#;

#[derive(Debug, Clone)]
pub struct PostgresPrincipalDirectory {
    pool: Arc<PgPool>,
}

impl PostgresPrincipalDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl PrincipalDirectory for PostgresPrincipalDirectory {
    #[instrument(skip(self), err)]
    async fn find_by_badge(&self, badge: &str) -> Result<Option<PrincipalRecord>, DirectoryError> {
        let row = sqlx::query(&format!("{SELECT_USER} WHERE lower(badge) = lower($1)"))
            .bind(badge.trim())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_badge", e))?;

        row.as_ref().map(decode).transpose()
    }

    #[instrument(skip(self), fields(principal_id = %id), err)]
    async fn find_by_id(&self, id: PrincipalId) -> Result<Option<PrincipalRecord>, DirectoryError> {
        let row = sqlx::query(&format!("{SELECT_USER} WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_id", e))?;

        row.as_ref().map(decode).transpose()
    }

    #[instrument(skip(self), fields(principal_id = %id), err)]
    async fn org_unit_of(&self, id: PrincipalId) -> Result<Option<OrgUnitId>, DirectoryError> {
        let row = sqlx::query("SELECT commissariat_id FROM users WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("org_unit_of", e))?;

        let unit: Option<Uuid> = match row {
            Some(row) => row
                .try_get("commissariat_id")
                .map_err(|e| map_sqlx_error("org_unit_of", e))?,
            None => None,
        };
        Ok(unit.map(OrgUnitId::from_uuid))
    }
}

#[derive(Debug)]
struct UserRow {
    id: Uuid,
    badge: String,
    role: String,
    commissariat_id: Option<Uuid>,
    active: bool,
    password_hash: String,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for UserRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(UserRow {
            id: row.try_get("id")?,
            badge: row.try_get("badge")?,
            role: row.try_get("role")?,
            commissariat_id: row.try_get("commissariat_id")?,
            active: row.try_get("active")?,
            password_hash: row.try_get("password_hash")?,
        })
    }
}

impl TryFrom<UserRow> for PrincipalRecord {
    type Error = DirectoryError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = Role::parse(&row.role).ok_or_else(|| {
            warn!(principal_id = %row.id, role = %row.role, "user has unknown role");
            DirectoryError::Corrupt(format!("unknown role '{}' for user {}", row.role, row.id))
        })?;

        Ok(PrincipalRecord {
            principal: Principal {
                id: PrincipalId::from_uuid(row.id),
                badge: row.badge,
                role,
                org_unit_id: row.commissariat_id.map(OrgUnitId::from_uuid),
                active: row.active,
            },
            password_hash: row.password_hash,
        })
    }
}

fn decode(row: &sqlx::postgres::PgRow) -> Result<PrincipalRecord, DirectoryError> {
    let raw = UserRow::from_row(row).map_err(|e| map_sqlx_error("decode_user", e))?;
    PrincipalRecord::try_from(raw)
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> DirectoryError {
    match err {
        sqlx::Error::Database(db_err) => {
            DirectoryError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::ColumnNotFound(col) => {
            DirectoryError::Corrupt(format!("users table is missing column '{col}'"))
        }
        _ => DirectoryError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
