//! Postgres-backed account store.
//!
//! ## Error mapping
//!
//! | SQLx error | Postgres code | StoreError |
//! |------------|---------------|------------|
//! | unique violation on `users_email_active` | `23505` | `EmailTaken` |
//! | unique violation on `passwords_one_active` | `23505` | `ActivePasswordExists` |
//! | any other unique violation | `23505` | `Conflict` |
//! | serialization failure / deadlock | `40001` / `40P01` | `Conflict` |
//! | anything else | | `Backend` |
//!
//! Store invariants are enforced by the schema (partial unique indexes), so a
//! concurrent writer that slips past a read check still fails at insert time.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use khata_auth::store::{AccountStore, AccountTransaction, StoreError, StoreResult};
use khata_auth::{
    Business, BusinessUser, Invitation, Password, Session, User, VerificationKind,
    VerificationRequest,
};
use khata_core::{BusinessId, UserId, VerificationRequestId};

const USER_COLUMNS: &str = "id, human_id, name, email, phone, avatar, email_verified, phone_verified, \
     created_at, created_by, updated_at, updated_by, deactivated_at, deactivated_by, deleted_at, deleted_by";

const PASSWORD_COLUMNS: &str = "id, user_id, hash, created_at, created_by, deleted_at, deleted_by";

const VERIFICATION_COLUMNS: &str =
    "id, user_id, kind, code, generation, expires_at, consumed_at, created_at";

const BUSINESS_COLUMNS: &str = "b.id, b.name, b.description, b.logo, b.industry, b.primary_currency, \
     b.currencies, b.owner_id, b.created_at, b.created_by, b.updated_at, b.updated_by, b.deleted_at, b.deleted_by";

#[derive(Debug, Clone)]
pub struct PostgresAccountStore {
    pool: Arc<PgPool>,
}

impl PostgresAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl AccountStore for PostgresAccountStore {
    async fn begin(&self) -> StoreResult<Box<dyn AccountTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PostgresAccountTransaction { tx }))
    }

    #[instrument(skip(self), err)]
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND deleted_at IS NULL");
        sqlx::query(&sql)
            .bind(email)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_user_by_email", e))?
            .map(|row| user_from_row(&row))
            .transpose()
    }

    #[instrument(skip(self), err)]
    async fn find_user_by_id(&self, id: UserId) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL");
        sqlx::query(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_user_by_id", e))?
            .map(|row| user_from_row(&row))
            .transpose()
    }

    async fn find_active_password(&self, user_id: UserId) -> StoreResult<Option<Password>> {
        let sql = format!(
            "SELECT {PASSWORD_COLUMNS} FROM passwords WHERE user_id = $1 AND deleted_at IS NULL"
        );
        sqlx::query(&sql)
            .bind(Uuid::from(user_id))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_active_password", e))?
            .map(|row| password_from_row(&row))
            .transpose()
    }

    async fn find_recent_passwords(&self, user_id: UserId, limit: usize) -> StoreResult<Vec<Password>> {
        let sql = format!(
            "SELECT {PASSWORD_COLUMNS} FROM passwords WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2"
        );
        sqlx::query(&sql)
            .bind(Uuid::from(user_id))
            .bind(limit as i64)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_recent_passwords", e))?
            .iter()
            .map(password_from_row)
            .collect()
    }

    async fn find_latest_verification_request(
        &self,
        user_id: UserId,
        kind: VerificationKind,
    ) -> StoreResult<Option<VerificationRequest>> {
        let sql = format!(
            "SELECT {VERIFICATION_COLUMNS} FROM verification_requests \
             WHERE user_id = $1 AND kind = $2 ORDER BY generation DESC LIMIT 1"
        );
        sqlx::query(&sql)
            .bind(Uuid::from(user_id))
            .bind(kind.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_latest_verification_request", e))?
            .map(|row| verification_from_row(&row))
            .transpose()
    }

    #[instrument(skip(self, request), fields(user_id = %request.user_id, kind = request.kind.as_str()), err)]
    async fn insert_verification_request(
        &self,
        request: VerificationRequest,
    ) -> StoreResult<VerificationRequest> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        insert_verification(&mut *conn, request).await
    }

    async fn insert_session(&self, session: Session) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (
                id, human_id, user_id, business_id, user_ip, user_agent,
                refresh_token, expires_at, created_at, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(Uuid::from(session.id))
        .bind(&session.human_id)
        .bind(Uuid::from(session.user_id))
        .bind(session.business_id.map(Uuid::from))
        .bind(&session.user_ip)
        .bind(&session.user_agent)
        .bind(&session.refresh_token)
        .bind(session.expires_at)
        .bind(session.created_at)
        .bind(Uuid::from(session.created_by))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_session", e))?;
        Ok(())
    }

    async fn find_businesses_by_user(&self, user_id: UserId) -> StoreResult<Vec<Business>> {
        let sql = format!(
            "SELECT {BUSINESS_COLUMNS} FROM businesses b \
             JOIN business_users bu ON bu.business_id = b.id \
             WHERE bu.user_id = $1 AND bu.deleted_at IS NULL AND b.deleted_at IS NULL \
             ORDER BY b.created_at, b.id"
        );
        sqlx::query(&sql)
            .bind(Uuid::from(user_id))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_businesses_by_user", e))?
            .iter()
            .map(business_from_row)
            .collect()
    }

    async fn find_member_business(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> StoreResult<Option<Business>> {
        let sql = format!(
            "SELECT {BUSINESS_COLUMNS} FROM businesses b \
             JOIN business_users bu ON bu.business_id = b.id \
             WHERE bu.user_id = $1 AND b.id = $2 AND bu.deleted_at IS NULL AND b.deleted_at IS NULL"
        );
        sqlx::query(&sql)
            .bind(Uuid::from(user_id))
            .bind(Uuid::from(business_id))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_member_business", e))?
            .map(|row| business_from_row(&row))
            .transpose()
    }

    async fn update_user_avatar(
        &self,
        user_id: UserId,
        avatar: Option<String>,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<User>> {
        let sql = format!(
            "UPDATE users SET avatar = $2, updated_at = $3, updated_by = $1 \
             WHERE id = $1 AND deleted_at IS NULL RETURNING {USER_COLUMNS}"
        );
        sqlx::query(&sql)
            .bind(Uuid::from(user_id))
            .bind(avatar)
            .bind(at)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_user_avatar", e))?
            .map(|row| user_from_row(&row))
            .transpose()
    }

    async fn insert_invitation(&self, invitation: Invitation) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO invitations (
                id, business_id, name, email, phone, hash, expires_at, created_at, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(Uuid::from(invitation.id))
        .bind(Uuid::from(invitation.business_id))
        .bind(&invitation.name)
        .bind(&invitation.email)
        .bind(&invitation.phone)
        .bind(&invitation.hash)
        .bind(invitation.expires_at)
        .bind(invitation.created_at)
        .bind(Uuid::from(invitation.created_by))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_invitation", e))?;
        Ok(())
    }
}

/// An open database transaction. Dropping it without `commit` rolls back.
pub struct PostgresAccountTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl AccountTransaction for PostgresAccountTransaction {
    async fn insert_user(&mut self, user: User) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (
                id, human_id, name, email, phone, avatar, email_verified, phone_verified,
                created_at, created_by, updated_at, updated_by,
                deactivated_at, deactivated_by, deleted_at, deleted_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(Uuid::from(user.id))
        .bind(&user.human_id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.phone)
        .bind(&user.avatar)
        .bind(user.email_verified)
        .bind(user.phone_verified)
        .bind(user.created_at)
        .bind(Uuid::from(user.created_by))
        .bind(user.updated_at)
        .bind(user.updated_by.map(Uuid::from))
        .bind(user.deactivated_at)
        .bind(user.deactivated_by.map(Uuid::from))
        .bind(user.deleted_at)
        .bind(user.deleted_by.map(Uuid::from))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_user", e))?;
        Ok(())
    }

    async fn insert_password(&mut self, password: Password) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO passwords (id, user_id, hash, created_at, created_by, deleted_at, deleted_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::from(password.id))
        .bind(Uuid::from(password.user_id))
        .bind(&password.hash)
        .bind(password.created_at)
        .bind(Uuid::from(password.created_by))
        .bind(password.deleted_at)
        .bind(password.deleted_by.map(Uuid::from))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_password", e))?;
        Ok(())
    }

    async fn retire_active_password(
        &mut self,
        user_id: UserId,
        by: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE passwords SET deleted_at = $3, deleted_by = $2 WHERE user_id = $1 AND deleted_at IS NULL",
        )
        .bind(Uuid::from(user_id))
        .bind(Uuid::from(by))
        .bind(at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("retire_active_password", e))?;
        Ok(())
    }

    async fn insert_verification_request(
        &mut self,
        request: VerificationRequest,
    ) -> StoreResult<VerificationRequest> {
        insert_verification(&mut *self.tx, request).await
    }

    async fn consume_verification_request(
        &mut self,
        id: VerificationRequestId,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        // The row lock serializes racing consumers; the loser sees zero rows.
        let result = sqlx::query(
            "UPDATE verification_requests SET consumed_at = $2 WHERE id = $1 AND consumed_at IS NULL",
        )
        .bind(Uuid::from(id))
        .bind(at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("consume_verification_request", e))?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_verified(
        &mut self,
        user_id: UserId,
        kind: VerificationKind,
        at: DateTime<Utc>,
    ) -> StoreResult<User> {
        let column = match kind {
            VerificationKind::Email => "email_verified",
            VerificationKind::Phone => "phone_verified",
            VerificationKind::PasswordReset => {
                return Err(StoreError::Backend("password reset is not a verifiable channel".into()));
            }
        };
        let sql = format!(
            "UPDATE users SET {column} = TRUE, updated_at = $2, updated_by = $1 \
             WHERE id = $1 AND deleted_at IS NULL RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::from(user_id))
            .bind(at)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("mark_verified", e))?
            .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))?;
        user_from_row(&row)
    }

    async fn insert_business(&mut self, business: Business) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO businesses (
                id, name, description, logo, industry, primary_currency, currencies, owner_id,
                created_at, created_by, updated_at, updated_by, deleted_at, deleted_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(Uuid::from(business.id))
        .bind(&business.name)
        .bind(&business.description)
        .bind(&business.logo)
        .bind(business.industry.as_str())
        .bind(&business.primary_currency)
        .bind(&business.currencies)
        .bind(Uuid::from(business.owner_id))
        .bind(business.created_at)
        .bind(Uuid::from(business.created_by))
        .bind(business.updated_at)
        .bind(business.updated_by.map(Uuid::from))
        .bind(business.deleted_at)
        .bind(business.deleted_by.map(Uuid::from))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_business", e))?;
        Ok(())
    }

    async fn insert_business_user(&mut self, membership: BusinessUser) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO business_users (
                business_id, user_id, role, created_at, created_by,
                updated_at, updated_by, deleted_at, deleted_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(Uuid::from(membership.business_id))
        .bind(Uuid::from(membership.user_id))
        .bind(&membership.role)
        .bind(membership.created_at)
        .bind(Uuid::from(membership.created_by))
        .bind(membership.updated_at)
        .bind(membership.updated_by.map(Uuid::from))
        .bind(membership.deleted_at)
        .bind(membership.deleted_by.map(Uuid::from))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_business_user", e))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

/// Insert with the next generation for (user, kind), assigned in SQL.
async fn insert_verification(
    conn: &mut sqlx::PgConnection,
    request: VerificationRequest,
) -> StoreResult<VerificationRequest> {
    let row = sqlx::query(
        r#"
        INSERT INTO verification_requests (
            id, user_id, kind, code, generation, expires_at, consumed_at, created_at
        )
        SELECT $1, $2, $3, $4, COALESCE(MAX(generation), 0) + 1, $5, $6, $7
        FROM verification_requests
        WHERE user_id = $2 AND kind = $3
        RETURNING generation
        "#,
    )
    .bind(Uuid::from(request.id))
    .bind(Uuid::from(request.user_id))
    .bind(request.kind.as_str())
    .bind(&request.code)
    .bind(request.expires_at)
    .bind(request.consumed_at)
    .bind(request.created_at)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("insert_verification_request", e))?;

    let generation: i64 = row.try_get("generation").map_err(decode_error)?;
    Ok(VerificationRequest {
        generation,
        ..request
    })
}

fn user_from_row(row: &PgRow) -> StoreResult<User> {
    Ok(User {
        id: UserId::from_uuid(row.try_get("id").map_err(decode_error)?),
        human_id: row.try_get("human_id").map_err(decode_error)?,
        name: row.try_get("name").map_err(decode_error)?,
        email: row.try_get("email").map_err(decode_error)?,
        phone: row.try_get("phone").map_err(decode_error)?,
        avatar: row.try_get("avatar").map_err(decode_error)?,
        email_verified: row.try_get("email_verified").map_err(decode_error)?,
        phone_verified: row.try_get("phone_verified").map_err(decode_error)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
        created_by: UserId::from_uuid(row.try_get("created_by").map_err(decode_error)?),
        updated_at: row.try_get("updated_at").map_err(decode_error)?,
        updated_by: opt_user(row, "updated_by")?,
        deactivated_at: row.try_get("deactivated_at").map_err(decode_error)?,
        deactivated_by: opt_user(row, "deactivated_by")?,
        deleted_at: row.try_get("deleted_at").map_err(decode_error)?,
        deleted_by: opt_user(row, "deleted_by")?,
    })
}

fn password_from_row(row: &PgRow) -> StoreResult<Password> {
    Ok(Password {
        id: row.try_get::<Uuid, _>("id").map_err(decode_error)?.into(),
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(decode_error)?),
        hash: row.try_get("hash").map_err(decode_error)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
        created_by: UserId::from_uuid(row.try_get("created_by").map_err(decode_error)?),
        deleted_at: row.try_get("deleted_at").map_err(decode_error)?,
        deleted_by: opt_user(row, "deleted_by")?,
    })
}

fn verification_from_row(row: &PgRow) -> StoreResult<VerificationRequest> {
    let kind: String = row.try_get("kind").map_err(decode_error)?;
    Ok(VerificationRequest {
        id: row.try_get::<Uuid, _>("id").map_err(decode_error)?.into(),
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(decode_error)?),
        kind: kind.parse().map_err(StoreError::Backend)?,
        code: row.try_get("code").map_err(decode_error)?,
        generation: row.try_get("generation").map_err(decode_error)?,
        expires_at: row.try_get("expires_at").map_err(decode_error)?,
        consumed_at: row.try_get("consumed_at").map_err(decode_error)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
    })
}

fn business_from_row(row: &PgRow) -> StoreResult<Business> {
    let industry: String = row.try_get("industry").map_err(decode_error)?;
    Ok(Business {
        id: BusinessId::from_uuid(row.try_get("id").map_err(decode_error)?),
        name: row.try_get("name").map_err(decode_error)?,
        description: row.try_get("description").map_err(decode_error)?,
        logo: row.try_get("logo").map_err(decode_error)?,
        industry: industry.parse().map_err(StoreError::Backend)?,
        primary_currency: row.try_get("primary_currency").map_err(decode_error)?,
        currencies: row.try_get("currencies").map_err(decode_error)?,
        owner_id: UserId::from_uuid(row.try_get("owner_id").map_err(decode_error)?),
        created_at: row.try_get("created_at").map_err(decode_error)?,
        created_by: UserId::from_uuid(row.try_get("created_by").map_err(decode_error)?),
        updated_at: row.try_get("updated_at").map_err(decode_error)?,
        updated_by: opt_user(row, "updated_by")?,
        deleted_at: row.try_get("deleted_at").map_err(decode_error)?,
        deleted_by: opt_user(row, "deleted_by")?,
    })
}

fn opt_user(row: &PgRow, column: &str) -> StoreResult<Option<UserId>> {
    Ok(row
        .try_get::<Option<Uuid>, _>(column)
        .map_err(decode_error)?
        .map(UserId::from_uuid))
}

fn decode_error(err: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("failed to decode row: {err}"))
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => match db_err.constraint() {
                    Some("users_email_active") => StoreError::EmailTaken,
                    Some("passwords_one_active") => StoreError::ActivePasswordExists,
                    _ => StoreError::Conflict(msg),
                },
                Some("40001") | Some("40P01") => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use khata_auth::{OWNER_ROLE, store::AccountStore as _};
    use khata_core::{InvitationId, PasswordId};
    use khata_events::Industry;

    use super::*;

    /// Runs against a live database only when `DATABASE_URL` is set.
    async fn store() -> Option<PostgresAccountStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let pool = crate::db::connect(&url, 2).await.ok()?;
        crate::db::apply_schema(&pool).await.ok()?;
        Some(PostgresAccountStore::new(pool))
    }

    fn user(email: &str, now: DateTime<Utc>) -> User {
        User {
            id: UserId::new(),
            human_id: "user-TESTAAA".into(),
            name: "Ann Lee".into(),
            email: email.into(),
            phone: "+15550100000".into(),
            avatar: None,
            email_verified: false,
            phone_verified: false,
            created_at: now,
            created_by: UserId::root(),
            updated_at: now,
            updated_by: None,
            deactivated_at: None,
            deactivated_by: None,
            deleted_at: None,
            deleted_by: None,
        }
    }

    fn password(user_id: UserId, now: DateTime<Utc>) -> Password {
        Password {
            id: PasswordId::new(),
            user_id,
            hash: "$2b$04$hash".into(),
            created_at: now,
            created_by: user_id,
            deleted_at: None,
            deleted_by: None,
        }
    }

    fn request(user_id: UserId, now: DateTime<Utc>) -> VerificationRequest {
        VerificationRequest {
            id: VerificationRequestId::new(),
            user_id,
            kind: VerificationKind::Email,
            code: "123456".into(),
            generation: 0,
            expires_at: now + Duration::minutes(15),
            consumed_at: None,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn register_style_transaction_round_trips() {
        let Some(store) = store().await else {
            return;
        };
        let now = Utc::now();
        let email = format!("{}@pg.test", Uuid::now_v7());
        let u = user(&email, now);

        let mut tx = store.begin().await.unwrap();
        tx.insert_user(u.clone()).await.unwrap();
        tx.insert_password(password(u.id, now)).await.unwrap();
        let first = tx.insert_verification_request(request(u.id, now)).await.unwrap();
        assert!(store.find_user_by_email(&email).await.unwrap().is_none());
        tx.commit().await.unwrap();

        assert_eq!(first.generation, 1);
        assert_eq!(store.find_user_by_email(&email).await.unwrap().unwrap().id, u.id);

        let second = store.insert_verification_request(request(u.id, now)).await.unwrap();
        assert_eq!(second.generation, 2);
        let latest = store
            .find_latest_verification_request(u.id, VerificationKind::Email)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, second.id);

        let mut tx = store.begin().await.unwrap();
        assert!(tx.consume_verification_request(second.id, now).await.unwrap());
        assert!(!tx.consume_verification_request(second.id, now).await.unwrap());
        let verified = tx.mark_verified(u.id, VerificationKind::Email, now).await.unwrap();
        tx.commit().await.unwrap();
        assert!(verified.email_verified);
    }

    #[tokio::test]
    async fn store_invariants_hold_in_the_schema() {
        let Some(store) = store().await else {
            return;
        };
        let now = Utc::now();
        let email = format!("{}@pg.test", Uuid::now_v7());
        let u = user(&email, now);

        let mut tx = store.begin().await.unwrap();
        tx.insert_user(u.clone()).await.unwrap();
        tx.insert_password(password(u.id, now)).await.unwrap();
        let err = tx.insert_password(password(u.id, now)).await.unwrap_err();
        assert!(matches!(err, StoreError::ActivePasswordExists));
        drop(tx);

        let mut tx = store.begin().await.unwrap();
        tx.insert_user(u.clone()).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = tx.insert_user(user(&email, now)).await.unwrap_err();
        assert!(matches!(err, StoreError::EmailTaken));
    }

    #[tokio::test]
    async fn memberships_drive_business_lookups() {
        let Some(store) = store().await else {
            return;
        };
        let now = Utc::now();
        let owner = user(&format!("{}@pg.test", Uuid::now_v7()), now);
        let business = Business {
            id: BusinessId::new(),
            name: "Acme".into(),
            description: None,
            logo: None,
            industry: Industry::Retail,
            primary_currency: "USD".into(),
            currencies: vec!["USD".into(), "EUR".into()],
            owner_id: owner.id,
            created_at: now,
            created_by: owner.id,
            updated_at: now,
            updated_by: None,
            deleted_at: None,
            deleted_by: None,
        };

        let mut tx = store.begin().await.unwrap();
        tx.insert_user(owner.clone()).await.unwrap();
        tx.insert_business(business.clone()).await.unwrap();
        tx.insert_business_user(BusinessUser {
            user_id: owner.id,
            business_id: business.id,
            role: OWNER_ROLE.into(),
            created_at: now,
            created_by: owner.id,
            updated_at: now,
            updated_by: None,
            deleted_at: None,
            deleted_by: None,
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let listed = store.find_businesses_by_user(owner.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].currencies, business.currencies);
        assert!(store.find_member_business(owner.id, business.id).await.unwrap().is_some());
        assert!(store.find_member_business(owner.id, BusinessId::new()).await.unwrap().is_none());

        store
            .insert_invitation(Invitation {
                id: InvitationId::new(),
                business_id: business.id,
                name: "Bob Stone".into(),
                email: "bob@x.com".into(),
                phone: "+447700900123".into(),
                hash: Uuid::now_v7().simple().to_string(),
                expires_at: now + Duration::days(15),
                created_at: now,
                created_by: owner.id,
            })
            .await
            .unwrap();
    }
}
