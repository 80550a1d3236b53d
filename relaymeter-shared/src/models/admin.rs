/// Admin model and database operations
///
/// Admins own users; `users_usage` is a rolling aggregate of their users'
/// consumption, incremented in the same recording cycle as the user
/// totals so the two never diverge due to timing.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE admins (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     username VARCHAR(64) NOT NULL UNIQUE,
///     is_sudo BOOLEAN NOT NULL DEFAULT FALSE,
///     users_usage BIGINT NOT NULL DEFAULT 0,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Admin model
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Admin {
    /// Unique admin ID (UUID v4)
    pub id: Uuid,

    /// Username, unique across all admins
    pub username: String,

    /// Sudo admins see every user, not just their own
    pub is_sudo: bool,

    /// Rolling aggregate of owned users' consumption, in bytes
    pub users_usage: i64,

    /// When the admin account was created
    pub created_at: DateTime<Utc>,
}

/// Audit row written before an admin's usage aggregate is reset
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AdminUsageResetLog {
    pub id: Uuid,
    pub admin_id: Uuid,
    pub used_traffic_at_reset: i64,
    pub reset_at: DateTime<Utc>,
}

impl Admin {
    /// Creates a new admin
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] when the username is taken.
    pub async fn create(pool: &PgPool, username: &str, is_sudo: bool) -> StoreResult<Self> {
        let admin = sqlx::query_as::<_, Admin>(
            r#"
            INSERT INTO admins (username, is_sudo)
            VALUES ($1, $2)
            RETURNING id, username, is_sudo, users_usage, created_at
            "#,
        )
        .bind(username)
        .bind(is_sudo)
        .fetch_one(pool)
        .await
        .map_err(|e| StoreError::on_create(e, "admin"))?;

        Ok(admin)
    }

    /// Finds an admin by ID
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Admin>(
            "SELECT id, username, is_sudo, users_usage, created_at FROM admins WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Atomically adds a traffic delta to the admin's rolling aggregate
    pub async fn increment_users_usage(
        pool: &PgPool,
        id: Uuid,
        delta: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE admins SET users_usage = users_usage + $2 WHERE id = $1")
            .bind(id)
            .bind(delta)
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Resets the admin's usage aggregate to zero, logging the pre-reset
    /// value first
    ///
    /// Returns the refreshed admin, or None when the admin no longer
    /// exists.
    pub async fn reset_users_usage(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let current: Option<(i64,)> =
            sqlx::query_as("SELECT users_usage FROM admins WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some((users_usage,)) = current else {
            return Ok(None);
        };

        sqlx::query(
            "INSERT INTO admin_usage_reset_logs (admin_id, used_traffic_at_reset) VALUES ($1, $2)",
        )
        .bind(id)
        .bind(users_usage)
        .execute(&mut *tx)
        .await?;

        let admin = sqlx::query_as::<_, Admin>(
            r#"
            UPDATE admins SET users_usage = 0 WHERE id = $1
            RETURNING id, username, is_sudo, users_usage, created_at
            "#,
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(admin))
    }
}
