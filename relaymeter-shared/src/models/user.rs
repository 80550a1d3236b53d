/// User model and database operations
///
/// Users are the accounts traffic is accounted against. Every user moves
/// through a bounded lifecycle driven by the review job: `active` users
/// may become `limited` (data cap reached) or `expired` (deadline
/// passed), `on_hold` users activate once they first connect or their
/// hold times out, and a pending next plan can roll a limited/expired
/// user straight back to `active`.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE users (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     username VARCHAR(64) NOT NULL UNIQUE,
///     status user_status NOT NULL DEFAULT 'active',
///     used_traffic BIGINT NOT NULL DEFAULT 0 CHECK (used_traffic >= 0),
///     data_limit BIGINT,
///     expire BIGINT,
///     admin_id UUID REFERENCES admins(id) ON DELETE SET NULL,
///     note TEXT,
///     on_hold_expire_duration BIGINT,
///     on_hold_timeout TIMESTAMPTZ,
///     online_at TIMESTAMPTZ,
///     sub_revoked_at TIMESTAMPTZ,
///     sub_updated_at TIMESTAMPTZ,
///     edit_at TIMESTAMPTZ,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     last_status_change TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
///
/// # Example
///
/// ```no_run
/// use relaymeter_shared::models::user::{User, CreateUser};
/// use relaymeter_shared::db::pool::{create_pool, DatabaseConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = create_pool(DatabaseConfig::default()).await?;
///
/// let user = User::create(&pool, CreateUser {
///     username: "alice".to_string(),
///     data_limit: Some(50 * 1024 * 1024 * 1024),
///     expire: None,
///     admin_id: None,
///     ..Default::default()
/// }).await?;
/// println!("Created user: {}", user.id);
/// # Ok(())
/// # }
/// ```
use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

/// User lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    /// User is provisioned and traffic is being accounted
    Active,

    /// Disabled by an admin; never touched by the review job
    Disabled,

    /// Data limit reached
    Limited,

    /// Expiry deadline passed
    Expired,

    /// Waiting for the first connection before the expiry clock starts
    OnHold,
}

impl UserStatus {
    /// Converts status to string for logs and notification payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Disabled => "disabled",
            UserStatus::Limited => "limited",
            UserStatus::Expired => "expired",
            UserStatus::OnHold => "on_hold",
        }
    }
}

/// User model
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    /// Unique user ID (UUID v4)
    pub id: Uuid,

    /// Username, unique across all users
    pub username: String,

    /// Lifecycle status
    pub status: UserStatus,

    /// Total bytes consumed across all nodes (monotonic, non-negative)
    pub used_traffic: i64,

    /// Optional data cap in bytes; None = unlimited
    pub data_limit: Option<i64>,

    /// Optional expiry deadline as epoch seconds; None = never expires
    pub expire: Option<i64>,

    /// Owning admin, if any
    pub admin_id: Option<Uuid>,

    /// Free-form admin note
    pub note: Option<String>,

    /// Seconds of validity granted once an on-hold user activates
    pub on_hold_expire_duration: Option<i64>,

    /// Deadline after which an on-hold user activates even without a
    /// connection
    pub on_hold_timeout: Option<DateTime<Utc>>,

    /// Last time traffic was observed for this user
    pub online_at: Option<DateTime<Utc>>,

    /// When the subscription was last revoked
    pub sub_revoked_at: Option<DateTime<Utc>>,

    /// When the subscription was last fetched
    pub sub_updated_at: Option<DateTime<Utc>>,

    /// Last admin edit; the on-hold clock bases itself on this
    pub edit_at: Option<DateTime<Utc>>,

    /// When the user account was created
    pub created_at: DateTime<Utc>,

    /// When the status last changed
    pub last_status_change: DateTime<Utc>,
}

/// Input for creating a new user
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateUser {
    /// Username (must be unique)
    pub username: String,

    /// Optional data cap in bytes
    pub data_limit: Option<i64>,

    /// Optional expiry deadline as epoch seconds
    pub expire: Option<i64>,

    /// Owning admin
    pub admin_id: Option<Uuid>,

    /// Free-form note
    pub note: Option<String>,

    /// Place the user on hold with this validity duration (seconds)
    pub on_hold_expire_duration: Option<i64>,

    /// On-hold activation deadline
    pub on_hold_timeout: Option<DateTime<Utc>>,
}

/// Audit row written before a user's usage counter is reset
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserUsageResetLog {
    pub id: Uuid,
    pub user_id: Uuid,
    pub used_traffic_at_reset: i64,
    pub reset_at: DateTime<Utc>,
}

const USER_COLUMNS: &str = "id, username, status, used_traffic, data_limit, expire, admin_id, \
     note, on_hold_expire_duration, on_hold_timeout, online_at, sub_revoked_at, \
     sub_updated_at, edit_at, created_at, last_status_change";

impl User {
    /// True when a data limit is set and consumed traffic has reached it.
    ///
    /// A zero limit means "no limit", matching how the admin surface
    /// stores unlimited plans.
    pub fn is_limited(&self) -> bool {
        match self.data_limit {
            Some(limit) if limit > 0 => self.used_traffic >= limit,
            _ => false,
        }
    }

    /// True when an expiry deadline is set and has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expire {
            Some(expire) if expire > 0 => expire <= now.timestamp(),
            _ => false,
        }
    }

    /// Percent of the data limit consumed, when a limit is set.
    pub fn usage_percent(&self) -> Option<f64> {
        match self.data_limit {
            Some(limit) if limit > 0 => Some(self.used_traffic as f64 / limit as f64 * 100.0),
            _ => None,
        }
    }

    /// Whole days until the expiry deadline (floor; negative once passed).
    pub fn days_to_expiry(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expire
            .filter(|e| *e > 0)
            .map(|expire| (expire - now.timestamp()).div_euclid(86_400))
    }

    /// Reference instant for the on-hold clock: the last admin edit, or
    /// account creation when the user was never edited.
    pub fn hold_base_time(&self) -> DateTime<Utc> {
        self.edit_at.unwrap_or(self.created_at)
    }

    /// Creates a new user
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] when the username is taken,
    /// distinct from any other database failure.
    pub async fn create(pool: &PgPool, data: CreateUser) -> StoreResult<Self> {
        let status = if data.on_hold_expire_duration.is_some() {
            UserStatus::OnHold
        } else {
            UserStatus::Active
        };

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users
                (username, status, data_limit, expire, admin_id, note,
                 on_hold_expire_duration, on_hold_timeout)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {USER_COLUMNS}
            "#,
        ))
        .bind(data.username)
        .bind(status)
        .bind(data.data_limit)
        .bind(data.expire)
        .bind(data.admin_id)
        .bind(data.note)
        .bind(data.on_hold_expire_duration)
        .bind(data.on_hold_timeout)
        .fetch_one(pool)
        .await
        .map_err(|e| StoreError::on_create(e, "user"))?;

        Ok(user)
    }

    /// Finds a user by ID
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Finds a user by username
    pub async fn find_by_username(
        pool: &PgPool,
        username: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(pool)
        .await
    }

    /// Lists all users in a given lifecycle status
    ///
    /// Returns an empty vector when no user matches; never an error.
    pub async fn list_by_status(
        pool: &PgPool,
        status: UserStatus,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE status = $1 ORDER BY created_at"
        ))
        .bind(status)
        .fetch_all(pool)
        .await
    }

    /// Atomically adds a traffic delta to the user's total and refreshes
    /// `online_at`
    ///
    /// The increment relies on the database's atomicity, so concurrent
    /// recording cycles (possibly from multiple control-plane instances)
    /// never lose an update.
    pub async fn increment_used_traffic(
        pool: &PgPool,
        id: Uuid,
        delta: i64,
        seen_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET used_traffic = used_traffic + $2, online_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(delta)
        .bind(seen_at)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Persists a status transition, stamping `last_status_change`
    pub async fn update_status(
        pool: &PgPool,
        id: Uuid,
        status: UserStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET status = $2, last_status_change = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Starts the expiry clock for a freshly activated on-hold user
    ///
    /// Derives `expire` from `on_hold_expire_duration` relative to `now`.
    /// Users without a hold duration keep their current expiry untouched.
    pub async fn start_expire(
        pool: &PgPool,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET expire = $2 + on_hold_expire_duration
            WHERE id = $1 AND on_hold_expire_duration IS NOT NULL
            "#,
        )
        .bind(id)
        .bind(now.timestamp())
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Applies a fired next plan in one statement: replaces the data
    /// limit, zeroes the consumption counter, overwrites the expiry when
    /// the plan carries one, and returns the user to active
    ///
    /// Returns the refreshed user, or None when the user no longer exists.
    pub async fn apply_rollover(
        pool: &PgPool,
        id: Uuid,
        data_limit: Option<i64>,
        expire: Option<i64>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET data_limit = $2,
                used_traffic = 0,
                expire = COALESCE($3, expire),
                status = 'active',
                last_status_change = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(data_limit)
        .bind(expire)
        .fetch_optional(pool)
        .await
    }

    /// Resets the user's usage counter to zero, logging the pre-reset
    /// value first for historical reporting
    ///
    /// Returns the refreshed user, or None when the user no longer exists.
    pub async fn reset_data_usage(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let current: Option<(i64,)> =
            sqlx::query_as("SELECT used_traffic FROM users WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some((used_traffic,)) = current else {
            return Ok(None);
        };

        sqlx::query(
            "INSERT INTO user_usage_reset_logs (user_id, used_traffic_at_reset) VALUES ($1, $2)",
        )
        .bind(id)
        .bind(used_traffic)
        .execute(&mut *tx)
        .await?;

        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET used_traffic = 0 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(user))
    }

    /// Snapshot of `user_id -> admin_id` for every owned user
    ///
    /// Used by the admin usage roll-up so admin totals are derived from
    /// the same cycle's deltas as the user totals.
    pub async fn admin_mapping(pool: &PgPool) -> Result<HashMap<Uuid, Uuid>, sqlx::Error> {
        let rows: Vec<(Uuid, Uuid)> =
            sqlx::query_as("SELECT id, admin_id FROM users WHERE admin_id IS NOT NULL")
                .fetch_all(pool)
                .await?;

        Ok(rows.into_iter().collect())
    }

    /// Counts users seen online since the given instant
    pub async fn count_online_since(
        pool: &PgPool,
        since: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM users WHERE online_at >= $1")
                .bind(since)
                .fetch_one(pool)
                .await?;

        Ok(count)
    }
}
