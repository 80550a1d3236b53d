/// Notification reminder model
///
/// A reminder row records that a given usage-percent or days-left
/// threshold has already fired for a user, so repeated review cycles do
/// not re-notify. `expires_at` ties a reminder to the user's expiry at
/// the time it fired: once the plan changes, the stale reminder lapses
/// on its own and the threshold may fire again.
///
/// A reminder past its `expires_at` is treated as absent and is lazily
/// deleted when the lookup touches it.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE notification_reminders (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
///     type reminder_type NOT NULL,
///     threshold BIGINT,
///     expires_at TIMESTAMPTZ,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Kind of threshold a reminder deduplicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "reminder_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReminderType {
    /// Percent-of-data-limit threshold
    DataUsage,

    /// Days-left-to-expiry threshold
    ExpirationDate,
}

/// Reminder row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationReminder {
    pub id: Uuid,
    pub user_id: Uuid,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: ReminderType,
    pub threshold: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl NotificationReminder {
    /// Records that a threshold has fired for a user
    pub async fn create(
        pool: &PgPool,
        user_id: Uuid,
        kind: ReminderType,
        threshold: Option<i64>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO notification_reminders (user_id, type, threshold, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(user_id)
        .bind(kind)
        .bind(threshold)
        .bind(expires_at)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Finds a live (non-expired) reminder for a user/kind/threshold
    ///
    /// An expired reminder is deleted on the way through and reported as
    /// absent.
    pub async fn find_live(
        pool: &PgPool,
        user_id: Uuid,
        kind: ReminderType,
        threshold: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Option<Self>, sqlx::Error> {
        let reminder = sqlx::query_as::<_, NotificationReminder>(
            r#"
            SELECT id, user_id, type, threshold, expires_at, created_at
            FROM notification_reminders
            WHERE user_id = $1 AND type = $2 AND threshold IS NOT DISTINCT FROM $3
            "#,
        )
        .bind(user_id)
        .bind(kind)
        .bind(threshold)
        .fetch_optional(pool)
        .await?;

        match reminder {
            Some(r) if r.expires_at.is_some_and(|at| at <= now) => {
                sqlx::query("DELETE FROM notification_reminders WHERE id = $1")
                    .bind(r.id)
                    .execute(pool)
                    .await?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Removes every reminder for a user (after an explicit plan reset)
    pub async fn delete_for_user(pool: &PgPool, user_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM notification_reminders WHERE user_id = $1")
            .bind(user_id)
            .execute(pool)
            .await?;

        Ok(())
    }
}
