/// Next plan model and rollover arithmetic
///
/// A next plan is a pending replacement data-limit/expiry configuration,
/// one-to-one with a user. When the review job finds a limited or expired
/// user whose plan is eligible to fire, the plan is consumed: the user's
/// limits are replaced, `used_traffic` resets to zero, and the plan row
/// is deleted in the same operation.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE next_plans (
///     user_id UUID PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
///     data_limit BIGINT NOT NULL,
///     expire BIGINT,
///     add_remaining_traffic BOOLEAN NOT NULL DEFAULT FALSE,
///     fire_on_either BOOLEAN NOT NULL DEFAULT TRUE
/// );
/// ```
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Pending plan rollover for a user
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NextPlan {
    /// The user this plan belongs to (one plan per user)
    pub user_id: Uuid,

    /// Replacement data cap in bytes
    pub data_limit: i64,

    /// Replacement expiry deadline (epoch seconds); None keeps the
    /// current one
    pub expire: Option<i64>,

    /// Carry unused traffic from the old plan into the new cap
    pub add_remaining_traffic: bool,

    /// Fire on reaching either the data limit or the expiry; when false
    /// the plan only fires if both conditions hold simultaneously
    pub fire_on_either: bool,
}

impl NextPlan {
    /// Data limit the user ends up with when this plan fires.
    ///
    /// With `add_remaining_traffic`, whatever was left of the old cap is
    /// carried over on top of the new one; an overdrawn or uncapped old
    /// plan carries nothing.
    pub fn effective_data_limit(&self, current_limit: Option<i64>, used_traffic: i64) -> i64 {
        if self.add_remaining_traffic {
            let remaining = current_limit
                .map(|limit| (limit - used_traffic).max(0))
                .unwrap_or(0);
            self.data_limit + remaining
        } else {
            self.data_limit
        }
    }

    /// Creates or replaces the pending plan for a user
    pub async fn upsert_for_user(pool: &PgPool, plan: &NextPlan) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO next_plans (user_id, data_limit, expire, add_remaining_traffic, fire_on_either)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id) DO UPDATE SET
                data_limit = EXCLUDED.data_limit,
                expire = EXCLUDED.expire,
                add_remaining_traffic = EXCLUDED.add_remaining_traffic,
                fire_on_either = EXCLUDED.fire_on_either
            "#,
        )
        .bind(plan.user_id)
        .bind(plan.data_limit)
        .bind(plan.expire)
        .bind(plan.add_remaining_traffic)
        .bind(plan.fire_on_either)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Finds the pending plan for a user, if any
    pub async fn find_by_user(pool: &PgPool, user_id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, NextPlan>(
            r#"
            SELECT user_id, data_limit, expire, add_remaining_traffic, fire_on_either
            FROM next_plans WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }

    /// Deletes the pending plan for a user
    ///
    /// Deleting a plan that does not exist is not an error.
    pub async fn delete_for_user(pool: &PgPool, user_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM next_plans WHERE user_id = $1")
            .bind(user_id)
            .execute(pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(data_limit: i64, add_remaining: bool) -> NextPlan {
        NextPlan {
            user_id: Uuid::new_v4(),
            data_limit,
            expire: None,
            add_remaining_traffic: add_remaining,
            fire_on_either: true,
        }
    }

    #[test]
    fn test_effective_limit_plain() {
        assert_eq!(plan(1000, false).effective_data_limit(Some(500), 100), 1000);
    }

    #[test]
    fn test_effective_limit_carries_remaining() {
        // 400 left of the old cap rides on top of the new one
        assert_eq!(plan(1000, true).effective_data_limit(Some(500), 100), 1400);
    }

    #[test]
    fn test_effective_limit_overdrawn_carries_nothing() {
        assert_eq!(plan(1000, true).effective_data_limit(Some(500), 700), 1000);
    }

    #[test]
    fn test_effective_limit_uncapped_old_plan() {
        assert_eq!(plan(1000, true).effective_data_limit(None, 700), 1000);
    }
}
