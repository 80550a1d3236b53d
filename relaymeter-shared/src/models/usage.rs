/// Hour-bucketed usage ledger and database operations
///
/// Traffic observations are folded into rows keyed by the wall-clock hour
/// they were observed in. Buckets are created lazily on first observation
/// and then only ever incremented; an explicit reset elsewhere logs the
/// pre-reset value first.
///
/// Accumulation is a two-phase ensure-then-increment:
///
/// 1. `ensure` attempts to create the bucket row and treats an existing
///    row (a concurrent writer got there first) as success via
///    `ON CONFLICT DO NOTHING`.
/// 2. `increment` issues an atomic in-database add.
///
/// Because the increment is atomic regardless of who won the creation
/// race, overlapping collection cycles — including ones from another
/// control-plane instance against the same store — never lose or
/// double-apply a delta.
///
/// A `node_id` of `None` refers to the control plane's own master node.
///
/// # Example
///
/// ```no_run
/// use relaymeter_shared::models::usage::{hour_bucket, UserNodeUsageBucket};
/// use chrono::Utc;
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, user_id: Uuid) -> Result<(), sqlx::Error> {
/// let hour = hour_bucket(Utc::now());
/// UserNodeUsageBucket::ensure(&pool, user_id, None, hour).await?;
/// UserNodeUsageBucket::increment(&pool, user_id, None, hour, 4096).await?;
/// # Ok(())
/// # }
/// ```
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Truncates an instant down to the top of its wall-clock hour.
///
/// This is the bucket key for all usage ledger rows: an observation at
/// 12:59:59 and one at 13:00:01 land in different buckets.
pub fn hour_bucket(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at)
}

/// Per-user-per-node hourly traffic bucket
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserNodeUsageBucket {
    pub id: Uuid,
    pub user_id: Uuid,
    /// None = the master node
    pub node_id: Option<Uuid>,
    /// Hour-truncated observation time
    pub created_at: DateTime<Utc>,
    /// Increment-only byte counter
    pub used_traffic: i64,
}

/// Per-node hourly outbound traffic bucket
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NodeUsageBucket {
    pub id: Uuid,
    /// None = the master node
    pub node_id: Option<Uuid>,
    /// Hour-truncated observation time
    pub created_at: DateTime<Utc>,
    pub uplink: i64,
    pub downlink: i64,
}

/// Aggregated per-node usage over a time window
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NodeUsageSummary {
    pub node_id: Option<Uuid>,
    pub uplink: i64,
    pub downlink: i64,
}

/// Aggregated per-node user traffic over a time window
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserUsageSummary {
    pub node_id: Option<Uuid>,
    pub used_traffic: i64,
}

/// Deployment-wide monotonic traffic totals (single row)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SystemStats {
    pub uplink: i64,
    pub downlink: i64,
}

impl UserNodeUsageBucket {
    /// Creates the bucket row for `(user, node, hour)` if it does not
    /// exist yet
    ///
    /// Losing the creation race to a concurrent writer is success, not an
    /// error.
    pub async fn ensure(
        pool: &PgPool,
        user_id: Uuid,
        node_id: Option<Uuid>,
        hour: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO node_user_usages (user_id, node_id, created_at, used_traffic)
            VALUES ($1, $2, $3, 0)
            ON CONFLICT (user_id, node_id, created_at) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(node_id)
        .bind(hour)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Atomically adds a delta to the bucket's counter
    pub async fn increment(
        pool: &PgPool,
        user_id: Uuid,
        node_id: Option<Uuid>,
        hour: DateTime<Utc>,
        delta: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE node_user_usages
            SET used_traffic = used_traffic + $4
            WHERE user_id = $1 AND node_id IS NOT DISTINCT FROM $2 AND created_at = $3
            "#,
        )
        .bind(user_id)
        .bind(node_id)
        .bind(hour)
        .bind(delta)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// A user's traffic between `start` and `end` (inclusive), grouped by
    /// node
    ///
    /// Returns an empty vector when nothing was recorded in the window.
    pub async fn usage_in_window(
        pool: &PgPool,
        user_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UserUsageSummary>, sqlx::Error> {
        sqlx::query_as::<_, UserUsageSummary>(
            r#"
            SELECT node_id, COALESCE(SUM(used_traffic), 0)::BIGINT AS used_traffic
            FROM node_user_usages
            WHERE user_id = $1 AND created_at >= $2 AND created_at <= $3
            GROUP BY node_id
            ORDER BY node_id NULLS FIRST
            "#,
        )
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_all(pool)
        .await
    }
}

impl NodeUsageBucket {
    /// Creates the bucket row for `(node, hour)` if it does not exist yet
    pub async fn ensure(
        pool: &PgPool,
        node_id: Option<Uuid>,
        hour: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO node_usages (node_id, created_at, uplink, downlink)
            VALUES ($1, $2, 0, 0)
            ON CONFLICT (node_id, created_at) DO NOTHING
            "#,
        )
        .bind(node_id)
        .bind(hour)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Atomically adds uplink/downlink deltas to the bucket
    pub async fn increment(
        pool: &PgPool,
        node_id: Option<Uuid>,
        hour: DateTime<Utc>,
        uplink: i64,
        downlink: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE node_usages
            SET uplink = uplink + $3, downlink = downlink + $4
            WHERE node_id IS NOT DISTINCT FROM $1 AND created_at = $2
            "#,
        )
        .bind(node_id)
        .bind(hour)
        .bind(uplink)
        .bind(downlink)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Outbound traffic between `start` and `end` (inclusive), grouped by
    /// node
    pub async fn usage_in_window(
        pool: &PgPool,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<NodeUsageSummary>, sqlx::Error> {
        sqlx::query_as::<_, NodeUsageSummary>(
            r#"
            SELECT node_id,
                   COALESCE(SUM(uplink), 0)::BIGINT AS uplink,
                   COALESCE(SUM(downlink), 0)::BIGINT AS downlink
            FROM node_usages
            WHERE created_at >= $1 AND created_at <= $2
            GROUP BY node_id
            ORDER BY node_id NULLS FIRST
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(pool)
        .await
    }
}

impl SystemStats {
    /// Reads the deployment-wide totals
    pub async fn get(pool: &PgPool) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, SystemStats>("SELECT uplink, downlink FROM system_stats")
            .fetch_one(pool)
            .await
    }

    /// Atomically adds outbound traffic to the deployment-wide totals
    pub async fn increment(pool: &PgPool, uplink: i64, downlink: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO system_stats (id, uplink, downlink)
            VALUES (TRUE, $1, $2)
            ON CONFLICT (id) DO UPDATE SET
                uplink = system_stats.uplink + EXCLUDED.uplink,
                downlink = system_stats.downlink + EXCLUDED.downlink
            "#,
        )
        .bind(uplink)
        .bind(downlink)
        .execute(pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_hour_bucket_truncates() {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 59, 59).unwrap();
        assert_eq!(
            hour_bucket(at),
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_hour_bucket_boundary() {
        let before = Utc.with_ymd_and_hms(2024, 6, 1, 12, 59, 59).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 6, 1, 13, 0, 1).unwrap();
        assert_ne!(hour_bucket(before), hour_bucket(after));
        assert_eq!(
            hour_bucket(after),
            Utc.with_ymd_and_hms(2024, 6, 1, 13, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_hour_bucket_same_hour_collapses() {
        let a = Utc.with_ymd_and_hms(2024, 6, 1, 13, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 6, 1, 13, 59, 59).unwrap();
        assert_eq!(hour_bucket(a), hour_bucket(b));
    }

    #[test]
    fn test_hour_bucket_idempotent() {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 7, 42, 13).unwrap();
        assert_eq!(hour_bucket(hour_bucket(at)), hour_bucket(at));
    }
}
