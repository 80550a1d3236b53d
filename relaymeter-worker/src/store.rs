/// Persistence seam for the periodic jobs
///
/// The recording and review jobs talk to storage through the
/// [`UsageStore`] and [`ReviewStore`] traits. [`PgStore`] delegates to
/// the shared models and is what production runs; [`MemoryStore`] backs
/// the job tests with plain maps under a mutex.
///
/// All bucket writes follow the shared ledger's two-phase contract:
/// `ensure_*` creates the row if absent (losing the creation race is
/// fine), `increment_*` adds atomically. Both implementations keep those
/// semantics so tests exercise the same interleavings production sees.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relaymeter_shared::error::StoreResult;
use relaymeter_shared::models::admin::Admin;
use relaymeter_shared::models::next_plan::NextPlan;
use relaymeter_shared::models::reminder::{NotificationReminder, ReminderType};
use relaymeter_shared::models::usage::{NodeUsageBucket, SystemStats, UserNodeUsageBucket};
use relaymeter_shared::models::user::{User, UserStatus};
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

/// Store operations used by the usage-recording jobs
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Snapshot of `user_id -> admin_id` for every owned user
    async fn admin_mapping(&self) -> StoreResult<HashMap<Uuid, Uuid>>;

    /// Adds a delta to a user's total and stamps `online_at`
    async fn increment_user_usage(
        &self,
        user_id: Uuid,
        delta: i64,
        seen_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Adds a delta to an admin's rolling aggregate
    async fn increment_admin_usage(&self, admin_id: Uuid, delta: i64) -> StoreResult<()>;

    /// Creates a user/node/hour ledger bucket if absent
    async fn ensure_user_bucket(
        &self,
        user_id: Uuid,
        node_id: Option<Uuid>,
        hour: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Adds a delta to a user/node/hour ledger bucket
    async fn increment_user_bucket(
        &self,
        user_id: Uuid,
        node_id: Option<Uuid>,
        hour: DateTime<Utc>,
        delta: i64,
    ) -> StoreResult<()>;

    /// Creates a node/hour ledger bucket if absent
    async fn ensure_node_bucket(
        &self,
        node_id: Option<Uuid>,
        hour: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Adds uplink/downlink deltas to a node/hour ledger bucket
    async fn increment_node_bucket(
        &self,
        node_id: Option<Uuid>,
        hour: DateTime<Utc>,
        uplink: i64,
        downlink: i64,
    ) -> StoreResult<()>;

    /// Adds uplink/downlink deltas to a node's running totals
    async fn increment_node_traffic(
        &self,
        node_id: Uuid,
        uplink: i64,
        downlink: i64,
    ) -> StoreResult<()>;

    /// Adds uplink/downlink deltas to the deployment-wide totals
    async fn increment_system_stats(&self, uplink: i64, downlink: i64) -> StoreResult<()>;
}

/// Store operations used by the lifecycle review job
#[async_trait]
pub trait ReviewStore: Send + Sync {
    async fn list_users_by_status(&self, status: UserStatus) -> StoreResult<Vec<User>>;

    /// Fresh read of one user; review decisions work from this, not the
    /// listing snapshot
    async fn find_user(&self, user_id: Uuid) -> StoreResult<Option<User>>;

    async fn find_next_plan(&self, user_id: Uuid) -> StoreResult<Option<NextPlan>>;

    async fn delete_next_plan(&self, user_id: Uuid) -> StoreResult<()>;

    /// Consumes a fired plan: new limit, zeroed counter, optional new
    /// expiry, status back to active
    async fn apply_rollover(
        &self,
        user_id: Uuid,
        data_limit: Option<i64>,
        expire: Option<i64>,
    ) -> StoreResult<Option<User>>;

    async fn update_user_status(&self, user_id: Uuid, status: UserStatus) -> StoreResult<()>;

    /// Starts the expiry clock for a freshly activated on-hold user
    async fn start_expire(&self, user_id: Uuid, now: DateTime<Utc>) -> StoreResult<()>;

    /// True when a non-expired reminder exists for this user/kind/threshold
    async fn has_live_reminder(
        &self,
        user_id: Uuid,
        kind: ReminderType,
        threshold: Option<i64>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    async fn create_reminder(
        &self,
        user_id: Uuid,
        kind: ReminderType,
        threshold: Option<i64>,
        expires_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()>;
}

/// Postgres-backed store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageStore for PgStore {
    async fn admin_mapping(&self) -> StoreResult<HashMap<Uuid, Uuid>> {
        Ok(User::admin_mapping(&self.pool).await?)
    }

    async fn increment_user_usage(
        &self,
        user_id: Uuid,
        delta: i64,
        seen_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        Ok(User::increment_used_traffic(&self.pool, user_id, delta, seen_at).await?)
    }

    async fn increment_admin_usage(&self, admin_id: Uuid, delta: i64) -> StoreResult<()> {
        Ok(Admin::increment_users_usage(&self.pool, admin_id, delta).await?)
    }

    async fn ensure_user_bucket(
        &self,
        user_id: Uuid,
        node_id: Option<Uuid>,
        hour: DateTime<Utc>,
    ) -> StoreResult<()> {
        Ok(UserNodeUsageBucket::ensure(&self.pool, user_id, node_id, hour).await?)
    }

    async fn increment_user_bucket(
        &self,
        user_id: Uuid,
        node_id: Option<Uuid>,
        hour: DateTime<Utc>,
        delta: i64,
    ) -> StoreResult<()> {
        Ok(UserNodeUsageBucket::increment(&self.pool, user_id, node_id, hour, delta).await?)
    }

    async fn ensure_node_bucket(
        &self,
        node_id: Option<Uuid>,
        hour: DateTime<Utc>,
    ) -> StoreResult<()> {
        Ok(NodeUsageBucket::ensure(&self.pool, node_id, hour).await?)
    }

    async fn increment_node_bucket(
        &self,
        node_id: Option<Uuid>,
        hour: DateTime<Utc>,
        uplink: i64,
        downlink: i64,
    ) -> StoreResult<()> {
        Ok(NodeUsageBucket::increment(&self.pool, node_id, hour, uplink, downlink).await?)
    }

    async fn increment_node_traffic(
        &self,
        node_id: Uuid,
        uplink: i64,
        downlink: i64,
    ) -> StoreResult<()> {
        Ok(
            relaymeter_shared::models::node::Node::increment_traffic(
                &self.pool, node_id, uplink, downlink,
            )
            .await?,
        )
    }

    async fn increment_system_stats(&self, uplink: i64, downlink: i64) -> StoreResult<()> {
        Ok(SystemStats::increment(&self.pool, uplink, downlink).await?)
    }
}

#[async_trait]
impl ReviewStore for PgStore {
    async fn list_users_by_status(&self, status: UserStatus) -> StoreResult<Vec<User>> {
        Ok(User::list_by_status(&self.pool, status).await?)
    }

    async fn find_user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        Ok(User::find_by_id(&self.pool, user_id).await?)
    }

    async fn find_next_plan(&self, user_id: Uuid) -> StoreResult<Option<NextPlan>> {
        Ok(NextPlan::find_by_user(&self.pool, user_id).await?)
    }

    async fn delete_next_plan(&self, user_id: Uuid) -> StoreResult<()> {
        Ok(NextPlan::delete_for_user(&self.pool, user_id).await?)
    }

    async fn apply_rollover(
        &self,
        user_id: Uuid,
        data_limit: Option<i64>,
        expire: Option<i64>,
    ) -> StoreResult<Option<User>> {
        Ok(User::apply_rollover(&self.pool, user_id, data_limit, expire).await?)
    }

    async fn update_user_status(&self, user_id: Uuid, status: UserStatus) -> StoreResult<()> {
        Ok(User::update_status(&self.pool, user_id, status).await?)
    }

    async fn start_expire(&self, user_id: Uuid, now: DateTime<Utc>) -> StoreResult<()> {
        Ok(User::start_expire(&self.pool, user_id, now).await?)
    }

    async fn has_live_reminder(
        &self,
        user_id: Uuid,
        kind: ReminderType,
        threshold: Option<i64>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        Ok(
            NotificationReminder::find_live(&self.pool, user_id, kind, threshold, now)
                .await?
                .is_some(),
        )
    }

    async fn create_reminder(
        &self,
        user_id: Uuid,
        kind: ReminderType,
        threshold: Option<i64>,
        expires_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        Ok(NotificationReminder::create(&self.pool, user_id, kind, threshold, expires_at).await?)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct MemoryReminder {
    kind: ReminderType,
    threshold: Option<i64>,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    next_plans: HashMap<Uuid, NextPlan>,
    admin_usage: HashMap<Uuid, i64>,
    reminders: HashMap<Uuid, Vec<MemoryReminder>>,
    user_buckets: HashMap<(Uuid, Option<Uuid>, DateTime<Utc>), i64>,
    node_buckets: HashMap<(Option<Uuid>, DateTime<Utc>), (i64, i64)>,
    node_traffic: HashMap<Uuid, (i64, i64)>,
    system: (i64, i64),
}

/// In-memory store for job tests
///
/// Plain maps under a mutex; never fails. Seed it with
/// [`MemoryStore::insert_user`] and friends, run a job against it, then
/// inspect with the accessor methods.
#[derive(Default)]
pub struct MemoryStore {
    state: std::sync::Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, user: User) {
        self.state.lock().unwrap().users.insert(user.id, user);
    }

    pub fn insert_next_plan(&self, plan: NextPlan) {
        self.state.lock().unwrap().next_plans.insert(plan.user_id, plan);
    }

    pub fn user(&self, user_id: Uuid) -> Option<User> {
        self.state.lock().unwrap().users.get(&user_id).cloned()
    }

    pub fn next_plan(&self, user_id: Uuid) -> Option<NextPlan> {
        self.state.lock().unwrap().next_plans.get(&user_id).cloned()
    }

    pub fn admin_usage(&self, admin_id: Uuid) -> i64 {
        self.state
            .lock()
            .unwrap()
            .admin_usage
            .get(&admin_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn user_bucket(
        &self,
        user_id: Uuid,
        node_id: Option<Uuid>,
        hour: DateTime<Utc>,
    ) -> Option<i64> {
        self.state
            .lock()
            .unwrap()
            .user_buckets
            .get(&(user_id, node_id, hour))
            .copied()
    }

    pub fn node_bucket(&self, node_id: Option<Uuid>, hour: DateTime<Utc>) -> Option<(i64, i64)> {
        self.state
            .lock()
            .unwrap()
            .node_buckets
            .get(&(node_id, hour))
            .copied()
    }

    pub fn node_traffic(&self, node_id: Uuid) -> (i64, i64) {
        self.state
            .lock()
            .unwrap()
            .node_traffic
            .get(&node_id)
            .copied()
            .unwrap_or((0, 0))
    }

    pub fn system_stats(&self) -> (i64, i64) {
        self.state.lock().unwrap().system
    }

    pub fn reminder_count(&self, user_id: Uuid) -> usize {
        self.state
            .lock()
            .unwrap()
            .reminders
            .get(&user_id)
            .map_or(0, |r| r.len())
    }
}

#[async_trait]
impl UsageStore for MemoryStore {
    async fn admin_mapping(&self) -> StoreResult<HashMap<Uuid, Uuid>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .users
            .values()
            .filter_map(|u| u.admin_id.map(|admin_id| (u.id, admin_id)))
            .collect())
    }

    async fn increment_user_usage(
        &self,
        user_id: Uuid,
        delta: i64,
        seen_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        if let Some(user) = self.state.lock().unwrap().users.get_mut(&user_id) {
            user.used_traffic += delta;
            user.online_at = Some(seen_at);
        }
        Ok(())
    }

    async fn increment_admin_usage(&self, admin_id: Uuid, delta: i64) -> StoreResult<()> {
        *self
            .state
            .lock()
            .unwrap()
            .admin_usage
            .entry(admin_id)
            .or_default() += delta;
        Ok(())
    }

    async fn ensure_user_bucket(
        &self,
        user_id: Uuid,
        node_id: Option<Uuid>,
        hour: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.state
            .lock()
            .unwrap()
            .user_buckets
            .entry((user_id, node_id, hour))
            .or_insert(0);
        Ok(())
    }

    async fn increment_user_bucket(
        &self,
        user_id: Uuid,
        node_id: Option<Uuid>,
        hour: DateTime<Utc>,
        delta: i64,
    ) -> StoreResult<()> {
        // Mirrors the SQL UPDATE: a missing bucket row absorbs nothing
        if let Some(bucket) = self
            .state
            .lock()
            .unwrap()
            .user_buckets
            .get_mut(&(user_id, node_id, hour))
        {
            *bucket += delta;
        }
        Ok(())
    }

    async fn ensure_node_bucket(
        &self,
        node_id: Option<Uuid>,
        hour: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.state
            .lock()
            .unwrap()
            .node_buckets
            .entry((node_id, hour))
            .or_insert((0, 0));
        Ok(())
    }

    async fn increment_node_bucket(
        &self,
        node_id: Option<Uuid>,
        hour: DateTime<Utc>,
        uplink: i64,
        downlink: i64,
    ) -> StoreResult<()> {
        if let Some(bucket) = self
            .state
            .lock()
            .unwrap()
            .node_buckets
            .get_mut(&(node_id, hour))
        {
            bucket.0 += uplink;
            bucket.1 += downlink;
        }
        Ok(())
    }

    async fn increment_node_traffic(
        &self,
        node_id: Uuid,
        uplink: i64,
        downlink: i64,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        let entry = state.node_traffic.entry(node_id).or_insert((0, 0));
        entry.0 += uplink;
        entry.1 += downlink;
        Ok(())
    }

    async fn increment_system_stats(&self, uplink: i64, downlink: i64) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        state.system.0 += uplink;
        state.system.1 += downlink;
        Ok(())
    }
}

#[async_trait]
impl ReviewStore for MemoryStore {
    async fn list_users_by_status(&self, status: UserStatus) -> StoreResult<Vec<User>> {
        let mut users: Vec<User> = self
            .state
            .lock()
            .unwrap()
            .users
            .values()
            .filter(|u| u.status == status)
            .cloned()
            .collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users)
    }

    async fn find_user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.state.lock().unwrap().users.get(&user_id).cloned())
    }

    async fn find_next_plan(&self, user_id: Uuid) -> StoreResult<Option<NextPlan>> {
        Ok(self.state.lock().unwrap().next_plans.get(&user_id).cloned())
    }

    async fn delete_next_plan(&self, user_id: Uuid) -> StoreResult<()> {
        self.state.lock().unwrap().next_plans.remove(&user_id);
        Ok(())
    }

    async fn apply_rollover(
        &self,
        user_id: Uuid,
        data_limit: Option<i64>,
        expire: Option<i64>,
    ) -> StoreResult<Option<User>> {
        let mut state = self.state.lock().unwrap();
        let Some(user) = state.users.get_mut(&user_id) else {
            return Ok(None);
        };
        user.data_limit = data_limit;
        user.used_traffic = 0;
        if expire.is_some() {
            user.expire = expire;
        }
        user.status = UserStatus::Active;
        user.last_status_change = Utc::now();
        Ok(Some(user.clone()))
    }

    async fn update_user_status(&self, user_id: Uuid, status: UserStatus) -> StoreResult<()> {
        if let Some(user) = self.state.lock().unwrap().users.get_mut(&user_id) {
            user.status = status;
            user.last_status_change = Utc::now();
        }
        Ok(())
    }

    async fn start_expire(&self, user_id: Uuid, now: DateTime<Utc>) -> StoreResult<()> {
        if let Some(user) = self.state.lock().unwrap().users.get_mut(&user_id) {
            if let Some(duration) = user.on_hold_expire_duration {
                user.expire = Some(now.timestamp() + duration);
            }
        }
        Ok(())
    }

    async fn has_live_reminder(
        &self,
        user_id: Uuid,
        kind: ReminderType,
        threshold: Option<i64>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = self.state.lock().unwrap();
        let Some(reminders) = state.reminders.get_mut(&user_id) else {
            return Ok(false);
        };
        // Lazily evict an expired match, like the SQL path does
        if let Some(pos) = reminders
            .iter()
            .position(|r| r.kind == kind && r.threshold == threshold)
        {
            if reminders[pos].expires_at.is_some_and(|at| at <= now) {
                reminders.remove(pos);
                return Ok(false);
            }
            return Ok(true);
        }
        Ok(false)
    }

    async fn create_reminder(
        &self,
        user_id: Uuid,
        kind: ReminderType,
        threshold: Option<i64>,
        expires_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        self.state
            .lock()
            .unwrap()
            .reminders
            .entry(user_id)
            .or_default()
            .push(MemoryReminder {
                kind,
                threshold,
                expires_at,
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_memory_increment_without_ensure_is_lost() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        let hour = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

        store
            .increment_user_bucket(user_id, None, hour, 100)
            .await
            .unwrap();
        assert_eq!(store.user_bucket(user_id, None, hour), None);

        store.ensure_user_bucket(user_id, None, hour).await.unwrap();
        store
            .increment_user_bucket(user_id, None, hour, 100)
            .await
            .unwrap();
        assert_eq!(store.user_bucket(user_id, None, hour), Some(100));
    }

    #[tokio::test]
    async fn test_memory_ensure_is_idempotent() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        let hour = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

        store.ensure_user_bucket(user_id, None, hour).await.unwrap();
        store
            .increment_user_bucket(user_id, None, hour, 250)
            .await
            .unwrap();
        // A second ensure must not reset the accumulated counter
        store.ensure_user_bucket(user_id, None, hour).await.unwrap();
        assert_eq!(store.user_bucket(user_id, None, hour), Some(250));
    }

    #[tokio::test]
    async fn test_memory_reminder_expiry_evicts() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

        store
            .create_reminder(
                user_id,
                ReminderType::DataUsage,
                Some(80),
                Some(now - chrono::Duration::hours(1)),
            )
            .await
            .unwrap();

        assert!(!store
            .has_live_reminder(user_id, ReminderType::DataUsage, Some(80), now)
            .await
            .unwrap());
        assert_eq!(store.reminder_count(user_id), 0);
    }
}
