/// Usage recording: folds collected batches into the store
///
/// One [`UsageRecorder`] instance backs both recording jobs. Every write
/// is an atomic in-database increment, so a cycle that dies halfway
/// leaves totals short by at most the unwritten remainder of one batch,
/// never double-counted; the node-side counters were already reset, so
/// the next cycle carries on from fresh deltas.
///
/// Admin aggregates are folded from the same batch as the user totals,
/// which keeps the two views consistent with each other per cycle.
use crate::collector::{OutboundBatch, UserStatsBatch};
use crate::store::UsageStore;
use chrono::{DateTime, Utc};
use relaymeter_shared::error::StoreResult;
use relaymeter_shared::models::usage::hour_bucket;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub struct UsageRecorder<S: UsageStore> {
    store: Arc<S>,

    /// When true, hour-bucket ledgers are skipped; totals still update
    disable_recording_node_usage: bool,
}

impl<S: UsageStore> UsageRecorder<S> {
    pub fn new(store: Arc<S>, disable_recording_node_usage: bool) -> Self {
        Self {
            store,
            disable_recording_node_usage,
        }
    }

    /// Folds one cycle's user traffic into user totals, admin aggregates,
    /// and the per-user hour ledger
    pub async fn record_user_usages(
        &self,
        batch: &UserStatsBatch,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        if batch.is_empty() {
            debug!("no user traffic this cycle");
            return Ok(());
        }

        let admin_of = self.store.admin_mapping().await?;
        let mut admin_deltas: HashMap<Uuid, i64> = HashMap::new();

        for (&user_id, &delta) in &batch.totals {
            if delta == 0 {
                continue;
            }
            self.store.increment_user_usage(user_id, delta, now).await?;
            if let Some(&admin_id) = admin_of.get(&user_id) {
                *admin_deltas.entry(admin_id).or_default() += delta;
            }
        }

        for (admin_id, delta) in admin_deltas {
            self.store.increment_admin_usage(admin_id, delta).await?;
        }

        if !self.disable_recording_node_usage {
            let hour = hour_bucket(now);
            for node in &batch.per_node {
                for stat in &node.users {
                    if stat.value == 0 {
                        continue;
                    }
                    self.store
                        .ensure_user_bucket(stat.user_id, node.node_id, hour)
                        .await?;
                    self.store
                        .increment_user_bucket(stat.user_id, node.node_id, hour, stat.value)
                        .await?;
                }
            }
        }

        debug!(users = batch.totals.len(), "recorded user usages");
        Ok(())
    }

    /// Folds one cycle's outbound traffic into node totals, system
    /// totals, and the per-node hour ledger
    pub async fn record_node_usages(
        &self,
        batch: &OutboundBatch,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        if batch.uplink == 0 && batch.downlink == 0 {
            debug!("no outbound traffic this cycle");
            return Ok(());
        }

        self.store
            .increment_system_stats(batch.uplink, batch.downlink)
            .await?;

        let hour = hour_bucket(now);
        for node in &batch.per_node {
            if node.uplink == 0 && node.downlink == 0 {
                continue;
            }
            if let Some(node_id) = node.node_id {
                self.store
                    .increment_node_traffic(node_id, node.uplink, node.downlink)
                    .await?;
            }
            if !self.disable_recording_node_usage {
                self.store.ensure_node_bucket(node.node_id, hour).await?;
                self.store
                    .increment_node_bucket(node.node_id, hour, node.uplink, node.downlink)
                    .await?;
            }
        }

        debug!(
            uplink = batch.uplink,
            downlink = batch.downlink,
            "recorded node usages"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{NodeOutbound, NodeUserUsage};
    use crate::sources::UserStat;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use relaymeter_shared::models::user::{User, UserStatus};

    fn seed_user(store: &MemoryStore, admin_id: Option<Uuid>) -> Uuid {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let user = User {
            id: Uuid::new_v4(),
            username: format!("user-{}", Uuid::new_v4()),
            status: UserStatus::Active,
            used_traffic: 0,
            data_limit: None,
            expire: None,
            admin_id,
            note: None,
            on_hold_expire_duration: None,
            on_hold_timeout: None,
            online_at: None,
            sub_revoked_at: None,
            sub_updated_at: None,
            edit_at: None,
            created_at: t0,
            last_status_change: t0,
        };
        let id = user.id;
        store.insert_user(user);
        id
    }

    fn user_batch(entries: Vec<(Option<Uuid>, Vec<UserStat>)>) -> UserStatsBatch {
        let mut totals: HashMap<Uuid, i64> = HashMap::new();
        let per_node = entries
            .into_iter()
            .map(|(node_id, users)| {
                for stat in &users {
                    *totals.entry(stat.user_id).or_default() += stat.value;
                }
                NodeUserUsage { node_id, users }
            })
            .collect();
        UserStatsBatch { per_node, totals }
    }

    #[tokio::test]
    async fn test_user_totals_and_admin_rollup() {
        let store = Arc::new(MemoryStore::new());
        let admin_id = Uuid::new_v4();
        let alice = seed_user(&store, Some(admin_id));
        let bob = seed_user(&store, Some(admin_id));
        let orphan = seed_user(&store, None);

        let node_id = Some(Uuid::new_v4());
        let batch = user_batch(vec![(
            node_id,
            vec![
                UserStat {
                    user_id: alice,
                    value: 1000,
                },
                UserStat {
                    user_id: bob,
                    value: 500,
                },
                UserStat {
                    user_id: orphan,
                    value: 250,
                },
            ],
        )]);

        let recorder = UsageRecorder::new(store.clone(), false);
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 0).unwrap();
        recorder.record_user_usages(&batch, now).await.unwrap();

        assert_eq!(store.user(alice).unwrap().used_traffic, 1000);
        assert_eq!(store.user(alice).unwrap().online_at, Some(now));
        assert_eq!(store.user(bob).unwrap().used_traffic, 500);
        // Both owned users roll up; the orphan contributes to no admin
        assert_eq!(store.admin_usage(admin_id), 1500);

        let hour = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(store.user_bucket(alice, node_id, hour), Some(1000));
    }

    #[tokio::test]
    async fn test_same_hour_cycles_share_a_bucket() {
        let store = Arc::new(MemoryStore::new());
        let alice = seed_user(&store, None);
        let recorder = UsageRecorder::new(store.clone(), false);

        let first = Utc.with_ymd_and_hms(2024, 6, 1, 12, 5, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2024, 6, 1, 12, 55, 0).unwrap();
        for now in [first, second] {
            let batch = user_batch(vec![(
                None,
                vec![UserStat {
                    user_id: alice,
                    value: 100,
                }],
            )]);
            recorder.record_user_usages(&batch, now).await.unwrap();
        }

        let hour = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(store.user_bucket(alice, None, hour), Some(200));
    }

    #[tokio::test]
    async fn test_disabled_node_recording_skips_buckets_only() {
        let store = Arc::new(MemoryStore::new());
        let alice = seed_user(&store, None);
        let recorder = UsageRecorder::new(store.clone(), true);

        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 0).unwrap();
        let batch = user_batch(vec![(
            None,
            vec![UserStat {
                user_id: alice,
                value: 300,
            }],
        )]);
        recorder.record_user_usages(&batch, now).await.unwrap();

        assert_eq!(store.user(alice).unwrap().used_traffic, 300);
        let hour = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(store.user_bucket(alice, None, hour), None);
    }

    #[tokio::test]
    async fn test_failed_node_leaves_its_bucket_absent() {
        let store = Arc::new(MemoryStore::new());
        let alice = seed_user(&store, None);
        let recorder = UsageRecorder::new(store.clone(), false);

        let node_a = Some(Uuid::new_v4());
        let node_b = Some(Uuid::new_v4());
        // Node B failed its poll and contributed an empty list
        let batch = user_batch(vec![
            (
                node_a,
                vec![UserStat {
                    user_id: alice,
                    value: 400,
                }],
            ),
            (node_b, vec![]),
        ]);

        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 0).unwrap();
        recorder.record_user_usages(&batch, now).await.unwrap();

        let hour = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(store.user_bucket(alice, node_a, hour), Some(400));
        assert_eq!(store.user_bucket(alice, node_b, hour), None);
        assert_eq!(store.user(alice).unwrap().used_traffic, 400);
    }

    #[tokio::test]
    async fn test_empty_batch_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let alice = seed_user(&store, None);
        let recorder = UsageRecorder::new(store.clone(), false);

        let now = Utc::now();
        recorder
            .record_user_usages(&UserStatsBatch::default(), now)
            .await
            .unwrap();

        assert_eq!(store.user(alice).unwrap().used_traffic, 0);
        assert_eq!(store.user(alice).unwrap().online_at, None);
    }

    #[tokio::test]
    async fn test_node_usages_update_system_and_buckets() {
        let store = Arc::new(MemoryStore::new());
        let recorder = UsageRecorder::new(store.clone(), false);
        let edge_id = Uuid::new_v4();

        let batch = OutboundBatch {
            per_node: vec![
                NodeOutbound {
                    node_id: None,
                    uplink: 100,
                    downlink: 200,
                },
                NodeOutbound {
                    node_id: Some(edge_id),
                    uplink: 50,
                    downlink: 75,
                },
            ],
            uplink: 150,
            downlink: 275,
        };

        let now = Utc.with_ymd_and_hms(2024, 6, 1, 9, 10, 0).unwrap();
        recorder.record_node_usages(&batch, now).await.unwrap();

        assert_eq!(store.system_stats(), (150, 275));
        // Only real nodes carry running totals; the master has no node row
        assert_eq!(store.node_traffic(edge_id), (50, 75));

        let hour = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
        assert_eq!(store.node_bucket(None, hour), Some((100, 200)));
        assert_eq!(store.node_bucket(Some(edge_id), hour), Some((50, 75)));
    }

    #[tokio::test]
    async fn test_quiet_outbound_cycle_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let recorder = UsageRecorder::new(store.clone(), false);

        recorder
            .record_node_usages(&OutboundBatch::default(), Utc::now())
            .await
            .unwrap();

        assert_eq!(store.system_stats(), (0, 0));
    }
}
