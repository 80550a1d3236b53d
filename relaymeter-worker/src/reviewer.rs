/// User lifecycle review
///
/// Walks active and on-hold users each cycle and applies the lifecycle
/// rules:
///
/// - An active user who hit their cap or deadline either rolls over to
///   a pending next plan or transitions to `limited`/`expired` and is
///   deprovisioned from the fleet.
/// - A healthy active user is checked against the reminder thresholds.
/// - An on-hold user activates on their first connection, or when their
///   hold timeout passes, and their expiry clock starts at that moment.
///
/// Every decision works from a fresh read of the user, not the listing
/// snapshot, so traffic recorded between the listing and the decision is
/// seen. A failure on one user is logged and the cycle moves on; the
/// user is retried on the next cycle.
use crate::proxy::ProxySync;
use crate::reminders::ReminderEvaluator;
use crate::store::ReviewStore;
use chrono::{DateTime, Utc};
use relaymeter_shared::error::StoreResult;
use relaymeter_shared::models::next_plan::NextPlan;
use relaymeter_shared::models::user::{User, UserStatus};
use relaymeter_shared::notification::{Notification, Reporter};
use std::sync::Arc;
use tracing::{info, warn};

/// What the review decided for one user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewAction {
    /// Consume the pending plan and return the user to active
    Rollover,

    /// Move the user to this terminal-ish status and deprovision
    Transition(UserStatus),

    /// Nothing wrong; reminders may still be owed
    Keep,
}

/// Decides what happens to an active user given the exhaustion flags and
/// their pending plan.
///
/// A plan marked `fire_on_either` consumes on either flag; otherwise it
/// waits until both the cap and the deadline are spent. Without an
/// eligible plan, whichever flag is raised names the next status, with
/// `limited` winning when both are.
pub fn review_action(limited: bool, expired: bool, plan: Option<&NextPlan>) -> ReviewAction {
    if !limited && !expired {
        return ReviewAction::Keep;
    }
    if let Some(plan) = plan {
        if plan.fire_on_either || (limited && expired) {
            return ReviewAction::Rollover;
        }
    }
    ReviewAction::Transition(if limited {
        UserStatus::Limited
    } else {
        UserStatus::Expired
    })
}

pub struct LifecycleReviewer<S: ReviewStore, P: ProxySync> {
    store: Arc<S>,
    proxy: Arc<P>,
    reporter: Arc<Reporter>,
    reminders: ReminderEvaluator<S>,
}

impl<S: ReviewStore, P: ProxySync> LifecycleReviewer<S, P> {
    pub fn new(
        store: Arc<S>,
        proxy: Arc<P>,
        reporter: Arc<Reporter>,
        reminders: ReminderEvaluator<S>,
    ) -> Self {
        Self {
            store,
            proxy,
            reporter,
            reminders,
        }
    }

    /// Runs one full review cycle
    pub async fn review(&self, now: DateTime<Utc>) -> StoreResult<()> {
        self.review_active_users(now).await?;
        self.review_on_hold_users(now).await?;
        Ok(())
    }

    async fn review_active_users(&self, now: DateTime<Utc>) -> StoreResult<()> {
        for listed in self.store.list_users_by_status(UserStatus::Active).await? {
            if let Err(e) = self.review_active_user(listed.id, now).await {
                warn!(username = %listed.username, error = %e, "review failed, skipping user");
            }
        }
        Ok(())
    }

    async fn review_active_user(&self, user_id: uuid::Uuid, now: DateTime<Utc>) -> StoreResult<()> {
        // Fresh read: the listing snapshot may predate this cycle's writes
        let Some(user) = self.store.find_user(user_id).await? else {
            return Ok(());
        };
        if user.status != UserStatus::Active {
            return Ok(());
        }

        let limited = user.is_limited();
        let expired = user.is_expired(now);
        let plan = self.store.find_next_plan(user.id).await?;

        match review_action(limited, expired, plan.as_ref()) {
            ReviewAction::Rollover => {
                // plan presence is implied by the decision
                if let Some(plan) = plan {
                    self.roll_over(&user, &plan).await?;
                }
            }
            ReviewAction::Transition(status) => self.transition(&user, status).await?,
            ReviewAction::Keep => self.reminders.evaluate(&user, now).await?,
        }
        Ok(())
    }

    async fn roll_over(&self, user: &User, plan: &NextPlan) -> StoreResult<()> {
        let new_limit = plan.effective_data_limit(user.data_limit, user.used_traffic);
        let Some(updated) = self
            .store
            .apply_rollover(user.id, Some(new_limit), plan.expire)
            .await?
        else {
            return Ok(());
        };
        self.store.delete_next_plan(user.id).await?;

        info!(
            username = %user.username,
            data_limit = new_limit,
            "next plan fired, user rolled over"
        );

        if let Err(e) = self.proxy.provision(&updated).await {
            warn!(username = %user.username, error = %e, "provision after rollover failed");
        }

        self.reporter
            .report(Notification::DataResetByNext {
                username: updated.username.clone(),
                data_limit: updated.data_limit,
                expire: updated.expire,
            })
            .await;
        Ok(())
    }

    async fn transition(&self, user: &User, status: UserStatus) -> StoreResult<()> {
        if let Err(e) = self.proxy.deprovision(user).await {
            warn!(username = %user.username, error = %e, "deprovision failed");
        }
        self.store.update_user_status(user.id, status).await?;

        info!(
            username = %user.username,
            status = status.as_str(),
            "user transitioned"
        );

        let event = match status {
            UserStatus::Limited => Notification::UserLimited {
                username: user.username.clone(),
            },
            UserStatus::Expired => Notification::UserExpired {
                username: user.username.clone(),
            },
            UserStatus::Disabled => Notification::UserDisabled {
                username: user.username.clone(),
            },
            _ => return Ok(()),
        };
        self.reporter.report(event).await;
        Ok(())
    }

    async fn review_on_hold_users(&self, now: DateTime<Utc>) -> StoreResult<()> {
        for listed in self.store.list_users_by_status(UserStatus::OnHold).await? {
            if let Err(e) = self.review_on_hold_user(listed.id, now).await {
                warn!(username = %listed.username, error = %e, "on-hold review failed, skipping user");
            }
        }
        Ok(())
    }

    async fn review_on_hold_user(
        &self,
        user_id: uuid::Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let Some(user) = self.store.find_user(user_id).await? else {
            return Ok(());
        };
        if user.status != UserStatus::OnHold {
            return Ok(());
        }

        // A connection after the last admin edit starts the plan; so does
        // running out the hold timeout
        let base = user.hold_base_time();
        let connected = user.online_at.is_some_and(|at| at >= base);
        let timed_out = user.on_hold_timeout.is_some_and(|t| t <= now);
        if !connected && !timed_out {
            return Ok(());
        }

        self.store.start_expire(user.id, now).await?;
        self.store
            .update_user_status(user.id, UserStatus::Active)
            .await?;

        info!(
            username = %user.username,
            reason = if connected { "first connection" } else { "hold timeout" },
            "on-hold user activated"
        );

        self.reporter
            .report(Notification::UserEnabled {
                username: user.username.clone(),
            })
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{RecordingProxySync, SyncAction};
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use relaymeter_shared::notification::{NotificationSettings, RecordingNotifier};
    use uuid::Uuid;

    fn plan(user_id: Uuid, fire_on_either: bool, add_remaining: bool) -> NextPlan {
        NextPlan {
            user_id,
            data_limit: 2000,
            expire: None,
            add_remaining_traffic: add_remaining,
            fire_on_either,
        }
    }

    #[test]
    fn test_review_action_table() {
        let p_either = plan(Uuid::new_v4(), true, false);
        let p_both = plan(Uuid::new_v4(), false, false);

        assert_eq!(review_action(false, false, Some(&p_either)), ReviewAction::Keep);
        assert_eq!(review_action(true, false, Some(&p_either)), ReviewAction::Rollover);
        assert_eq!(
            review_action(false, true, Some(&p_both)),
            ReviewAction::Transition(UserStatus::Expired)
        );
        assert_eq!(review_action(true, true, Some(&p_both)), ReviewAction::Rollover);
        assert_eq!(
            review_action(true, false, None),
            ReviewAction::Transition(UserStatus::Limited)
        );
        // Both flags with no plan: limited wins
        assert_eq!(
            review_action(true, true, None),
            ReviewAction::Transition(UserStatus::Limited)
        );
    }

    struct Harness {
        store: Arc<MemoryStore>,
        proxy: Arc<RecordingProxySync>,
        notifier: Arc<RecordingNotifier>,
        reviewer: LifecycleReviewer<MemoryStore, RecordingProxySync>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let proxy = Arc::new(RecordingProxySync::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let reporter = Arc::new(Reporter::new(
            NotificationSettings::default(),
            notifier.clone(),
        ));
        let reminders =
            ReminderEvaluator::new(store.clone(), reporter.clone(), vec![80], vec![3]);
        let reviewer = LifecycleReviewer::new(store.clone(), proxy.clone(), reporter, reminders);
        Harness {
            store,
            proxy,
            notifier,
            reviewer,
        }
    }

    fn seed_user(
        store: &MemoryStore,
        status: UserStatus,
        data_limit: Option<i64>,
        used: i64,
        expire: Option<i64>,
    ) -> User {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let user = User {
            id: Uuid::new_v4(),
            username: format!("user-{}", Uuid::new_v4()),
            status,
            used_traffic: used,
            data_limit,
            expire,
            admin_id: None,
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
        store.insert_user(user.clone());
        user
    }

    #[tokio::test]
    async fn test_limited_user_without_plan_transitions() {
        let h = harness();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let user = seed_user(&h.store, UserStatus::Active, Some(1000), 1000, None);

        h.reviewer.review(now).await.unwrap();

        assert_eq!(h.store.user(user.id).unwrap().status, UserStatus::Limited);
        assert_eq!(h.proxy.actions(), vec![(SyncAction::Deprovision, user.id)]);

        let events = h.notifier.take();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Notification::UserLimited { .. }));
        // The transition pass never also fires a usage reminder
        assert_eq!(h.store.reminder_count(user.id), 0);
    }

    #[tokio::test]
    async fn test_rollover_carries_remaining_traffic() {
        let h = harness();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        // Expired with 300 bytes left of the cap
        let user = seed_user(
            &h.store,
            UserStatus::Active,
            Some(1000),
            700,
            Some(now.timestamp() - 60),
        );
        let mut p = plan(user.id, true, true);
        p.expire = Some(now.timestamp() + 30 * 86_400);
        h.store.insert_next_plan(p);

        h.reviewer.review(now).await.unwrap();

        let updated = h.store.user(user.id).unwrap();
        assert_eq!(updated.status, UserStatus::Active);
        assert_eq!(updated.used_traffic, 0);
        // 2000 from the plan plus the 300 unspent
        assert_eq!(updated.data_limit, Some(2300));
        assert_eq!(updated.expire, Some(now.timestamp() + 30 * 86_400));
        assert!(h.store.next_plan(user.id).is_none());
        assert_eq!(h.proxy.actions(), vec![(SyncAction::Provision, user.id)]);

        let events = h.notifier.take();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            Notification::DataResetByNext {
                data_limit: Some(2300),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_plan_waiting_for_both_does_not_fire_on_one() {
        let h = harness();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        // Expired but under the cap; the plan wants both spent
        let user = seed_user(
            &h.store,
            UserStatus::Active,
            Some(1000),
            400,
            Some(now.timestamp() - 60),
        );
        h.store.insert_next_plan(plan(user.id, false, false));

        h.reviewer.review(now).await.unwrap();

        let updated = h.store.user(user.id).unwrap();
        assert_eq!(updated.status, UserStatus::Expired);
        // The plan survives for a later rollover
        assert!(h.store.next_plan(user.id).is_some());
        assert_eq!(h.proxy.actions(), vec![(SyncAction::Deprovision, user.id)]);
    }

    #[tokio::test]
    async fn test_healthy_user_gets_reminder_evaluation() {
        let h = harness();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let user = seed_user(&h.store, UserStatus::Active, Some(1000), 850, None);

        h.reviewer.review(now).await.unwrap();

        assert_eq!(h.store.user(user.id).unwrap().status, UserStatus::Active);
        let events = h.notifier.take();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            Notification::ReachedUsagePercent { threshold: 80, .. }
        ));
    }

    #[tokio::test]
    async fn test_on_hold_activates_on_connection() {
        let h = harness();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let mut user = seed_user(&h.store, UserStatus::OnHold, None, 0, None);
        user.on_hold_expire_duration = Some(30 * 86_400);
        user.online_at = Some(now - chrono::Duration::minutes(5));
        h.store.insert_user(user.clone());

        h.reviewer.review(now).await.unwrap();

        let updated = h.store.user(user.id).unwrap();
        assert_eq!(updated.status, UserStatus::Active);
        assert_eq!(updated.expire, Some(now.timestamp() + 30 * 86_400));

        let events = h.notifier.take();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Notification::UserEnabled { .. }));
    }

    #[tokio::test]
    async fn test_on_hold_connection_before_edit_does_not_activate() {
        let h = harness();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let mut user = seed_user(&h.store, UserStatus::OnHold, None, 0, None);
        user.on_hold_expire_duration = Some(86_400);
        // Seen online before the admin re-edited the account
        user.online_at = Some(now - chrono::Duration::days(2));
        user.edit_at = Some(now - chrono::Duration::days(1));
        h.store.insert_user(user.clone());

        h.reviewer.review(now).await.unwrap();

        assert_eq!(h.store.user(user.id).unwrap().status, UserStatus::OnHold);
        assert!(h.notifier.take().is_empty());
    }

    #[tokio::test]
    async fn test_on_hold_activates_on_timeout() {
        let h = harness();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let mut user = seed_user(&h.store, UserStatus::OnHold, None, 0, None);
        user.on_hold_expire_duration = Some(86_400);
        user.on_hold_timeout = Some(now - chrono::Duration::hours(1));
        h.store.insert_user(user.clone());

        h.reviewer.review(now).await.unwrap();

        let updated = h.store.user(user.id).unwrap();
        assert_eq!(updated.status, UserStatus::Active);
        assert_eq!(updated.expire, Some(now.timestamp() + 86_400));
    }

    #[tokio::test]
    async fn test_on_hold_with_future_timeout_waits() {
        let h = harness();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let mut user = seed_user(&h.store, UserStatus::OnHold, None, 0, None);
        user.on_hold_expire_duration = Some(86_400);
        user.on_hold_timeout = Some(now + chrono::Duration::hours(1));
        h.store.insert_user(user.clone());

        h.reviewer.review(now).await.unwrap();

        assert_eq!(h.store.user(user.id).unwrap().status, UserStatus::OnHold);
    }
}
