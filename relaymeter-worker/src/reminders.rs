/// Reminder threshold evaluation
///
/// Active users approaching their data cap or expiry get a one-shot
/// notification per configured threshold. Deduplication is carried by
/// reminder rows in the store: a threshold fires only while no live
/// reminder exists for it, and reminders are stamped with the user's
/// expiry so a plan change lets them lapse and fire again.
///
/// Percent thresholds are scanned highest first and the scan stops at
/// the first satisfied one, so a user at 93% owes only the 90 reminder,
/// never a late 80. Days-left thresholds scan lowest first with the same
/// stop-at-first rule.
///
/// The reminder row and the notification are paired: a kind whose gate
/// is off records nothing, so the threshold still fires once the
/// operator turns the gate on.
use crate::store::ReviewStore;
use chrono::{DateTime, Utc};
use relaymeter_shared::error::StoreResult;
use relaymeter_shared::models::reminder::ReminderType;
use relaymeter_shared::models::user::User;
use relaymeter_shared::notification::{Notification, Reporter};
use std::sync::Arc;
use tracing::info;

pub struct ReminderEvaluator<S: ReviewStore> {
    store: Arc<S>,
    reporter: Arc<Reporter>,

    /// Percent-of-limit thresholds, sorted descending
    usage_thresholds: Vec<i64>,

    /// Days-left thresholds, sorted ascending
    days_thresholds: Vec<i64>,
}

impl<S: ReviewStore> ReminderEvaluator<S> {
    pub fn new(
        store: Arc<S>,
        reporter: Arc<Reporter>,
        mut usage_thresholds: Vec<i64>,
        mut days_thresholds: Vec<i64>,
    ) -> Self {
        usage_thresholds.sort_unstable_by(|a, b| b.cmp(a));
        days_thresholds.sort_unstable();
        Self {
            store,
            reporter,
            usage_thresholds,
            days_thresholds,
        }
    }

    /// Evaluates both threshold families for one user
    pub async fn evaluate(&self, user: &User, now: DateTime<Utc>) -> StoreResult<()> {
        self.evaluate_usage_percent(user, now).await?;
        self.evaluate_days_left(user, now).await?;
        Ok(())
    }

    async fn evaluate_usage_percent(&self, user: &User, now: DateTime<Utc>) -> StoreResult<()> {
        let Some(used_percent) = user.usage_percent() else {
            return Ok(());
        };

        for &threshold in &self.usage_thresholds {
            if used_percent < threshold as f64 {
                continue;
            }
            // Highest satisfied threshold wins; lower ones never fire late
            let owed = !self
                .store
                .has_live_reminder(user.id, ReminderType::DataUsage, Some(threshold), now)
                .await?;
            if owed {
                info!(
                    username = %user.username,
                    used_percent,
                    threshold,
                    "usage threshold reached"
                );
                // The row only exists if the notification went out; a
                // gated-off kind stays owed until the gate opens
                let sent = self
                    .reporter
                    .report(Notification::ReachedUsagePercent {
                        username: user.username.clone(),
                        used_percent,
                        threshold,
                    })
                    .await;
                if sent {
                    self.store
                        .create_reminder(
                            user.id,
                            ReminderType::DataUsage,
                            Some(threshold),
                            expiry_instant(user),
                        )
                        .await?;
                }
            }
            break;
        }
        Ok(())
    }

    async fn evaluate_days_left(&self, user: &User, now: DateTime<Utc>) -> StoreResult<()> {
        let Some(days_left) = user.days_to_expiry(now) else {
            return Ok(());
        };
        if days_left < 0 {
            return Ok(());
        }

        for &threshold in &self.days_thresholds {
            if days_left > threshold {
                continue;
            }
            let owed = !self
                .store
                .has_live_reminder(user.id, ReminderType::ExpirationDate, Some(threshold), now)
                .await?;
            if owed {
                info!(
                    username = %user.username,
                    days_left,
                    threshold,
                    "expiration threshold reached"
                );
                let sent = self
                    .reporter
                    .report(Notification::ReachedDaysLeft {
                        username: user.username.clone(),
                        days_left,
                        threshold,
                    })
                    .await;
                if sent {
                    self.store
                        .create_reminder(
                            user.id,
                            ReminderType::ExpirationDate,
                            Some(threshold),
                            expiry_instant(user),
                        )
                        .await?;
                }
            }
            break;
        }
        Ok(())
    }
}

/// The user's expiry as an instant, for stamping reminders
fn expiry_instant(user: &User) -> Option<DateTime<Utc>> {
    user.expire
        .filter(|e| *e > 0)
        .and_then(|e| DateTime::from_timestamp(e, 0))
}
