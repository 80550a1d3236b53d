/// Notification events, gating and dispatch
///
/// Lifecycle transitions and reminder thresholds produce [`Notification`]
/// events. Every event passes through a [`Reporter`], which drops kinds
/// the operator has gated off and hands the rest to a [`Notifier`]
/// transport. Dispatch is fire-and-forget: a failed or slow webhook never
/// blocks or fails the job that raised the event.
///
/// # Example
///
/// ```
/// use relaymeter_shared::notification::{
///     Notification, NotificationSettings, RecordingNotifier, Reporter,
/// };
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let recorder = Arc::new(RecordingNotifier::new());
/// let reporter = Reporter::new(NotificationSettings::default(), recorder.clone());
///
/// reporter
///     .report(Notification::UserLimited {
///         username: "alice".to_string(),
///     })
///     .await;
///
/// assert_eq!(recorder.events().len(), 1);
/// # }
/// ```
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// A notification event raised by the control plane
///
/// Serialized with an `action` tag, e.g.
/// `{"action": "user_limited", "username": "alice"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Notification {
    /// A user account was created
    UserCreated { username: String },

    /// A user account was modified
    UserUpdated { username: String },

    /// A user account was deleted
    UserDeleted { username: String },

    /// A user transitioned to active
    UserEnabled { username: String },

    /// A user was administratively disabled
    UserDisabled { username: String },

    /// A user hit their data limit
    UserLimited { username: String },

    /// A user passed their expiry deadline
    UserExpired { username: String },

    /// A pending plan fired and replaced the user's limits
    DataResetByNext {
        username: String,
        data_limit: Option<i64>,
        expire: Option<i64>,
    },

    /// A user's consumption counter was explicitly reset
    DataUsageReset { username: String },

    /// A user's subscription credentials were revoked
    SubscriptionRevoked { username: String },

    /// A user crossed a percent-of-limit reminder threshold
    ReachedUsagePercent {
        username: String,
        used_percent: f64,
        threshold: i64,
    },

    /// A user came within a days-left reminder threshold of expiry
    ReachedDaysLeft {
        username: String,
        days_left: i64,
        threshold: i64,
    },
}

impl Notification {
    /// Short tag for log lines
    pub fn action(&self) -> &'static str {
        match self {
            Notification::UserCreated { .. } => "user_created",
            Notification::UserUpdated { .. } => "user_updated",
            Notification::UserDeleted { .. } => "user_deleted",
            Notification::UserEnabled { .. } => "user_enabled",
            Notification::UserDisabled { .. } => "user_disabled",
            Notification::UserLimited { .. } => "user_limited",
            Notification::UserExpired { .. } => "user_expired",
            Notification::DataResetByNext { .. } => "data_reset_by_next",
            Notification::DataUsageReset { .. } => "data_usage_reset",
            Notification::SubscriptionRevoked { .. } => "subscription_revoked",
            Notification::ReachedUsagePercent { .. } => "reached_usage_percent",
            Notification::ReachedDaysLeft { .. } => "reached_days_left",
        }
    }
}

/// Per-kind notification gates
///
/// Each flag suppresses a family of events when false. All flags default
/// to true.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSettings {
    /// User status transitions (enabled, disabled, limited, expired)
    pub status_change: bool,
    pub user_created: bool,
    pub user_updated: bool,
    pub user_deleted: bool,
    /// Consumption resets, including plan rollovers
    pub data_usage_reset: bool,
    pub subscription_revoked: bool,
    pub usage_percent_reached: bool,
    pub days_left_reached: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            status_change: true,
            user_created: true,
            user_updated: true,
            user_deleted: true,
            data_usage_reset: true,
            subscription_revoked: true,
            usage_percent_reached: true,
            days_left_reached: true,
        }
    }
}

impl NotificationSettings {
    /// Whether an event passes the operator's gates
    pub fn allows(&self, notification: &Notification) -> bool {
        match notification {
            Notification::UserEnabled { .. }
            | Notification::UserDisabled { .. }
            | Notification::UserLimited { .. }
            | Notification::UserExpired { .. } => self.status_change,
            Notification::UserCreated { .. } => self.user_created,
            Notification::UserUpdated { .. } => self.user_updated,
            Notification::UserDeleted { .. } => self.user_deleted,
            Notification::DataResetByNext { .. } | Notification::DataUsageReset { .. } => {
                self.data_usage_reset
            }
            Notification::SubscriptionRevoked { .. } => self.subscription_revoked,
            Notification::ReachedUsagePercent { .. } => self.usage_percent_reached,
            Notification::ReachedDaysLeft { .. } => self.days_left_reached,
        }
    }
}

/// Notification transport
///
/// Implementations must not propagate delivery failures to the caller;
/// log and move on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification);
}

/// Gated dispatcher in front of a [`Notifier`]
///
/// The single entry point jobs use to raise events.
pub struct Reporter {
    settings: NotificationSettings,
    inner: Arc<dyn Notifier>,
}

impl Reporter {
    pub fn new(settings: NotificationSettings, inner: Arc<dyn Notifier>) -> Self {
        Self { settings, inner }
    }

    /// Dispatches an event unless its kind is gated off
    ///
    /// Returns whether the event passed the gate, so callers that record
    /// state alongside a notification (reminder rows) can skip the record
    /// when nothing was sent.
    pub async fn report(&self, notification: Notification) -> bool {
        if !self.settings.allows(&notification) {
            debug!(action = notification.action(), "notification gated off");
            return false;
        }
        self.inner.notify(notification).await;
        true
    }
}

/// Webhook transport
///
/// POSTs each event as JSON to the configured address, with the shared
/// secret (when set) in an `x-webhook-secret` header. The request runs on
/// a detached task so the raising job never waits on the receiver.
pub struct WebhookNotifier {
    client: reqwest::Client,
    address: String,
    secret: Option<String>,
}

impl WebhookNotifier {
    pub fn new(address: String, secret: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            address,
            secret,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: Notification) {
        let mut request = self.client.post(&self.address).json(&notification);
        if let Some(secret) = &self.secret {
            request = request.header("x-webhook-secret", secret);
        }

        let action = notification.action();
        let address = self.address.clone();
        tokio::spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(action, "webhook notification delivered");
                }
                Ok(response) => {
                    warn!(
                        action,
                        address = %address,
                        status = %response.status(),
                        "webhook rejected notification"
                    );
                }
                Err(e) => {
                    warn!(action, address = %address, error = %e, "webhook delivery failed");
                }
            }
        });
    }
}

/// Transport that drops everything; used when no webhook is configured
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, notification: Notification) {
        debug!(action = notification.action(), "no notifier configured, dropping");
    }
}

/// In-memory transport for tests
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events recorded so far, in dispatch order
    pub fn events(&self) -> Vec<Notification> {
        self.events.lock().unwrap().clone()
    }

    /// Drains and returns the recorded events
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) {
        self.events.lock().unwrap().push(notification);
    }
}
