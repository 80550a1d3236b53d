/// Configuration management for the control plane
///
/// This module loads configuration from environment variables and provides
/// a type-safe configuration struct.
///
/// # Environment Variables
///
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `DATABASE_MAX_CONNECTIONS`: Pool size (default: 10)
/// - `JOB_RECORD_USER_USAGES_INTERVAL`: Seconds between user-usage
///   recording cycles (default: 10)
/// - `JOB_RECORD_NODE_USAGES_INTERVAL`: Seconds between node-usage
///   recording cycles (default: 30)
/// - `JOB_REVIEW_USERS_INTERVAL`: Seconds between lifecycle review cycles
///   (default: 10)
/// - `DISABLE_RECORDING_NODE_USAGE`: Skip per-node hour buckets (default: false)
/// - `NOTIFY_REACHED_USAGE_PERCENT`: Comma-separated percent thresholds
///   (default: "80")
/// - `NOTIFY_DAYS_LEFT`: Comma-separated days-left thresholds (default: "3")
/// - `WEBHOOK_ADDRESS`: Notification webhook URL (optional; notifications
///   are dropped when unset)
/// - `WEBHOOK_SECRET`: Shared secret sent in `x-webhook-secret` (optional)
/// - `NOTIFY_*`: Per-kind notification gates, see [`NotificationSettings`]
///   (all default: true)
///
/// # Example
///
/// ```no_run
/// use relaymeter_shared::config::Config;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// println!("review interval: {}s", config.jobs.review_users_interval);
/// # Ok(())
/// # }
/// ```
use crate::notification::NotificationSettings;
use serde::{Deserialize, Serialize};
use std::env;

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseSettings,

    /// Periodic job intervals
    pub jobs: JobSettings,

    /// Reminder threshold configuration
    pub reminders: ReminderSettings,

    /// Webhook transport configuration (None disables dispatch)
    pub webhook: Option<WebhookSettings>,

    /// Per-kind notification gates
    pub notifications: NotificationSettings,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in pool
    pub max_connections: u32,
}

/// Periodic job intervals, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSettings {
    /// Interval between user-usage recording cycles
    pub record_user_usages_interval: u64,

    /// Interval between node-usage recording cycles
    pub record_node_usages_interval: u64,

    /// Interval between lifecycle review cycles
    pub review_users_interval: u64,

    /// When true, per-node hour buckets are not written (user and admin
    /// totals still are)
    pub disable_recording_node_usage: bool,
}

/// Reminder threshold configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderSettings {
    /// Percent-of-limit thresholds at which a data-usage reminder is owed
    pub usage_percent_thresholds: Vec<i64>,

    /// Days-left thresholds at which an expiration reminder is owed
    pub days_left_thresholds: Vec<i64>,
}

/// Webhook transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSettings {
    /// URL notifications are POSTed to
    pub address: String,

    /// Optional shared secret sent with every request
    pub secret: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if `DATABASE_URL` is missing or any numeric
    /// variable fails to parse.
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if present (for development)
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;

        let max_connections = env_u64("DATABASE_MAX_CONNECTIONS", 10)? as u32;

        let jobs = JobSettings {
            record_user_usages_interval: env_u64("JOB_RECORD_USER_USAGES_INTERVAL", 10)?,
            record_node_usages_interval: env_u64("JOB_RECORD_NODE_USAGES_INTERVAL", 30)?,
            review_users_interval: env_u64("JOB_REVIEW_USERS_INTERVAL", 10)?,
            disable_recording_node_usage: env_bool("DISABLE_RECORDING_NODE_USAGE", false)?,
        };

        let reminders = ReminderSettings {
            usage_percent_thresholds: parse_threshold_list(
                &env::var("NOTIFY_REACHED_USAGE_PERCENT").unwrap_or_else(|_| "80".to_string()),
            )?,
            days_left_thresholds: parse_threshold_list(
                &env::var("NOTIFY_DAYS_LEFT").unwrap_or_else(|_| "3".to_string()),
            )?,
        };

        let webhook = env::var("WEBHOOK_ADDRESS").ok().map(|address| WebhookSettings {
            address,
            secret: env::var("WEBHOOK_SECRET").ok(),
        });

        let notifications = NotificationSettings {
            status_change: env_bool("NOTIFY_STATUS_CHANGE", true)?,
            user_created: env_bool("NOTIFY_USER_CREATED", true)?,
            user_updated: env_bool("NOTIFY_USER_UPDATED", true)?,
            user_deleted: env_bool("NOTIFY_USER_DELETED", true)?,
            data_usage_reset: env_bool("NOTIFY_USER_DATA_USED_RESET", true)?,
            subscription_revoked: env_bool("NOTIFY_USER_SUB_REVOKED", true)?,
            usage_percent_reached: env_bool("NOTIFY_IF_DATA_USAGE_PERCENT_REACHED", true)?,
            days_left_reached: env_bool("NOTIFY_IF_DAYS_LEFT_REACHED", true)?,
        };

        Ok(Self {
            database: DatabaseSettings {
                url: database_url,
                max_connections,
            },
            jobs,
            reminders,
            webhook,
            notifications,
        })
    }
}

fn env_u64(name: &str, default: u64) -> anyhow::Result<u64> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map_err(|_| anyhow::anyhow!("{} must be an integer, got {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}

fn env_bool(name: &str, default: bool) -> anyhow::Result<bool> {
    match env::var(name) {
        Ok(raw) => parse_bool(&raw)
            .ok_or_else(|| anyhow::anyhow!("{} must be a boolean, got {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parses a comma-separated threshold list such as `"50, 80,95"`.
///
/// Empty segments are skipped; an empty input yields an empty list.
fn parse_threshold_list(raw: &str) -> anyhow::Result<Vec<i64>> {
    let mut thresholds = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let value = part
            .parse::<i64>()
            .map_err(|_| anyhow::anyhow!("invalid threshold {:?}", part))?;
        thresholds.push(value);
    }
    Ok(thresholds)
}
