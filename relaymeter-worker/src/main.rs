//! # Relaymeter Worker
//!
//! Entry point for the relaymeter background worker. Boots the store,
//! runs migrations, and schedules the three periodic jobs:
//! usage recording (per-user and per-node) and user lifecycle review.
//!
//! ## Usage
//!
//! ```bash
//! DATABASE_URL=postgresql://localhost/relaymeter cargo run -p relaymeter-worker
//! ```

use relaymeter_shared::config::Config;
use relaymeter_shared::db::migrations::run_migrations;
use relaymeter_shared::db::pool::{create_pool, DatabaseConfig};
use relaymeter_shared::notification::{Notifier, NullNotifier, Reporter, WebhookNotifier};
use relaymeter_worker::accumulator::UsageRecorder;
use relaymeter_worker::collector;
use relaymeter_worker::proxy::NoopProxySync;
use relaymeter_worker::reminders::ReminderEvaluator;
use relaymeter_worker::reviewer::LifecycleReviewer;
use relaymeter_worker::scheduler::spawn_periodic;
use relaymeter_worker::sources::{MockStatsSource, NodeHandle, NodeRegistry};
use relaymeter_worker::store::PgStore;
use std::sync::Arc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relaymeter_worker=debug,relaymeter_shared=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Relaymeter worker v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    let pool = create_pool(DatabaseConfig {
        url: config.database.url.clone(),
        max_connections: config.database.max_connections,
        ..Default::default()
    })
    .await?;
    run_migrations(&pool).await?;

    let store = Arc::new(PgStore::new(pool));

    // Until node agents register themselves, the master node is the only
    // pollable source
    let registry = NodeRegistry::new();
    registry.register(NodeHandle::master(Arc::new(MockStatsSource::new())));

    let notifier: Arc<dyn Notifier> = match &config.webhook {
        Some(webhook) => {
            tracing::info!(address = %webhook.address, "webhook notifications enabled");
            Arc::new(WebhookNotifier::new(
                webhook.address.clone(),
                webhook.secret.clone(),
            ))
        }
        None => {
            tracing::info!("no webhook configured, notifications disabled");
            Arc::new(NullNotifier)
        }
    };
    let reporter = Arc::new(Reporter::new(config.notifications.clone(), notifier));

    let recorder = Arc::new(UsageRecorder::new(
        store.clone(),
        config.jobs.disable_recording_node_usage,
    ));
    let reviewer = Arc::new(LifecycleReviewer::new(
        store.clone(),
        Arc::new(NoopProxySync),
        reporter.clone(),
        ReminderEvaluator::new(
            store.clone(),
            reporter,
            config.reminders.usage_percent_thresholds.clone(),
            config.reminders.days_left_thresholds.clone(),
        ),
    ));

    let shutdown = CancellationToken::new();
    let mut handles = Vec::new();

    {
        let recorder = recorder.clone();
        let registry = registry.clone();
        handles.push(spawn_periodic(
            "record_user_usages",
            Duration::from_secs(config.jobs.record_user_usages_interval),
            shutdown.clone(),
            move || {
                let recorder = recorder.clone();
                let nodes = registry.snapshot();
                async move {
                    let batch = collector::collect_user_stats(&nodes).await;
                    recorder.record_user_usages(&batch, chrono::Utc::now()).await?;
                    Ok(())
                }
            },
        ));
    }

    {
        let recorder = recorder.clone();
        let registry = registry.clone();
        handles.push(spawn_periodic(
            "record_node_usages",
            Duration::from_secs(config.jobs.record_node_usages_interval),
            shutdown.clone(),
            move || {
                let recorder = recorder.clone();
                let nodes = registry.snapshot();
                async move {
                    let batch = collector::collect_outbound_stats(&nodes).await;
                    recorder.record_node_usages(&batch, chrono::Utc::now()).await?;
                    Ok(())
                }
            },
        ));
    }

    {
        let reviewer = reviewer.clone();
        handles.push(spawn_periodic(
            "review_users",
            Duration::from_secs(config.jobs.review_users_interval),
            shutdown.clone(),
            move || {
                let reviewer = reviewer.clone();
                async move {
                    reviewer.review(chrono::Utc::now()).await?;
                    Ok(())
                }
            },
        ));
    }

    tracing::info!("Worker ready, jobs scheduled");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping jobs...");
    shutdown.cancel();
    for handle in handles {
        let _ = handle.await;
    }
    tracing::info!("Worker stopped");

    Ok(())
}
