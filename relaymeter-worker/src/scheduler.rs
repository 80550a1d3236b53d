/// Periodic job scheduling
///
/// Each job runs on its own task with a fixed-period ticker. The cycle
/// body is awaited inline, so a cycle that outlives its period simply
/// delays the loop and `MissedTickBehavior::Skip` drops the ticks it
/// slept through: cycles never overlap and never queue up.
///
/// A failed cycle is logged and the next tick runs as normal; shutdown
/// is cooperative via a [`CancellationToken`] and takes effect between
/// cycles.
use std::future::Future;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    mut job: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(job = name, period_secs = period.as_secs_f64(), "job scheduled");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(job = name, "job stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = job().await {
                        error!(job = name, error = %e, "cycle failed");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn test_slow_cycles_coalesce() {
        let runs = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let counter = runs.clone();
        let handle = spawn_periodic(
            "slow",
            Duration::from_millis(10),
            shutdown.clone(),
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    // Cycle takes 2.5 periods; missed ticks must be skipped
                    sleep(Duration::from_millis(25)).await;
                    Ok(())
                }
            },
        );

        sleep(Duration::from_millis(105)).await;
        shutdown.cancel();
        handle.await.unwrap();

        let count = runs.load(Ordering::SeqCst);
        // A naive schedule would have run ~10 times
        assert!((3..=5).contains(&count), "got {count} runs");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycle_does_not_stop_the_job() {
        let runs = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let counter = runs.clone();
        let handle = spawn_periodic(
            "flaky",
            Duration::from_millis(10),
            shutdown.clone(),
            move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        anyhow::bail!("first cycle breaks");
                    }
                    Ok(())
                }
            },
        );

        sleep(Duration::from_millis(35)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert!(runs.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_promptly() {
        let shutdown = CancellationToken::new();
        let handle = spawn_periodic(
            "idle",
            Duration::from_secs(3600),
            shutdown.clone(),
            || async { Ok(()) },
        );

        sleep(Duration::from_millis(1)).await;
        shutdown.cancel();
        handle.await.unwrap();
    }
}
