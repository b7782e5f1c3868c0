//! Periodic background loops.
//!
//! A loop runs one step per interval until its token is cancelled, backs
//! off after a failed step and never propagates step errors. Each loop
//! owns a heartbeat sub-task that is aborted before the loop returns.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use quoter_core::SharedClock;
use quoter_telemetry::Metrics;

use crate::lifecycle::OrderLifecycleManager;

/// Timing of one periodic loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub name: &'static str,
    pub interval: Duration,
    /// Delay after a failed step instead of `interval`.
    pub error_backoff: Duration,
    pub heartbeat: Duration,
}

impl LoopConfig {
    pub fn new(name: &'static str, interval: Duration, error_backoff: Duration) -> Self {
        Self {
            name,
            interval,
            error_backoff,
            heartbeat: Duration::from_secs(5),
        }
    }

    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }
}

/// Step counts of a finished loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub iterations: u64,
    pub errors: u64,
}

fn spawn_heartbeat(
    name: &'static str,
    every: Duration,
    clock: SharedClock,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            Metrics::loop_heartbeat(name, clock.now_ms());
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(every) => {}
            }
        }
    })
}

/// Run `step` every `config.interval` until `shutdown` is cancelled.
///
/// Cancellation is checked at the loop head, after each step and while
/// sleeping. A started step always runs to completion, so a cancel never
/// strands an order mid-replace.
pub async fn run_periodic<F, Fut, E>(
    config: LoopConfig,
    clock: SharedClock,
    shutdown: CancellationToken,
    mut step: F,
) -> LoopStats
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let name = config.name;
    let heartbeat = spawn_heartbeat(name, config.heartbeat, clock, shutdown.child_token());
    let mut stats = LoopStats::default();
    info!(name, interval_ms = config.interval.as_millis() as u64, "Loop started");

    while !shutdown.is_cancelled() {
        let result = step().await;
        let delay = match result {
            Ok(()) => {
                stats.iterations += 1;
                config.interval
            }
            Err(err) => {
                stats.errors += 1;
                Metrics::loop_error(name);
                warn!(name, backoff_ms = config.error_backoff.as_millis() as u64, "Loop step failed: {err}");
                config.error_backoff
            }
        };
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    heartbeat.abort();
    if let Err(err) = heartbeat.await {
        if !err.is_cancelled() {
            warn!(name, "Heartbeat task failed: {err}");
        }
    }
    info!(name, iterations = stats.iterations, errors = stats.errors, "Loop stopped");
    stats
}

/// Spawn the anti-stale sweep loop. A sweep with failed actions counts as
/// a failed step and backs off.
pub fn spawn_stale_sweep(
    manager: Arc<OrderLifecycleManager>,
    shutdown: CancellationToken,
) -> JoinHandle<LoopStats> {
    let config = LoopConfig::new(
        "stale_sweep",
        Duration::from_millis(manager.config().stale_check_interval_ms),
        Duration::from_millis(manager.config().stale_error_backoff_ms),
    );
    let clock = Arc::clone(manager.clock());
    tokio::spawn(async move {
        run_periodic(config, clock, shutdown, move || {
            let manager = Arc::clone(&manager);
            async move {
                let summary = manager.check_and_refresh_stale_orders(None).await;
                if summary.errors > 0 {
                    return Err(format!("{} stale actions failed", summary.errors));
                }
                debug!(checked = summary.checked, "Stale sweep done");
                Ok(())
            }
        })
        .await
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use quoter_core::SystemClock;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn config(name: &'static str) -> LoopConfig {
        LoopConfig::new(name, Duration::from_millis(2), Duration::from_millis(2))
            .with_heartbeat(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_loop_runs_until_cancelled() {
        let shutdown = CancellationToken::new();
        let counter = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&counter);

        let handle = tokio::spawn(run_periodic(
            config("test_ok"),
            SystemClock::shared(),
            shutdown.clone(),
            move || {
                let seen = Arc::clone(&seen);
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), String>(())
                }
            },
        ));
        tokio::time::sleep(Duration::from_millis(40)).await;
        shutdown.cancel();
        let stats = handle.await.unwrap();

        assert!(stats.iterations >= 2);
        assert_eq!(stats.errors, 0);
        assert_eq!(stats.iterations, counter.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failing_step_backs_off_and_continues() {
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_periodic(
            config("test_err"),
            SystemClock::shared(),
            shutdown.clone(),
            || async { Err::<(), _>("boom") },
        ));
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();
        let stats = handle.await.unwrap();

        assert_eq!(stats.iterations, 0);
        assert!(stats.errors >= 2);
    }

    #[tokio::test]
    async fn test_cancel_lets_running_step_finish() {
        let shutdown = CancellationToken::new();
        let finished = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&finished);

        let handle = tokio::spawn(run_periodic(
            LoopConfig::new("test_slow", Duration::from_secs(10), Duration::from_secs(10)),
            SystemClock::shared(),
            shutdown.clone(),
            move || {
                let seen = Arc::clone(&seen);
                async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), String>(())
                }
            },
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();
        let stats = handle.await.unwrap();

        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(stats.iterations, 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let stats = run_periodic(config("test_pre"), SystemClock::shared(), shutdown, || async {
            Ok::<(), String>(())
        })
        .await;
        assert_eq!(stats, LoopStats::default());
    }
}
