use crate::proxy::AppState;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Periodic cleanup and predict-and-preload passes.
///
/// Both timers stop when the handle is shut down or the parent token is
/// cancelled. Dropping the handle without `shutdown` leaves them running.
pub struct Maintenance {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Maintenance {
    pub fn spawn(
        state: Arc<AppState>,
        cleanup_every: Duration,
        preload_every: Duration,
        parent: &CancellationToken,
    ) -> Self {
        let token = parent.child_token();

        let cleanup = {
            let state = Arc::clone(&state);
            every(cleanup_every, token.clone(), move || {
                let removed = state.cache.cleanup();
                metrics::counter!("cache_cleanup_removed_total").increment(removed as u64);
                if removed > 0 {
                    tracing::info!(removed, "periodic cleanup");
                }
            })
        };

        let preload = every(preload_every, token.clone(), move || {
            let report = state.cache.predict_and_preload();
            metrics::counter!("prefetch_hints_total").increment(report.issued.len() as u64);
            tracing::debug!(
                issued = report.issued.len(),
                skipped = report.skipped,
                failed = report.failed,
                "predict and preload pass"
            );
        });

        tracing::info!(
            cleanup_secs = cleanup_every.as_secs(),
            preload_secs = preload_every.as_secs(),
            "maintenance timers started"
        );

        Self {
            token,
            tasks: vec![cleanup, preload],
        }
    }

    /// Stop both timers and wait for them to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "maintenance task panicked");
            }
        }
        tracing::info!("maintenance timers stopped");
    }
}

fn every<F>(period: Duration, token: CancellationToken, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    let period = period.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => tick(),
            }
        }
    })
}
