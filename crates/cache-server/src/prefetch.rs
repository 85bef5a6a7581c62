use crate::proxy::{forward, should_cache, to_cached, AppState};
use axum::body::Body;
use axum::http::Method;
use predictive_cache::{PrefetchError, Prefetcher};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// Hands prefetch hints to the background worker without blocking.
///
/// A full queue drops the hint; prefetching is best effort.
#[derive(Debug, Clone)]
pub struct ChannelPrefetcher {
    tx: mpsc::Sender<String>,
}

pub fn channel(capacity: usize) -> (ChannelPrefetcher, mpsc::Receiver<String>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ChannelPrefetcher { tx }, rx)
}

impl Prefetcher for ChannelPrefetcher {
    fn prefetch(&self, url: &str) -> Result<(), PrefetchError> {
        self.tx.try_send(url.to_string()).map_err(|e| match e {
            TrySendError::Full(url) => PrefetchError::Failed {
                url,
                reason: "prefetch queue full".to_string(),
            },
            TrySendError::Closed(_) => PrefetchError::Closed,
        })
    }
}

/// Fetch hinted URLs one at a time and store them through the cache layer.
pub async fn run_prefetch_worker(
    state: Arc<AppState>,
    mut rx: mpsc::Receiver<String>,
    shutdown: CancellationToken,
) {
    tracing::info!("prefetch worker started");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = rx.recv() => {
                let Some(url) = next else { break };
                prefetch_one(&state, &url).await;
            }
        }
    }
    tracing::info!("prefetch worker stopped");
}

async fn prefetch_one(state: &AppState, url: &str) {
    match forward(state, Method::GET, url, Body::empty()).await {
        Ok(upstream) if should_cache(&state.cache, &upstream) => {
            let tier = state.cache.insert_prefetched(url, to_cached(&upstream));
            metrics::counter!("prefetch_total", "result" => "stored").increment(1);
            tracing::debug!(url, tier = tier.map(|t| t.as_str()), "prefetched");
        }
        Ok(upstream) => {
            metrics::counter!("prefetch_total", "result" => "skipped").increment(1);
            tracing::debug!(url, status = upstream.status.as_u16(), "prefetch not cacheable");
        }
        Err(e) => {
            metrics::counter!("prefetch_total", "result" => "failed").increment(1);
            tracing::warn!(url, error = %e, "prefetch failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hints_reach_the_receiver() {
        let (prefetcher, mut rx) = channel(2);
        prefetcher.prefetch("/hospitals/2").unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("/hospitals/2"));
    }

    #[test]
    fn full_queue_fails_the_hint() {
        let (prefetcher, _rx) = channel(1);
        prefetcher.prefetch("/a").unwrap();
        let err = prefetcher.prefetch("/b").unwrap_err();
        assert!(matches!(err, PrefetchError::Failed { ref url, .. } if url == "/b"));
    }

    #[test]
    fn closed_queue_is_reported() {
        let (prefetcher, rx) = channel(1);
        drop(rx);
        assert!(matches!(prefetcher.prefetch("/a"), Err(PrefetchError::Closed)));
    }
}
