use crate::proxy::AppState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

/// State for the admin/metrics router.
#[derive(Clone)]
pub struct MetricsState {
    pub app: Arc<AppState>,
    pub start_time: Instant,
}

/// JSON snapshot served on `/api/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub timestamp_ms: u128,
    pub uptime_seconds: u64,
    pub predictive: PredictiveStats,
    pub fallback: FallbackStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictiveStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub total_size: usize,
    pub max_total_size: usize,
    pub average_access_time_ms: f64,
    pub hit_rate: f64,
    pub efficiency: f64,
    pub outstanding_hints: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FallbackStats {
    pub size: usize,
    pub hit_rate: f64,
    pub entries_per_access: f64,
    pub compression_ratio: f64,
}

impl StatsSnapshot {
    pub fn capture(state: &AppState, start_time: Instant) -> Self {
        let m = state.cache.predictive_metrics();
        let f = state.cache.fallback_stats();
        StatsSnapshot {
            timestamp_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or(0),
            uptime_seconds: start_time.elapsed().as_secs(),
            predictive: PredictiveStats {
                hits: m.hits,
                misses: m.misses,
                evictions: m.evictions,
                entries: m.entry_count,
                total_size: m.total_size,
                max_total_size: state.cache.max_total_size(),
                average_access_time_ms: m.average_access_time_ms,
                hit_rate: m.hit_rate,
                efficiency: m.efficiency,
                outstanding_hints: state.cache.outstanding_hints(),
            },
            fallback: FallbackStats {
                size: f.size,
                hit_rate: f.hit_rate,
                entries_per_access: f.entries_per_access,
                compression_ratio: f.compression_ratio,
            },
        }
    }

    fn record_gauges(&self) {
        let p = &self.predictive;
        metrics::gauge!("predictive_cache_entries").set(p.entries as f64);
        metrics::gauge!("predictive_cache_bytes").set(p.total_size as f64);
        metrics::gauge!("predictive_cache_hit_rate").set(p.hit_rate);
        metrics::gauge!("predictive_cache_efficiency").set(p.efficiency);
        metrics::gauge!("predictive_cache_access_ms").set(p.average_access_time_ms);
        metrics::gauge!("predictive_cache_evictions").set(p.evictions as f64);
        metrics::gauge!("fallback_cache_entries").set(self.fallback.size as f64);
        metrics::gauge!("fallback_cache_compression_ratio").set(self.fallback.compression_ratio);
    }
}

/// Background task that copies cache counters into Prometheus gauges.
pub async fn metrics_reporter(
    state: Arc<AppState>,
    start_time: Instant,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => StatsSnapshot::capture(&state, start_time).record_gauges(),
        }
    }
}

/// GET /api/stats
pub async fn stats_handler(State(state): State<MetricsState>) -> Json<StatsSnapshot> {
    Json(StatsSnapshot::capture(&state.app, state.start_time))
}

/// POST /api/cache/clear: drop every entry and counter in both tiers.
pub async fn clear_handler(State(state): State<MetricsState>) -> Json<StatsSnapshot> {
    state.app.cache.clear();
    Json(StatsSnapshot::capture(&state.app, state.start_time))
}
