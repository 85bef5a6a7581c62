use crate::strategy::CacheStrategy;

const DAY_MS: f64 = 86_400_000.0;

/// A cached payload and the bookkeeping the eviction policy scores it by.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub url: String,
    pub data: V,
    /// Insertion time, ms since epoch.
    pub timestamp: u64,
    pub access_count: u64,
    pub last_access: u64,
    pub strategy: String,
    /// Estimated bytes, fixed at insertion.
    pub size: usize,
    pub prediction_score: f64,
    /// Insertion sequence; breaks eviction ties in favour of older entries.
    pub(crate) seq: u64,
}

impl<V> CacheEntry<V> {
    pub(crate) fn touch(&mut self, now_ms: u64) {
        self.access_count += 1;
        self.last_access = now_ms;
    }

    /// Average of age, access, recency, priority and prediction scores.
    ///
    /// Age and recency go negative for stale entries so they sort first.
    /// An entry whose strategy is gone scores negative infinity.
    pub fn value_score(&self, strategy: Option<&CacheStrategy>, now_ms: u64) -> f64 {
        let Some(strategy) = strategy else {
            return f64::NEG_INFINITY;
        };

        let age = now_ms.saturating_sub(self.timestamp) as f64;
        let max_age = (strategy.max_age.as_millis() as f64).max(1.0);
        let age_score = 1.0 - age / max_age;

        let access_score = (self.access_count as f64 / 10.0).min(1.0);

        let idle = now_ms.saturating_sub(self.last_access) as f64;
        let recency_score = 1.0 - idle / DAY_MS;

        let priority_score = f64::from(strategy.priority) / 10.0;

        (age_score + access_score + recency_score + priority_score + self.prediction_score) / 5.0
    }
}
