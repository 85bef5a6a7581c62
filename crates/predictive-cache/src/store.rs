use crate::context::{CacheContext, ContextBuilder};
use crate::entry::CacheEntry;
use crate::error::{CacheError, Result};
use crate::payload::Payload;
use crate::prefetch::Prefetcher;
use crate::strategy::{CacheStrategy, StrategyRegistry, HOSPITAL_DETAIL};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Rolling window of lookup durations used for `average_access_time_ms`.
const ACCESS_WINDOW: usize = 100;
const ACCESS_WINDOW_KEEP: usize = 50;

type EntryMap<V> = HashMap<String, CacheEntry<V>, ahash::RandomState>;

/// Tuning for [`PredictiveCache`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Byte budget across all entries.
    pub max_total_size: usize,
    /// Allow a single entry larger than the budget into an otherwise empty
    /// store. When false such an entry is rejected with `EntryTooLarge`.
    pub allow_transient_overflow: bool,
    /// Treat each strategy's `max_entries` as a hard cap.
    pub enforce_strategy_caps: bool,
    /// Candidates must score strictly above this to be preloaded.
    pub preload_threshold: f64,
    /// Hints issued per `predict_and_preload` pass.
    pub preload_limit: usize,
    /// How long an issued hint suppresses another hint for the same URL.
    pub hint_ttl: Duration,
    /// URLs always considered by the preloader.
    pub fixed_candidates: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_total_size: 50 * 1024 * 1024,
            allow_transient_overflow: true,
            enforce_strategy_caps: false,
            preload_threshold: 0.5,
            preload_limit: 5,
            hint_ttl: Duration::from_secs(5),
            fixed_candidates: vec!["/".to_string(), "/api/hospitals".to_string()],
        }
    }
}

/// Snapshot of [`PredictiveCache`] counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub total_size: usize,
    pub entry_count: usize,
    pub average_access_time_ms: f64,
    pub hit_rate: f64,
    pub efficiency: f64,
}

/// Outcome of one `predict_and_preload` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreloadReport {
    pub issued: Vec<String>,
    /// Top candidates already cached or with an outstanding hint.
    pub skipped: usize,
    pub failed: usize,
}

/// URL-keyed cache that picks a strategy per entry, evicts by value score
/// under a byte budget and preloads likely next URLs.
///
/// All methods take `&mut self`; share an instance behind a mutex.
pub struct PredictiveCache<V> {
    entries: EntryMap<V>,
    registry: StrategyRegistry,
    context: ContextBuilder,
    prefetcher: Arc<dyn Prefetcher>,
    config: StoreConfig,
    total_size: usize,
    next_seq: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    access_times: VecDeque<f64>,
    /// Outstanding prefetch hints: url -> issue time.
    hints: HashMap<String, u64>,
}

impl<V: Payload> PredictiveCache<V> {
    pub fn new(
        config: StoreConfig,
        registry: StrategyRegistry,
        context: ContextBuilder,
        prefetcher: Arc<dyn Prefetcher>,
    ) -> Self {
        tracing::info!(
            max_total_size = config.max_total_size,
            strategies = registry.len(),
            strict_budget = !config.allow_transient_overflow,
            strategy_caps = config.enforce_strategy_caps,
            "predictive cache initialized"
        );
        context.start_session();
        Self {
            entries: EntryMap::default(),
            registry,
            context,
            prefetcher,
            config,
            total_size: 0,
            next_seq: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            access_times: VecDeque::with_capacity(ACCESS_WINDOW + 1),
            hints: HashMap::new(),
        }
    }

    fn now(&self) -> u64 {
        self.context.clock().now_ms()
    }

    pub fn add_strategy(&mut self, strategy: CacheStrategy) {
        tracing::debug!(strategy = %strategy.name, "strategy registered");
        self.registry.add_strategy(strategy);
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub fn current_context(&self) -> CacheContext {
        self.context.current_context()
    }

    /// Strategy `set` would pick for `url` without an explicit name.
    pub fn best_strategy(&self, url: &str) -> Option<&CacheStrategy> {
        self.registry.best_strategy(url, &self.context.current_context())
    }

    /// Cache `data` under `url`.
    ///
    /// Returns `Ok(false)` without caching when no strategy applies: either
    /// the named strategy is unknown or no predictor claims the URL.
    /// Replacing an existing entry resets its access history.
    pub fn set(&mut self, url: &str, data: V, strategy: Option<&str>) -> Result<bool> {
        self.insert(url, data, strategy, true)
    }

    /// Cache a response fetched because of a preload hint.
    ///
    /// Same as [`set`](Self::set) except the URL stays out of the visit
    /// history, so hints are only ever derived from pages actually requested.
    pub fn set_prefetched(&mut self, url: &str, data: V, strategy: Option<&str>) -> Result<bool> {
        self.insert(url, data, strategy, false)
    }

    fn insert(&mut self, url: &str, data: V, strategy: Option<&str>, visited: bool) -> Result<bool> {
        let ctx = self.context.current_context();
        let resolved = match strategy {
            Some(name) => self.registry.get(name),
            None => self.registry.best_strategy(url, &ctx),
        };
        let Some(resolved) = resolved else {
            tracing::debug!(url, requested = ?strategy, "no strategy, not caching");
            return Ok(false);
        };
        let strategy_name = resolved.name.clone();
        let max_entries = resolved.max_entries;
        let prediction_score = resolved.prediction_score(url, &ctx);

        let size = data.estimated_size()?;
        if !self.config.allow_transient_overflow && size > self.config.max_total_size {
            return Err(CacheError::EntryTooLarge {
                url: url.to_string(),
                size,
                budget: self.config.max_total_size,
            });
        }

        self.remove(url);

        if self.config.enforce_strategy_caps {
            while self.strategy_len(&strategy_name) >= max_entries.max(1) {
                if !self.evict_matching(|e| e.strategy == strategy_name) {
                    break;
                }
            }
        }

        while self.total_size + size > self.config.max_total_size {
            if !self.evict_least_valuable() {
                tracing::warn!(
                    url,
                    size,
                    budget = self.config.max_total_size,
                    "entry exceeds byte budget on an empty store, inserting anyway"
                );
                break;
            }
        }

        let now = self.now();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            url.to_string(),
            CacheEntry {
                url: url.to_string(),
                data,
                timestamp: now,
                access_count: 0,
                last_access: now,
                strategy: strategy_name,
                size,
                prediction_score,
                seq,
            },
        );
        self.total_size += size;
        if visited {
            self.context.record_url(url);
        }
        self.check_invariants();
        Ok(true)
    }

    /// Look up `url`, expiring it lazily if its strategy's max age has passed.
    pub fn get(&mut self, url: &str) -> Option<V> {
        let started = Instant::now();
        let now = self.now();

        let valid = match self.entries.get(url) {
            None => {
                self.misses += 1;
                return None;
            }
            Some(entry) => match self.registry.get(&entry.strategy) {
                Some(strategy) => !strategy.is_expired(entry.timestamp, now),
                None => {
                    tracing::debug!(url, strategy = %entry.strategy, "strategy missing, purging entry");
                    false
                }
            },
        };

        if !valid {
            self.remove(url);
            self.misses += 1;
            return None;
        }

        let entry = self.entries.get_mut(url)?;
        entry.touch(now);
        let data = entry.data.clone();
        self.hits += 1;
        self.record_access_time(started.elapsed());
        Some(data)
    }

    /// Remove `url` if present.
    pub fn remove(&mut self, url: &str) -> bool {
        match self.entries.remove(url) {
            Some(entry) => {
                self.total_size -= entry.size;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }

    /// Entry bookkeeping without counting an access.
    pub fn peek(&self, url: &str) -> Option<&CacheEntry<V>> {
        self.entries.get(url)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn max_total_size(&self) -> usize {
        self.config.max_total_size
    }

    fn strategy_len(&self, name: &str) -> usize {
        self.entries.values().filter(|e| e.strategy == name).count()
    }

    fn is_fresh(&self, url: &str, now: u64) -> bool {
        self.entries.get(url).is_some_and(|entry| {
            self.registry
                .get(&entry.strategy)
                .is_some_and(|s| !s.is_expired(entry.timestamp, now))
        })
    }

    /// Evict the entry with the lowest value score. Returns false when empty.
    pub fn evict_least_valuable(&mut self) -> bool {
        self.evict_matching(|_| true)
    }

    fn evict_matching(&mut self, filter: impl Fn(&CacheEntry<V>) -> bool) -> bool {
        let now = self.now();
        let victim = self
            .entries
            .values()
            .filter(|e| filter(e))
            .map(|e| (e.value_score(self.registry.get(&e.strategy), now), e.seq, &e.url))
            .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
            .map(|(score, _, url)| (score, url.clone()));

        let Some((score, url)) = victim else {
            return false;
        };
        self.remove(&url);
        self.evictions += 1;
        tracing::debug!(url = %url, score, "evicted least valuable entry");
        true
    }

    /// Drop every expired or orphaned entry. Returns how many were removed.
    pub fn cleanup(&mut self) -> usize {
        let now = self.now();
        let before = self.entries.len();
        let registry = &self.registry;
        let mut freed = 0;
        self.entries.retain(|_, entry| {
            let keep = registry
                .get(&entry.strategy)
                .is_some_and(|s| !s.is_expired(entry.timestamp, now));
            if !keep {
                freed += entry.size;
            }
            keep
        });
        self.total_size -= freed;
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!(removed, freed, "cleanup removed stale entries");
        }
        self.check_invariants();
        removed
    }

    /// Hint the prefetcher about the URLs most likely to be wanted next.
    ///
    /// Candidates are neighbours of recently visited hospital pages plus the
    /// fixed candidates. A failing hint is logged and the batch continues.
    pub fn predict_and_preload(&mut self) -> PreloadReport {
        let now = self.now();
        let hint_ttl = self.config.hint_ttl.as_millis() as u64;
        self.hints
            .retain(|_, issued| now.saturating_sub(*issued) < hint_ttl);

        let ctx = self.context.current_context();
        let candidates = candidate_urls(&ctx.previous_urls, &self.config.fixed_candidates);

        let mut scored: Vec<(String, f64)> = Vec::new();
        for url in &candidates {
            for strategy in self.registry.predictive() {
                if let Some(score) = strategy.predict(url, &ctx) {
                    if score > self.config.preload_threshold {
                        scored.push((url.clone(), score));
                    }
                }
            }
        }
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut seen = HashSet::new();
        let top: Vec<(String, f64)> = scored
            .into_iter()
            .filter(|(url, _)| seen.insert(url.clone()))
            .take(self.config.preload_limit)
            .collect();

        let mut report = PreloadReport::default();
        for (url, score) in top {
            if self.is_fresh(&url, now) || self.hints.contains_key(&url) {
                report.skipped += 1;
                continue;
            }
            match self.prefetcher.prefetch(&url) {
                Ok(()) => {
                    tracing::debug!(url = %url, score, "prefetch hint issued");
                    self.hints.insert(url.clone(), now);
                    report.issued.push(url);
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "prefetch hint failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Number of prefetch hints still inside their suppression window.
    pub fn outstanding_hints(&self) -> usize {
        let now = self.now();
        let hint_ttl = self.config.hint_ttl.as_millis() as u64;
        self.hints
            .values()
            .filter(|issued| now.saturating_sub(**issued) < hint_ttl)
            .count()
    }

    pub fn metrics(&self) -> CacheMetrics {
        let total = self.hits + self.misses;
        let hit_rate = if total > 0 {
            self.hits as f64 / total as f64
        } else {
            0.0
        };
        let average_access_time_ms = if self.access_times.is_empty() {
            0.0
        } else {
            self.access_times.iter().sum::<f64>() / self.access_times.len() as f64
        };
        let budget_left = if self.config.max_total_size > 0 {
            (1.0 - self.total_size as f64 / self.config.max_total_size as f64).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let speed = (10.0 / average_access_time_ms.max(1.0)).min(1.0);

        CacheMetrics {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            total_size: self.total_size,
            entry_count: self.entries.len(),
            average_access_time_ms,
            hit_rate,
            efficiency: (hit_rate + budget_left + speed) / 3.0,
        }
    }

    /// Drop all entries, hints and counters.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.hints.clear();
        self.access_times.clear();
        self.total_size = 0;
        self.hits = 0;
        self.misses = 0;
        self.evictions = 0;
        tracing::debug!("predictive cache cleared");
    }

    fn record_access_time(&mut self, elapsed: Duration) {
        self.access_times.push_back(elapsed.as_secs_f64() * 1000.0);
        if self.access_times.len() > ACCESS_WINDOW {
            let excess = self.access_times.len() - ACCESS_WINDOW_KEEP;
            self.access_times.drain(..excess);
        }
    }

    #[cfg(debug_assertions)]
    fn check_invariants(&self) {
        let actual: usize = self.entries.values().map(|e| e.size).sum();
        debug_assert_eq!(actual, self.total_size, "size accounting drifted");
    }

    #[cfg(not(debug_assertions))]
    fn check_invariants(&self) {}
}

impl<V> std::fmt::Debug for PredictiveCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictiveCache")
            .field("entries", &self.entries.len())
            .field("total_size", &self.total_size)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Preload candidates: ±1 neighbours of recent hospital pages (most recent
/// first), then the fixed candidates. Duplicates are dropped.
fn candidate_urls(previous_urls: &[String], fixed: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for url in previous_urls.iter().rev() {
        let Some(caps) = HOSPITAL_DETAIL.captures(url) else {
            continue;
        };
        let Ok(id) = caps[2].parse::<u64>() else {
            continue;
        };
        let prefix = &caps[1];
        let neighbours = [id.checked_add(1), id.checked_sub(1)];
        for neighbour in neighbours.into_iter().flatten() {
            let candidate = format!("{prefix}{neighbour}");
            if seen.insert(candidate.clone()) {
                out.push(candidate);
            }
        }
    }

    for url in fixed {
        if seen.insert(url.clone()) {
            out.push(url.clone());
        }
    }
    out
}
