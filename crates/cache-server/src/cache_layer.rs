use bytes::Bytes;
use parking_lot::Mutex;
use predictive_cache::{
    CacheMetrics, CacheStrategy, ContextBuilder, IntelligentCache, IntelligentConfig,
    IntelligentStats, Payload, PredictiveCache, PreloadReport, Prefetcher, StoreConfig,
    StrategyRegistry,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Upstream response held by the predictive tier.
#[derive(Clone, Debug)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Payload for CachedResponse {
    fn estimated_size(&self) -> predictive_cache::Result<usize> {
        let headers: usize = self.headers.iter().map(|(k, v)| k.len() + v.len()).sum();
        Ok(self.body.len() + headers)
    }
}

/// Text response held by the fallback tier, compressed there when large.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TextResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl From<TextResponse> for CachedResponse {
    fn from(text: TextResponse) -> Self {
        let headers = text
            .content_type
            .map(|ct| vec![("content-type".to_string(), ct)])
            .unwrap_or_default();
        CachedResponse {
            status: text.status,
            headers,
            body: Bytes::from(text.body),
        }
    }
}

/// Which store answered a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Predictive,
    Fallback,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Predictive => "predictive",
            Tier::Fallback => "fallback",
        }
    }
}

/// Per-strategy tuning from config, applied over the built-in strategies.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StrategyOverride {
    pub name: String,
    pub max_age_secs: Option<u64>,
    pub max_entries: Option<usize>,
    pub priority: Option<u8>,
}

/// Two-tier cache for the server.
///
/// URLs a strategy claims go to the predictive store. Everything else that
/// is text falls back to the TTL cache. Each store sits behind its own mutex.
pub struct CacheLayer {
    predictive: Mutex<PredictiveCache<CachedResponse>>,
    fallback: Mutex<IntelligentCache<TextResponse>>,
    pub max_body_size: usize,
}

impl CacheLayer {
    pub fn new(
        store_config: StoreConfig,
        fallback_config: IntelligentConfig,
        context: ContextBuilder,
        prefetcher: Arc<dyn Prefetcher>,
        overrides: &[StrategyOverride],
        max_body_size: usize,
    ) -> Self {
        let clock = Arc::clone(context.clock());
        let mut registry = StrategyRegistry::with_defaults();
        apply_overrides(&mut registry, overrides);

        tracing::info!(
            strategies = registry.len(),
            budget = store_config.max_total_size,
            fallback_entries = fallback_config.max_entries,
            "cache layer initialized"
        );

        Self {
            predictive: Mutex::new(PredictiveCache::new(
                store_config,
                registry,
                context,
                prefetcher,
            )),
            fallback: Mutex::new(IntelligentCache::new(fallback_config, clock)),
            max_body_size,
        }
    }

    /// Look up `key` in the predictive tier, then the fallback tier.
    ///
    /// A fallback entry that fails to decode is purged and reported as a miss.
    pub fn get(&self, key: &str) -> CacheLookup {
        if let Some(value) = self.predictive.lock().get(key) {
            return CacheLookup {
                value: Some(value),
                tier: Some(Tier::Predictive),
            };
        }

        let mut fallback = self.fallback.lock();
        match fallback.get(key) {
            Ok(Some(text)) => CacheLookup {
                value: Some(text.into()),
                tier: Some(Tier::Fallback),
            },
            Ok(None) => CacheLookup::miss(),
            Err(e) => {
                tracing::error!(key, error = %e, "corrupt fallback entry, purging");
                fallback.remove(key);
                CacheLookup::miss()
            }
        }
    }

    /// Cache a response a client asked for. Returns the tier that took it, if any.
    pub fn insert(&self, key: &str, value: CachedResponse, ttl: Option<Duration>) -> Option<Tier> {
        self.store(key, value, ttl, false)
    }

    /// Cache a response fetched for a preload hint. It does not count as a
    /// visit, so it never seeds further hints.
    pub fn insert_prefetched(&self, key: &str, value: CachedResponse) -> Option<Tier> {
        self.store(key, value, None, true)
    }

    fn store(
        &self,
        key: &str,
        value: CachedResponse,
        ttl: Option<Duration>,
        prefetched: bool,
    ) -> Option<Tier> {
        let stored = {
            let mut predictive = self.predictive.lock();
            if prefetched {
                predictive.set_prefetched(key, value.clone(), None)
            } else {
                predictive.set(key, value.clone(), None)
            }
        };
        match stored {
            Ok(true) => return Some(Tier::Predictive),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(key, error = %e, "predictive tier rejected response");
                return None;
            }
        }

        let Ok(body) = String::from_utf8(value.body.to_vec()) else {
            tracing::debug!(key, "binary response without a strategy, not caching");
            return None;
        };
        let content_type = value
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.clone());
        let text = TextResponse {
            status: value.status,
            content_type,
            body,
        };
        match self.fallback.lock().set(key, text, ttl) {
            Ok(()) => Some(Tier::Fallback),
            Err(e) => {
                tracing::warn!(key, error = %e, "fallback tier rejected response");
                None
            }
        }
    }

    pub fn predict_and_preload(&self) -> PreloadReport {
        self.predictive.lock().predict_and_preload()
    }

    /// Sweep both tiers. Returns entries removed from the predictive tier.
    pub fn cleanup(&self) -> usize {
        let removed = self.predictive.lock().cleanup();
        self.fallback.lock().cleanup();
        removed
    }

    pub fn clear(&self) {
        self.predictive.lock().clear();
        self.fallback.lock().clear();
        tracing::info!("caches cleared");
    }

    pub fn apply_overrides(&self, overrides: &[StrategyOverride]) {
        let mut cache = self.predictive.lock();
        for o in overrides {
            let merged = merge_override(cache.registry().get(&o.name), o);
            cache.add_strategy(merged);
        }
    }

    pub fn predictive_metrics(&self) -> CacheMetrics {
        self.predictive.lock().metrics()
    }

    pub fn outstanding_hints(&self) -> usize {
        self.predictive.lock().outstanding_hints()
    }

    pub fn fallback_stats(&self) -> IntelligentStats {
        self.fallback.lock().stats()
    }

    pub fn max_total_size(&self) -> usize {
        self.predictive.lock().max_total_size()
    }
}

fn apply_overrides(registry: &mut StrategyRegistry, overrides: &[StrategyOverride]) {
    for o in overrides {
        let merged = merge_override(registry.get(&o.name), o);
        registry.add_strategy(merged);
    }
}

/// Overlay `o` on `base`, keeping its predictor. Unknown names become
/// explicit-only strategies.
fn merge_override(base: Option<&CacheStrategy>, o: &StrategyOverride) -> CacheStrategy {
    let mut strategy = base
        .cloned()
        .unwrap_or_else(|| CacheStrategy::new(o.name.clone(), Duration::from_secs(300), 50, 5));
    if let Some(secs) = o.max_age_secs {
        strategy.max_age = Duration::from_secs(secs);
    }
    if let Some(n) = o.max_entries {
        strategy.max_entries = n;
    }
    if let Some(p) = o.priority {
        strategy.priority = p.min(10);
    }
    strategy
}

/// Result of a cache lookup.
pub struct CacheLookup {
    pub value: Option<CachedResponse>,
    pub tier: Option<Tier>,
}

impl CacheLookup {
    fn miss() -> Self {
        Self {
            value: None,
            tier: None,
        }
    }

    pub fn is_hit(&self) -> bool {
        self.value.is_some()
    }
}

/// Caching directives of one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheControl {
    pub cacheable: bool,
    pub max_age: Option<Duration>,
}

impl Default for CacheControl {
    fn default() -> Self {
        Self {
            cacheable: true,
            max_age: None,
        }
    }
}

/// Read a Cache-Control value. `no-store`, `no-cache` and `private` make the
/// response uncacheable; `s-maxage` wins over `max-age` since this is a
/// shared cache.
pub fn parse_cache_control(value: &str) -> CacheControl {
    let mut cc = CacheControl::default();
    let mut shared_age = None;

    for directive in value.split(',') {
        let directive = directive.trim();
        let (name, arg) = match directive.split_once('=') {
            Some((name, arg)) => (name.trim(), Some(arg.trim().trim_matches('"'))),
            None => (directive, None),
        };
        let seconds = arg.and_then(|a| a.parse::<u64>().ok()).map(Duration::from_secs);
        if name.eq_ignore_ascii_case("no-store")
            || name.eq_ignore_ascii_case("no-cache")
            || name.eq_ignore_ascii_case("private")
        {
            cc.cacheable = false;
        } else if name.eq_ignore_ascii_case("max-age") {
            cc.max_age = seconds.or(cc.max_age);
        } else if name.eq_ignore_ascii_case("s-maxage") {
            shared_age = seconds.or(shared_age);
        }
    }

    cc.max_age = shared_age.or(cc.max_age);
    cc
}

#[cfg(test)]
mod tests {
    use super::*;
    use predictive_cache::{ManualClock, MemorySessionStore, NoopPrefetcher};

    fn layer(overrides: &[StrategyOverride]) -> CacheLayer {
        let clock = ManualClock::new(1_704_292_200_000);
        let context = ContextBuilder::new(Arc::new(clock), Arc::new(MemorySessionStore::new()));
        CacheLayer::new(
            StoreConfig::default(),
            IntelligentConfig::default(),
            context,
            Arc::new(NoopPrefetcher),
            overrides,
            1024 * 1024,
        )
    }

    fn response(body: &'static str) -> CachedResponse {
        CachedResponse {
            status: 200,
            headers: vec![("content-type".into(), "application/json".into())],
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    #[test]
    fn strategy_urls_use_predictive_tier() {
        let cache = layer(&[]);
        assert_eq!(cache.insert("/hospitals/1", response("{}"), None), Some(Tier::Predictive));
        let lookup = cache.get("/hospitals/1");
        assert_eq!(lookup.tier, Some(Tier::Predictive));
        assert_eq!(lookup.value.unwrap().body, Bytes::from_static(b"{}"));
    }

    #[test]
    fn other_text_falls_back() {
        let cache = layer(&[]);
        assert_eq!(cache.insert("/about", response("hi"), None), Some(Tier::Fallback));
        let lookup = cache.get("/about");
        assert_eq!(lookup.tier, Some(Tier::Fallback));
        let value = lookup.value.unwrap();
        assert_eq!(value.body, Bytes::from_static(b"hi"));
        assert_eq!(value.headers[0].1, "application/json");
    }

    #[test]
    fn binary_without_strategy_is_dropped() {
        let cache = layer(&[]);
        let bin = CachedResponse {
            status: 200,
            headers: vec![],
            body: Bytes::from_static(&[0xff, 0xfe]),
        };
        assert_eq!(cache.insert("/blob", bin, None), None);
        assert!(!cache.get("/blob").is_hit());
    }

    #[test]
    fn overrides_keep_predictor() {
        let cache = layer(&[StrategyOverride {
            name: "hospitals".into(),
            max_age_secs: Some(10),
            max_entries: None,
            priority: Some(42),
        }]);
        let predictive = cache.predictive.lock();
        let s = predictive.registry().get("hospitals").unwrap();
        assert_eq!(s.max_age, Duration::from_secs(10));
        assert_eq!(s.priority, 10);
        assert!(s.predictor.is_some());
    }

    #[test]
    fn unknown_override_adds_explicit_strategy() {
        let cache = layer(&[]);
        cache.apply_overrides(&[StrategyOverride {
            name: "regions".into(),
            max_age_secs: None,
            max_entries: Some(3),
            priority: None,
        }]);
        let predictive = cache.predictive.lock();
        let s = predictive.registry().get("regions").unwrap();
        assert_eq!(s.max_entries, 3);
        assert!(s.predictor.is_none());
    }

    #[test]
    fn cache_control_parsing() {
        let cc = parse_cache_control("public, max-age=60, s-maxage=120");
        assert!(cc.cacheable);
        assert_eq!(cc.max_age, Some(Duration::from_secs(120)));
        // shared age wins regardless of order
        let cc = parse_cache_control("s-maxage=30, Max-Age=600");
        assert_eq!(cc.max_age, Some(Duration::from_secs(30)));
        assert!(!parse_cache_control("no-store").cacheable);
        assert!(!parse_cache_control("Private, max-age=5").cacheable);
        assert_eq!(parse_cache_control("max-age=soon"), CacheControl::default());
    }

    #[test]
    fn prefetched_pages_do_not_become_history() {
        let cache = layer(&[]);
        cache.insert("/hospitals/4", response("{}"), None);
        assert_eq!(cache.insert_prefetched("/hospitals/5", response("{}")), Some(Tier::Predictive));
        let predictive = cache.predictive.lock();
        assert_eq!(predictive.current_context().previous_urls, ["/hospitals/4"]);
        assert!(predictive.contains("/hospitals/5"));
    }
}
