use crate::context::CacheContext;
use crate::error::PredictError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;

/// Score used for entries whose strategy has no predictor.
pub const DEFAULT_PREDICTION_SCORE: f64 = 0.5;

/// Scores how likely `url` is to be wanted, given the usage context.
pub type Predictor = Arc<dyn Fn(&str, &CacheContext) -> Result<f64, PredictError> + Send + Sync>;

/// Hospital detail pages: `/hospital/<id>` or `/hospitals/<id>`, optionally localized.
pub(crate) static HOSPITAL_DETAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*/hospitals?/)(\d+)(/?(?:[?#].*)?)$").expect("valid regex"));

/// A named caching policy.
#[derive(Clone)]
pub struct CacheStrategy {
    pub name: String,
    /// How long an entry stays valid after insertion.
    pub max_age: Duration,
    /// Advisory entry count. Only enforced when the store enables strategy caps.
    pub max_entries: usize,
    /// 1-10, higher keeps entries longer under eviction pressure.
    pub priority: u8,
    pub predictor: Option<Predictor>,
}

impl CacheStrategy {
    pub fn new(name: impl Into<String>, max_age: Duration, max_entries: usize, priority: u8) -> Self {
        Self {
            name: name.into(),
            max_age,
            max_entries,
            priority,
            predictor: None,
        }
    }

    pub fn with_predictor<F>(mut self, predictor: F) -> Self
    where
        F: Fn(&str, &CacheContext) -> Result<f64, PredictError> + Send + Sync + 'static,
    {
        self.predictor = Some(Arc::new(predictor));
        self
    }

    /// Evaluate the predictor, collapsing failures and out-of-range values
    /// into [0, 1]. `None` when the strategy has no predictor.
    pub fn predict(&self, url: &str, ctx: &CacheContext) -> Option<f64> {
        let predictor = self.predictor.as_ref()?;
        let score = match predictor(url, ctx) {
            Ok(score) if score.is_nan() => 0.0,
            Ok(score) => score.clamp(0.0, 1.0),
            Err(e) => {
                tracing::warn!(strategy = %self.name, url, error = %e, "predictor failed, scoring 0");
                0.0
            }
        };
        Some(score)
    }

    /// Score recorded on an entry at insertion time.
    pub fn prediction_score(&self, url: &str, ctx: &CacheContext) -> f64 {
        self.predict(url, ctx).unwrap_or(DEFAULT_PREDICTION_SCORE)
    }

    pub fn is_expired(&self, inserted_at_ms: u64, now_ms: u64) -> bool {
        now_ms.saturating_sub(inserted_at_ms) as u128 > self.max_age.as_millis()
    }
}

impl std::fmt::Debug for CacheStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStrategy")
            .field("name", &self.name)
            .field("max_age", &self.max_age)
            .field("max_entries", &self.max_entries)
            .field("priority", &self.priority)
            .field("predictor", &self.predictor.is_some())
            .finish()
    }
}

/// Insertion-ordered set of strategies keyed by name.
#[derive(Debug, Clone, Default)]
pub struct StrategyRegistry {
    strategies: Vec<CacheStrategy>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in `hospitals`, `images`, `static` and `api` strategies.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for strategy in default_strategies() {
            registry.add_strategy(strategy);
        }
        registry
    }

    /// Insert a strategy, replacing any existing one with the same name in place.
    pub fn add_strategy(&mut self, strategy: CacheStrategy) {
        if strategy.name.is_empty() {
            tracing::warn!("ignoring strategy without a name");
            return;
        }
        match self.strategies.iter_mut().find(|s| s.name == strategy.name) {
            Some(existing) => *existing = strategy,
            None => self.strategies.push(strategy),
        }
    }

    pub fn get(&self, name: &str) -> Option<&CacheStrategy> {
        self.strategies.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CacheStrategy> {
        self.strategies.iter()
    }

    /// Strategies that can be selected by URL.
    pub fn predictive(&self) -> impl Iterator<Item = &CacheStrategy> {
        self.strategies.iter().filter(|s| s.predictor.is_some())
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// The strategy whose predictor scores `url` strictly highest.
    ///
    /// Returns `None` if nothing scores above 0. Ties keep the earlier
    /// registered strategy.
    pub fn best_strategy(&self, url: &str, ctx: &CacheContext) -> Option<&CacheStrategy> {
        let mut best: Option<(&CacheStrategy, f64)> = None;
        for strategy in self.predictive() {
            let Some(score) = strategy.predict(url, ctx) else {
                continue;
            };
            if score > best.map_or(0.0, |(_, s)| s) {
                best = Some((strategy, score));
            }
        }
        best.map(|(strategy, _)| strategy)
    }
}

fn default_strategies() -> Vec<CacheStrategy> {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;

    vec![
        CacheStrategy::new("hospitals", Duration::from_secs(30 * MINUTE), 100, 9)
            .with_predictor(predict_hospitals),
        CacheStrategy::new("images", Duration::from_secs(24 * HOUR), 200, 6)
            .with_predictor(predict_images),
        CacheStrategy::new("static", Duration::from_secs(7 * 24 * HOUR), 50, 8)
            .with_predictor(predict_static),
        CacheStrategy::new("api", Duration::from_secs(5 * MINUTE), 50, 7)
            .with_predictor(predict_api),
    ]
}

fn path_of(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

fn is_hospital_url(url: &str) -> bool {
    let path = path_of(url);
    path.contains("/hospital/") || path.contains("/hospitals")
}

fn predict_hospitals(url: &str, ctx: &CacheContext) -> Result<f64, PredictError> {
    if !is_hospital_url(url) {
        return Ok(0.0);
    }
    let mut score = 0.7;
    if ctx.previous_urls.iter().any(|u| is_hospital_url(u)) {
        score += 0.1;
    }
    let weekday = (1..=5).contains(&ctx.day_of_week);
    if weekday && (8..=18).contains(&ctx.time_of_day) {
        score += 0.1;
    }
    if ctx.session_duration > Duration::from_secs(5 * 60) {
        score += 0.05;
    }
    Ok(score)
}

fn predict_images(url: &str, _ctx: &CacheContext) -> Result<f64, PredictError> {
    const EXTENSIONS: [&str; 7] = [".png", ".jpg", ".jpeg", ".webp", ".svg", ".gif", ".avif"];
    let path = path_of(url).to_ascii_lowercase();
    if path.contains("/images/") || EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        Ok(0.6)
    } else {
        Ok(0.0)
    }
}

fn predict_static(url: &str, _ctx: &CacheContext) -> Result<f64, PredictError> {
    const EXTENSIONS: [&str; 6] = [".js", ".css", ".woff", ".woff2", ".ttf", ".ico"];
    let path = path_of(url).to_ascii_lowercase();
    if path.starts_with("/static/")
        || path.starts_with("/_next/static/")
        || EXTENSIONS.iter().any(|ext| path.ends_with(ext))
    {
        Ok(0.9)
    } else if path == "/" || path == "/index.html" {
        Ok(0.6)
    } else {
        Ok(0.0)
    }
}

fn predict_api(url: &str, ctx: &CacheContext) -> Result<f64, PredictError> {
    if !path_of(url).starts_with("/api/") {
        return Ok(0.0);
    }
    if ctx.previous_urls.is_empty() {
        Ok(0.6)
    } else {
        Ok(0.7)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> CacheContext {
        CacheContext::empty()
    }

    #[test]
    fn defaults_register_in_order() {
        let registry = StrategyRegistry::with_defaults();
        let names: Vec<_> = registry.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["hospitals", "images", "static", "api"]);
    }

    #[test]
    fn picks_strategy_by_url() {
        let registry = StrategyRegistry::with_defaults();
        let pick = |url| registry.best_strategy(url, &ctx()).map(|s| s.name.clone());
        assert_eq!(pick("/hospitals/12").as_deref(), Some("hospitals"));
        assert_eq!(pick("/api/hospitals").as_deref(), Some("hospitals"));
        assert_eq!(pick("/api/regions").as_deref(), Some("api"));
        assert_eq!(pick("/images/marker.png").as_deref(), Some("images"));
        assert_eq!(pick("/_next/static/app.js").as_deref(), Some("static"));
        assert_eq!(pick("/about").as_deref(), None);
    }

    #[test]
    fn tie_goes_to_first_registered() {
        let mut registry = StrategyRegistry::new();
        registry.add_strategy(
            CacheStrategy::new("first", Duration::from_secs(1), 1, 1).with_predictor(|_, _| Ok(0.5)),
        );
        registry.add_strategy(
            CacheStrategy::new("second", Duration::from_secs(1), 1, 9).with_predictor(|_, _| Ok(0.5)),
        );
        assert_eq!(registry.best_strategy("/x", &ctx()).unwrap().name, "first");
    }

    #[test]
    fn zero_scores_select_nothing() {
        let mut registry = StrategyRegistry::new();
        registry.add_strategy(
            CacheStrategy::new("never", Duration::from_secs(1), 1, 1).with_predictor(|_, _| Ok(0.0)),
        );
        registry.add_strategy(CacheStrategy::new("manual", Duration::from_secs(1), 1, 1));
        assert!(registry.best_strategy("/x", &ctx()).is_none());
    }

    #[test]
    fn failing_predictor_does_not_block_others() {
        let mut registry = StrategyRegistry::new();
        registry.add_strategy(
            CacheStrategy::new("broken", Duration::from_secs(1), 1, 1)
                .with_predictor(|_, _| Err(PredictError("boom".into()))),
        );
        registry.add_strategy(
            CacheStrategy::new("nan", Duration::from_secs(1), 1, 1).with_predictor(|_, _| Ok(f64::NAN)),
        );
        registry.add_strategy(
            CacheStrategy::new("ok", Duration::from_secs(1), 1, 1).with_predictor(|_, _| Ok(0.3)),
        );
        assert_eq!(registry.best_strategy("/x", &ctx()).unwrap().name, "ok");
    }

    #[test]
    fn scores_are_clamped() {
        let s = CacheStrategy::new("big", Duration::from_secs(1), 1, 1).with_predictor(|_, _| Ok(7.0));
        assert_eq!(s.predict("/x", &ctx()), Some(1.0));
        let manual = CacheStrategy::new("manual", Duration::from_secs(1), 1, 1);
        assert_eq!(manual.predict("/x", &ctx()), None);
        assert_eq!(manual.prediction_score("/x", &ctx()), DEFAULT_PREDICTION_SCORE);
    }

    #[test]
    fn overwrite_keeps_position() {
        let mut registry = StrategyRegistry::with_defaults();
        registry.add_strategy(CacheStrategy::new("images", Duration::from_secs(5), 3, 2));
        let names: Vec<_> = registry.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["hospitals", "images", "static", "api"]);
        let images = registry.get("images").unwrap();
        assert_eq!(images.max_entries, 3);
        assert!(images.predictor.is_none());
    }

    #[test]
    fn hospital_score_rises_with_context() {
        let registry = StrategyRegistry::with_defaults();
        let hospitals = registry.get("hospitals").unwrap();
        let cold = hospitals.predict("/hospitals/3", &ctx()).unwrap();

        let mut busy = ctx();
        busy.time_of_day = 10;
        busy.day_of_week = 2;
        busy.previous_urls = vec!["/hospitals/2".into()];
        busy.session_duration = Duration::from_secs(600);
        let warm = hospitals.predict("/hospitals/3", &busy).unwrap();
        assert!(warm > cold, "{warm} should exceed {cold}");
    }

    #[test]
    fn resolution_is_deterministic() {
        let registry = StrategyRegistry::with_defaults();
        let c = ctx();
        let a = registry.best_strategy("/api/hospitals", &c).map(|s| s.name.clone());
        let b = registry.best_strategy("/api/hospitals", &c).map(|s| s.name.clone());
        assert_eq!(a, b);
    }

    #[test]
    fn hospital_detail_pattern() {
        let caps = HOSPITAL_DETAIL.captures("/en/hospitals/41?tab=map").unwrap();
        assert_eq!(&caps[1], "/en/hospitals/");
        assert_eq!(&caps[2], "41");
        assert!(HOSPITAL_DETAIL.captures("/hospitals/list").is_none());
    }
}
