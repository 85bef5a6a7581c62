use crate::clock::Clock;
use crate::session::{SessionStore, PREVIOUS_URLS_KEY, SESSION_START_KEY};
use chrono::{DateTime, Datelike, FixedOffset, Local, Timelike, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Number of recently cached URLs remembered in session storage.
pub const HISTORY_LIMIT: usize = 20;

/// Point-in-time view of how the cache is being used.
///
/// Rebuilt on every call that needs it; never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheContext {
    pub user_agent: String,
    pub language: String,
    /// Hour of day, 0-23.
    pub time_of_day: u8,
    /// Day of week, 0-6 with Sunday = 0.
    pub day_of_week: u8,
    /// Most recently cached URLs, oldest first.
    pub previous_urls: Vec<String>,
    pub session_duration: Duration,
}

impl CacheContext {
    /// A context with no history at midnight on a Sunday.
    pub fn empty() -> Self {
        Self {
            user_agent: String::new(),
            language: String::new(),
            time_of_day: 0,
            day_of_week: 0,
            previous_urls: Vec::new(),
            session_duration: Duration::ZERO,
        }
    }
}

/// Derives [`CacheContext`] snapshots from the clock and session storage.
#[derive(Clone)]
pub struct ContextBuilder {
    clock: Arc<dyn Clock>,
    session: Arc<dyn SessionStore>,
    user_agent: String,
    language: String,
    utc_offset: Option<FixedOffset>,
}

impl ContextBuilder {
    pub fn new(clock: Arc<dyn Clock>, session: Arc<dyn SessionStore>) -> Self {
        Self {
            clock,
            session,
            user_agent: String::new(),
            language: "en".to_string(),
            utc_offset: None,
        }
    }

    pub fn with_identity(mut self, user_agent: impl Into<String>, language: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self.language = language.into();
        self
    }

    /// Pin the time zone used for `time_of_day`/`day_of_week`.
    /// Without this the host's local time zone is used.
    pub fn with_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.utc_offset = Some(offset);
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Write the session start marker unless one already exists.
    pub fn start_session(&self) {
        if self.session.get(SESSION_START_KEY).is_none() {
            self.session
                .set(SESSION_START_KEY, self.clock.now_ms().to_string());
        }
    }

    pub fn current_context(&self) -> CacheContext {
        let now = self.clock.now_ms();
        let (time_of_day, day_of_week) = self.clock_fields(now);

        let session_duration = self
            .session
            .get(SESSION_START_KEY)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(|start| Duration::from_millis(now.saturating_sub(start)))
            .unwrap_or(Duration::ZERO);

        CacheContext {
            user_agent: self.user_agent.clone(),
            language: self.language.clone(),
            time_of_day,
            day_of_week,
            previous_urls: self.previous_urls(),
            session_duration,
        }
    }

    /// Recent URL history from session storage. Unreadable history is empty.
    pub fn previous_urls(&self) -> Vec<String> {
        self.session
            .get(PREVIOUS_URLS_KEY)
            .and_then(|raw| serde_json::from_str::<Vec<String>>(&raw).ok())
            .unwrap_or_default()
    }

    /// Append `url` to the history, keeping only the last [`HISTORY_LIMIT`].
    pub fn record_url(&self, url: &str) {
        let mut urls = self.previous_urls();
        urls.push(url.to_string());
        if urls.len() > HISTORY_LIMIT {
            urls.drain(..urls.len() - HISTORY_LIMIT);
        }
        match serde_json::to_string(&urls) {
            Ok(raw) => self.session.set(PREVIOUS_URLS_KEY, raw),
            Err(e) => tracing::warn!(error = %e, "failed to persist url history"),
        }
    }

    fn clock_fields(&self, now_ms: u64) -> (u8, u8) {
        let Some(utc) = DateTime::<Utc>::from_timestamp_millis(now_ms as i64) else {
            return (0, 0);
        };
        match self.utc_offset {
            Some(offset) => {
                let t = utc.with_timezone(&offset);
                (t.hour() as u8, t.weekday().num_days_from_sunday() as u8)
            }
            None => {
                let t = utc.with_timezone(&Local);
                (t.hour() as u8, t.weekday().num_days_from_sunday() as u8)
            }
        }
    }
}

impl std::fmt::Debug for ContextBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextBuilder")
            .field("user_agent", &self.user_agent)
            .field("language", &self.language)
            .field("utc_offset", &self.utc_offset)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::session::{MemorySessionStore, NoSession};

    // 2024-01-03T14:30:00Z, a Wednesday
    const WED_14_30: u64 = 1_704_292_200_000;

    fn builder(clock: &ManualClock, session: Arc<dyn SessionStore>) -> ContextBuilder {
        ContextBuilder::new(Arc::new(clock.clone()), session)
            .with_utc_offset(FixedOffset::east_opt(0).unwrap())
    }

    #[test]
    fn clock_fields_follow_offset() {
        let clock = ManualClock::new(WED_14_30);
        let ctx = builder(&clock, Arc::new(NoSession)).current_context();
        assert_eq!(ctx.time_of_day, 14);
        assert_eq!(ctx.day_of_week, 3);

        let tokyo = ContextBuilder::new(Arc::new(clock), Arc::new(NoSession))
            .with_utc_offset(FixedOffset::east_opt(9 * 3600).unwrap())
            .current_context();
        assert_eq!(tokyo.time_of_day, 23);
    }

    #[test]
    fn degrades_without_session() {
        let clock = ManualClock::new(WED_14_30);
        let b = builder(&clock, Arc::new(NoSession));
        b.start_session();
        b.record_url("/hospitals/1");
        let ctx = b.current_context();
        assert!(ctx.previous_urls.is_empty());
        assert_eq!(ctx.session_duration, Duration::ZERO);
    }

    #[test]
    fn session_duration_measures_from_marker() {
        let clock = ManualClock::new(WED_14_30);
        let b = builder(&clock, Arc::new(MemorySessionStore::new()));
        b.start_session();
        clock.advance(Duration::from_secs(90));
        // a second start must not reset the marker
        b.start_session();
        assert_eq!(b.current_context().session_duration, Duration::from_secs(90));
    }

    #[test]
    fn history_keeps_last_twenty() {
        let clock = ManualClock::new(WED_14_30);
        let b = builder(&clock, Arc::new(MemorySessionStore::new()));
        for i in 0..25 {
            b.record_url(&format!("/hospitals/{i}"));
        }
        let urls = b.previous_urls();
        assert_eq!(urls.len(), HISTORY_LIMIT);
        assert_eq!(urls.first().map(String::as_str), Some("/hospitals/5"));
        assert_eq!(urls.last().map(String::as_str), Some("/hospitals/24"));
    }

    #[test]
    fn corrupt_history_reads_as_empty() {
        let clock = ManualClock::new(WED_14_30);
        let session = Arc::new(MemorySessionStore::new());
        session.set(PREVIOUS_URLS_KEY, "{not json".into());
        let b = builder(&clock, session);
        assert!(b.current_context().previous_urls.is_empty());
        b.record_url("/");
        assert_eq!(b.previous_urls(), vec!["/".to_string()]);
    }
}
