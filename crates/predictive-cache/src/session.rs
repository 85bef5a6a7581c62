use parking_lot::Mutex;
use std::collections::HashMap;

/// Key holding the JSON array of recently cached URLs.
pub const PREVIOUS_URLS_KEY: &str = "previousUrls";
/// Key holding the session start marker (ms since epoch, decimal).
pub const SESSION_START_KEY: &str = "sessionStart";

/// Session-scoped string key/value storage.
///
/// Implementations must never panic: the context builder relies on every
/// read degrading to `None` when storage is unavailable.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    fn remove(&self, key: &str);
}

/// In-process session storage.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.values.lock().insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.values.lock().remove(key);
    }
}

/// Storage for environments without a session: reads are empty, writes vanish.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSession;

impl SessionStore for NoSession {
    fn get(&self, _key: &str) -> Option<String> {
        None
    }

    fn set(&self, _key: &str, _value: String) {}

    fn remove(&self, _key: &str) {}
}
