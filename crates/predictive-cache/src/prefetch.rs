use crate::error::PrefetchError;
use parking_lot::Mutex;

/// Port for low-priority prefetch hints.
///
/// A hint is fire-and-forget: returning `Ok` means the hint was handed off,
/// not that the resource was fetched.
pub trait Prefetcher: Send + Sync {
    fn prefetch(&self, url: &str) -> Result<(), PrefetchError>;
}

/// Drops every hint.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPrefetcher;

impl Prefetcher for NoopPrefetcher {
    fn prefetch(&self, _url: &str) -> Result<(), PrefetchError> {
        Ok(())
    }
}

/// Remembers hints in order. Useful for tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingPrefetcher {
    urls: Mutex<Vec<String>>,
}

impl RecordingPrefetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.urls.lock())
    }
}

impl Prefetcher for RecordingPrefetcher {
    fn prefetch(&self, url: &str) -> Result<(), PrefetchError> {
        self.urls.lock().push(url.to_string());
        Ok(())
    }
}
