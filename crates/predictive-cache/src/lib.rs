//! Client-side caching for the hospital deployment map.
//!
//! Two independent stores live here:
//!
//! - [`PredictiveCache`]: URL-keyed, assigns each entry a named
//!   [`CacheStrategy`], evicts by value score under a byte budget and hints
//!   a [`Prefetcher`] about the URLs most likely to be wanted next.
//! - [`IntelligentCache`]: key-value TTL cache with an entry cap and
//!   transparent DEFLATE compression of large JSON payloads.
//!
//! Neither store is internally synchronized; wrap an instance in a mutex to
//! share it.

pub mod clock;
pub mod codec;
pub mod context;
pub mod entry;
pub mod error;
pub mod intelligent;
pub mod payload;
pub mod prefetch;
pub mod session;
pub mod store;
pub mod strategy;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{compress_json, decompress_json, hash_string, Codec};
pub use context::{CacheContext, ContextBuilder};
pub use entry::CacheEntry;
pub use error::{CacheError, CodecError, PredictError, PrefetchError, Result};
pub use intelligent::{IntelligentCache, IntelligentConfig, IntelligentStats};
pub use payload::{Json, Payload};
pub use prefetch::{NoopPrefetcher, Prefetcher, RecordingPrefetcher};
pub use session::{MemorySessionStore, NoSession, SessionStore};
pub use store::{CacheMetrics, PredictiveCache, PreloadReport, StoreConfig};
pub use strategy::{CacheStrategy, Predictor, StrategyRegistry};
