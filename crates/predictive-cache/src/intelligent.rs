use crate::clock::Clock;
use crate::codec::{decompress_json, Codec};
use crate::error::Result;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Tuning for [`IntelligentCache`].
#[derive(Debug, Clone)]
pub struct IntelligentConfig {
    pub default_ttl: Duration,
    pub max_entries: usize,
    /// Payloads whose JSON text is longer than this many UTF-16 units are compressed.
    pub compression_threshold: usize,
    /// Share of entries purged when the cache is full.
    pub purge_fraction: f64,
}

impl Default for IntelligentConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(5 * 60),
            max_entries: 100,
            compression_threshold: 1024,
            purge_fraction: 0.2,
        }
    }
}

#[derive(Debug, Clone)]
enum Stored<V> {
    Raw(V),
    Compressed(Bytes),
}

#[derive(Debug, Clone)]
struct Slot<V> {
    data: Stored<V>,
    timestamp: u64,
    ttl: Duration,
    access_count: u64,
    last_access: u64,
    /// Insertion order; equal scores purge the older entry first.
    seq: u64,
}

impl<V> Slot<V> {
    fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.timestamp) as u128 > self.ttl.as_millis()
    }

    /// Frequency per idle millisecond; lowest scores are purged first.
    fn retention_score(&self, now: u64) -> f64 {
        self.access_count as f64 / now.saturating_sub(self.last_access).max(1) as f64
    }
}

/// Snapshot of [`IntelligentCache`] state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntelligentStats {
    pub size: usize,
    /// hits / (hits + misses).
    pub hit_rate: f64,
    /// Live entries divided by their summed access counts.
    pub entries_per_access: f64,
    /// Share of live entries stored compressed.
    pub compression_ratio: f64,
}

/// TTL cache with an entry cap and transparent compression of large payloads.
pub struct IntelligentCache<V> {
    entries: HashMap<String, Slot<V>, ahash::RandomState>,
    codec: Codec,
    clock: Arc<dyn Clock>,
    config: IntelligentConfig,
    next_seq: u64,
    hits: u64,
    misses: u64,
}

impl<V> IntelligentCache<V>
where
    V: Serialize + DeserializeOwned + Clone,
{
    pub fn new(config: IntelligentConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: HashMap::default(),
            codec: Codec::new(),
            clock,
            config,
            next_seq: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Store `data` for `ttl` (default TTL when `None`).
    ///
    /// Fails only when `data` cannot be serialized or compressed.
    pub fn set(&mut self, key: &str, data: V, ttl: Option<Duration>) -> Result<()> {
        self.cleanup();

        let text = serde_json::to_string(&data)?;
        let stored = if text.encode_utf16().count() > self.config.compression_threshold {
            Stored::Compressed(self.codec.compress_text(&text)?)
        } else {
            Stored::Raw(data)
        };

        let now = self.clock.now_ms();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            key.to_string(),
            Slot {
                data: stored,
                timestamp: now,
                ttl: ttl.unwrap_or(self.config.default_ttl),
                access_count: 0,
                last_access: now,
                seq,
            },
        );
        Ok(())
    }

    /// Fetch `key`, dropping it if expired. A corrupt compressed entry is an error.
    pub fn get(&mut self, key: &str) -> Result<Option<V>> {
        let now = self.clock.now_ms();
        let expired = match self.entries.get(key) {
            None => {
                self.misses += 1;
                return Ok(None);
            }
            Some(slot) => slot.is_expired(now),
        };
        if expired {
            self.entries.remove(key);
            self.misses += 1;
            return Ok(None);
        }

        let Some(slot) = self.entries.get_mut(key) else {
            return Ok(None);
        };
        slot.access_count += 1;
        slot.last_access = now;
        let value = match &slot.data {
            Stored::Raw(v) => v.clone(),
            Stored::Compressed(bytes) => decompress_json(bytes)?,
        };
        self.hits += 1;
        Ok(Some(value))
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop expired entries, then purge the lowest-scored share if still full.
    pub fn cleanup(&mut self) {
        let now = self.clock.now_ms();
        self.entries.retain(|_, slot| !slot.is_expired(now));

        if self.entries.len() < self.config.max_entries {
            return;
        }

        let purge = ((self.entries.len() as f64 * self.config.purge_fraction).floor() as usize).max(1);
        let mut scored: Vec<(f64, u64, String)> = self
            .entries
            .iter()
            .map(|(key, slot)| (slot.retention_score(now), slot.seq, key.clone()))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        for (_, _, key) in scored.into_iter().take(purge) {
            self.entries.remove(&key);
        }
        tracing::debug!(purged = purge, remaining = self.entries.len(), "intelligent cache purged");
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> IntelligentStats {
        let size = self.entries.len();
        let total_access: u64 = self.entries.values().map(|s| s.access_count).sum();
        let compressed = self
            .entries
            .values()
            .filter(|s| matches!(s.data, Stored::Compressed(_)))
            .count();
        let lookups = self.hits + self.misses;

        IntelligentStats {
            size,
            hit_rate: if lookups > 0 {
                self.hits as f64 / lookups as f64
            } else {
                0.0
            },
            entries_per_access: if total_access > 0 {
                size as f64 / total_access as f64
            } else {
                0.0
            },
            compression_ratio: if size > 0 {
                compressed as f64 / size as f64
            } else {
                0.0
            },
        }
    }
}

impl<V> std::fmt::Debug for IntelligentCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntelligentCache")
            .field("entries", &self.entries.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
