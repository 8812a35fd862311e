//! Advisory query cache
//!
//! Memoizes query embeddings and ranked result lists. Entries expire after a TTL
//! and each table holds a bounded number of entries. Readers share a read lock;
//! concurrent writers for the same key overwrite each other (last write wins).

use crate::config::CacheConfig;
use crate::retrieval::passage::{FusedCandidate, ScoredCandidate};
use crate::retrieval::{text, SearchConstraints};
use ahash::AHashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Hash of everything that determines a cached value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey(blake3::Hash);

impl CacheKey {
    pub fn embedding(query: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"embedding\0");
        hasher.update(text::normalize(query).as_bytes());
        Self(hasher.finalize())
    }

    pub fn semantic(query: &str, top_k: usize, constraints: &SearchConstraints) -> Self {
        Self(Self::results_hasher(b"semantic\0", query, top_k, constraints).finalize())
    }

    pub fn hybrid(
        query: &str,
        top_k: usize,
        constraints: &SearchConstraints,
        semantic_weight: f32,
        lexical_weight: f32,
    ) -> Self {
        let mut hasher = Self::results_hasher(b"hybrid\0", query, top_k, constraints);
        hasher.update(&semantic_weight.to_bits().to_le_bytes());
        hasher.update(&lexical_weight.to_bits().to_le_bytes());
        Self(hasher.finalize())
    }

    fn results_hasher(
        tag: &[u8],
        query: &str,
        top_k: usize,
        constraints: &SearchConstraints,
    ) -> blake3::Hasher {
        let mut hasher = blake3::Hasher::new();
        hasher.update(tag);
        hasher.update(text::normalize(query).as_bytes());
        hasher.update(b"\0");
        hasher.update(&(top_k as u64).to_le_bytes());
        hasher.update(constraints.fingerprint().as_bytes());
        hasher
    }
}

struct Slot<V> {
    value: Arc<V>,
    inserted_at: Instant,
}

/// One bounded TTL table
struct TtlTable<V> {
    entries: RwLock<AHashMap<CacheKey, Slot<V>>>,
}

impl<V> TtlTable<V> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(AHashMap::new()),
        }
    }

    fn get(&self, key: &CacheKey, ttl: Duration) -> Option<Arc<V>> {
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|slot| slot.inserted_at.elapsed() < ttl)
            .map(|slot| Arc::clone(&slot.value))
    }

    fn insert(&self, key: CacheKey, value: V, ttl: Duration, max_entries: usize) {
        let mut entries = self.entries.write();

        if !entries.contains_key(&key) && entries.len() >= max_entries {
            entries.retain(|_, slot| slot.inserted_at.elapsed() < ttl);
        }
        if !entries.contains_key(&key) && entries.len() >= max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, slot)| slot.inserted_at)
                .map(|(key, _)| *key);
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key,
            Slot {
                value: Arc::new(value),
                inserted_at: Instant::now(),
            },
        );
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn clear(&self) {
        self.entries.write().clear();
    }
}

/// Process-wide cache, constructed once and shared by handle
pub struct QueryCache {
    embeddings: TtlTable<Vec<f32>>,
    semantic: TtlTable<Vec<ScoredCandidate>>,
    hybrid: TtlTable<Vec<FusedCandidate>>,
    max_entries: usize,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_ttl(config.max_entries, Duration::from_secs(config.ttl_secs))
    }

    pub fn with_ttl(max_entries: usize, ttl: Duration) -> Self {
        Self {
            embeddings: TtlTable::new(),
            semantic: TtlTable::new(),
            hybrid: TtlTable::new(),
            max_entries,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// A cache that stores nothing
    pub fn disabled() -> Self {
        Self::with_ttl(0, Duration::ZERO)
    }

    pub fn is_enabled(&self) -> bool {
        self.max_entries > 0 && !self.ttl.is_zero()
    }

    pub fn get_embedding(&self, key: &CacheKey) -> Option<Arc<Vec<f32>>> {
        self.lookup(self.embeddings.get(key, self.ttl))
    }

    pub fn put_embedding(&self, key: CacheKey, embedding: Vec<f32>) {
        if self.is_enabled() {
            self.embeddings
                .insert(key, embedding, self.ttl, self.max_entries);
        }
    }

    pub fn get_semantic(&self, key: &CacheKey) -> Option<Arc<Vec<ScoredCandidate>>> {
        self.lookup(self.semantic.get(key, self.ttl))
    }

    pub fn put_semantic(&self, key: CacheKey, results: Vec<ScoredCandidate>) {
        if self.is_enabled() {
            self.semantic.insert(key, results, self.ttl, self.max_entries);
        }
    }

    pub fn get_hybrid(&self, key: &CacheKey) -> Option<Arc<Vec<FusedCandidate>>> {
        self.lookup(self.hybrid.get(key, self.ttl))
    }

    pub fn put_hybrid(&self, key: CacheKey, results: Vec<FusedCandidate>) {
        if self.is_enabled() {
            self.hybrid.insert(key, results, self.ttl, self.max_entries);
        }
    }

    fn lookup<V>(&self, found: Option<Arc<V>>) -> Option<Arc<V>> {
        if !self.is_enabled() {
            return None;
        }
        match found {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Query cache hit");
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Get cache statistics: (hits, misses, hit_rate)
    pub fn stats(&self) -> (u64, u64, f64) {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        };
        (hits, misses, hit_rate)
    }

    pub fn hit_rate(&self) -> f64 {
        self.stats().2
    }

    /// Total entries across all tables, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.embeddings.len() + self.semantic.len() + self.hybrid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.embeddings.clear();
        self.semantic.clear();
        self.hybrid.clear();
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}
