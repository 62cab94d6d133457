//! Query embedding pipeline seam and memoization cache.
//!
//! The [`EmbeddingPipeline`] trait is the boundary to the external
//! embedding model service: in production an HTTP/ONNX-backed
//! implementation, in tests a deterministic stub.
//!
//! [`EmbeddingCache`] memoizes vectors for queries already seen. It is a
//! pure memoization layer: a miss changes latency, never the result — the
//! embedded text is the *normalized* query, so two queries differing only
//! in case or whitespace share one key and one vector.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use lru::LruCache;
use tracing::debug;

/// Pipeline seam for text embedding.
///
/// Implementations must produce L2-normalized vectors of the configured
/// dimensionality. Mocks substitute for the real model in tests.
pub trait EmbeddingPipeline: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed_text(&self, text: &str) -> Result<Vec<f32>>;
}

/// Normalize a query string into its cache key: case-folded with
/// whitespace runs collapsed to single spaces.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

struct CacheEntry {
    vector: Vec<f32>,
    inserted_at: Instant,
}

/// Bounded query-embedding cache with least-recently-used eviction.
///
/// Eviction never errors: inserting into a full cache silently drops the
/// least-recently-used entry. Entries past `max_age` are treated as misses
/// and recomputed. A failed model call propagates to the caller and leaves
/// the cache unpopulated.
pub struct EmbeddingCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    max_age: Option<Duration>,
}

impl EmbeddingCache {
    /// Create a cache holding at most `capacity` entries. `max_age` of
    /// `None` disables age-based staleness.
    pub fn new(capacity: usize, max_age: Option<Duration>) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to >= 1");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            max_age,
        }
    }

    /// Look up the embedding for `query`, computing and caching it on a
    /// miss.
    ///
    /// Returns the vector and whether it came from the cache.
    pub fn get_or_compute(
        &self,
        embedder: &dyn EmbeddingPipeline,
        query: &str,
    ) -> Result<(Vec<f32>, bool)> {
        let key = normalize_query(query);

        {
            let mut entries = self
                .entries
                .lock()
                .map_err(|_| anyhow::anyhow!("embedding cache lock poisoned"))?;
            if let Some(entry) = entries.get(&key) {
                let stale = self
                    .max_age
                    .map(|age| entry.inserted_at.elapsed() > age)
                    .unwrap_or(false);
                if !stale {
                    return Ok((entry.vector.clone(), true));
                }
                debug!("Stale cache entry for query, recomputing");
                entries.pop(&key);
            }
        }

        // The model call happens outside the lock so a slow embedding does
        // not stall concurrent lookups.
        let vector = embedder
            .embed_text(&key)
            .context("Failed to embed query")?;

        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("embedding cache lock poisoned"))?;
        entries.put(
            key,
            CacheEntry {
                vector: vector.clone(),
                inserted_at: Instant::now(),
            },
        );
        Ok((vector, false))
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
