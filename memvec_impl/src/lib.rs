//! # Memvec Storage Engine
//!
//! In-memory implementation of the resolvd backend traits:
//!
//! - [`MemvecVectorBackend`]: brute-force cosine similarity search with a
//!   bounded top-k heap and optional category filtering
//! - [`MemvecChunkStore`]: chunk storage with per-document indexing and
//!   sequential id allocation
//!
//! Both backends share one [`MemvecStore`] behind an `RwLock`, so concurrent
//! reads are unrestricted while writes (ingestion, re-ingestion, deletion)
//! are serialized — a reader never observes a half-written chunk.
//!
//! Use [`create_registry`] to build a [`BackendRegistry`] wired to a fresh
//! shared store.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use tracing::warn;

use resolvd_core::{BackendRegistry, Chunk, ChunkId, ChunkStoreBackend, DocumentId, VectorBackend};

/// Cosine similarity between two L2-normalized vectors (= dot product),
/// clamped into `[0, 1]` per the backend contract.
#[inline]
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    dot_product(a, b).clamp(0.0, 1.0)
}

/// Dot product using 8 independent accumulator lanes.
///
/// The independent accumulators break data dependencies so LLVM reliably
/// auto-vectorizes this loop into NEON fmla (aarch64) or AVX vfmadd
/// (x86_64) instructions.
#[inline]
fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    let chunks = n / 8;

    let mut acc = [0.0f32; 8];
    let a_chunks = &a[..chunks * 8];
    let b_chunks = &b[..chunks * 8];

    for i in (0..a_chunks.len()).step_by(8) {
        acc[0] += a_chunks[i] * b_chunks[i];
        acc[1] += a_chunks[i + 1] * b_chunks[i + 1];
        acc[2] += a_chunks[i + 2] * b_chunks[i + 2];
        acc[3] += a_chunks[i + 3] * b_chunks[i + 3];
        acc[4] += a_chunks[i + 4] * b_chunks[i + 4];
        acc[5] += a_chunks[i + 5] * b_chunks[i + 5];
        acc[6] += a_chunks[i + 6] * b_chunks[i + 6];
        acc[7] += a_chunks[i + 7] * b_chunks[i + 7];
    }

    let mut sum: f32 = acc.iter().sum();
    for i in chunks * 8..n {
        sum += a[i] * b[i];
    }
    sum
}

/// Heap entry ordered so that `BinaryHeap::peek` returns the *lowest*
/// scoring candidate, letting the search keep a bounded top-k set.
struct MinScored(f32, ChunkId);

impl PartialEq for MinScored {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MinScored {}

impl PartialOrd for MinScored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MinScored {
    fn cmp(&self, other: &Self) -> Ordering {
        // Inverted: the max-heap surfaces the lowest score. Ties fall back
        // to the chunk id so ordering is total and deterministic.
        other
            .0
            .partial_cmp(&self.0)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.1.cmp(&self.1))
    }
}

/// Shared in-memory state for both backends.
struct StoreInner {
    chunks: HashMap<ChunkId, Arc<Chunk>>,
    embeddings: HashMap<ChunkId, Vec<f32>>,
    by_document: HashMap<DocumentId, Vec<ChunkId>>,
    next_id: ChunkId,
}

/// The shared store both backend handles point at.
pub struct MemvecStore {
    inner: RwLock<StoreInner>,
    dimension: usize,
}

impl MemvecStore {
    /// Create an empty store expecting embeddings of the given
    /// dimensionality.
    pub fn new(dimension: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(StoreInner {
                chunks: HashMap::new(),
                embeddings: HashMap::new(),
                by_document: HashMap::new(),
                next_id: 1,
            }),
            dimension,
        })
    }
}

/// Brute-force cosine vector index over the shared store.
pub struct MemvecVectorBackend {
    store: Arc<MemvecStore>,
}

impl VectorBackend for MemvecVectorBackend {
    fn upsert_embeddings(&self, items: &[(ChunkId, Vec<f32>)]) -> Result<()> {
        let mut inner = self
            .store
            .inner
            .write()
            .map_err(|_| anyhow::anyhow!("memvec store lock poisoned"))?;
        for (id, vector) in items {
            if vector.len() != self.store.dimension {
                // Data error: skip the offending vector, keep the batch.
                warn!(
                    chunk_id = id,
                    got = vector.len(),
                    expected = self.store.dimension,
                    "Skipping embedding with mismatched dimensionality"
                );
                continue;
            }
            inner.embeddings.insert(*id, vector.clone());
        }
        Ok(())
    }

    fn search(
        &self,
        query: &[f32],
        top_k: usize,
        category: Option<&str>,
    ) -> Result<Vec<(ChunkId, f32)>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let inner = self
            .store
            .inner
            .read()
            .map_err(|_| anyhow::anyhow!("memvec store lock poisoned"))?;

        // Min-heap of size top_k: O(n log k) instead of O(n log n).
        let mut heap: BinaryHeap<MinScored> = BinaryHeap::with_capacity(top_k + 1);

        for (id, vector) in &inner.embeddings {
            if vector.len() != query.len() {
                continue;
            }
            if let Some(cat) = category {
                match inner.chunks.get(id) {
                    Some(chunk) if chunk.in_category(cat) => {}
                    _ => continue,
                }
            }
            let sim = cosine_similarity(query, vector);

            if heap.len() < top_k {
                heap.push(MinScored(sim, *id));
            } else if let Some(min_entry) = heap.peek() {
                if sim > min_entry.0 {
                    heap.pop();
                    heap.push(MinScored(sim, *id));
                }
            }
        }

        // Drain into a Vec sorted by similarity descending, id ascending on
        // exact ties so results are reproducible.
        let mut results: Vec<(ChunkId, f32)> = heap.into_iter().map(|ms| (ms.1, ms.0)).collect();
        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        Ok(results)
    }

    fn delete(&self, ids: &[ChunkId]) -> Result<()> {
        let mut inner = self
            .store
            .inner
            .write()
            .map_err(|_| anyhow::anyhow!("memvec store lock poisoned"))?;
        for id in ids {
            inner.embeddings.remove(id);
        }
        Ok(())
    }
}

/// Chunk store over the shared store.
pub struct MemvecChunkStore {
    store: Arc<MemvecStore>,
}

impl ChunkStoreBackend for MemvecChunkStore {
    fn next_id_block(&self, count: usize) -> Result<ChunkId> {
        let mut inner = self
            .store
            .inner
            .write()
            .map_err(|_| anyhow::anyhow!("memvec store lock poisoned"))?;
        let first = inner.next_id;
        inner.next_id += count as ChunkId;
        Ok(first)
    }

    fn upsert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut inner = self
            .store
            .inner
            .write()
            .map_err(|_| anyhow::anyhow!("memvec store lock poisoned"))?;
        for chunk in chunks {
            if chunk.embedding.len() != self.store.dimension {
                warn!(
                    chunk_id = chunk.id,
                    document_id = %chunk.document_id,
                    got = chunk.embedding.len(),
                    expected = self.store.dimension,
                    "Skipping chunk with mismatched embedding dimensionality"
                );
                continue;
            }
            let ids = inner.by_document.entry(chunk.document_id.clone()).or_default();
            if !ids.contains(&chunk.id) {
                ids.push(chunk.id);
            }
            inner.chunks.insert(chunk.id, Arc::new(chunk.clone()));
        }
        Ok(())
    }

    fn get_chunk(&self, id: ChunkId) -> Result<Option<Arc<Chunk>>> {
        let inner = self
            .store
            .inner
            .read()
            .map_err(|_| anyhow::anyhow!("memvec store lock poisoned"))?;
        Ok(inner.chunks.get(&id).cloned())
    }

    fn document_chunk_ids(&self, document_id: &DocumentId) -> Result<Vec<ChunkId>> {
        let inner = self
            .store
            .inner
            .read()
            .map_err(|_| anyhow::anyhow!("memvec store lock poisoned"))?;
        let mut ids = inner
            .by_document
            .get(document_id)
            .cloned()
            .unwrap_or_default();
        ids.sort_by_key(|id| inner.chunks.get(id).map(|c| c.seq).unwrap_or(usize::MAX));
        Ok(ids)
    }

    fn delete_document(&self, document_id: &DocumentId) -> Result<Vec<ChunkId>> {
        let mut inner = self
            .store
            .inner
            .write()
            .map_err(|_| anyhow::anyhow!("memvec store lock poisoned"))?;
        let ids = inner.by_document.remove(document_id).unwrap_or_default();
        for id in &ids {
            inner.chunks.remove(id);
        }
        Ok(ids)
    }

    fn chunk_count(&self) -> Result<usize> {
        let inner = self
            .store
            .inner
            .read()
            .map_err(|_| anyhow::anyhow!("memvec store lock poisoned"))?;
        Ok(inner.chunks.len())
    }
}

/// Build a [`BackendRegistry`] backed by a fresh in-memory store.
pub fn create_registry(dimension: usize) -> BackendRegistry {
    let store = MemvecStore::new(dimension);
    BackendRegistry::new(
        Box::new(MemvecVectorBackend {
            store: store.clone(),
        }),
        Box::new(MemvecChunkStore { store }),
    )
}
