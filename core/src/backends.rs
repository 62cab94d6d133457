//! # Pluggable Backend Traits
//!
//! Defines the `VectorBackend` and `ChunkStoreBackend` traits that decouple
//! similarity search from chunk storage, so either can be swapped via
//! configuration (in-memory for embedded mode and tests, an external vector
//! database later) without touching the retrieval engine.
//!
//! The [`BackendRegistry`] holds boxed trait objects for both backends and
//! is the single entry point for all storage operations. Factory functions
//! in the engine crates (e.g. `memvec_impl`) create backends from
//! configuration.

use std::sync::Arc;

use crate::types::{Chunk, ChunkId, DocumentId};

/// Backend for vector similarity search over chunk embeddings.
///
/// Concurrent reads are unrestricted; writes are serialized internally so a
/// reader never observes a half-written entry.
pub trait VectorBackend: Send + Sync {
    /// Upsert (insert or update) embedding vectors for the given chunk ids.
    fn upsert_embeddings(&self, items: &[(ChunkId, Vec<f32>)]) -> anyhow::Result<()>;

    /// Search for the top-k most similar vectors to the query, optionally
    /// restricted to chunks whose section path contains `category`.
    ///
    /// Returns `(chunk_id, similarity)` pairs sorted by descending
    /// similarity. Similarities are cosine over L2-normalized vectors,
    /// clamped into `[0, 1]`. An index with no eligible candidates returns
    /// an empty vec, not an error.
    fn search(
        &self,
        query: &[f32],
        top_k: usize,
        category: Option<&str>,
    ) -> anyhow::Result<Vec<(ChunkId, f32)>>;

    /// Delete embedding vectors for the given chunk ids.
    fn delete(&self, ids: &[ChunkId]) -> anyhow::Result<()>;
}

/// Backend for chunk storage and lookup.
pub trait ChunkStoreBackend: Send + Sync {
    /// Reserve `count` sequential chunk ids and return the first one.
    fn next_id_block(&self, count: usize) -> anyhow::Result<ChunkId>;

    /// Upsert (insert or update) chunks.
    fn upsert_chunks(&self, chunks: &[Chunk]) -> anyhow::Result<()>;

    /// Retrieve a single chunk by id.
    fn get_chunk(&self, id: ChunkId) -> anyhow::Result<Option<Arc<Chunk>>>;

    /// All chunk ids belonging to a document, sorted by sequence index.
    fn document_chunk_ids(&self, document_id: &DocumentId) -> anyhow::Result<Vec<ChunkId>>;

    /// Delete every chunk of a document (used by full re-ingestion and
    /// document deletion). Returns the deleted ids so the caller can purge
    /// the vector index as well.
    fn delete_document(&self, document_id: &DocumentId) -> anyhow::Result<Vec<ChunkId>>;

    /// Number of chunks currently stored.
    fn chunk_count(&self) -> anyhow::Result<usize>;
}

/// Holds instantiated backends for the storage layer.
///
/// The registry owns boxed trait objects for the vector index and the chunk
/// store, enabling runtime selection via configuration.
///
/// # Example
///
/// ```ignore
/// let registry = BackendRegistry::new(
///     Box::new(mem_vector_backend),
///     Box::new(mem_chunk_store),
/// );
/// registry.vector().search(&query, 10, None)?;
/// registry.chunks().get_chunk(42)?;
/// ```
pub struct BackendRegistry {
    vector: Box<dyn VectorBackend>,
    chunks: Box<dyn ChunkStoreBackend>,
}

impl BackendRegistry {
    /// Create a registry from instantiated backends.
    pub fn new(vector: Box<dyn VectorBackend>, chunks: Box<dyn ChunkStoreBackend>) -> Self {
        Self { vector, chunks }
    }

    /// The vector search backend.
    pub fn vector(&self) -> &dyn VectorBackend {
        self.vector.as_ref()
    }

    /// The chunk store backend.
    pub fn chunks(&self) -> &dyn ChunkStoreBackend {
        self.chunks.as_ref()
    }
}
