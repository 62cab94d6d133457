//! # Resolvd Retrieval
//!
//! The knowledge-base side of the resolvd ticket-automation core: document
//! chunking and normalization, the query-embedding cache, and the hybrid
//! retrieval engine that turns ticket text into ranked, scored evidence
//! plus a confidence signal bundle.
//!
//! The [`EmbeddingPipeline`] trait is the seam to the external embedding
//! model; everything else runs in process against the pluggable storage
//! backends from `resolvd_core`.

pub mod chunker;
pub mod embeddings;
pub mod engine;

pub use chunker::{chunk_document, ingest_document, ChunkDraft, ChunkingParams, IngestReport};
pub use embeddings::{normalize_query, EmbeddingCache, EmbeddingPipeline};
pub use engine::{
    query_terms, EngineConfig, RetrievalEngine, RetrievalMetrics, RetrievalOutcome,
    RetrievalRequest,
};
