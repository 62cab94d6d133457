//! # Resolvd Core
//!
//! Shared abstractions for the resolvd support-ticket automation core.
//!
//! This crate defines the data model for knowledge chunks and retrieval
//! results, the pluggable storage traits that engine implementations must
//! conform to, and the [`RetrievalSignals`](signals::RetrievalSignals)
//! bundle that carries confidence information from the retrieval engine to
//! the ticket orchestrator.

pub mod backends;
pub mod signals;
pub mod types;

pub use backends::{BackendRegistry, ChunkStoreBackend, VectorBackend};
pub use signals::{FallbackHint, RetrievalSignals};
pub use types::{
    Chunk, ChunkId, DocumentId, Judgment, Provenance, Satisfaction, ScoredChunk, SourceLocation,
    TerminalOutcome, TicketId,
};
