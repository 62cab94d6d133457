//! Core data types for the resolvd knowledge base and ticket pipeline.
//!
//! Defines the fundamental types shared across the storage backends, the
//! retrieval engine, and the ticket orchestrator: knowledge chunks, scored
//! retrieval results, and the ticket-level verdict types.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Unique identifier for a knowledge chunk.
///
/// Allocated sequentially by the chunk store (see
/// [`ChunkStoreBackend::next_id_block`](crate::backends::ChunkStoreBackend::next_id_block)).
pub type ChunkId = u64;

/// Identifier of the document a chunk was extracted from.
pub type DocumentId = String;

/// Identifier of a support ticket.
pub type TicketId = String;

/// Position of a chunk within its source document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceLocation {
    /// Page number for paginated sources (1-indexed). `None` for plain text.
    pub page: Option<u32>,
    /// Character offset of the chunk start within the document text.
    pub offset: usize,
}

/// An immutable unit of knowledge-base text with section metadata and a
/// precomputed embedding.
///
/// A chunk's text and embedding are produced together during ingestion and
/// never diverge: re-embedding requires re-ingesting the owning document,
/// which deletes the old chunks and allocates fresh ids. Chunks are owned by
/// the chunk store and handed out as `Arc<Chunk>` references; retrieval
/// results reference them, they never copy them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique chunk identifier (sequential).
    pub id: ChunkId,
    /// Identifier of the owning document.
    pub document_id: DocumentId,
    /// Normalized text content.
    pub text: String,
    /// Hierarchical section path: the ordered heading titles enclosing this
    /// chunk. A document without heading markers yields `["root"]`.
    pub section_path: Vec<String>,
    /// Intra-document sequence index. Chunks of one document, sorted by
    /// `seq`, reassemble the document in original order.
    pub seq: usize,
    /// Where in the source document this chunk came from.
    pub location: SourceLocation,
    /// L2-normalized embedding vector (dimensionality fixed by config).
    pub embedding: Vec<f32>,
    /// Ingestion timestamp (epoch seconds). Used as the recency tie-break
    /// during ranking.
    pub ingested_at: i64,
}

impl Chunk {
    /// Whether `category` names one of this chunk's enclosing sections
    /// (case-insensitive). Used both to restrict vector search to a
    /// category hint and as the section-proximity ranking tie-break.
    pub fn in_category(&self, category: &str) -> bool {
        self.section_path
            .iter()
            .any(|s| s.eq_ignore_ascii_case(category))
    }
}

/// Which retrieval path produced (or boosted) a result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Vector similarity only.
    Semantic,
    /// Keyword overlap only (semantic score below the noise floor).
    Lexical,
    /// Both paths contributed to the fused score.
    Hybrid,
}

/// A ranked retrieval result handed to the orchestrator.
///
/// All similarity scores — semantic, lexical, and fused — live in `[0, 1]`:
/// cosine similarity over L2-normalized vectors is clamped at 0 from below,
/// and the lexical score is the matched-keyword fraction. The fused score is
/// the weighted combination of the two (semantic weight dominant) and is the
/// value compared against `score_threshold` and aggregated into
/// [`RetrievalSignals`](crate::signals::RetrievalSignals).
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    /// The matched chunk (shared reference into the chunk store).
    pub chunk: Arc<Chunk>,
    /// Combined ranking score in `[0, 1]`.
    pub fused_score: f32,
    /// Vector similarity component in `[0, 1]`.
    pub semantic_score: f32,
    /// Keyword-overlap component in `[0, 1]`.
    pub lexical_score: f32,
    /// Position in the returned ranking (0-indexed).
    pub rank: usize,
    /// Which retrieval path produced this result.
    pub provenance: Provenance,
}

/// Final disposition of a ticket. Once recorded, no further automated
/// processing occurs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TerminalOutcome {
    /// A confident answer was composed and sent without waiting for
    /// customer confirmation.
    AutoResolved,
    /// The ticket was handed off to the human queue.
    Escalated,
    /// The customer confirmed the answer worked.
    Closed,
    /// The ticket was closed without a satisfaction signal (e.g. withdrawn
    /// by the customer mid-processing).
    ClosedUnsatisfied,
}

/// Customer satisfaction signal on a delivered answer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Satisfaction {
    Satisfied,
    Dissatisfied,
}

/// Quality verdict from the external evaluation collaborator on a drafted
/// answer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Judgment {
    /// The draft is good enough to send as a best-effort answer.
    pub acceptable: bool,
    /// The ticket should go straight to a human.
    pub escalate: bool,
}

impl Judgment {
    /// The verdict used when the evaluator itself fails: route to a human
    /// rather than sending an unvetted draft.
    pub fn escalate_by_default() -> Self {
        Self {
            acceptable: false,
            escalate: true,
        }
    }
}
