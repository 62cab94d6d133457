//! Section-aware document chunking.
//!
//! Converts a hierarchically-sectioned document into overlapping text
//! chunks that preserve section context:
//!
//! 1. **Section split** — Markdown-style headings (`#`..`######`) open
//!    sections; heading levels nest into a hierarchical section path
//! 2. **Sentence split** — section bodies are cut at sentence boundaries;
//!    decimal points inside numbers never split
//! 3. **Window packing** — sentences are packed into windows of
//!    approximately the target size; consecutive windows within a section
//!    share a trailing-sentence overlap region so evidence spanning a
//!    window boundary is not lost
//!
//! A chunk boundary never lands inside a sentence. A document without any
//! heading markers is treated as one root section.

use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, info_span, warn};

use resolvd_core::{BackendRegistry, Chunk, ChunkId, SourceLocation};

use crate::EmbeddingPipeline;

/// Section path used for documents without heading markers.
const ROOT_SECTION: &str = "root";

/// Chunking parameters.
#[derive(Debug, Clone)]
pub struct ChunkingParams {
    /// Target chunk size in characters.
    pub chunk_size: usize,
    /// Overlap budget between consecutive windows of a section, in
    /// characters.
    pub overlap: usize,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            chunk_size: 1200,
            overlap: 200,
        }
    }
}

/// A chunk produced by [`chunk_document`], before an embedding is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    /// Chunk text (whole sentences only).
    pub text: String,
    /// Hierarchical section path of the enclosing section.
    pub section_path: Vec<String>,
    /// Intra-document sequence index.
    pub seq: usize,
    /// Char offset of the chunk's first sentence within the document.
    pub offset: usize,
}

/// One section of a document: its heading path and body text.
#[derive(Debug, Clone)]
struct Section {
    path: Vec<String>,
    body: String,
    /// Char offset of the body start within the document.
    offset: usize,
}

/// Split a document into sections along Markdown-style heading markers.
///
/// Heading levels nest: a `##` heading under a `#` heading produces the
/// path `[h1, h2]`. Text before the first heading, or a document with no
/// headings at all, lands in the root section.
fn split_sections(text: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut stack: Vec<(usize, String)> = Vec::new();
    let mut body = String::new();
    let mut body_offset = 0usize;
    let mut char_pos = 0usize;

    let mut flush = |stack: &[(usize, String)], body: &mut String, offset: usize| {
        if !body.trim().is_empty() {
            let path = if stack.is_empty() {
                vec![ROOT_SECTION.to_string()]
            } else {
                stack.iter().map(|(_, title)| title.clone()).collect()
            };
            sections.push(Section {
                path,
                body: std::mem::take(body),
                offset,
            });
        } else {
            body.clear();
        }
    };

    for line in text.split_inclusive('\n') {
        let line_chars = line.chars().count();
        let trimmed = line.trim_end();
        if let Some(heading) = parse_heading(trimmed) {
            flush(&stack, &mut body, body_offset);
            let (level, title) = heading;
            while matches!(stack.last(), Some((l, _)) if *l >= level) {
                stack.pop();
            }
            stack.push((level, title));
            body_offset = char_pos + line_chars;
        } else {
            if body.is_empty() {
                body_offset = char_pos;
            }
            body.push_str(line);
        }
        char_pos += line_chars;
    }
    flush(&stack, &mut body, body_offset);

    sections
}

/// Parse a Markdown heading line into `(level, title)`.
fn parse_heading(line: &str) -> Option<(usize, String)> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.starts_with(' ') {
        return None;
    }
    let title = rest.trim();
    if title.is_empty() {
        return None;
    }
    Some((hashes, title.to_string()))
}

/// Split text into sentences, returning each sentence with its char offset
/// within the input.
///
/// Splits on `.`, `!`, and `?`. A period between two digits is a decimal
/// point inside a number (`$99.99`, `2.0.1`) and does NOT split.
fn split_into_sentences(text: &str) -> Vec<(String, usize)> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let mut sentences = Vec::new();
    let mut current: Vec<char> = Vec::new();
    let mut current_start = 0usize;

    let mut flush = |current: &mut Vec<char>, start: usize| {
        let leading_ws = current.iter().take_while(|c| c.is_whitespace()).count();
        let s: String = current.iter().collect::<String>().trim().to_string();
        if s.chars().count() > 1 {
            sentences.push((s, start + leading_ws));
        }
        current.clear();
    };

    for i in 0..len {
        let ch = chars[i];
        if current.is_empty() {
            current_start = i;
        }
        current.push(ch);

        if ch == '!' || ch == '?' {
            flush(&mut current, current_start);
        } else if ch == '.' {
            // A period between two digits is a decimal point, not a
            // sentence boundary.
            let prev_is_digit = i > 0 && chars[i - 1].is_ascii_digit();
            let next_is_digit = i + 1 < len && chars[i + 1].is_ascii_digit();
            if prev_is_digit && next_is_digit {
                continue;
            }
            flush(&mut current, current_start);
        }
    }
    flush(&mut current, current_start);

    sentences
}

/// Chunk a document into section-tagged, sentence-aligned drafts.
///
/// Sentences are packed into windows of approximately `chunk_size` chars;
/// each window after the first within a section is seeded with its
/// predecessor's trailing sentences up to the overlap budget.
pub fn chunk_document(text: &str, params: &ChunkingParams) -> Vec<ChunkDraft> {
    let mut drafts = Vec::new();
    let mut seq = 0usize;

    for section in split_sections(text) {
        let sentences = split_into_sentences(&section.body);
        if sentences.is_empty() {
            continue;
        }

        let mut window: Vec<usize> = Vec::new();
        let mut window_len = 0usize;
        // Highest sentence index already emitted; guards against a final
        // window made of nothing but carried overlap.
        let mut emitted_through: Option<usize> = None;

        for idx in 0..sentences.len() {
            let s_len = sentences[idx].0.chars().count();
            if !window.is_empty() && window_len + s_len > params.chunk_size {
                emit_window(&mut drafts, &sentences, &section, &window, &mut seq);
                emitted_through = window.last().copied();
                let (carried, carried_len) =
                    carry_overlap(&window, &sentences, params.overlap);
                window = carried;
                window_len = carried_len;
            }
            window.push(idx);
            window_len += s_len;
        }

        let has_new_content = match emitted_through {
            None => !window.is_empty(),
            Some(e) => window.iter().any(|&i| i > e),
        };
        if has_new_content {
            emit_window(&mut drafts, &sentences, &section, &window, &mut seq);
        }
    }

    drafts
}

fn emit_window(
    drafts: &mut Vec<ChunkDraft>,
    sentences: &[(String, usize)],
    section: &Section,
    window: &[usize],
    seq: &mut usize,
) {
    let text = window
        .iter()
        .map(|&i| sentences[i].0.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    drafts.push(ChunkDraft {
        text,
        section_path: section.path.clone(),
        seq: *seq,
        offset: section.offset + sentences[window[0]].1,
    });
    *seq += 1;
}

/// Trailing sentence indices of `window` whose combined length fits the
/// overlap budget, in original order.
fn carry_overlap(
    window: &[usize],
    sentences: &[(String, usize)],
    overlap: usize,
) -> (Vec<usize>, usize) {
    let mut carried = Vec::new();
    let mut carried_len = 0usize;
    for &i in window.iter().rev() {
        let s_len = sentences[i].0.chars().count();
        if carried_len + s_len > overlap {
            break;
        }
        carried_len += s_len;
        carried.push(i);
    }
    carried.reverse();
    (carried, carried_len)
}

/// Report of one document ingestion run.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    /// Number of chunks stored and indexed.
    pub chunks_created: usize,
    /// Number of chunks whose embedding failed (skipped, not fatal).
    pub chunks_failed: usize,
    /// Microseconds spent chunking.
    pub chunking_us: u64,
    /// Microseconds spent embedding.
    pub embedding_us: u64,
    /// Total ingestion duration in microseconds.
    pub total_us: u64,
}

/// Ingest a document: chunk it, embed each chunk, and store/index the
/// results. Re-ingesting a document replaces all of its chunks.
///
/// Each chunk is processed independently: if embedding fails for one
/// chunk, the failure is logged and the remaining chunks proceed.
pub fn ingest_document(
    registry: &BackendRegistry,
    embedder: &dyn EmbeddingPipeline,
    document_id: &str,
    text: &str,
    params: &ChunkingParams,
) -> Result<IngestReport> {
    let span = info_span!(
        "resolvd.ingest",
        document_id,
        chunks = tracing::field::Empty,
        duration_us = tracing::field::Empty,
    );
    let _guard = span.enter();

    let start = Instant::now();
    let mut report = IngestReport::default();

    // Full re-ingestion: drop any previous chunks of this document from
    // both the store and the index.
    let stale = registry
        .chunks()
        .delete_document(&document_id.to_string())
        .context("Failed to delete stale chunks")?;
    if !stale.is_empty() {
        registry
            .vector()
            .delete(&stale)
            .context("Failed to purge stale embeddings")?;
        debug!("Replaced {} stale chunks of '{}'", stale.len(), document_id);
    }

    let chunk_start = Instant::now();
    let drafts = chunk_document(text, params);
    report.chunking_us = chunk_start.elapsed().as_micros() as u64;

    if drafts.is_empty() {
        report.total_us = start.elapsed().as_micros() as u64;
        span.record("chunks", 0u64);
        return Ok(report);
    }

    let first_id: ChunkId = registry
        .chunks()
        .next_id_block(drafts.len())
        .context("Failed to allocate chunk ids")?;
    let ingested_at = chrono::Utc::now().timestamp();

    let embed_start = Instant::now();
    let mut chunks = Vec::with_capacity(drafts.len());
    let mut items = Vec::with_capacity(drafts.len());
    for (i, draft) in drafts.into_iter().enumerate() {
        let embedding = match embedder.embed_text(&draft.text) {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    document_id,
                    seq = draft.seq,
                    "Embedding failed for chunk, skipping: {e:#}"
                );
                report.chunks_failed += 1;
                continue;
            }
        };
        let id = first_id + i as ChunkId;
        items.push((id, embedding.clone()));
        chunks.push(Chunk {
            id,
            document_id: document_id.to_string(),
            text: draft.text,
            section_path: draft.section_path,
            seq: draft.seq,
            location: SourceLocation {
                page: None,
                offset: draft.offset,
            },
            embedding,
            ingested_at,
        });
    }
    report.embedding_us = embed_start.elapsed().as_micros() as u64;

    registry
        .chunks()
        .upsert_chunks(&chunks)
        .context("Failed to store chunks")?;
    registry
        .vector()
        .upsert_embeddings(&items)
        .context("Failed to index chunk embeddings")?;

    report.chunks_created = chunks.len();
    report.total_us = start.elapsed().as_micros() as u64;
    span.record("chunks", report.chunks_created as u64);
    span.record("duration_us", report.total_us);
    debug!(
        "Ingested '{}': {} chunks ({} failed) in {}us",
        document_id, report.chunks_created, report.chunks_failed, report.total_us
    );
    Ok(report)
}
