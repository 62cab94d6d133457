//! Retrieval engine for the resolvd knowledge base.
//!
//! Implements the hybrid retrieval pipeline:
//! 1. **Query Embedding** — via the memoizing cache (§embeddings)
//! 2. **Vector Search** — over-fetched top-N, optionally category-restricted
//! 3. **Lexical Scoring** — keyword overlap, fused with the semantic score
//! 4. **Threshold Filter** — fused score floor
//! 5. **Ranking** — fused score descending with deterministic tie-breaks
//! 6. **Signals** — confidence bundle for the orchestrator's routing decision
//!
//! Each step emits timing metrics. Results are reproducible: identical
//! requests against an unchanged index return identical rankings and
//! signals.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, info_span, warn};

use resolvd_core::{
    BackendRegistry, Provenance, RetrievalSignals, ScoredChunk,
};

use crate::{EmbeddingCache, EmbeddingPipeline};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Construction-time engine configuration.
///
/// Per-call knobs (thresholds, top-k, attempt numbers) travel in the
/// [`RetrievalRequest`] instead, so the orchestrator can relax them across
/// retry attempts without touching the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Over-fetch multiplier applied to `top_k` before filtering.
    pub over_fetch_factor: usize,
    /// Weight of the semantic (vector) score in hybrid fusion.
    pub semantic_weight: f32,
    /// Weight of the lexical (keyword) score in hybrid fusion.
    pub lexical_weight: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            over_fetch_factor: 3,
            semantic_weight: 0.7,
            lexical_weight: 0.3,
        }
    }
}

/// One retrieval call's parameters.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    /// The ticket text to search with.
    pub query_text: String,
    /// Keywords for the lexical path. Empty means "derive from the query".
    pub keywords: Vec<String>,
    /// Optional category restriction (matched against section paths).
    pub category: Option<String>,
    /// Number of results to return.
    pub top_k: usize,
    /// Minimum fused score for a result to be returned.
    pub score_threshold: f32,
    /// Mean-score floor for the `confident` signal.
    pub confidence_threshold: f32,
    /// Attempt ceiling (for the `attempts_exhausted` signal).
    pub max_attempts: u32,
    /// 1-indexed attempt number of this call.
    pub attempt: u32,
    /// Whether to fuse lexical keyword scoring with vector search.
    pub use_hybrid: bool,
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Timing and count metrics for a single retrieval run.
#[derive(Debug, Clone, Default)]
pub struct RetrievalMetrics {
    /// Microseconds spent obtaining the query embedding.
    pub embedding_us: u64,
    /// Whether the query embedding came from the cache.
    pub cache_hit: bool,
    /// Microseconds spent on vector search.
    pub search_us: u64,
    /// Microseconds spent on lexical scoring, fusion, and ranking.
    pub fusion_us: u64,
    /// Total pipeline duration in microseconds.
    pub total_us: u64,
    /// Candidates returned by the vector search (before filtering).
    pub candidates_considered: usize,
    /// Results returned to the caller.
    pub returned: usize,
}

/// Result of one retrieval call.
#[derive(Debug)]
pub struct RetrievalOutcome {
    /// Ranked results, all at or above the score threshold.
    pub results: Vec<ScoredChunk>,
    /// Confidence bundle for the caller's routing decision.
    pub signals: RetrievalSignals,
    /// Per-step metrics.
    pub metrics: RetrievalMetrics,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The retrieval engine chains embedding lookup, vector search, lexical
/// fusion, and signal computation.
///
/// Parameterized over the [`EmbeddingPipeline`] trait so tests can
/// substitute a deterministic stub for the real model.
pub struct RetrievalEngine {
    registry: Arc<BackendRegistry>,
    embedder: Arc<dyn EmbeddingPipeline>,
    cache: Arc<EmbeddingCache>,
    config: EngineConfig,
}

impl RetrievalEngine {
    /// Create a new engine over the given backends and embedder.
    pub fn new(
        registry: Arc<BackendRegistry>,
        embedder: Arc<dyn EmbeddingPipeline>,
        cache: Arc<EmbeddingCache>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            embedder,
            cache,
            config,
        }
    }

    /// Execute the retrieval pipeline for one request.
    ///
    /// Fails if the embedding model or the vector index is unreachable;
    /// the caller decides whether to retry. An index with no eligible
    /// candidates is not an error: the call succeeds with an empty result
    /// list and `confident = false`.
    pub fn retrieve(&self, req: &RetrievalRequest) -> Result<RetrievalOutcome> {
        let span = info_span!(
            "resolvd.retrieve",
            query_length = req.query_text.len(),
            top_k = req.top_k,
            attempt = req.attempt,
            results = tracing::field::Empty,
            duration_us = tracing::field::Empty,
        );
        let _guard = span.enter();

        let pipeline_start = Instant::now();
        let mut metrics = RetrievalMetrics::default();

        // ── Step 1: Query Embedding ─────────────────────────────────────
        let query_embedding = {
            let embed_span = info_span!(
                "resolvd.query_embed",
                cache_hit = tracing::field::Empty,
                duration_us = tracing::field::Empty,
            );
            let _embed_guard = embed_span.enter();

            let embed_start = Instant::now();
            let (embedding, cache_hit) = self
                .cache
                .get_or_compute(self.embedder.as_ref(), &req.query_text)
                .context("Failed to embed query")?;
            metrics.embedding_us = embed_start.elapsed().as_micros() as u64;
            metrics.cache_hit = cache_hit;
            embed_span.record("cache_hit", cache_hit);
            embed_span.record("duration_us", metrics.embedding_us);
            debug!(
                "Query embedding: {}us (cache {})",
                metrics.embedding_us,
                if cache_hit { "hit" } else { "miss" }
            );
            embedding
        };

        // ── Step 2: Vector Search ───────────────────────────────────────
        let candidates = {
            let vs_span = info_span!(
                "resolvd.vector_search",
                over_fetch = self.config.over_fetch_factor,
                results = tracing::field::Empty,
                duration_us = tracing::field::Empty,
            );
            let _vs_guard = vs_span.enter();

            let vs_start = Instant::now();
            let fetch_n = req.top_k.saturating_mul(self.config.over_fetch_factor.max(1));
            let raw = self
                .registry
                .vector()
                .search(&query_embedding, fetch_n, req.category.as_deref())
                .context("Vector search failed")?;
            metrics.search_us = vs_start.elapsed().as_micros() as u64;
            metrics.candidates_considered = raw.len();
            vs_span.record("results", raw.len() as u64);
            vs_span.record("duration_us", metrics.search_us);
            debug!(
                "Vector search: {} candidates in {}us",
                raw.len(),
                metrics.search_us
            );
            raw
        };

        // ── Step 3: Lexical Fusion + Ranking ────────────────────────────
        let fusion_start = Instant::now();
        let terms = if req.use_hybrid {
            if req.keywords.is_empty() {
                query_terms(&req.query_text)
            } else {
                req.keywords
                    .iter()
                    .map(|k| k.to_lowercase())
                    .collect()
            }
        } else {
            Vec::new()
        };

        let mut scored: Vec<ScoredChunk> = Vec::with_capacity(candidates.len());
        for (id, semantic_score) in candidates {
            let chunk = match self.registry.chunks().get_chunk(id) {
                Ok(Some(chunk)) => chunk,
                Ok(None) => {
                    warn!(chunk_id = id, "Vector index returned an unknown chunk id");
                    continue;
                }
                Err(e) => return Err(e).context("Chunk lookup failed"),
            };

            let (fused_score, lexical_score, provenance) = if req.use_hybrid && !terms.is_empty() {
                let lexical = lexical_overlap(&chunk.text, &terms);
                let fused = self.config.semantic_weight * semantic_score
                    + self.config.lexical_weight * lexical;
                let provenance = if lexical == 0.0 {
                    Provenance::Semantic
                } else if semantic_score == 0.0 {
                    Provenance::Lexical
                } else {
                    Provenance::Hybrid
                };
                (fused, lexical, provenance)
            } else {
                (semantic_score, 0.0, Provenance::Semantic)
            };

            // ── Step 4: Threshold Filter ────────────────────────────────
            if fused_score < req.score_threshold {
                continue;
            }

            scored.push(ScoredChunk {
                chunk,
                fused_score,
                semantic_score,
                lexical_score,
                rank: 0,
                provenance,
            });
        }

        // ── Step 5: Ranking ─────────────────────────────────────────────
        // Fused score descending; ties broken by section proximity to the
        // category hint, then chunk recency, then ascending chunk id so
        // identical inputs always rank identically.
        scored.sort_by(|a, b| {
            b.fused_score
                .partial_cmp(&a.fused_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let a_cat = req
                        .category
                        .as_deref()
                        .map(|c| a.chunk.in_category(c))
                        .unwrap_or(false);
                    let b_cat = req
                        .category
                        .as_deref()
                        .map(|c| b.chunk.in_category(c))
                        .unwrap_or(false);
                    b_cat.cmp(&a_cat)
                })
                .then_with(|| b.chunk.ingested_at.cmp(&a.chunk.ingested_at))
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        scored.truncate(req.top_k);
        for (rank, result) in scored.iter_mut().enumerate() {
            result.rank = rank;
        }
        metrics.fusion_us = fusion_start.elapsed().as_micros() as u64;
        metrics.returned = scored.len();

        // ── Step 6: Signals ─────────────────────────────────────────────
        metrics.total_us = pipeline_start.elapsed().as_micros() as u64;
        let latency_ms = metrics.total_us / 1000;
        let scores: Vec<f32> = scored.iter().map(|r| r.fused_score).collect();
        let signals = RetrievalSignals::from_scores(
            &scores,
            req.attempt,
            req.max_attempts,
            req.confidence_threshold,
            latency_ms,
        );

        span.record("results", scored.len() as u64);
        span.record("duration_us", metrics.total_us);
        debug!(
            "Retrieval: {} results, mean {:.3}, confident={} in {}us",
            scored.len(),
            signals.mean_similarity,
            signals.confident,
            metrics.total_us
        );

        Ok(RetrievalOutcome {
            results: scored,
            signals,
            metrics,
        })
    }
}

// ---------------------------------------------------------------------------
// Lexical scoring
// ---------------------------------------------------------------------------

/// Significant lowercase terms of a query: alphanumeric tokens of at least
/// three characters, deduplicated in order.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut terms = Vec::new();
    for token in query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
    {
        let term = token.to_lowercase();
        if seen.insert(term.clone()) {
            terms.push(term);
        }
    }
    terms
}

/// Fraction of `terms` present as whole tokens in `text`, in `[0, 1]`.
fn lexical_overlap(text: &str, terms: &[String]) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }
    let tokens: HashSet<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect();
    let matched = terms.iter().filter(|t| tokens.contains(*t)).count();
    matched as f32 / terms.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_terms_dedupe_and_drop_short_tokens() {
        let terms = query_terms("VPN is down, VPN error E-42 again");
        assert_eq!(terms, vec!["vpn", "down", "error", "again"]);
    }

    #[test]
    fn lexical_overlap_is_a_fraction() {
        let terms = vec!["refund".to_string(), "invoice".to_string()];
        assert_eq!(lexical_overlap("Refund requests take two days.", &terms), 0.5);
        assert_eq!(lexical_overlap("Nothing relevant here.", &terms), 0.0);
        assert_eq!(
            lexical_overlap("Invoice refund processed.", &terms),
            1.0
        );
    }

    #[test]
    fn lexical_overlap_matches_whole_tokens_only() {
        let terms = vec!["ref".to_string()];
        assert_eq!(lexical_overlap("refund", &terms), 0.0);
    }

    // ---- Tracing span tests ----

    use std::sync::Mutex;

    use resolvd_core::{Chunk, SourceLocation};

    struct MockEmbedder;

    impl EmbeddingPipeline for MockEmbedder {
        fn embed_text(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(vec![1.0, 0.0, 0.0, 0.0])
        }
    }

    fn populated_engine() -> RetrievalEngine {
        let registry = Arc::new(memvec_impl::create_registry(4));
        let chunks: Vec<Chunk> = (0..3)
            .map(|i| Chunk {
                id: i + 1,
                document_id: "kb".into(),
                text: format!("answer number {i}"),
                section_path: vec!["root".into()],
                seq: i as usize,
                location: SourceLocation::default(),
                embedding: vec![1.0, 0.0, 0.0, 0.0],
                ingested_at: 0,
            })
            .collect();
        let items: Vec<(u64, Vec<f32>)> =
            chunks.iter().map(|c| (c.id, c.embedding.clone())).collect();
        registry.chunks().upsert_chunks(&chunks).unwrap();
        registry.vector().upsert_embeddings(&items).unwrap();
        RetrievalEngine::new(
            registry,
            Arc::new(MockEmbedder),
            Arc::new(EmbeddingCache::new(16, None)),
            EngineConfig::default(),
        )
    }

    fn sample_request() -> RetrievalRequest {
        RetrievalRequest {
            query_text: "where is the answer".into(),
            keywords: Vec::new(),
            category: None,
            top_k: 3,
            score_threshold: 0.4,
            confidence_threshold: 0.7,
            max_attempts: 3,
            attempt: 1,
            use_hybrid: false,
        }
    }

    /// A tracing layer that records span names when they are created.
    struct SpanRecorderLayer {
        names: Arc<Mutex<Vec<String>>>,
    }

    impl<
            S: tracing::Subscriber + for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
        > tracing_subscriber::Layer<S> for SpanRecorderLayer
    {
        fn on_new_span(
            &self,
            attrs: &tracing::span::Attributes<'_>,
            _id: &tracing::span::Id,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            let mut names = self.names.lock().unwrap();
            names.push(attrs.metadata().name().to_string());
        }
    }

    /// The pipeline must behave identically with or without an active
    /// tracing subscriber.
    #[test]
    fn retrieve_with_tracing_spans_does_not_panic() {
        let engine = populated_engine();
        let outcome = engine.retrieve(&sample_request()).unwrap();
        assert_eq!(outcome.results.len(), 3);
        assert!(outcome.metrics.total_us > 0);
        assert_eq!(outcome.metrics.returned, 3);
    }

    /// Verify the expected spans are created during retrieval. Must run in
    /// isolation (RUST_TEST_THREADS=1): the tracing callsite cache is
    /// global and can be poisoned by concurrent tests that call retrieve()
    /// without a subscriber, causing info_span! to return disabled spans.
    /// See: https://github.com/tokio-rs/tracing/issues/2874
    #[test]
    #[ignore] // Run with: RUST_TEST_THREADS=1 cargo test -- --ignored retrieve_emits_pipeline_spans
    fn retrieve_emits_pipeline_spans() {
        let span_names: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let names_clone = span_names.clone();

        let layer = SpanRecorderLayer {
            names: names_clone.clone(),
        };
        let subscriber = tracing_subscriber::layer::SubscriberExt::with(
            tracing_subscriber::registry::Registry::default(),
            layer,
        );

        tracing::subscriber::with_default(subscriber, || {
            tracing::callsite::rebuild_interest_cache();

            let engine = populated_engine();
            let outcome = engine.retrieve(&sample_request()).unwrap();
            assert!(!outcome.results.is_empty());

            let names = names_clone.lock().unwrap();
            for expected in [
                "resolvd.retrieve",
                "resolvd.query_embed",
                "resolvd.vector_search",
            ] {
                assert!(
                    names.contains(&expected.to_string()),
                    "Missing {expected}. Got: {:?}",
                    *names
                );
            }
        });
    }
}
