//! The ticket processor: drives one ticket through the pipeline stages.
//!
//! Each ticket's run is strictly sequential; many runs execute
//! concurrently as independent tasks. Retrieval executes on the blocking
//! pool under a latency budget — exceeding the budget is indistinguishable
//! from a retrieval failure and consumes an attempt, so neither slow nor
//! failing infrastructure can loop a ticket forever. Any unrecoverable
//! failure lands the ticket in the escalation queue with the reason
//! attached: a ticket never disappears.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, error, info, warn};

use resolvd_config::ResolvdConfig;
use resolvd_core::{RetrievalSignals, Satisfaction, ScoredChunk, TerminalOutcome};
use resolvd_retrieval::{RetrievalEngine, RetrievalOutcome, RetrievalRequest};

use crate::collaborators::{AnswerComposer, AnswerJudge, EscalationQueue, ResolutionDelivery};
use crate::prep::{classify, extract_keywords, score_urgency, TriageConfig};
use crate::stages::{next_stage, TicketStage, TransitionContext};
use crate::ticket::{Ticket, TicketState};

/// Shared withdrawal flag for a ticket.
///
/// Set when the customer withdraws the ticket mid-processing; the
/// processor checks it after every suspension point and discards in-flight
/// retrieval results instead of recording them.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the ticket as withdrawn.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Processor configuration, fixed at construction.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Results requested per retrieval call.
    pub top_k: usize,
    /// Base score threshold (attempt 1); later attempts relax it.
    pub score_threshold: f32,
    /// Confidence threshold for auto-resolution.
    pub confidence_threshold: f32,
    /// Ticket-lifetime retrieval attempt ceiling.
    pub max_attempts: u32,
    /// Whether retrieval fuses lexical keyword scoring.
    pub use_hybrid: bool,
    /// Multiplicative threshold relaxation per attempt, in (0, 1).
    pub relaxation_factor: f32,
    /// Latency budget per retrieval call.
    pub latency_budget: Duration,
    /// Triage heuristics.
    pub triage: TriageConfig,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self::from_config(&ResolvdConfig::default())
    }
}

impl ProcessorConfig {
    /// Derive the processor configuration from the application config.
    pub fn from_config(config: &ResolvdConfig) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            score_threshold: config.retrieval.score_threshold,
            confidence_threshold: config.retrieval.confidence_threshold,
            max_attempts: config.retrieval.max_attempts,
            use_hybrid: config.retrieval.use_hybrid,
            relaxation_factor: config.pipeline.relaxation_factor,
            latency_budget: Duration::from_millis(config.pipeline.latency_budget_ms),
            triage: TriageConfig::from(&config.pipeline),
        }
    }
}

/// Score threshold for the given 1-indexed attempt: monotone multiplicative
/// relaxation of the base threshold.
fn relaxed_threshold(base: f32, factor: f32, attempt: u32) -> f32 {
    base * factor.powi(attempt.saturating_sub(1) as i32)
}

/// How the solution-finding loop ended.
enum SolutionExit {
    /// Confident result set; go straight to auto-resolution.
    Confident(Vec<ScoredChunk>),
    /// Budget spent; best-effort results (possibly empty) go to evaluation.
    Exhausted(Vec<ScoredChunk>),
    /// Ticket withdrawn mid-retrieval; the in-flight result was discarded.
    Cancelled,
}

/// Drives tickets through the pipeline.
///
/// One processor serves many tickets concurrently; per-ticket state is
/// exclusively owned by each `process_ticket`/`handle_feedback` call, so no
/// cross-ticket locking exists.
pub struct TicketProcessor {
    engine: Arc<RetrievalEngine>,
    composer: Arc<dyn AnswerComposer>,
    judge: Arc<dyn AnswerJudge>,
    escalation: Arc<dyn EscalationQueue>,
    delivery: Arc<dyn ResolutionDelivery>,
    config: ProcessorConfig,
}

impl TicketProcessor {
    pub fn new(
        engine: Arc<RetrievalEngine>,
        composer: Arc<dyn AnswerComposer>,
        judge: Arc<dyn AnswerJudge>,
        escalation: Arc<dyn EscalationQueue>,
        delivery: Arc<dyn ResolutionDelivery>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            engine,
            composer,
            judge,
            escalation,
            delivery,
            config,
        }
    }

    /// Process a new ticket from intake to a parked or terminal stage.
    ///
    /// Returns the final processing state: `outcome` is set for terminal
    /// dispositions, and a state parked in `RequestFeedback` (or
    /// `AutoResolve`) awaits [`handle_feedback`](Self::handle_feedback).
    pub async fn process_ticket(&self, ticket: &Ticket, cancel: &CancelFlag) -> Result<TicketState> {
        let start = Instant::now();

        let mut state = TicketState::new(ticket.id.clone());
        let advance = TransitionContext::default();

        // ── Triage ──────────────────────────────────────────────────────
        state.stage = next_stage(state.stage, &advance);
        state.urgency = score_urgency(ticket, &self.config.triage);

        state.stage = next_stage(state.stage, &advance);
        state.keywords = extract_keywords(ticket, &self.config.triage);

        state.stage = next_stage(state.stage, &advance);
        state.category = classify(&state.keywords, &self.config.triage);

        state.stage = next_stage(state.stage, &advance);
        debug!(
            ticket_id = %ticket.id,
            urgency = state.urgency,
            category = state.category.as_deref().unwrap_or("-"),
            keywords = state.keywords.len(),
            "Triage complete"
        );

        // ── Solution finding and delivery ───────────────────────────────
        state.stage = next_stage(state.stage, &advance);
        self.run_solution_phase(&mut state, ticket, cancel).await;

        info!(
            ticket_id = %ticket.id,
            stage = %state.stage,
            outcome = ?state.outcome,
            attempts = state.attempts,
            duration_us = start.elapsed().as_micros() as u64,
            "Ticket processing run finished"
        );
        Ok(state)
    }

    /// Re-enter the pipeline when customer feedback arrives on a delivered
    /// answer.
    ///
    /// A state that already reached a terminal outcome is left untouched.
    pub async fn handle_feedback(
        &self,
        state: &mut TicketState,
        ticket: &Ticket,
        satisfaction: Satisfaction,
        cancel: &CancelFlag,
    ) -> Result<()> {
        if state.is_terminal() {
            debug!(ticket_id = %state.ticket_id, "Feedback on terminal ticket ignored");
            return Ok(());
        }
        if !matches!(
            state.stage,
            TicketStage::AutoResolve | TicketStage::RequestFeedback
        ) {
            warn!(
                ticket_id = %state.ticket_id,
                stage = %state.stage,
                "Feedback arrived for a ticket with no delivered answer; ignoring"
            );
            return Ok(());
        }

        let ctx = TransitionContext {
            feedback: Some(satisfaction),
            budget_remaining: state.budget_remaining(self.config.max_attempts),
            ..Default::default()
        };
        match next_stage(state.stage, &ctx) {
            TicketStage::Closed => {
                state.stage = TicketStage::Closed;
                state.outcome = Some(TerminalOutcome::Closed);
                info!(ticket_id = %state.ticket_id, "Customer satisfied, ticket closed");
            }
            TicketStage::Escalate => {
                self.escalate(
                    state,
                    "customer dissatisfied and the retry budget is exhausted",
                )
                .await;
            }
            TicketStage::SolutionFinding => {
                info!(
                    ticket_id = %state.ticket_id,
                    attempts = state.attempts,
                    "Customer dissatisfied, re-entering solution finding"
                );
                // A dissatisfied customer supersedes an earlier
                // auto-resolution.
                state.outcome = None;
                state.stage = TicketStage::SolutionFinding;
                self.run_solution_phase(state, ticket, cancel).await;
            }
            other => {
                warn!(stage = %other, "Unexpected feedback transition; ignoring");
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Solution finding
    // -----------------------------------------------------------------

    /// Run the bounded retrieval loop, then the matching delivery or
    /// evaluation path. Entered from `Planning` and from feedback-triggered
    /// retries.
    async fn run_solution_phase(
        &self,
        state: &mut TicketState,
        ticket: &Ticket,
        cancel: &CancelFlag,
    ) {
        match self.solution_finding(state, ticket, cancel).await {
            SolutionExit::Cancelled => {
                state.stage = TicketStage::Closed;
                state.outcome = Some(TerminalOutcome::ClosedUnsatisfied);
                state.failure_reason = Some("ticket withdrawn during processing".into());
                info!(ticket_id = %state.ticket_id, "Ticket withdrawn, result discarded");
            }
            SolutionExit::Confident(evidence) => {
                state.stage = TicketStage::AutoResolve;
                self.auto_resolve(state, ticket, &evidence).await;
            }
            SolutionExit::Exhausted(best_effort) => {
                state.stage = TicketStage::Evaluation;
                self.evaluate_best_effort(state, ticket, &best_effort).await;
            }
        }
    }

    /// The bounded retry loop around the retrieval engine.
    ///
    /// Every attempt — successful, failed, or timed out — consumes budget
    /// and appends its signal bundle to the ticket history.
    async fn solution_finding(
        &self,
        state: &mut TicketState,
        ticket: &Ticket,
        cancel: &CancelFlag,
    ) -> SolutionExit {
        let mut best: Vec<ScoredChunk> = Vec::new();
        let mut best_mean = f32::MIN;

        loop {
            let attempt = state.attempts + 1;
            if attempt > self.config.max_attempts {
                // Policy ceiling: force evaluation instead of erroring.
                return SolutionExit::Exhausted(best);
            }
            state.attempts = attempt;

            let request = self.build_request(state, ticket, attempt);
            let started = Instant::now();
            let result = self.run_retrieval(request).await;

            if cancel.is_cancelled() {
                return SolutionExit::Cancelled;
            }

            let signals = match result {
                Ok(outcome) => {
                    if outcome.signals.mean_similarity > best_mean {
                        best_mean = outcome.signals.mean_similarity;
                        best = outcome.results;
                    }
                    outcome.signals
                }
                Err(e) => {
                    warn!(
                        ticket_id = %state.ticket_id,
                        attempt,
                        "Retrieval attempt failed: {e:#}"
                    );
                    state.failure_reason = Some(format!("retrieval attempt {attempt}: {e:#}"));
                    RetrievalSignals::zero_confidence(
                        attempt,
                        self.config.max_attempts,
                        started.elapsed().as_millis() as u64,
                    )
                }
            };

            let accepted = state.record_signals(signals.clone());
            if !accepted {
                // Terminal outcome recorded externally while we were away.
                return SolutionExit::Cancelled;
            }

            let ctx = TransitionContext {
                signals: Some(&signals),
                ..Default::default()
            };
            match next_stage(TicketStage::SolutionFinding, &ctx) {
                TicketStage::AutoResolve => return SolutionExit::Confident(best),
                TicketStage::Evaluation => return SolutionExit::Exhausted(best),
                _ => {
                    debug!(
                        ticket_id = %state.ticket_id,
                        attempt,
                        mean = signals.mean_similarity,
                        fallback = ?signals.fallback,
                        "Not confident, retrying with relaxed parameters"
                    );
                }
            }
        }
    }

    /// Build the retrieval request for the given attempt, applying the
    /// relaxation policy: a multiplicatively lowered threshold per attempt,
    /// and no category restriction on the final attempt.
    fn build_request(&self, state: &TicketState, ticket: &Ticket, attempt: u32) -> RetrievalRequest {
        let final_attempt = self.config.max_attempts > 1 && attempt >= self.config.max_attempts;
        RetrievalRequest {
            query_text: ticket.full_text(),
            keywords: state.keywords.clone(),
            category: if final_attempt {
                None
            } else {
                state.category.clone()
            },
            top_k: self.config.top_k,
            score_threshold: relaxed_threshold(
                self.config.score_threshold,
                self.config.relaxation_factor,
                attempt,
            ),
            confidence_threshold: self.config.confidence_threshold,
            max_attempts: self.config.max_attempts,
            attempt,
            use_hybrid: self.config.use_hybrid,
        }
    }

    /// Run one retrieval call on the blocking pool under the latency
    /// budget. A timeout is reported as an error, indistinguishable from a
    /// retrieval failure.
    async fn run_retrieval(&self, request: RetrievalRequest) -> Result<RetrievalOutcome> {
        let engine = self.engine.clone();
        let handle = tokio::task::spawn_blocking(move || engine.retrieve(&request));
        match tokio::time::timeout(self.config.latency_budget, handle).await {
            Err(_) => anyhow::bail!(
                "retrieval exceeded the latency budget of {:?}",
                self.config.latency_budget
            ),
            Ok(Err(join_err)) => anyhow::bail!("retrieval task failed: {join_err}"),
            Ok(Ok(result)) => result,
        }
    }

    // -----------------------------------------------------------------
    // Delivery paths
    // -----------------------------------------------------------------

    /// Compose and send a confident answer. A composer or delivery failure
    /// downgrades the ticket to escalation instead of leaving it stuck.
    async fn auto_resolve(&self, state: &mut TicketState, ticket: &Ticket, evidence: &[ScoredChunk]) {
        let draft = match self
            .composer
            .compose_answer(evidence, &ticket.full_text())
            .await
        {
            Ok(draft) => draft,
            Err(e) => {
                self.escalate(state, &format!("answer composition failed: {e:#}"))
                    .await;
                return;
            }
        };

        if let Err(e) = self
            .delivery
            .send_resolution(&state.ticket_id, &draft, false)
            .await
        {
            self.escalate(state, &format!("resolution delivery failed: {e:#}"))
                .await;
            return;
        }

        state.draft = Some(draft);
        state.outcome = Some(TerminalOutcome::AutoResolved);
        info!(
            ticket_id = %state.ticket_id,
            attempts = state.attempts,
            "Auto-resolved"
        );
    }

    /// Judge the best-effort draft and either request customer feedback or
    /// escalate.
    async fn evaluate_best_effort(
        &self,
        state: &mut TicketState,
        ticket: &Ticket,
        evidence: &[ScoredChunk],
    ) {
        let draft = match self
            .composer
            .compose_answer(evidence, &ticket.full_text())
            .await
        {
            Ok(draft) => draft,
            Err(e) => {
                self.escalate(state, &format!("answer composition failed: {e:#}"))
                    .await;
                return;
            }
        };

        let judgment = match self.judge.judge(&draft, &ticket.full_text()).await {
            Ok(judgment) => judgment,
            Err(e) => {
                warn!(
                    ticket_id = %state.ticket_id,
                    "Evaluation service failed, defaulting to escalation: {e:#}"
                );
                resolvd_core::Judgment::escalate_by_default()
            }
        };

        let ctx = TransitionContext {
            judgment: Some(judgment),
            ..Default::default()
        };
        match next_stage(TicketStage::Evaluation, &ctx) {
            TicketStage::RequestFeedback => {
                if let Err(e) = self
                    .delivery
                    .send_resolution(&state.ticket_id, &draft, true)
                    .await
                {
                    self.escalate(state, &format!("resolution delivery failed: {e:#}"))
                        .await;
                    return;
                }
                state.draft = Some(draft);
                state.stage = TicketStage::RequestFeedback;
                info!(
                    ticket_id = %state.ticket_id,
                    "Best-effort answer sent, awaiting customer feedback"
                );
            }
            _ => {
                state.draft = Some(draft);
                let mean = state
                    .last_signals()
                    .map(|s| s.mean_similarity)
                    .unwrap_or(0.0);
                self.escalate(
                    state,
                    &format!(
                        "low retrieval confidence after {} attempts (mean similarity {:.2})",
                        state.attempts, mean
                    ),
                )
                .await;
            }
        }
    }

    /// Record the escalation outcome and hand the ticket to the human
    /// queue. A failing queue is logged, not propagated — the ticket is
    /// marked escalated either way so it cannot be lost.
    async fn escalate(&self, state: &mut TicketState, reason: &str) {
        state.stage = TicketStage::Escalate;
        state.escalated = true;
        state.outcome = Some(TerminalOutcome::Escalated);
        state.failure_reason = Some(reason.to_string());

        if let Err(e) = self
            .escalation
            .escalate(&state.ticket_id, reason, state.draft.as_deref())
            .await
        {
            error!(
                ticket_id = %state.ticket_id,
                "Escalation hand-off failed (ticket remains marked escalated): {e:#}"
            );
        }
        info!(ticket_id = %state.ticket_id, reason, "Escalated to human queue");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relaxation_is_monotone_decreasing() {
        let base = 0.40;
        let factor = 0.75;
        let t1 = relaxed_threshold(base, factor, 1);
        let t2 = relaxed_threshold(base, factor, 2);
        let t3 = relaxed_threshold(base, factor, 3);
        assert_eq!(t1, base);
        assert!(t2 < t1);
        assert!(t3 < t2);
        assert!(t3 > 0.0);
    }

    #[test]
    fn processor_config_maps_from_app_config() {
        let mut config = ResolvdConfig::default();
        config.retrieval.top_k = 7;
        config.pipeline.latency_budget_ms = 250;
        let pc = ProcessorConfig::from_config(&config);
        assert_eq!(pc.top_k, 7);
        assert_eq!(pc.latency_budget, Duration::from_millis(250));
        assert_eq!(pc.max_attempts, 3);
    }
}
