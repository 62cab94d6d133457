//! Trait seams to the external collaborators of the ticket pipeline.
//!
//! The orchestrator never talks to a model, a mail system, or a human
//! queue directly — it goes through these traits. In production they are
//! backed by network services; in tests by deterministic mocks.

use async_trait::async_trait;

use resolvd_core::{Judgment, ScoredChunk, TicketId};

/// Text-generation collaborator: drafts an answer from retrieved evidence.
///
/// Only invoked after retrieval completes; the core never generates free
/// text itself.
#[async_trait]
pub trait AnswerComposer: Send + Sync {
    /// Compose a draft answer for `ticket_text` grounded in the evidence
    /// chunks.
    async fn compose_answer(
        &self,
        evidence: &[ScoredChunk],
        ticket_text: &str,
    ) -> anyhow::Result<String>;
}

/// Evaluation collaborator: judges whether a draft is good enough to send.
#[async_trait]
pub trait AnswerJudge: Send + Sync {
    /// Judge the draft against the ticket text.
    async fn judge(&self, draft: &str, ticket_text: &str) -> anyhow::Result<Judgment>;
}

/// Human hand-off queue.
#[async_trait]
pub trait EscalationQueue: Send + Sync {
    /// Hand a ticket to a human agent, with the failure reason and the
    /// best-effort draft (if any) attached for context.
    async fn escalate(
        &self,
        ticket_id: &TicketId,
        reason: &str,
        best_effort_draft: Option<&str>,
    ) -> anyhow::Result<()>;
}

/// Outbound answer delivery to the customer.
#[async_trait]
pub trait ResolutionDelivery: Send + Sync {
    /// Send an answer. `awaits_feedback` distinguishes a best-effort
    /// answer (customer satisfaction requested) from a confident
    /// auto-resolution.
    async fn send_resolution(
        &self,
        ticket_id: &TicketId,
        text: &str,
        awaits_feedback: bool,
    ) -> anyhow::Result<()>;
}
