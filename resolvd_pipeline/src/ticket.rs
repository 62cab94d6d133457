//! Ticket and per-ticket processing state.

use resolvd_core::{RetrievalSignals, TerminalOutcome, TicketId};

use crate::stages::TicketStage;

/// An incoming support ticket.
#[derive(Debug, Clone)]
pub struct Ticket {
    pub id: TicketId,
    pub subject: String,
    pub description: String,
}

impl Ticket {
    /// Subject and description joined, as used for retrieval and triage.
    pub fn full_text(&self) -> String {
        format!("{} {}", self.subject, self.description)
    }
}

/// The orchestrator's working record for one ticket.
///
/// Exclusively owned by the ticket's orchestration run; the signal history
/// is read-only to everything else. Once a terminal outcome other than
/// [`TerminalOutcome::AutoResolved`] is recorded the state is immutable —
/// late writes are discarded, not applied. `AutoResolved` may still be
/// superseded by customer feedback (to `Closed` or `Escalated`), which is
/// how a dissatisfied customer reopens the loop.
#[derive(Debug, Clone)]
pub struct TicketState {
    /// The ticket this state belongs to.
    pub ticket_id: TicketId,
    /// Current pipeline stage.
    pub stage: TicketStage,
    /// Retrieval attempts consumed across the ticket lifetime.
    pub attempts: u32,
    /// Signal bundles of every retrieval attempt, in order.
    pub signal_history: Vec<RetrievalSignals>,
    /// Urgency score from the scoring stage, in [0, 1].
    pub urgency: f32,
    /// Keywords from the analysis stage.
    pub keywords: Vec<String>,
    /// Category from the classification stage.
    pub category: Option<String>,
    /// Best-effort draft from the evaluation path, kept for delivery and
    /// escalation context.
    pub draft: Option<String>,
    /// Whether the ticket was handed to the human queue.
    pub escalated: bool,
    /// Terminal outcome, once reached.
    pub outcome: Option<TerminalOutcome>,
    /// Failure reason attached for the human agent on escalation.
    pub failure_reason: Option<String>,
}

impl TicketState {
    /// Fresh state at ticket intake.
    pub fn new(ticket_id: TicketId) -> Self {
        Self {
            ticket_id,
            stage: TicketStage::Intake,
            attempts: 0,
            signal_history: Vec::new(),
            urgency: 0.0,
            keywords: Vec::new(),
            category: None,
            draft: None,
            escalated: false,
            outcome: None,
            failure_reason: None,
        }
    }

    /// Whether automated processing is finished for good.
    ///
    /// `AutoResolved` is excluded: customer feedback can still supersede it.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.outcome,
            Some(TerminalOutcome::Escalated)
                | Some(TerminalOutcome::Closed)
                | Some(TerminalOutcome::ClosedUnsatisfied)
        )
    }

    /// Append a signal bundle. Refused (returning false) once the state is
    /// terminal, so an in-flight retrieval finishing after an external
    /// close cannot mutate history.
    pub fn record_signals(&mut self, signals: RetrievalSignals) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.signal_history.push(signals);
        true
    }

    /// The latest signal bundle, if any attempt has run.
    pub fn last_signals(&self) -> Option<&RetrievalSignals> {
        self.signal_history.last()
    }

    /// Whether the lifetime retrieval budget has attempts left.
    pub fn budget_remaining(&self, max_attempts: u32) -> bool {
        self.attempts < max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_state_rejects_signal_writes() {
        let mut state = TicketState::new("t-1".into());
        state.outcome = Some(TerminalOutcome::Escalated);
        let accepted = state.record_signals(RetrievalSignals::zero_confidence(1, 3, 0));
        assert!(!accepted);
        assert!(state.signal_history.is_empty());
    }

    #[test]
    fn auto_resolved_is_not_terminal_for_feedback() {
        let mut state = TicketState::new("t-1".into());
        state.outcome = Some(TerminalOutcome::AutoResolved);
        assert!(!state.is_terminal());
        assert!(state.record_signals(RetrievalSignals::zero_confidence(1, 3, 0)));
    }

    #[test]
    fn budget_tracks_attempt_count() {
        let mut state = TicketState::new("t-1".into());
        assert!(state.budget_remaining(3));
        state.attempts = 3;
        assert!(!state.budget_remaining(3));
    }
}
