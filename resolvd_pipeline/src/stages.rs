//! Ticket pipeline stages and the transition function.
//!
//! The pipeline is an explicit tagged-state machine: every routing decision
//! goes through [`next_stage`], a pure function over the current stage, the
//! latest retrieval signals, the evaluator's judgment, and any customer
//! feedback. Keeping the decision table in one function makes the
//! retry/escalation guarantee checkable in one place: every non-terminal
//! stage has a path to [`TicketStage::Escalate`], and the only loop is the
//! attempt-bounded `SolutionFinding` retry.

use serde::{Deserialize, Serialize};

use resolvd_core::{Judgment, RetrievalSignals, Satisfaction};

/// Stages of the ticket pipeline.
///
/// Transitions are monotonic along the declaration order, except for the
/// bounded retry loop on `SolutionFinding` (re-entered from itself and,
/// after dissatisfied feedback with budget left, from the delivery stages).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TicketStage {
    /// Ticket accepted, state created.
    Intake,
    /// Urgency scoring from subject/description heuristics.
    Scoring,
    /// Keyword extraction.
    Analysis,
    /// Category detection.
    Classification,
    /// Retrieval request construction.
    Planning,
    /// Knowledge-base retrieval (the bounded retry loop).
    SolutionFinding,
    /// External quality judgment of the best-effort draft.
    Evaluation,
    /// Confident answer sent, no feedback wait.
    AutoResolve,
    /// Best-effort answer sent, awaiting customer satisfaction signal.
    RequestFeedback,
    /// Handed off to the human queue.
    Escalate,
    /// Customer confirmed, or ticket withdrawn.
    Closed,
}

impl std::fmt::Display for TicketStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Intake => "intake",
            Self::Scoring => "scoring",
            Self::Analysis => "analysis",
            Self::Classification => "classification",
            Self::Planning => "planning",
            Self::SolutionFinding => "solution_finding",
            Self::Evaluation => "evaluation",
            Self::AutoResolve => "auto_resolve",
            Self::RequestFeedback => "request_feedback",
            Self::Escalate => "escalate",
            Self::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

/// Inputs to one transition decision.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionContext<'a> {
    /// Signal bundle of the latest retrieval attempt.
    pub signals: Option<&'a RetrievalSignals>,
    /// The evaluator's verdict on the best-effort draft.
    pub judgment: Option<Judgment>,
    /// Customer feedback on a delivered answer.
    pub feedback: Option<Satisfaction>,
    /// Whether the ticket-lifetime retrieval budget has attempts left.
    pub budget_remaining: bool,
}

/// The single transition function of the ticket state machine.
///
/// Stages whose required context is absent stay put; the processor always
/// supplies the context its current stage needs.
pub fn next_stage(stage: TicketStage, ctx: &TransitionContext<'_>) -> TicketStage {
    match stage {
        // Triage stages advance unconditionally.
        TicketStage::Intake => TicketStage::Scoring,
        TicketStage::Scoring => TicketStage::Analysis,
        TicketStage::Analysis => TicketStage::Classification,
        TicketStage::Classification => TicketStage::Planning,
        TicketStage::Planning => TicketStage::SolutionFinding,

        TicketStage::SolutionFinding => match ctx.signals {
            Some(signals) if signals.confident => TicketStage::AutoResolve,
            Some(signals) if !signals.attempts_exhausted => TicketStage::SolutionFinding,
            Some(_) => TicketStage::Evaluation,
            None => TicketStage::SolutionFinding,
        },

        TicketStage::Evaluation => match ctx.judgment {
            Some(judgment) if judgment.escalate => TicketStage::Escalate,
            Some(judgment) if judgment.acceptable => TicketStage::RequestFeedback,
            // Not acceptable and not explicitly escalated: a human still
            // has to look at it.
            Some(_) => TicketStage::Escalate,
            None => TicketStage::Evaluation,
        },

        // Feedback can arrive after either delivery stage.
        TicketStage::AutoResolve | TicketStage::RequestFeedback => match ctx.feedback {
            Some(Satisfaction::Satisfied) => TicketStage::Closed,
            Some(Satisfaction::Dissatisfied) if ctx.budget_remaining => {
                TicketStage::SolutionFinding
            }
            Some(Satisfaction::Dissatisfied) => TicketStage::Escalate,
            None => stage,
        },

        // Terminal stages.
        TicketStage::Escalate => TicketStage::Escalate,
        TicketStage::Closed => TicketStage::Closed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resolvd_core::RetrievalSignals;

    fn signals(confident: bool, exhausted: bool) -> RetrievalSignals {
        let (scores, threshold): (Vec<f32>, f32) = if confident {
            (vec![0.9], 0.5)
        } else {
            (vec![0.2], 0.9)
        };
        let attempt = if exhausted { 3 } else { 1 };
        RetrievalSignals::from_scores(&scores, attempt, 3, threshold, 1)
    }

    fn ctx_signals(s: &RetrievalSignals) -> TransitionContext<'_> {
        TransitionContext {
            signals: Some(s),
            ..Default::default()
        }
    }

    #[test]
    fn triage_stages_advance_in_order() {
        let ctx = TransitionContext::default();
        assert_eq!(next_stage(TicketStage::Intake, &ctx), TicketStage::Scoring);
        assert_eq!(next_stage(TicketStage::Scoring, &ctx), TicketStage::Analysis);
        assert_eq!(
            next_stage(TicketStage::Analysis, &ctx),
            TicketStage::Classification
        );
        assert_eq!(
            next_stage(TicketStage::Classification, &ctx),
            TicketStage::Planning
        );
        assert_eq!(
            next_stage(TicketStage::Planning, &ctx),
            TicketStage::SolutionFinding
        );
    }

    #[test]
    fn confident_retrieval_goes_straight_to_auto_resolve() {
        let s = signals(true, false);
        assert_eq!(
            next_stage(TicketStage::SolutionFinding, &ctx_signals(&s)),
            TicketStage::AutoResolve
        );
    }

    #[test]
    fn unconfident_retrieval_retries_until_exhausted() {
        let retry = signals(false, false);
        assert_eq!(
            next_stage(TicketStage::SolutionFinding, &ctx_signals(&retry)),
            TicketStage::SolutionFinding
        );

        let spent = signals(false, true);
        assert_eq!(
            next_stage(TicketStage::SolutionFinding, &ctx_signals(&spent)),
            TicketStage::Evaluation
        );
    }

    #[test]
    fn evaluation_routes_on_the_judgment() {
        let escalate = TransitionContext {
            judgment: Some(Judgment {
                acceptable: false,
                escalate: true,
            }),
            ..Default::default()
        };
        assert_eq!(
            next_stage(TicketStage::Evaluation, &escalate),
            TicketStage::Escalate
        );

        let acceptable = TransitionContext {
            judgment: Some(Judgment {
                acceptable: true,
                escalate: false,
            }),
            ..Default::default()
        };
        assert_eq!(
            next_stage(TicketStage::Evaluation, &acceptable),
            TicketStage::RequestFeedback
        );

        let neither = TransitionContext {
            judgment: Some(Judgment {
                acceptable: false,
                escalate: false,
            }),
            ..Default::default()
        };
        assert_eq!(
            next_stage(TicketStage::Evaluation, &neither),
            TicketStage::Escalate
        );
    }

    #[test]
    fn satisfied_feedback_closes_from_either_delivery_stage() {
        for stage in [TicketStage::AutoResolve, TicketStage::RequestFeedback] {
            let ctx = TransitionContext {
                feedback: Some(Satisfaction::Satisfied),
                budget_remaining: true,
                ..Default::default()
            };
            assert_eq!(next_stage(stage, &ctx), TicketStage::Closed);
        }
    }

    #[test]
    fn dissatisfied_feedback_retries_only_with_budget() {
        let with_budget = TransitionContext {
            feedback: Some(Satisfaction::Dissatisfied),
            budget_remaining: true,
            ..Default::default()
        };
        assert_eq!(
            next_stage(TicketStage::RequestFeedback, &with_budget),
            TicketStage::SolutionFinding
        );

        let spent = TransitionContext {
            feedback: Some(Satisfaction::Dissatisfied),
            budget_remaining: false,
            ..Default::default()
        };
        assert_eq!(
            next_stage(TicketStage::AutoResolve, &spent),
            TicketStage::Escalate
        );
    }

    #[test]
    fn terminal_stages_stay_terminal() {
        let ctx = TransitionContext {
            feedback: Some(Satisfaction::Dissatisfied),
            budget_remaining: true,
            ..Default::default()
        };
        assert_eq!(next_stage(TicketStage::Escalate, &ctx), TicketStage::Escalate);
        assert_eq!(next_stage(TicketStage::Closed, &ctx), TicketStage::Closed);
    }

    #[test]
    fn escalate_is_reachable_from_every_non_terminal_stage() {
        // Walk each non-terminal stage with adversarial context (never
        // confident, never satisfied, no budget) and check the machine
        // reaches a terminal stage within a bounded number of steps.
        let bad_signals = signals(false, true);
        for start in [
            TicketStage::Intake,
            TicketStage::Scoring,
            TicketStage::Analysis,
            TicketStage::Classification,
            TicketStage::Planning,
            TicketStage::SolutionFinding,
            TicketStage::Evaluation,
            TicketStage::AutoResolve,
            TicketStage::RequestFeedback,
        ] {
            let mut stage = start;
            for _ in 0..16 {
                if matches!(stage, TicketStage::Escalate | TicketStage::Closed) {
                    break;
                }
                let ctx = TransitionContext {
                    signals: Some(&bad_signals),
                    judgment: Some(Judgment::escalate_by_default()),
                    feedback: Some(Satisfaction::Dissatisfied),
                    budget_remaining: false,
                };
                stage = next_stage(stage, &ctx);
            }
            assert_eq!(
                stage,
                TicketStage::Escalate,
                "stage {start:?} did not reach Escalate"
            );
        }
    }
}
