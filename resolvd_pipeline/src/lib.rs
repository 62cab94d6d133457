//! # Resolvd Pipeline
//!
//! The ticket orchestrator of the resolvd support-ticket automation core:
//! a finite-state pipeline that drives a ticket from intake through
//! triage, bounded-retry knowledge-base retrieval, and evaluation to
//! auto-resolution, a customer feedback request, or human escalation.
//!
//! Routing is driven entirely by the retrieval engine's signal bundles and
//! the external evaluator's judgment, through the single transition
//! function in [`stages`]. The lifetime retrieval-attempt ceiling is the
//! system's backpressure against repeated vector searches; escalation is
//! reachable from every non-terminal stage, so no ticket can loop forever
//! or silently disappear.

pub mod collaborators;
pub mod prep;
pub mod processor;
pub mod stages;
pub mod ticket;

pub use collaborators::{AnswerComposer, AnswerJudge, EscalationQueue, ResolutionDelivery};
pub use prep::{classify, extract_keywords, score_urgency, TriageConfig};
pub use processor::{CancelFlag, ProcessorConfig, TicketProcessor};
pub use stages::{next_stage, TicketStage, TransitionContext};
pub use ticket::{Ticket, TicketState};
