//! Step span helpers.

use tracing::Span;

use crate::processor::StepOutcome;
use crate::run_id::RunId;

/// Start a span covering the processing of one delivered message.
///
/// `step.outcome` is declared empty and filled by [`record_outcome`].
pub fn start_step_span(run_id: &RunId, job: &str, read_count: i32) -> Span {
    tracing::info_span!(
        "step.process",
        "step.run_id" = %run_id,
        "step.job" = job,
        "step.read_count" = read_count,
        "step.outcome" = tracing::field::Empty,
    )
}

pub fn record_outcome(span: &Span, outcome: &StepOutcome) {
    span.record("step.outcome", outcome.label());
}

pub fn record_failure(span: &Span) {
    span.record("step.outcome", "failed");
}
