//! Integration tests for telemetry initialization and span helpers.

use stepq::job::Disposition;
use stepq::telemetry::{TelemetryConfig, init_telemetry, step};
use stepq::{RunId, StepOutcome};

#[test]
fn telemetry_initializes_without_endpoint() {
    // A global subscriber can only be set once per process; a second
    // attempt returns Err rather than panicking.
    let config = TelemetryConfig {
        endpoint: None,
        service_name: "stepq-test".to_string(),
        default_filter: "debug".to_string(),
    };
    let _guard = init_telemetry(config);
}

#[test]
fn step_span_records_outcomes() {
    let run_id = RunId::generate();
    let span = step::start_step_span(&run_id, "crawl", 1);
    step::record_outcome(
        &span,
        &StepOutcome::Advanced {
            next_job: "index".to_string(),
        },
    );
    step::record_outcome(&span, &StepOutcome::Absorbed(Disposition::HaltQuietly));
    step::record_failure(&span);
}

#[test]
fn outcome_labels_are_stable() {
    assert_eq!(StepOutcome::Finished.label(), "finished");
    assert_eq!(StepOutcome::Cancelled.label(), "cancelled");
}
