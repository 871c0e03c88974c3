//! Metric instrument factories for stepq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"stepq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("stepq")
}

/// Counter: programs created.
pub fn programs_created() -> Counter<u64> {
    meter()
        .u64_counter("stepq.programs.created")
        .with_description("Number of programs created")
        .build()
}

/// Counter: terminal program transitions.
/// Labels: `to` ("finished" | "errored").
pub fn program_transitions() -> Counter<u64> {
    meter()
        .u64_counter("stepq.programs.transitions")
        .with_description("Number of programs reaching a terminal state")
        .build()
}

/// Counter: delivered messages processed.
/// Labels: `job`, `outcome` ("advanced" | "finished" | "cancelled" | "absorbed" | "failed").
pub fn steps_processed() -> Counter<u64> {
    meter()
        .u64_counter("stepq.steps.processed")
        .with_description("Number of program messages processed")
        .build()
}

/// Counter: job failures by classification.
/// Labels: `disposition`.
pub fn job_failures() -> Counter<u64> {
    meter()
        .u64_counter("stepq.jobs.failures")
        .with_description("Number of failed job executions")
        .build()
}

/// Counter: jobs skipped because this process has no factory for them.
/// Labels: `job`.
pub fn jobs_skipped() -> Counter<u64> {
    meter()
        .u64_counter("stepq.jobs.skipped")
        .with_description("Jobs missing from the local job library")
        .build()
}

/// Counter: queue-level operations (create, send, read, set_vt, archive, delete).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("stepq.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Histogram: time spent processing one message, in milliseconds.
/// Labels: `job`.
pub fn step_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("stepq.step.duration_ms")
        .with_description("Step processing duration in milliseconds")
        .with_unit("ms")
        .build()
}
