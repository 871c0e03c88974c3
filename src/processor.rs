//! Step processor: runs one job per delivered message.
//!
//! Per message: count the attempt, drop it if the run already errored, run
//! the head job, then either publish the continuation, finish the run, or
//! classify the failure and decide whether the delivery layer sees it.

use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::error::Error;
use crate::job::{Disposition, JobData, JobError, JobLibrary};
use crate::lifecycle::ProgramLifecycle;
use crate::model::ProgramMessage;
use crate::store::ProgramQueue;
use crate::telemetry::metrics;

/// What happened to a message that was consumed successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The job ran (or was skipped) and the continuation was published.
    Advanced { next_job: String },
    /// The last job ran (or was skipped) and the run is finished.
    Finished,
    /// The run had already errored; nothing was executed.
    Cancelled,
    /// The job failed with an ignorable error. The failure was recorded and
    /// the message should be acknowledged.
    Absorbed(Disposition),
}

impl StepOutcome {
    /// Short name used in metrics and spans.
    pub fn label(&self) -> &'static str {
        match self {
            StepOutcome::Advanced { .. } => "advanced",
            StepOutcome::Finished => "finished",
            StepOutcome::Cancelled => "cancelled",
            StepOutcome::Absorbed(_) => "absorbed",
        }
    }
}

/// A failure the delivery layer must see. The message is not acknowledged
/// and will be redelivered.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The job (or engine bookkeeping around it) failed; the failure has been
    /// recorded on the program row.
    #[error(transparent)]
    Job(JobError),

    /// Recording the failure itself failed. `job_error` is the failure that
    /// could not be recorded.
    #[error("failed to record job failure ({job_error}): {source}")]
    Bookkeeping { source: Error, job_error: JobError },
}

pub struct StepProcessor {
    lifecycle: Arc<ProgramLifecycle>,
    queue: Arc<dyn ProgramQueue>,
    library: Arc<JobLibrary>,
}

impl StepProcessor {
    pub fn new(
        lifecycle: Arc<ProgramLifecycle>,
        queue: Arc<dyn ProgramQueue>,
        library: Arc<JobLibrary>,
    ) -> Self {
        Self {
            lifecycle,
            queue,
            library,
        }
    }

    /// Process one delivered message.
    ///
    /// `Ok` means the message may be acknowledged, `Err` means it must be
    /// left for redelivery.
    pub async fn process(&self, message: &ProgramMessage) -> Result<StepOutcome, ProcessError> {
        let start = Instant::now();
        let job = message.current_job().unwrap_or_default().to_string();

        let result = match self.execute_next_job(message).await {
            Ok(outcome) => Ok(outcome),
            Err(job_err) => self.handle_failure(message, &job, job_err).await,
        };

        let outcome = match &result {
            Ok(outcome) => outcome.label(),
            Err(_) => "failed",
        };
        metrics::steps_processed().add(
            1,
            &[
                KeyValue::new("job", job.clone()),
                KeyValue::new("outcome", outcome),
            ],
        );
        metrics::step_duration_ms().record(
            start.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("job", job)],
        );

        result
    }

    async fn execute_next_job(&self, message: &ProgramMessage) -> Result<StepOutcome, JobError> {
        let run_id = &message.run_id;

        // Counted before the cancellation check, so stale redeliveries of an
        // errored run still show up in step_retry_count.
        self.lifecycle.increment_step_retry_count(run_id).await?;

        if self.lifecycle.is_program_finished_with_error(run_id).await? {
            info!(run_id = %run_id, jobs = ?message.jobs, "execution cancelled");
            return Ok(StepOutcome::Cancelled);
        }

        // A redelivered final message must not run the last job again.
        if self.lifecycle.is_program_finished(run_id).await? {
            info!(run_id = %run_id, jobs = ?message.jobs, "program already finished, skipping");
            return Ok(StepOutcome::Cancelled);
        }

        let Some(current_job) = message.current_job() else {
            warn!(run_id = %run_id, "message carries no jobs, finishing program");
            self.lifecycle.finish_program(run_id).await?;
            return Ok(StepOutcome::Finished);
        };

        info!(run_id = %run_id, job = current_job, jobs = ?message.jobs, "executing job");

        match self.library.get(current_job) {
            Some(factory) => {
                let data = JobData::new(&self.lifecycle, run_id.clone(), current_job);
                factory
                    .create(&message.program_data)
                    .execute(message, &data)
                    .await?;
                info!(run_id = %run_id, job = current_job, "job finished");
            }
            None => {
                // Another consumer may know this job; this one just moves on.
                warn!(run_id = %run_id, job = current_job, "job not in library, skipping");
                metrics::jobs_skipped().add(1, &[KeyValue::new("job", current_job.to_string())]);
            }
        }

        match message.continuation() {
            Some(next) => {
                // Enqueue first, then persist the step. A crash in between
                // leaves `step` one behind while the next message is already in
                // flight; `step` is bookkeeping only, so nothing resumes from it.
                self.queue.enqueue(&next).await?;
                self.lifecycle.increment_step(run_id).await?;
                Ok(StepOutcome::Advanced {
                    next_job: next.jobs[0].clone(),
                })
            }
            None => {
                self.lifecycle.finish_program(run_id).await?;
                Ok(StepOutcome::Finished)
            }
        }
    }

    async fn handle_failure(
        &self,
        message: &ProgramMessage,
        job: &str,
        job_err: JobError,
    ) -> Result<StepOutcome, ProcessError> {
        let run_id = &message.run_id;
        let disposition = job_err.disposition();

        let recorded = if disposition.is_terminal() {
            self.lifecycle
                .set_program_to_error(run_id, job_err.message())
                .await
        } else {
            self.lifecycle
                .set_job_retriable_error_message(run_id, job_err.message())
                .await
        };
        if let Err(source) = recorded {
            error!(
                run_id = %run_id,
                job,
                %disposition,
                error = %job_err,
                "failed to record job failure: {source}"
            );
            return Err(ProcessError::Bookkeeping {
                source,
                job_error: job_err,
            });
        }

        metrics::job_failures().add(
            1,
            &[KeyValue::new("disposition", disposition.to_string())],
        );

        if disposition == Disposition::Stall {
            // Nothing will publish another message for this run. It stays
            // unfinished until an external sweep re-enqueues it.
            warn!(
                run_id = %run_id,
                job,
                error = %job_err,
                "retryable failure marked ignorable, run left unfinished"
            );
        }

        if disposition.propagates() {
            error!(
                run_id = %run_id,
                job,
                %disposition,
                error = %job_err,
                "job failed"
            );
            Err(ProcessError::Job(job_err))
        } else {
            info!(run_id = %run_id, job, %disposition, error = %job_err, "job failure absorbed");
            Ok(StepOutcome::Absorbed(disposition))
        }
    }
}
