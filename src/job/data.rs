//! Job-local state access for one `(run, job)` pair.

use serde_json::Value;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::lifecycle::{ProgramLifecycle, WriteMode};
use crate::run_id::RunId;

/// Handle passed to [`Job::execute`](super::Job::execute).
///
/// Created fresh for every delivered message. Remembers when it was created
/// so [`checkpoint`](Self::checkpoint) can enforce a time budget.
pub struct JobData<'a> {
    lifecycle: &'a ProgramLifecycle,
    run_id: RunId,
    job: String,
    started: Instant,
}

impl<'a> JobData<'a> {
    pub fn new(lifecycle: &'a ProgramLifecycle, run_id: RunId, job: impl Into<String>) -> Self {
        Self::started_at(lifecycle, run_id, job, Instant::now())
    }

    /// Like [`new`](Self::new) with an explicit start instant.
    pub fn started_at(
        lifecycle: &'a ProgramLifecycle,
        run_id: RunId,
        job: impl Into<String>,
        started: Instant,
    ) -> Self {
        Self {
            lifecycle,
            run_id,
            job: job.into(),
            started,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Stored state for this job, `{}` if nothing was written yet.
    pub async fn get(&self) -> Result<Value> {
        self.lifecycle.get_job_data(&self.run_id, &self.job).await
    }

    pub async fn set(&self, value: Value) -> Result<()> {
        self.lifecycle
            .update_job_data(&self.run_id, &self.job, value, WriteMode::Replace)
            .await
    }

    /// Shallow-merge `partial`, which must be a JSON object.
    pub async fn merge(&self, partial: Value) -> Result<()> {
        self.lifecycle
            .update_job_data(&self.run_id, &self.job, partial, WriteMode::Merge)
            .await
    }

    /// Persist progress, then check the time budget.
    ///
    /// `partial` is merged before the check, so progress survives a budget
    /// breach. With `Some(budget)` and a non-zero budget, fails with
    /// [`Error::ExecutionTimeExceeded`] once the time since this handle was
    /// created exceeds it. `None` or a zero budget disables the check.
    pub async fn checkpoint(&self, partial: Value, max_execution_time: Option<Duration>) -> Result<()> {
        self.merge(partial).await?;

        let Some(budget) = max_execution_time.filter(|b| !b.is_zero()) else {
            return Ok(());
        };
        let elapsed = self.elapsed();
        if elapsed > budget {
            return Err(Error::ExecutionTimeExceeded { elapsed, budget });
        }
        Ok(())
    }
}
