//! Program lifecycle: creation and every persisted state transition.
//!
//! All writes to a program row go through [`ProgramLifecycle`]. It owns the
//! persistence collaborator and the queue used to publish the first message.

use opentelemetry::KeyValue;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::{NewProgram, Program, ProgramMessage};
use crate::run_id::RunId;
use crate::store::{ProgramQueue, ProgramStore};
use crate::telemetry::metrics;

/// Longest error message kept on a program row, in characters.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 255;

/// How [`ProgramLifecycle::update_job_data`] applies a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Replace,
    /// Shallow-merge the payload's top-level keys into the stored object.
    Merge,
}

pub struct ProgramLifecycle {
    store: Arc<dyn ProgramStore>,
    queue: Arc<dyn ProgramQueue>,
}

impl ProgramLifecycle {
    pub fn new(store: Arc<dyn ProgramStore>, queue: Arc<dyn ProgramQueue>) -> Self {
        Self { store, queue }
    }

    /// Persist a new program and publish its first message.
    ///
    /// The insert and the enqueue are not atomic. If the process dies between
    /// the two, the row stays unstarted and shows up in
    /// [`unfinished_programs`](Self::unfinished_programs).
    pub async fn create_program(&self, program: NewProgram) -> Result<RunId> {
        if program.jobs.is_empty() {
            return Err(Error::InvalidProgram(
                "program must contain at least one job".to_string(),
            ));
        }

        let run_id = RunId::generate();
        self.store.save(&run_id, &program).await?;

        let message = ProgramMessage::new(run_id.clone(), program.program_data, program.jobs);
        self.queue.enqueue(&message).await?;

        metrics::programs_created().add(1, &[]);
        info!(run_id = %run_id, jobs = ?message.jobs, "program created");
        Ok(run_id)
    }

    pub async fn get_program(&self, run_id: &RunId) -> Result<Program> {
        self.store.get(run_id).await
    }

    /// Stored state for `job_name`, or an empty object if none was written.
    pub async fn get_job_data(&self, run_id: &RunId, job_name: &str) -> Result<Value> {
        let program = self.store.get(run_id).await?;
        Ok(program
            .job_data
            .get(job_name)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new())))
    }

    /// Replace or merge one job's entry and persist the whole map.
    ///
    /// Read-modify-write without isolation: safe only while a run has a
    /// single writer, which single-flight delivery provides.
    pub async fn update_job_data(
        &self,
        run_id: &RunId,
        job_name: &str,
        payload: Value,
        mode: WriteMode,
    ) -> Result<()> {
        let mut job_data = self.store.get(run_id).await?.job_data;

        let entry = match mode {
            WriteMode::Replace => payload,
            WriteMode::Merge => {
                let Value::Object(partial) = payload else {
                    return Err(Error::InvalidJobData(format!(
                        "merge payload for job {job_name} must be an object"
                    )));
                };
                let mut merged = match job_data.remove(job_name) {
                    Some(Value::Object(existing)) => existing,
                    _ => Map::new(),
                };
                merged.extend(partial);
                Value::Object(merged)
            }
        };

        job_data.insert(job_name.to_string(), entry);
        self.store.set_job_data(run_id, &job_data).await
    }

    pub async fn increment_step_retry_count(&self, run_id: &RunId) -> Result<()> {
        self.store.increment_step_retry_count(run_id).await
    }

    pub async fn increment_step(&self, run_id: &RunId) -> Result<()> {
        self.store.increment_step(run_id).await?;
        debug!(run_id = %run_id, "step advanced");
        Ok(())
    }

    pub async fn finish_program(&self, run_id: &RunId) -> Result<()> {
        self.store.finish(run_id).await?;
        metrics::program_transitions().add(1, &[KeyValue::new("to", "finished")]);
        info!(run_id = %run_id, "program finished");
        Ok(())
    }

    /// Mark the run as terminally failed.
    pub async fn set_program_to_error(&self, run_id: &RunId, message: &str) -> Result<()> {
        self.store
            .record_error(run_id, &truncate_message(message), true)
            .await?;
        metrics::program_transitions().add(1, &[KeyValue::new("to", "errored")]);
        Ok(())
    }

    /// Record a failure that will be retried. `errored_at` stays unset.
    pub async fn set_job_retriable_error_message(
        &self,
        run_id: &RunId,
        message: &str,
    ) -> Result<()> {
        self.store
            .record_error(run_id, &truncate_message(message), false)
            .await
    }

    pub async fn is_program_finished_with_error(&self, run_id: &RunId) -> Result<bool> {
        Ok(self.store.get(run_id).await?.errored_at.is_some())
    }

    pub async fn is_program_finished(&self, run_id: &RunId) -> Result<bool> {
        Ok(self.store.get(run_id).await?.finished_at.is_some())
    }

    /// Runs that are neither finished nor errored, for reconciliation sweeps.
    pub async fn unfinished_programs(&self) -> Result<Vec<Program>> {
        self.store.unfinished().await
    }
}

fn truncate_message(message: &str) -> String {
    message.chars().take(MAX_ERROR_MESSAGE_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_on_char_boundaries() {
        let long = "é".repeat(300);
        let truncated = truncate_message(&long);
        assert_eq!(truncated.chars().count(), MAX_ERROR_MESSAGE_CHARS);
        assert_eq!(truncate_message("short"), "short");
    }
}
