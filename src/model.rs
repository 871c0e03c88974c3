//! Core data model.
//!
//! A program is an ordered list of named jobs plus an opaque context. Each run
//! is tracked by one persisted [`Program`] row and moved forward by
//! [`ProgramMessage`]s travelling through the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::run_id::RunId;

/// Per-job persisted state, keyed by job name.
pub type JobDataMap = Map<String, Value>;

// ---------------------------------------------------------------------------
// Program
// ---------------------------------------------------------------------------

/// The persisted bookkeeping row for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub run_id: RunId,

    /// Context handed to every job factory. Never modified after creation.
    pub program_data: Value,

    /// The job list as submitted. An audit record only: the in-flight message
    /// decides which job runs next.
    pub jobs: Vec<String>,

    pub job_data: JobDataMap,

    /// Number of successfully completed steps. Observability only.
    pub step: u32,

    /// Delivery attempts at the current step. Observability only.
    pub step_retry_count: u32,

    pub finished_at: Option<DateTime<Utc>>,
    pub errored_at: Option<DateTime<Utc>>,

    /// Last recorded failure. Present without `errored_at` for failures that
    /// are being retried.
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Program {
    pub fn status(&self) -> ProgramStatus {
        if self.errored_at.is_some() {
            ProgramStatus::Errored
        } else if self.finished_at.is_some() {
            ProgramStatus::Finished
        } else {
            ProgramStatus::Running
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status() != ProgramStatus::Running
    }
}

/// Coarse lifecycle state derived from the terminal timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramStatus {
    /// Neither terminal timestamp set.
    Running,
    /// `finished_at` set. Terminal.
    Finished,
    /// `errored_at` set. Terminal.
    Errored,
}

impl std::fmt::Display for ProgramStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProgramStatus::Running => "running",
            ProgramStatus::Finished => "finished",
            ProgramStatus::Errored => "errored",
        };
        f.pad(s)
    }
}

impl std::str::FromStr for ProgramStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ProgramStatus::Running),
            "finished" => Ok(ProgramStatus::Finished),
            "errored" => Ok(ProgramStatus::Errored),
            other => Err(crate::error::Error::Other(format!(
                "unknown program status: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// In-flight message
// ---------------------------------------------------------------------------

/// The queue payload that drives one step of a run.
///
/// `jobs` holds the jobs still to run, head first. Fields this crate does not
/// know about are kept in `extra` and forwarded on every continuation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramMessage {
    pub run_id: RunId,
    #[serde(default)]
    pub program_data: Value,
    pub jobs: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProgramMessage {
    pub fn new(run_id: RunId, program_data: Value, jobs: Vec<String>) -> Self {
        Self {
            run_id,
            program_data,
            jobs,
            extra: Map::new(),
        }
    }

    /// The job this message asks to run.
    pub fn current_job(&self) -> Option<&str> {
        self.jobs.first().map(String::as_str)
    }

    /// The message for the next step, or `None` if the current job is the last.
    pub fn continuation(&self) -> Option<ProgramMessage> {
        if self.jobs.len() <= 1 {
            return None;
        }
        Some(ProgramMessage {
            jobs: self.jobs[1..].to_vec(),
            ..self.clone()
        })
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for a new program. The public API for submitting work.
#[derive(Debug, Clone)]
pub struct NewProgram {
    pub(crate) program_data: Value,
    pub(crate) jobs: Vec<String>,
    pub(crate) job_data: JobDataMap,
}

impl NewProgram {
    pub fn new<I, S>(jobs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program_data: Value::Object(Map::new()),
            jobs: jobs.into_iter().map(Into::into).collect(),
            job_data: Map::new(),
        }
    }

    pub fn program_data(mut self, data: Value) -> Self {
        self.program_data = data;
        self
    }

    /// Seed job-local state before the first step runs.
    pub fn job_data(mut self, data: JobDataMap) -> Self {
        self.job_data = data;
        self
    }

    pub fn jobs(&self) -> &[String] {
        &self.jobs
    }
}

// ---------------------------------------------------------------------------
// Query filter
// ---------------------------------------------------------------------------

/// Options for the read-only program listing.
#[derive(Debug, Clone)]
pub struct ProgramFilter {
    pub status: Option<ProgramStatus>,
    pub newest_first: bool,
    pub limit: i64,
}

impl Default for ProgramFilter {
    fn default() -> Self {
        Self {
            status: None,
            newest_first: true,
            limit: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_uses_camel_case_wire_names() {
        let msg = ProgramMessage::new(RunId::from("1"), json!({"a": 1}), vec!["x".into()]);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"runId": "1", "programData": {"a": 1}, "jobs": ["x"]})
        );
    }

    #[test]
    fn continuation_drops_head_and_keeps_extra_fields() {
        let msg: ProgramMessage = serde_json::from_value(json!({
            "runId": "1",
            "programData": {},
            "jobs": ["a", "b", "c"],
            "traceId": "abc"
        }))
        .unwrap();

        let next = msg.continuation().unwrap();
        assert_eq!(next.jobs, vec!["b", "c"]);
        assert_eq!(next.extra.get("traceId"), Some(&json!("abc")));
        assert_eq!(msg.current_job(), Some("a"));
    }

    #[test]
    fn last_job_has_no_continuation() {
        let msg = ProgramMessage::new(RunId::from("1"), json!({}), vec!["only".into()]);
        assert!(msg.continuation().is_none());
    }
}
