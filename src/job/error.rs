//! Job failure classification.
//!
//! Job code fails with a [`JobError`]. Two independent flags decide what the
//! step processor does with it: `retryable` keeps the run alive, `ignorable`
//! stops the failure from reaching the delivery layer. [`Disposition`] is the
//! closed set of the four resulting outcomes.

use crate::error::Error;

/// A failure raised while executing a job.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct JobError {
    message: String,
    code: Option<String>,
    retryable: bool,
    ignorable: bool,
    execution_time_exceeded: bool,
}

impl JobError {
    /// A failure that marks the run as errored and propagates to the delivery
    /// layer. Later deliveries for the run are cancelled.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            retryable: false,
            ignorable: false,
            execution_time_exceeded: false,
        }
    }

    /// A failure that leaves the run alive so redelivery retries the job.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::fatal(message).and_retryable()
    }

    /// A failure that is recorded but acknowledged, so it never reaches the
    /// delivery layer's redelivery or alerting path.
    pub fn ignorable(message: impl Into<String>) -> Self {
        Self::fatal(message).and_ignorable()
    }

    pub fn and_retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    pub fn and_ignorable(mut self) -> Self {
        self.ignorable = true;
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn is_ignorable(&self) -> bool {
        self.ignorable
    }

    /// True if this failure came from a checkpoint time-budget breach.
    pub fn is_execution_time_exceeded(&self) -> bool {
        self.execution_time_exceeded
    }

    pub fn disposition(&self) -> Disposition {
        match (self.retryable, self.ignorable) {
            (false, false) => Disposition::Halt,
            (true, false) => Disposition::Retry,
            (false, true) => Disposition::HaltQuietly,
            (true, true) => Disposition::Stall,
        }
    }
}

/// Engine failures surfacing inside a job are fatal unless job code
/// reclassifies them.
impl From<Error> for JobError {
    fn from(err: Error) -> Self {
        let exceeded = matches!(err, Error::ExecutionTimeExceeded { .. });
        let mut job_err = JobError::fatal(err.to_string());
        job_err.execution_time_exceeded = exceeded;
        job_err
    }
}

/// What the step processor does with a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Mark the run errored, propagate to the delivery layer.
    Halt,
    /// Record the message only, propagate so the message is redelivered.
    Retry,
    /// Mark the run errored, acknowledge the message.
    HaltQuietly,
    /// Record the message only, acknowledge the message. The run stays
    /// non-terminal and nothing will move it forward again; only an external
    /// sweep over unfinished programs can pick it up.
    Stall,
}

impl Disposition {
    /// Does this outcome set `errored_at`?
    pub fn is_terminal(self) -> bool {
        matches!(self, Disposition::Halt | Disposition::HaltQuietly)
    }

    /// Is the failure handed back to the delivery layer?
    pub fn propagates(self) -> bool {
        matches!(self, Disposition::Halt | Disposition::Retry)
    }
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Disposition::Halt => "halt",
            Disposition::Retry => "retry",
            Disposition::HaltQuietly => "halt_quietly",
            Disposition::Stall => "stall",
        };
        write!(f, "{s}")
    }
}
