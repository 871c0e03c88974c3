//! Collaborator seams: program persistence and message enqueueing.
//!
//! The lifecycle manager and step processor only talk to these traits.
//! [`crate::db::Db`] and [`crate::db::pgmq::PgmqQueue`] are the Postgres
//! implementations; [`memory`] holds in-process ones for tests and embedding.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{JobDataMap, NewProgram, Program, ProgramFilter, ProgramMessage};
use crate::run_id::RunId;

/// CRUD primitives over the program table, keyed by run id.
///
/// Every mutation refreshes `updated_at`. Mutations and reads of an unknown
/// run fail with [`crate::Error::NotFound`].
#[async_trait]
pub trait ProgramStore: Send + Sync {
    /// Insert a new row with `step = 0`, `step_retry_count = 0` and no
    /// terminal timestamps.
    async fn save(&self, run_id: &RunId, program: &NewProgram) -> Result<()>;

    async fn get(&self, run_id: &RunId) -> Result<Program>;

    /// Set `finished_at` and reset `step_retry_count`. A run that is already
    /// finished or errored keeps its terminal timestamp.
    async fn finish(&self, run_id: &RunId) -> Result<()>;

    /// Record `message` (already truncated). `terminal` also sets `errored_at`,
    /// unless the run already has a terminal timestamp.
    async fn record_error(&self, run_id: &RunId, message: &str, terminal: bool) -> Result<()>;

    /// Advance `step` by one and reset `step_retry_count`.
    async fn increment_step(&self, run_id: &RunId) -> Result<()>;

    async fn increment_step_retry_count(&self, run_id: &RunId) -> Result<()>;

    /// Overwrite the whole job data map.
    async fn set_job_data(&self, run_id: &RunId, job_data: &JobDataMap) -> Result<()>;

    /// Runs with neither terminal timestamp set.
    async fn unfinished(&self) -> Result<Vec<Program>>;

    /// Read-only listing for inspection.
    async fn list(&self, filter: &ProgramFilter) -> Result<Vec<Program>>;
}

/// Publishes in-flight messages for delivery to the step processor.
#[async_trait]
pub trait ProgramQueue: Send + Sync {
    async fn enqueue(&self, message: &ProgramMessage) -> Result<()>;
}
