//! # stepq
//!
//! Durable, queue-driven step execution. A program is an ordered list of
//! named jobs plus an opaque context; each queue message runs one job, and
//! progress is persisted after every step so runs survive restarts.
//!
//! Postgres holds program rows, pgmq carries the messages, and OpenTelemetry
//! covers observability.

pub mod config;
pub mod db;
pub mod error;
pub mod job;
pub mod lifecycle;
pub mod model;
pub mod processor;
pub mod run_id;
pub mod store;
pub mod telemetry;
pub mod worker;

pub use error::{Error, Result};
pub use job::{Disposition, Job, JobData, JobError, JobFactory, JobLibrary};
pub use lifecycle::ProgramLifecycle;
pub use model::{NewProgram, Program, ProgramMessage};
pub use processor::{ProcessError, StepOutcome, StepProcessor};
pub use run_id::RunId;
