//! In-memory implementations of [`ProgramStore`] and [`ProgramQueue`].
//!
//! Thread-safe, process-local. Useful for tests and for embedding the engine
//! where durability is not needed.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

use super::{ProgramQueue, ProgramStore};
use crate::error::{Error, Result};
use crate::model::{JobDataMap, NewProgram, Program, ProgramFilter, ProgramMessage};
use crate::run_id::RunId;

/// Program rows held in a `HashMap`.
#[derive(Default)]
pub struct MemoryStore {
    programs: RwLock<HashMap<RunId, Program>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<F>(&self, run_id: &RunId, f: F) -> Result<()>
    where
        F: FnOnce(&mut Program),
    {
        let mut programs = self
            .programs
            .write()
            .map_err(|e| Error::Storage(format!("lock error: {e}")))?;
        let program = programs
            .get_mut(run_id)
            .ok_or_else(|| Error::NotFound(run_id.to_string()))?;
        f(program);
        program.updated_at = Utc::now();
        Ok(())
    }

    fn collect<P>(&self, keep: P) -> Result<Vec<Program>>
    where
        P: Fn(&Program) -> bool,
    {
        let programs = self
            .programs
            .read()
            .map_err(|e| Error::Storage(format!("lock error: {e}")))?;
        let mut out: Vec<Program> = programs.values().filter(|p| keep(p)).cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }
}

#[async_trait]
impl ProgramStore for MemoryStore {
    async fn save(&self, run_id: &RunId, program: &NewProgram) -> Result<()> {
        let mut programs = self
            .programs
            .write()
            .map_err(|e| Error::Storage(format!("lock error: {e}")))?;
        if programs.contains_key(run_id) {
            return Err(Error::Storage(format!("duplicate run id {run_id}")));
        }
        let now = Utc::now();
        programs.insert(
            run_id.clone(),
            Program {
                run_id: run_id.clone(),
                program_data: program.program_data.clone(),
                jobs: program.jobs.clone(),
                job_data: program.job_data.clone(),
                step: 0,
                step_retry_count: 0,
                finished_at: None,
                errored_at: None,
                error_message: None,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn get(&self, run_id: &RunId) -> Result<Program> {
        let programs = self
            .programs
            .read()
            .map_err(|e| Error::Storage(format!("lock error: {e}")))?;
        programs
            .get(run_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(run_id.to_string()))
    }

    async fn finish(&self, run_id: &RunId) -> Result<()> {
        self.update(run_id, |p| {
            if !p.is_terminal() {
                p.finished_at = Some(Utc::now());
            }
            p.step_retry_count = 0;
        })
    }

    async fn record_error(&self, run_id: &RunId, message: &str, terminal: bool) -> Result<()> {
        self.update(run_id, |p| {
            p.error_message = Some(message.to_string());
            if terminal && !p.is_terminal() {
                p.errored_at = Some(Utc::now());
            }
        })
    }

    async fn increment_step(&self, run_id: &RunId) -> Result<()> {
        self.update(run_id, |p| {
            p.step += 1;
            p.step_retry_count = 0;
        })
    }

    async fn increment_step_retry_count(&self, run_id: &RunId) -> Result<()> {
        self.update(run_id, |p| p.step_retry_count += 1)
    }

    async fn set_job_data(&self, run_id: &RunId, job_data: &JobDataMap) -> Result<()> {
        self.update(run_id, |p| p.job_data = job_data.clone())
    }

    async fn unfinished(&self) -> Result<Vec<Program>> {
        self.collect(|p| p.finished_at.is_none() && p.errored_at.is_none())
    }

    async fn list(&self, filter: &ProgramFilter) -> Result<Vec<Program>> {
        let mut out = self.collect(|p| filter.status.is_none_or(|s| p.status() == s))?;
        if filter.newest_first {
            out.reverse();
        }
        out.truncate(usize::try_from(filter.limit).unwrap_or(0));
        Ok(out)
    }
}

/// Records enqueued messages instead of delivering them.
#[derive(Default)]
pub struct MemoryQueue {
    messages: Mutex<Vec<ProgramMessage>>,
    failing: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `enqueue` calls fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Everything enqueued so far, oldest first.
    ///
    /// Inspection helpers read through a poisoned lock instead of failing, so
    /// a panicking test thread does not hide what was enqueued.
    pub fn messages(&self) -> Vec<ProgramMessage> {
        self.lock().clone()
    }

    /// Remove and return the oldest pending message.
    pub fn pop(&self) -> Option<ProgramMessage> {
        let mut messages = self.lock();
        if messages.is_empty() {
            None
        } else {
            Some(messages.remove(0))
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ProgramMessage>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ProgramQueue for MemoryQueue {
    async fn enqueue(&self, message: &ProgramMessage) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Queue("memory queue set to fail".to_string()));
        }
        self.messages
            .lock()
            .map_err(|e| Error::Queue(format!("lock error: {e}")))?
            .push(message.clone());
        Ok(())
    }
}
