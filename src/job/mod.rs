//! Job contract and registry.
//!
//! A job is one named unit of domain logic. The engine looks jobs up by name
//! in a [`JobLibrary`], builds one per delivery from the program data, and
//! runs it once.

pub mod data;
pub mod error;

pub use data::JobData;
pub use error::{Disposition, JobError};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::model::ProgramMessage;

/// One step of a program.
///
/// Delivery is at-least-once: `execute` may run more than once for the same
/// step, so it must be idempotent or consult its [`JobData`] to skip work
/// already done.
#[async_trait]
pub trait Job: Send + Sync {
    async fn execute(&self, message: &ProgramMessage, data: &JobData<'_>) -> Result<(), JobError>;
}

/// Builds a [`Job`] from the program data of the run being processed.
pub trait JobFactory: Send + Sync {
    fn create(&self, program_data: &Value) -> Box<dyn Job>;
}

impl<F> JobFactory for F
where
    F: Fn(&Value) -> Box<dyn Job> + Send + Sync,
{
    fn create(&self, program_data: &Value) -> Box<dyn Job> {
        self(program_data)
    }
}

/// Jobs known to this process, indexed by name.
#[derive(Default, Clone)]
pub struct JobLibrary {
    factories: HashMap<String, Arc<dyn JobFactory>>,
}

impl JobLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`, replacing any earlier registration.
    pub fn register(mut self, name: impl Into<String>, factory: impl JobFactory + 'static) -> Self {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn JobFactory>> {
        self.factories.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}
