//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. The database URL is wrapped in `secrecy::SecretString` so it
//! never ends up in logs.

use crate::db::validate_identifier;
use crate::error::{Error, Result};
use crate::worker::WorkerConfig;
use secrecy::SecretString;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub table_name: String,
    pub queue_name: String,
    pub visibility_timeout_secs: i32,
    pub retry_delay_secs: i32,
    pub poll_interval: Duration,
    pub max_deliveries: Option<i32>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let table_name = var_or("STEPQ_TABLE", "programs");
        validate_identifier(&table_name)?;
        let queue_name = var_or("STEPQ_QUEUE", "program_executor");
        validate_identifier(&queue_name)?;

        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            table_name,
            queue_name,
            visibility_timeout_secs: parsed_var("STEPQ_VISIBILITY_TIMEOUT_SECS")?.unwrap_or(60),
            retry_delay_secs: parsed_var("STEPQ_RETRY_DELAY_SECS")?.unwrap_or(60),
            poll_interval: Duration::from_millis(
                parsed_var("STEPQ_POLL_INTERVAL_MS")?.unwrap_or(1000),
            ),
            max_deliveries: parsed_var("STEPQ_MAX_DELIVERIES")?,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: var_or("LOG_LEVEL", "info"),
        })
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            queue_name: self.queue_name.clone(),
            visibility_timeout: self.visibility_timeout_secs,
            retry_delay: self.retry_delay_secs,
            poll_interval: self.poll_interval,
            max_deliveries: self.max_deliveries,
        }
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parsed_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{name}={raw:?}: {e}"))),
        Err(_) => Ok(None),
    }
}
