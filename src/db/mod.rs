//! Postgres connection pool and program table schema.
//!
//! One pool serves both the program table ([`programs`]) and the pgmq queue
//! functions ([`pgmq`]).

pub mod pgmq;
pub mod programs;

use crate::error::{Error, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::OnceCell;

pub const DEFAULT_PROGRAMS_TABLE: &str = "programs";

/// Database handle. Owns the pool and knows which table holds programs.
pub struct Db {
    pool: PgPool,
    table: String,
    schema_ready: OnceCell<()>,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            table: DEFAULT_PROGRAMS_TABLE.to_string(),
            schema_ready: OnceCell::new(),
        }
    }

    /// Use `table` for program rows. It is interpolated into SQL, so only
    /// plain identifiers are accepted.
    pub fn with_programs_table(mut self, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_identifier(&table)?;
        self.table = table;
        Ok(self)
    }

    pub fn programs_table(&self) -> &str {
        &self.table
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the program table on first use in this process.
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                let table = &self.table;
                sqlx::query(&format!(
                    "CREATE TABLE IF NOT EXISTS {table} (
                        id BIGSERIAL PRIMARY KEY,
                        run_id TEXT NOT NULL,
                        jobs JSONB NOT NULL,
                        step INTEGER NOT NULL DEFAULT 0,
                        finished_at TIMESTAMPTZ,
                        errored_at TIMESTAMPTZ,
                        error_message VARCHAR(255),
                        step_retry_count INTEGER NOT NULL DEFAULT 0,
                        job_data JSONB NOT NULL DEFAULT '{{}}',
                        program_data JSONB NOT NULL DEFAULT '{{}}',
                        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
                    )"
                ))
                .execute(&self.pool)
                .await?;
                sqlx::query(&format!(
                    "CREATE UNIQUE INDEX IF NOT EXISTS {table}_run_id_idx ON {table} (run_id)"
                ))
                .execute(&self.pool)
                .await?;
                tracing::debug!(table = %table, "program table ready");
                Ok::<(), Error>(())
            })
            .await?;
        Ok(())
    }
}

/// Accept `[A-Za-z_][A-Za-z0-9_]*`, at most 63 bytes (the Postgres limit).
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid_start && valid_rest && name.len() <= 63 {
        Ok(())
    } else {
        Err(Error::Config(format!("invalid SQL identifier: {name:?}")))
    }
}
