//! Program row operations over the configured table.

use async_trait::async_trait;
use sqlx::types::Json;

use crate::error::{Error, Result};
use crate::model::{JobDataMap, NewProgram, Program, ProgramFilter, ProgramStatus};
use crate::run_id::RunId;
use crate::store::ProgramStore;

const PG_UNDEFINED_TABLE: &str = "42P01";

const PROGRAM_COLUMNS: &str = "run_id, program_data, jobs, job_data, step, step_retry_count, \
     finished_at, errored_at, error_message, created_at, updated_at";

impl super::Db {
    /// Insert a new program row. Creates the table first if needed.
    pub async fn insert_program(&self, run_id: &RunId, program: &NewProgram) -> Result<()> {
        self.ensure_schema().await?;
        sqlx::query(&format!(
            "INSERT INTO {} (run_id, jobs, step, job_data, program_data)
             VALUES ($1, $2, 0, $3, $4)",
            self.programs_table()
        ))
        .bind(run_id.as_str())
        .bind(Json(&program.jobs))
        .bind(Json(&program.job_data))
        .bind(&program.program_data)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Get a program by run id.
    pub async fn get_program(&self, run_id: &RunId) -> Result<Program> {
        self.ensure_schema().await?;
        let row: Option<ProgramRow> = sqlx::query_as(&format!(
            "SELECT {PROGRAM_COLUMNS} FROM {} WHERE run_id = $1",
            self.programs_table()
        ))
        .bind(run_id.as_str())
        .fetch_optional(self.pool())
        .await?;

        row.map(ProgramRow::into_program)
            .ok_or_else(|| Error::NotFound(run_id.to_string()))
    }

    pub async fn finish_program(&self, run_id: &RunId) -> Result<()> {
        self.update_program(
            run_id,
            "finished_at = CASE WHEN finished_at IS NULL AND errored_at IS NULL \
             THEN now() ELSE finished_at END, step_retry_count = 0",
            None,
        )
        .await
    }

    pub async fn record_program_error(
        &self,
        run_id: &RunId,
        message: &str,
        terminal: bool,
    ) -> Result<()> {
        let set = if terminal {
            "error_message = $2, errored_at = CASE WHEN finished_at IS NULL AND errored_at IS NULL \
             THEN now() ELSE errored_at END"
        } else {
            "error_message = $2"
        };
        self.update_program(run_id, set, Some(message)).await
    }

    pub async fn increment_program_step(&self, run_id: &RunId) -> Result<()> {
        self.update_program(run_id, "step = step + 1, step_retry_count = 0", None)
            .await
    }

    pub async fn increment_program_step_retry_count(&self, run_id: &RunId) -> Result<()> {
        self.update_program(run_id, "step_retry_count = step_retry_count + 1", None)
            .await
    }

    pub async fn set_program_job_data(&self, run_id: &RunId, job_data: &JobDataMap) -> Result<()> {
        self.ensure_schema().await?;
        let rows_affected = sqlx::query(&format!(
            "UPDATE {} SET job_data = $2, updated_at = now() WHERE run_id = $1",
            self.programs_table()
        ))
        .bind(run_id.as_str())
        .bind(Json(job_data))
        .execute(self.pool())
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(Error::NotFound(run_id.to_string()));
        }
        Ok(())
    }

    /// Programs with neither `finished_at` nor `errored_at`, oldest first.
    pub async fn unfinished_programs(&self) -> Result<Vec<Program>> {
        self.ensure_schema().await?;
        let rows: Vec<ProgramRow> = sqlx::query_as(&format!(
            "SELECT {PROGRAM_COLUMNS} FROM {}
             WHERE finished_at IS NULL AND errored_at IS NULL
             ORDER BY created_at ASC",
            self.programs_table()
        ))
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(ProgramRow::into_program).collect())
    }

    /// Read-only listing for inspection.
    ///
    /// Never creates the table; if it does not exist yet the result is empty.
    pub async fn list_programs(&self, filter: &ProgramFilter) -> Result<Vec<Program>> {
        let condition = match filter.status {
            None => "TRUE",
            Some(ProgramStatus::Running) => "finished_at IS NULL AND errored_at IS NULL",
            Some(ProgramStatus::Finished) => "finished_at IS NOT NULL",
            Some(ProgramStatus::Errored) => "errored_at IS NOT NULL",
        };
        let order = if filter.newest_first { "DESC" } else { "ASC" };

        let result: std::result::Result<Vec<ProgramRow>, sqlx::Error> = sqlx::query_as(&format!(
            "SELECT {PROGRAM_COLUMNS} FROM {} WHERE {condition}
             ORDER BY created_at {order}, id {order} LIMIT $1",
            self.programs_table()
        ))
        .bind(filter.limit)
        .fetch_all(self.pool())
        .await;

        match result {
            Ok(rows) => Ok(rows.into_iter().map(ProgramRow::into_program).collect()),
            Err(sqlx::Error::Database(db_err))
                if db_err.code().as_deref() == Some(PG_UNDEFINED_TABLE) =>
            {
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Apply `set` (which may reference `$2` as `message`) to one row and
    /// touch `updated_at`.
    async fn update_program(&self, run_id: &RunId, set: &str, message: Option<&str>) -> Result<()> {
        self.ensure_schema().await?;
        let sql = format!(
            "UPDATE {} SET {set}, updated_at = now() WHERE run_id = $1",
            self.programs_table()
        );
        let mut query = sqlx::query(&sql).bind(run_id.as_str());
        if let Some(message) = message {
            query = query.bind(message);
        }
        let rows_affected = query.execute(self.pool()).await?.rows_affected();

        if rows_affected == 0 {
            return Err(Error::NotFound(run_id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProgramStore for super::Db {
    async fn save(&self, run_id: &RunId, program: &NewProgram) -> Result<()> {
        self.insert_program(run_id, program).await
    }

    async fn get(&self, run_id: &RunId) -> Result<Program> {
        self.get_program(run_id).await
    }

    async fn finish(&self, run_id: &RunId) -> Result<()> {
        self.finish_program(run_id).await
    }

    async fn record_error(&self, run_id: &RunId, message: &str, terminal: bool) -> Result<()> {
        self.record_program_error(run_id, message, terminal).await
    }

    async fn increment_step(&self, run_id: &RunId) -> Result<()> {
        self.increment_program_step(run_id).await
    }

    async fn increment_step_retry_count(&self, run_id: &RunId) -> Result<()> {
        self.increment_program_step_retry_count(run_id).await
    }

    async fn set_job_data(&self, run_id: &RunId, job_data: &JobDataMap) -> Result<()> {
        self.set_program_job_data(run_id, job_data).await
    }

    async fn unfinished(&self) -> Result<Vec<Program>> {
        self.unfinished_programs().await
    }

    async fn list(&self, filter: &ProgramFilter) -> Result<Vec<Program>> {
        self.list_programs(filter).await
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct ProgramRow {
    run_id: String,
    program_data: serde_json::Value,
    jobs: Json<Vec<String>>,
    job_data: Json<JobDataMap>,
    step: i32,
    step_retry_count: i32,
    finished_at: Option<chrono::DateTime<chrono::Utc>>,
    errored_at: Option<chrono::DateTime<chrono::Utc>>,
    error_message: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl ProgramRow {
    fn into_program(self) -> Program {
        Program {
            run_id: RunId::from(self.run_id),
            program_data: self.program_data,
            jobs: self.jobs.0,
            job_data: self.job_data.0,
            step: self.step.max(0) as u32,
            step_retry_count: self.step_retry_count.max(0) as u32,
            finished_at: self.finished_at,
            errored_at: self.errored_at,
            error_message: self.error_message,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
