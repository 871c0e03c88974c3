//! pgmq queue operations via direct SQLx, and the [`PgmqQueue`] publisher.
//!
//! Calls pgmq's SQL functions: pgmq.create, pgmq.send, pgmq.read,
//! pgmq.set_vt, pgmq.archive, pgmq.delete.

use async_trait::async_trait;
use opentelemetry::KeyValue;
use std::sync::Arc;
use tracing::warn;

use super::Db;
use crate::error::Result;
use crate::model::ProgramMessage;
use crate::store::ProgramQueue;
use crate::telemetry::metrics;

/// A message read from a pgmq queue.
#[derive(Debug, Clone)]
pub struct PgmqMessage {
    pub msg_id: i64,
    /// How many times this message has been read, including this read.
    pub read_ct: i32,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
    pub vt: chrono::DateTime<chrono::Utc>,
    pub message: serde_json::Value,
}

fn count(queue_name: &str, operation: &'static str) {
    metrics::queue_operations().add(
        1,
        &[
            KeyValue::new("queue", queue_name.to_string()),
            KeyValue::new("operation", operation),
        ],
    );
}

impl Db {
    /// Create a pgmq queue (idempotent).
    pub async fn create_queue(&self, queue_name: &str) -> Result<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue_name)
            .execute(self.pool())
            .await?;
        count(queue_name, "create");
        Ok(())
    }

    /// Send a message to a pgmq queue. Returns the message ID.
    /// delay_seconds: 0 for immediate, >0 for delayed delivery.
    pub async fn send_to_queue(
        &self,
        queue_name: &str,
        payload: &serde_json::Value,
        delay_seconds: i32,
    ) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2, $3)")
            .bind(queue_name)
            .bind(payload)
            .bind(delay_seconds)
            .fetch_one(self.pool())
            .await?;
        count(queue_name, "send");
        Ok(row.0)
    }

    /// Read the next message, hiding it from other readers for `vt_seconds`.
    /// Returns None if the queue is empty.
    pub async fn read_from_queue(
        &self,
        queue_name: &str,
        vt_seconds: i32,
    ) -> Result<Option<PgmqMessage>> {
        let row = sqlx::query_as::<
            _,
            (
                i64,
                i32,
                chrono::DateTime<chrono::Utc>,
                chrono::DateTime<chrono::Utc>,
                serde_json::Value,
            ),
        >("SELECT msg_id, read_ct, enqueued_at, vt, message FROM pgmq.read($1, $2, 1)")
        .bind(queue_name)
        .bind(vt_seconds)
        .fetch_optional(self.pool())
        .await?;

        let msg = row.map(|(msg_id, read_ct, enqueued_at, vt, message)| PgmqMessage {
            msg_id,
            read_ct,
            enqueued_at,
            vt,
            message,
        });
        count(queue_name, if msg.is_some() { "read" } else { "read_empty" });
        Ok(msg)
    }

    /// Make a read message visible again `vt_seconds` from now.
    pub async fn set_visibility_timeout(
        &self,
        queue_name: &str,
        msg_id: i64,
        vt_seconds: i32,
    ) -> Result<()> {
        sqlx::query("SELECT msg_id FROM pgmq.set_vt($1, $2, $3)")
            .bind(queue_name)
            .bind(msg_id)
            .bind(vt_seconds)
            .execute(self.pool())
            .await?;
        count(queue_name, "set_vt");
        Ok(())
    }

    /// Archive a message (moves to archive table, preserves for audit).
    pub async fn archive_message(&self, queue_name: &str, msg_id: i64) -> Result<()> {
        sqlx::query("SELECT pgmq.archive($1, $2)")
            .bind(queue_name)
            .bind(msg_id)
            .execute(self.pool())
            .await?;
        count(queue_name, "archive");
        Ok(())
    }

    /// Delete a message permanently.
    pub async fn delete_message(&self, queue_name: &str, msg_id: i64) -> Result<()> {
        sqlx::query("SELECT pgmq.delete($1, $2)")
            .bind(queue_name)
            .bind(msg_id)
            .execute(self.pool())
            .await?;
        count(queue_name, "delete");
        Ok(())
    }
}

/// Publishes program messages to a pgmq queue and pokes listening workers.
pub struct PgmqQueue {
    db: Arc<Db>,
    queue_name: String,
    notify_channel: String,
}

impl PgmqQueue {
    pub fn new(db: Arc<Db>, queue_name: impl Into<String>) -> Self {
        let queue_name = queue_name.into();
        let notify_channel = notify_channel(&queue_name);
        Self {
            db,
            queue_name,
            notify_channel,
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }
}

/// NOTIFY channel workers listen on for `queue_name`.
pub fn notify_channel(queue_name: &str) -> String {
    format!("{queue_name}_ready")
}

#[async_trait]
impl ProgramQueue for PgmqQueue {
    async fn enqueue(&self, message: &ProgramMessage) -> Result<()> {
        let payload = serde_json::to_value(message)?;
        self.db.send_to_queue(&self.queue_name, &payload, 0).await?;

        // The message is already durable; the notify only shortens the wait.
        if let Err(e) = sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&self.notify_channel)
            .bind(message.run_id.as_str())
            .execute(self.db.pool())
            .await
        {
            warn!(queue = %self.queue_name, run_id = %message.run_id, "notify failed: {e}");
        }
        Ok(())
    }
}
