//! Queue consumer: reads program messages from pgmq and feeds the step
//! processor, one message at a time.
//!
//! Single-flight consumption is what makes the lifecycle's unlocked
//! read-modify-write safe: never run two workers against the same queue.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{Instrument, error, info, warn};

use crate::db::Db;
use crate::db::pgmq::{PgmqMessage, notify_channel};
use crate::error::Result;
use crate::model::ProgramMessage;
use crate::processor::StepProcessor;
use crate::telemetry::step::{record_failure, record_outcome, start_step_span};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub queue_name: String,
    /// Visibility timeout (seconds) for pgmq reads. Must exceed the longest
    /// job, or the message is redelivered while still running.
    pub visibility_timeout: i32,
    /// Delay (seconds) before a failed message becomes visible again.
    pub retry_delay: i32,
    /// Poll interval fallback when no NOTIFY arrives.
    pub poll_interval: Duration,
    /// Archive a message instead of processing it once it has been read
    /// more than this many times.
    pub max_deliveries: Option<i32>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_name: "program_executor".to_string(),
            visibility_timeout: 60,
            retry_delay: 60,
            poll_interval: Duration::from_secs(1),
            max_deliveries: None,
        }
    }
}

/// What [`Worker::process_next`] did with the head of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Empty,
    Acknowledged,
    Redelivering,
    DeadLettered,
}

#[derive(Clone)]
pub struct Worker {
    db: Arc<Db>,
    processor: Arc<StepProcessor>,
    config: WorkerConfig,
    shutdown: Arc<Notify>,
}

impl Worker {
    pub fn new(db: Arc<Db>, processor: Arc<StepProcessor>, config: WorkerConfig) -> Self {
        Self {
            db,
            processor,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Signal the run loop to stop after the current message.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Consume until shutdown.
    pub async fn run(&self) -> Result<()> {
        let mut listener = sqlx::postgres::PgListener::connect_with(self.db.pool()).await?;
        let channel = notify_channel(&self.config.queue_name);
        listener.listen(&channel).await?;

        info!(queue = %self.config.queue_name, "worker started");

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("worker shutting down");
                    return Ok(());
                }
                notif = listener.recv() => {
                    if let Err(e) = notif {
                        warn!("PgListener error: {e}, falling back to poll");
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            // Drain whatever is visible, strictly one message at a time.
            loop {
                match self.process_next().await {
                    Ok(Delivery::Empty) => break,
                    Ok(_) => {}
                    Err(e) => {
                        error!("process_next error: {e}");
                        break;
                    }
                }
            }
        }
    }

    /// Read and handle one message.
    pub async fn process_next(&self) -> Result<Delivery> {
        let queue = &self.config.queue_name;
        let Some(msg) = self
            .db
            .read_from_queue(queue, self.config.visibility_timeout)
            .await?
        else {
            return Ok(Delivery::Empty);
        };

        if self
            .config
            .max_deliveries
            .is_some_and(|max| msg.read_ct > max)
        {
            error!(
                msg_id = msg.msg_id,
                read_ct = msg.read_ct,
                payload = %msg.message,
                "delivery limit reached, dead-lettering"
            );
            self.db.archive_message(queue, msg.msg_id).await?;
            return Ok(Delivery::DeadLettered);
        }

        let message: ProgramMessage = match serde_json::from_value(msg.message.clone()) {
            Ok(m) => m,
            Err(e) => {
                error!(msg_id = msg.msg_id, payload = %msg.message, "bad program message: {e}");
                self.db.archive_message(queue, msg.msg_id).await?;
                return Ok(Delivery::DeadLettered);
            }
        };

        self.deliver(&msg, &message).await
    }

    async fn deliver(&self, msg: &PgmqMessage, message: &ProgramMessage) -> Result<Delivery> {
        let queue = &self.config.queue_name;
        let span = start_step_span(
            &message.run_id,
            message.current_job().unwrap_or_default(),
            msg.read_ct,
        );

        match self
            .processor
            .process(message)
            .instrument(span.clone())
            .await
        {
            Ok(outcome) => {
                record_outcome(&span, &outcome);
                self.db.archive_message(queue, msg.msg_id).await?;
                Ok(Delivery::Acknowledged)
            }
            Err(e) => {
                record_failure(&span);
                warn!(
                    run_id = %message.run_id,
                    msg_id = msg.msg_id,
                    retry_in_secs = self.config.retry_delay,
                    "step failed, scheduling redelivery: {e}"
                );
                self.db
                    .set_visibility_timeout(queue, msg.msg_id, self.config.retry_delay)
                    .await?;
                Ok(Delivery::Redelivering)
            }
        }
    }
}
