//! Durable FIFO queues with at-least-once delivery and backoff retries.
//!
//! # Layout (per queue, in the shared KV)
//! - `janus:queue:<name>:waiting`   list of ready job envelopes (FIFO)
//! - `janus:queue:<name>:delayed`   zset of envelopes scored by run-at ms
//! - `janus:queue:<name>:completed` trimmed list of finished envelopes
//! - `janus:queue:<name>:failed`    trimmed list of exhausted envelopes
//!
//! Queue names are load-bearing: the single ingest queue is `ingest`, and
//! each delivery worker binds to exactly one `deliver:<platform>:<channel>`
//! queue. Waiting and delayed entries survive a process restart; only the
//! envelope currently claimed by a crashing worker can be lost.
//!
//! Ordering within one queue follows enqueue order; with concurrency > 1
//! it is best-effort, which is adequate because the rate limiter funnels a
//! busy channel down to ~1 in flight.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use janus_kv::Kv;

use crate::clock;
use crate::error::Result;

/// How many delayed jobs one promotion pass moves to the waiting list.
const PROMOTE_BATCH: usize = 32;

// ---------------------------------------------------------------------------
// Job envelope
// ---------------------------------------------------------------------------

/// Wrapper persisted around every queued payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub id: Uuid,
    /// Failed tries so far (rate-limit reschedules do not count).
    pub attempts: u32,
    pub enqueued_at_ms: i64,
    pub payload: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Handle to one named queue. Cheap to clone.
#[derive(Clone)]
pub struct Queue {
    kv: Arc<dyn Kv>,
    name: String,
}

impl Queue {
    pub fn new(kv: Arc<dyn Kv>, name: impl Into<String>) -> Self {
        Queue {
            kv,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn key(&self, suffix: &str) -> String {
        format!("janus:queue:{}:{}", self.name, suffix)
    }

    /// Append a job to the waiting list.
    pub async fn enqueue<J: Serialize>(&self, job: &J) -> Result<Uuid> {
        let envelope = self.envelope(job)?;
        self.kv
            .rpush(&self.key("waiting"), &serde_json::to_string(&envelope)?)
            .await?;
        Ok(envelope.id)
    }

    /// Schedule a job to become ready after `delay`.
    pub async fn enqueue_in<J: Serialize>(&self, job: &J, delay: Duration) -> Result<Uuid> {
        let envelope = self.envelope(job)?;
        let id = envelope.id;
        self.schedule(&envelope, clock::now_ms() + delay.as_millis() as i64)
            .await?;
        Ok(id)
    }

    fn envelope<J: Serialize>(&self, job: &J) -> Result<JobEnvelope> {
        Ok(JobEnvelope {
            id: Uuid::new_v4(),
            attempts: 0,
            enqueued_at_ms: clock::now_ms(),
            payload: serde_json::to_value(job)?,
        })
    }

    /// Park an envelope on the delayed set until `run_at_ms`.
    pub async fn schedule(&self, envelope: &JobEnvelope, run_at_ms: i64) -> Result<()> {
        self.kv
            .zadd(
                &self.key("delayed"),
                &serde_json::to_string(envelope)?,
                run_at_ms as f64,
            )
            .await?;
        Ok(())
    }

    /// Move due delayed envelopes onto the waiting list. Returns how many.
    pub async fn promote_due(&self) -> Result<usize> {
        let due = self
            .kv
            .zclaim_upto(&self.key("delayed"), clock::now_ms() as f64, PROMOTE_BATCH)
            .await?;
        let count = due.len();
        for raw in due {
            self.kv.rpush(&self.key("waiting"), &raw).await?;
        }
        Ok(count)
    }

    /// Pop the next ready envelope, if any.
    ///
    /// An unparseable entry is moved to the failed list rather than
    /// poisoning the queue.
    pub async fn pop(&self) -> Result<Option<JobEnvelope>> {
        loop {
            let Some(raw) = self.kv.lpop(&self.key("waiting")).await? else {
                return Ok(None);
            };
            match serde_json::from_str::<JobEnvelope>(&raw) {
                Ok(envelope) => return Ok(Some(envelope)),
                Err(e) => {
                    warn!(queue = %self.name, error = %e, "discarding unparseable queue entry");
                    self.kv.rpush(&self.key("failed"), &raw).await?;
                }
            }
        }
    }

    pub async fn record_completed(&self, envelope: &JobEnvelope, keep: i64) -> Result<()> {
        let key = self.key("completed");
        self.kv
            .rpush(&key, &serde_json::to_string(envelope)?)
            .await?;
        self.kv.ltrim(&key, -keep, -1).await?;
        Ok(())
    }

    pub async fn record_failed(
        &self,
        envelope: &JobEnvelope,
        reason: &str,
        keep: i64,
    ) -> Result<()> {
        let key = self.key("failed");
        let record = serde_json::json!({ "job": envelope, "error": reason });
        self.kv.rpush(&key, &record.to_string()).await?;
        self.kv.ltrim(&key, -keep, -1).await?;
        Ok(())
    }

    // Inspection helpers (ops and tests).

    pub async fn waiting_len(&self) -> Result<i64> {
        Ok(self.kv.llen(&self.key("waiting")).await?)
    }

    pub async fn delayed_len(&self) -> Result<i64> {
        Ok(self.kv.zcard(&self.key("delayed")).await?)
    }

    pub async fn completed_len(&self) -> Result<i64> {
        Ok(self.kv.llen(&self.key("completed")).await?)
    }

    pub async fn failed_len(&self) -> Result<i64> {
        Ok(self.kv.llen(&self.key("failed")).await?)
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// What the handler decided about one job.
#[derive(Debug)]
pub enum JobOutcome {
    Complete,
    /// Re-queue after the given delay without consuming an attempt
    /// (rate-limit backpressure).
    RetryIn(Duration),
    /// Count an attempt; retry with exponential backoff until exhausted.
    Fail(String),
}

#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    type Job: DeserializeOwned + Send;

    async fn handle(&self, job: Self::Job) -> JobOutcome;
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub concurrency: usize,
    /// Total tries before a job lands on the failed list.
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub poll_interval: Duration,
    pub keep_completed: i64,
    pub keep_failed: i64,
}

impl WorkerOptions {
    /// The single global ingest queue.
    pub fn ingest() -> Self {
        WorkerOptions {
            concurrency: 10,
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            poll_interval: Duration::from_millis(250),
            keep_completed: 1000,
            keep_failed: 5000,
        }
    }

    /// Per-target-channel delivery queues.
    pub fn delivery() -> Self {
        WorkerOptions {
            concurrency: 5,
            max_attempts: 5,
            backoff_base: Duration::from_secs(2),
            poll_interval: Duration::from_millis(250),
            keep_completed: 500,
            keep_failed: 2000,
        }
    }
}

/// Polling consumer bound to one queue name.
pub struct QueueWorker<H: JobHandler> {
    queue: Queue,
    opts: WorkerOptions,
    handler: Arc<H>,
}

impl<H: JobHandler> QueueWorker<H> {
    pub fn new(kv: Arc<dyn Kv>, name: impl Into<String>, opts: WorkerOptions, handler: Arc<H>) -> Self {
        QueueWorker {
            queue: Queue::new(kv, name),
            opts,
            handler,
        }
    }

    /// Consume jobs until the shutdown flag flips, then drain in-flight
    /// work before returning.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let QueueWorker {
            queue,
            opts,
            handler,
        } = self;
        let mut in_flight: JoinSet<()> = JoinSet::new();
        debug!(queue = %queue.name(), "queue worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = queue.promote_due().await {
                warn!(queue = %queue.name(), error = %e, "delayed-job promotion failed");
            }

            while in_flight.len() < opts.concurrency {
                match queue.pop().await {
                    Ok(Some(envelope)) => {
                        let queue = queue.clone();
                        let opts = opts.clone();
                        let handler = handler.clone();
                        in_flight.spawn(async move {
                            process_one(queue, opts, handler, envelope).await;
                        });
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(queue = %queue.name(), error = %e, "queue pop failed");
                        break;
                    }
                }
            }

            tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(opts.poll_interval) => {}
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            }
        }

        while in_flight.join_next().await.is_some() {}
        info!(queue = %queue.name(), "queue worker stopped");
    }
}

async fn process_one<H: JobHandler>(
    queue: Queue,
    opts: WorkerOptions,
    handler: Arc<H>,
    mut envelope: JobEnvelope,
) {
    let job: H::Job = match serde_json::from_value(envelope.payload.clone()) {
        Ok(job) => job,
        Err(e) => {
            warn!(queue = %queue.name(), job_id = %envelope.id, error = %e, "malformed job payload");
            if let Err(e) = queue
                .record_failed(&envelope, "malformed payload", opts.keep_failed)
                .await
            {
                warn!(queue = %queue.name(), error = %e, "failed to record malformed job");
            }
            return;
        }
    };

    match handler.handle(job).await {
        JobOutcome::Complete => {
            if let Err(e) = queue.record_completed(&envelope, opts.keep_completed).await {
                warn!(queue = %queue.name(), error = %e, "failed to record completion");
            }
        }
        JobOutcome::RetryIn(delay) => {
            debug!(
                queue = %queue.name(),
                job_id = %envelope.id,
                delay_ms = delay.as_millis() as u64,
                "job rescheduled"
            );
            if let Err(e) = queue
                .schedule(&envelope, clock::now_ms() + delay.as_millis() as i64)
                .await
            {
                warn!(queue = %queue.name(), error = %e, "failed to reschedule job");
            }
        }
        JobOutcome::Fail(reason) => {
            envelope.attempts += 1;
            if envelope.attempts >= opts.max_attempts {
                warn!(
                    queue = %queue.name(),
                    job_id = %envelope.id,
                    attempts = envelope.attempts,
                    reason = %reason,
                    "job failed permanently"
                );
                if let Err(e) = queue
                    .record_failed(&envelope, &reason, opts.keep_failed)
                    .await
                {
                    warn!(queue = %queue.name(), error = %e, "failed to record failure");
                }
            } else {
                let delay = opts.backoff_base * 2u32.pow(envelope.attempts - 1);
                warn!(
                    queue = %queue.name(),
                    job_id = %envelope.id,
                    attempts = envelope.attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    reason = %reason,
                    "job failed, backing off"
                );
                if let Err(e) = queue
                    .schedule(&envelope, clock::now_ms() + delay.as_millis() as i64)
                    .await
                {
                    warn!(queue = %queue.name(), error = %e, "failed to schedule retry");
                }
            }
        }
    }
}
