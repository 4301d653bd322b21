//! Delayed job queue.
//!
//! A job is published with a delay, sits in `waiting` until it is due, moves to
//! `active` when a worker reserves it and ends up in the `completed` or `failed`
//! list. Publishing with the id of a job that is still waiting replaces it, so a
//! stable job id gives at most one pending job per key.
//!
//! Delivery is at-least-once: a job whose worker disappears stays `active` until
//! [`JobQueue::recover_stalled`] moves it back to `waiting`.

mod consumer;
mod memory;
mod redis;

pub use consumer::{Consumer, ConsumerOptions, JobHandler};
pub use memory::MemoryQueue;
pub use redis::RedisQueue;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub topic: String,
    pub payload: Value,
    pub published_at: DateTime<Utc>,
    /// How many times the job has been handed to a worker, this delivery included.
    #[serde(default)]
    pub attempts: u32,
    /// Identifies this delivery. Finishing with a claim that is no longer the
    /// active one is a no-op.
    #[serde(skip)]
    pub claim: u64,
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub topic: String,
    pub job_id: Option<String>,
    pub payload: Value,
    pub delay: Duration,
    /// Leave an already waiting job with the same id alone when it is due no
    /// later than this one would be.
    pub keep_earlier: bool,
}

impl NewJob {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            job_id: None,
            payload,
            delay: Duration::ZERO,
            keep_earlier: false,
        }
    }

    pub fn with_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn keep_earlier(mut self) -> Self {
        self.keep_earlier = true;
        self
    }

    pub(crate) fn into_job(self) -> (Job, Duration) {
        let job = Job {
            id: self.job_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            topic: self.topic,
            payload: self.payload,
            published_at: Utc::now(),
            attempts: 0,
            claim: 0,
        };
        (job, self.delay)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishedJob {
    #[serde(flatten)]
    pub job: Job,
    pub finished_at: DateTime<Utc>,
    pub failed_reason: Option<String>,
}

impl FinishedJob {
    pub fn new(job: &Job, failed_reason: Option<&str>) -> Self {
        Self {
            job: job.clone(),
            finished_at: Utc::now(),
            failed_reason: failed_reason.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Predicate over job payloads, used to flush every job that references something.
pub type PayloadFilter<'a> = &'a (dyn Fn(&Value) -> bool + Send + Sync);

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job that becomes due after its delay. Returns the job id.
    ///
    /// A waiting job with the same id is replaced, unless the new job asks to
    /// `keep_earlier` and the waiting one is due first.
    async fn publish(&self, job: NewJob) -> Result<String>;

    /// Claim the earliest due job, moving it to `active` under a fresh claim.
    async fn reserve(&self, topic: &str) -> Result<Option<Job>>;

    async fn complete(&self, job: &Job) -> Result<()>;

    async fn fail(&self, job: &Job, reason: &str) -> Result<()>;

    /// Remove every waiting, active, completed and failed job whose payload matches.
    async fn flush(&self, topic: &str, matches: PayloadFilter<'_>) -> Result<usize>;

    /// Move jobs that have been active longer than `older_than` back to `waiting`.
    async fn recover_stalled(&self, topic: &str, older_than: Duration) -> Result<usize>;

    /// Whether a job with this id is waiting or active.
    async fn contains(&self, topic: &str, job_id: &str) -> Result<bool>;

    async fn counts(&self, topic: &str) -> Result<JobCounts>;
}
