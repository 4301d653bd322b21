use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{Job, JobQueue};
use crate::Result;

/// Processes one job. `Ok` marks it completed, `Err` marks it failed; failed jobs
/// are not retried.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub stalled_after: Duration,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            poll_interval: Duration::from_millis(500),
            stalled_after: Duration::from_secs(60),
        }
    }
}

/// A pool of workers draining one topic, plus a sweeper that requeues stalled jobs.
pub struct Consumer {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Consumer {
    pub fn spawn(
        queue: Arc<dyn JobQueue>,
        topic: impl Into<String>,
        handler: Arc<dyn JobHandler>,
        options: ConsumerOptions,
    ) -> Self {
        let topic = topic.into();
        let (shutdown, _) = watch::channel(false);
        let mut tasks = Vec::with_capacity(options.concurrency + 1);

        for worker in 0..options.concurrency.max(1) {
            let worker = Worker {
                id: worker,
                queue: queue.clone(),
                topic: topic.clone(),
                handler: handler.clone(),
                poll_interval: options.poll_interval,
            };
            tasks.push(tokio::spawn(worker.run(shutdown.subscribe())));
        }

        tasks.push(tokio::spawn(sweep_stalled(
            queue,
            topic.clone(),
            options.stalled_after,
            shutdown.subscribe(),
        )));

        info!(topic = %topic, workers = options.concurrency.max(1), "Consumer started");
        Self { shutdown, tasks }
    }

    /// Stop taking new jobs and wait for in-flight ones to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Consumer task ended abnormally");
            }
        }
        info!("Consumer stopped");
    }
}

struct Worker {
    id: usize,
    queue: Arc<dyn JobQueue>,
    topic: String,
    handler: Arc<dyn JobHandler>,
    poll_interval: Duration,
}

impl Worker {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.queue.reserve(&self.topic).await {
                Ok(Some(job)) => self.process(job).await,
                Ok(None) => idle(self.poll_interval, &mut shutdown).await,
                Err(e) => {
                    if e.is_queue_unavailable() {
                        warn!(worker = self.id, topic = %self.topic, error = %e, "Queue unavailable");
                    } else {
                        error!(worker = self.id, topic = %self.topic, error = %e, "Failed to reserve job");
                    }
                    idle(self.poll_interval, &mut shutdown).await;
                }
            }
        }
        debug!(worker = self.id, "Worker exited");
    }

    async fn process(&self, job: Job) {
        if job.attempts > 1 {
            warn!(job_id = %job.id, attempts = job.attempts, "Redelivering stalled job");
        }

        // Run the handler on its own task so a panic only fails this job.
        let handler = self.handler.clone();
        let running = job.clone();
        let outcome = tokio::spawn(async move { handler.handle(&running).await }).await;

        let finished = match outcome {
            Ok(Ok(())) => self.queue.complete(&job).await,
            Ok(Err(e)) => {
                error!(job_id = %job.id, topic = %self.topic, error = %e, "Job failed");
                self.queue.fail(&job, &e.to_string()).await
            }
            Err(e) => {
                error!(job_id = %job.id, topic = %self.topic, error = %e, "Job handler panicked");
                self.queue.fail(&job, "handler panicked").await
            }
        };
        if let Err(e) = finished {
            warn!(job_id = %job.id, error = %e, "Failed to record job outcome");
        }
    }
}

async fn idle(poll_interval: Duration, shutdown: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::time::sleep(poll_interval) => {}
        _ = shutdown.changed() => {}
    }
}

async fn sweep_stalled(
    queue: Arc<dyn JobQueue>,
    topic: String,
    stalled_after: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = (stalled_after / 2).max(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
        match queue.recover_stalled(&topic, stalled_after).await {
            Ok(0) => {}
            Ok(moved) => warn!(topic = %topic, moved, "Requeued stalled jobs"),
            Err(e) => warn!(topic = %topic, error = %e, "Stalled job sweep failed"),
        }
    }
}
