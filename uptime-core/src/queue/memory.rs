//! In-process queue: a min-heap of fire times per topic.

use async_trait::async_trait;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{FinishedJob, Job, JobCounts, JobQueue, NewJob, PayloadFilter};
use crate::Result;

#[derive(Default)]
struct TopicState {
    /// Latest record for every waiting or active job id.
    jobs: HashMap<String, Job>,
    /// Job id -> (fire time, generation). Heap entries whose generation no longer
    /// matches are stale and skipped.
    waiting: HashMap<String, (Instant, u64)>,
    schedule: BinaryHeap<Reverse<(Instant, u64, String)>>,
    /// Job id -> (claim time, claim).
    active: HashMap<String, (Instant, u64)>,
    completed: VecDeque<FinishedJob>,
    failed: VecDeque<FinishedJob>,
    generation: u64,
}

impl TopicState {
    fn enqueue(&mut self, id: String, fire_at: Instant) {
        self.generation += 1;
        self.waiting.insert(id.clone(), (fire_at, self.generation));
        self.schedule.push(Reverse((fire_at, self.generation, id)));
    }

    fn pop_due(&mut self, now: Instant) -> Option<String> {
        while let Some(Reverse((fire_at, generation, id))) = self.schedule.peek().cloned() {
            let current = self.waiting.get(&id).copied();
            if current != Some((fire_at, generation)) {
                self.schedule.pop();
                continue;
            }
            if fire_at > now {
                return None;
            }
            self.schedule.pop();
            self.waiting.remove(&id);
            return Some(id);
        }
        None
    }

    fn finish(&mut self, job: &Job, failed_reason: Option<&str>, keep: usize) {
        // Flushed, recovered or re-claimed while running: nothing left to record.
        match self.active.get(&job.id) {
            Some((_, claim)) if *claim == job.claim => {
                self.active.remove(&job.id);
            }
            _ => return,
        }
        if !self.waiting.contains_key(&job.id) {
            self.jobs.remove(&job.id);
        }
        let list = if failed_reason.is_some() {
            &mut self.failed
        } else {
            &mut self.completed
        };
        list.push_front(FinishedJob::new(job, failed_reason));
        list.truncate(keep);
    }
}

pub struct MemoryQueue {
    topics: Mutex<HashMap<String, TopicState>>,
    keep_finished: usize,
}

impl MemoryQueue {
    pub fn new(keep_finished: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            keep_finished,
        }
    }

    pub async fn completed(&self, topic: &str) -> Vec<FinishedJob> {
        let topics = self.topics.lock().await;
        topics
            .get(topic)
            .map(|t| t.completed.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn failed(&self, topic: &str) -> Vec<FinishedJob> {
        let topics = self.topics.lock().await;
        topics
            .get(topic)
            .map(|t| t.failed.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Time until the earliest waiting job of `topic` is due.
    pub async fn next_due_in(&self, topic: &str) -> Option<Duration> {
        let topics = self.topics.lock().await;
        let now = Instant::now();
        topics.get(topic)?.waiting.values().map(|(at, _)| at.saturating_duration_since(now)).min()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(100)
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn publish(&self, job: NewJob) -> Result<String> {
        let keep_earlier = job.keep_earlier;
        let (job, delay) = job.into_job();
        let id = job.id.clone();
        let fire_at = Instant::now() + delay;
        let mut topics = self.topics.lock().await;
        let state = topics.entry(job.topic.clone()).or_default();
        if keep_earlier
            && state
                .waiting
                .get(&id)
                .is_some_and(|(waiting_at, _)| *waiting_at <= fire_at)
        {
            return Ok(id);
        }
        state.jobs.insert(id.clone(), job);
        state.enqueue(id.clone(), fire_at);
        Ok(id)
    }

    async fn reserve(&self, topic: &str) -> Result<Option<Job>> {
        let mut topics = self.topics.lock().await;
        let Some(state) = topics.get_mut(topic) else {
            return Ok(None);
        };
        let now = Instant::now();
        while let Some(id) = state.pop_due(now) {
            let Some(job) = state.jobs.get_mut(&id) else {
                continue;
            };
            job.attempts += 1;
            let mut job = job.clone();
            state.generation += 1;
            job.claim = state.generation;
            state.active.insert(id, (now, job.claim));
            return Ok(Some(job));
        }
        Ok(None)
    }

    async fn complete(&self, job: &Job) -> Result<()> {
        let mut topics = self.topics.lock().await;
        if let Some(state) = topics.get_mut(&job.topic) {
            state.finish(job, None, self.keep_finished);
        }
        Ok(())
    }

    async fn fail(&self, job: &Job, reason: &str) -> Result<()> {
        let mut topics = self.topics.lock().await;
        if let Some(state) = topics.get_mut(&job.topic) {
            state.finish(job, Some(reason), self.keep_finished);
        }
        Ok(())
    }

    async fn flush(&self, topic: &str, matches: PayloadFilter<'_>) -> Result<usize> {
        let mut topics = self.topics.lock().await;
        let Some(state) = topics.get_mut(topic) else {
            return Ok(0);
        };

        let doomed: Vec<String> = state
            .jobs
            .iter()
            .filter(|(_, job)| matches(&job.payload))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &doomed {
            state.jobs.remove(id);
            state.waiting.remove(id);
            state.active.remove(id);
        }

        let before = state.completed.len() + state.failed.len();
        state.completed.retain(|f| !matches(&f.job.payload));
        state.failed.retain(|f| !matches(&f.job.payload));
        let finished_removed = before - state.completed.len() - state.failed.len();

        Ok(doomed.len() + finished_removed)
    }

    async fn recover_stalled(&self, topic: &str, older_than: Duration) -> Result<usize> {
        let mut topics = self.topics.lock().await;
        let Some(state) = topics.get_mut(topic) else {
            return Ok(0);
        };
        let now = Instant::now();
        let stalled: Vec<String> = state
            .active
            .iter()
            .filter(|(_, (claimed_at, _))| now.saturating_duration_since(*claimed_at) >= older_than)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stalled {
            state.active.remove(id);
            if !state.waiting.contains_key(id) {
                state.enqueue(id.clone(), now);
            }
        }
        Ok(stalled.len())
    }

    async fn contains(&self, topic: &str, job_id: &str) -> Result<bool> {
        let topics = self.topics.lock().await;
        Ok(topics
            .get(topic)
            .is_some_and(|t| t.waiting.contains_key(job_id) || t.active.contains_key(job_id)))
    }

    async fn counts(&self, topic: &str) -> Result<JobCounts> {
        let topics = self.topics.lock().await;
        Ok(topics
            .get(topic)
            .map(|t| JobCounts {
                waiting: t.waiting.len(),
                active: t.active.len(),
                completed: t.completed.len(),
                failed: t.failed.len(),
            })
            .unwrap_or_default())
    }
}
