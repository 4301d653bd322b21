//! Redis-backed queue.
//!
//! Per topic, under `{prefix}:{topic}:`:
//! - `waiting`   sorted set of job ids scored by due time (ms)
//! - `active`    sorted set of job ids scored by claim time (ms)
//! - `jobs`      hash of job id -> job JSON
//! - `attempts`  hash of job id -> delivery count
//! - `claims`    hash of active job id -> claim of the current delivery
//! - `seq`       counter the claims are drawn from
//! - `completed` / `failed`  capped lists of finished job JSON, newest first

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::{FinishedJob, Job, JobCounts, JobQueue, NewJob, PayloadFilter};
use crate::cache::{self, RedisPool};
use crate::{Error, Result};

const PUBLISH_SCRIPT: &str = r#"
if ARGV[4] == '1' then
  local due = redis.call('ZSCORE', KEYS[1], ARGV[1])
  if due and tonumber(due) <= tonumber(ARGV[3]) then
    return 0
  end
end
redis.call('HSET', KEYS[2], ARGV[1], ARGV[2])
redis.call('HDEL', KEYS[3], ARGV[1])
redis.call('ZADD', KEYS[1], ARGV[3], ARGV[1])
return 1
"#;

const RESERVE_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
if #ids == 0 then
  return false
end
local id = ids[1]
redis.call('ZREM', KEYS[1], id)
local record = redis.call('HGET', KEYS[3], id)
if not record then
  return false
end
redis.call('ZADD', KEYS[2], ARGV[1], id)
local attempts = redis.call('HINCRBY', KEYS[4], id, 1)
local claim = redis.call('INCR', KEYS[6])
redis.call('HSET', KEYS[5], id, claim)
return {record, attempts, claim}
"#;

const FINISH_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[6], ARGV[1]) ~= ARGV[4] then
  return 0
end
redis.call('HDEL', KEYS[6], ARGV[1])
redis.call('ZREM', KEYS[1], ARGV[1])
if not redis.call('ZSCORE', KEYS[2], ARGV[1]) then
  redis.call('HDEL', KEYS[3], ARGV[1])
  redis.call('HDEL', KEYS[4], ARGV[1])
end
redis.call('LPUSH', KEYS[5], ARGV[2])
redis.call('LTRIM', KEYS[5], 0, tonumber(ARGV[3]) - 1)
return 1
"#;

const RECOVER_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, id in ipairs(ids) do
  redis.call('ZREM', KEYS[1], id)
  redis.call('HDEL', KEYS[3], id)
  redis.call('ZADD', KEYS[2], 'NX', ARGV[2], id)
end
return #ids
"#;

pub struct RedisQueue {
    conn: MultiplexedConnection,
    prefix: String,
    keep_finished: usize,
    publish: Script,
    reserve: Script,
    finish: Script,
    recover: Script,
}

struct Keys {
    waiting: String,
    active: String,
    jobs: String,
    attempts: String,
    claims: String,
    seq: String,
    completed: String,
    failed: String,
}

impl RedisQueue {
    pub async fn connect(
        pool: &RedisPool,
        prefix: impl Into<String>,
        keep_finished: usize,
    ) -> Result<Self> {
        let conn = cache::connect(pool).await?;
        Ok(Self {
            conn,
            prefix: prefix.into(),
            keep_finished: keep_finished.max(1),
            publish: Script::new(PUBLISH_SCRIPT),
            reserve: Script::new(RESERVE_SCRIPT),
            finish: Script::new(FINISH_SCRIPT),
            recover: Script::new(RECOVER_SCRIPT),
        })
    }

    fn keys(&self, topic: &str) -> Keys {
        let base = format!("{}:{}", self.prefix, topic);
        Keys {
            waiting: format!("{base}:waiting"),
            active: format!("{base}:active"),
            jobs: format!("{base}:jobs"),
            attempts: format!("{base}:attempts"),
            claims: format!("{base}:claims"),
            seq: format!("{base}:seq"),
            completed: format!("{base}:completed"),
            failed: format!("{base}:failed"),
        }
    }

    async fn finish_job(&self, job: &Job, failed_reason: Option<&str>) -> Result<()> {
        let keys = self.keys(&job.topic);
        let list = if failed_reason.is_some() {
            &keys.failed
        } else {
            &keys.completed
        };
        let entry = serde_json::to_string(&FinishedJob::new(job, failed_reason))?;
        let mut conn = self.conn.clone();
        let recorded: i64 = self
            .finish
            .key(&keys.active)
            .key(&keys.waiting)
            .key(&keys.jobs)
            .key(&keys.attempts)
            .key(list)
            .key(&keys.claims)
            .arg(&job.id)
            .arg(entry)
            .arg(self.keep_finished)
            .arg(job.claim)
            .invoke_async(&mut conn)
            .await?;
        if recorded == 0 {
            debug!(
                job_id = %job.id,
                topic = %job.topic,
                claim = job.claim,
                "Finished delivery was no longer active"
            );
        }
        Ok(())
    }

    async fn flush_finished(&self, list: &str, matches: PayloadFilter<'_>) -> Result<usize> {
        let mut conn = self.conn.clone();
        let entries: Vec<String> = conn.lrange(list, 0, -1).await?;
        let doomed: Vec<String> = entries
            .into_iter()
            .filter(|raw| {
                serde_json::from_str::<FinishedJob>(raw).is_ok_and(|f| matches(&f.job.payload))
            })
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }

        let mut pipe = redis::pipe();
        for raw in &doomed {
            pipe.lrem(list, 1, raw).ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;
        Ok(doomed.len())
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn publish(&self, job: NewJob) -> Result<String> {
        let keep_earlier = job.keep_earlier;
        let (job, delay) = job.into_job();
        let keys = self.keys(&job.topic);
        let record = serde_json::to_string(&job)?;
        let due = now_ms() + delay.as_millis() as i64;

        let mut conn = self.conn.clone();
        let replaced: i64 = self
            .publish
            .key(&keys.waiting)
            .key(&keys.jobs)
            .key(&keys.attempts)
            .arg(&job.id)
            .arg(record)
            .arg(due)
            .arg(if keep_earlier { "1" } else { "0" })
            .invoke_async(&mut conn)
            .await?;
        if replaced == 0 {
            debug!(job_id = %job.id, topic = %job.topic, "Kept earlier waiting job");
        }
        Ok(job.id)
    }

    async fn reserve(&self, topic: &str) -> Result<Option<Job>> {
        let keys = self.keys(topic);
        let mut conn = self.conn.clone();
        let claimed: Option<(String, i64, u64)> = self
            .reserve
            .key(&keys.waiting)
            .key(&keys.active)
            .key(&keys.jobs)
            .key(&keys.attempts)
            .key(&keys.claims)
            .key(&keys.seq)
            .arg(now_ms())
            .invoke_async(&mut conn)
            .await?;

        let Some((record, attempts, claim)) = claimed else {
            return Ok(None);
        };
        let mut job: Job = serde_json::from_str(&record)
            .map_err(|e| Error::queue(format!("corrupt job record in {topic}: {e}")))?;
        job.attempts = u32::try_from(attempts).unwrap_or(u32::MAX);
        job.claim = claim;
        Ok(Some(job))
    }

    async fn complete(&self, job: &Job) -> Result<()> {
        self.finish_job(job, None).await
    }

    async fn fail(&self, job: &Job, reason: &str) -> Result<()> {
        self.finish_job(job, Some(reason)).await
    }

    async fn flush(&self, topic: &str, matches: PayloadFilter<'_>) -> Result<usize> {
        let keys = self.keys(topic);
        let mut conn = self.conn.clone();

        let records: HashMap<String, String> = conn.hgetall(&keys.jobs).await?;
        let doomed: Vec<String> = records
            .into_iter()
            .filter(|(_, raw)| serde_json::from_str::<Job>(raw).is_ok_and(|job| matches(&job.payload)))
            .map(|(id, _)| id)
            .collect();

        if !doomed.is_empty() {
            let mut pipe = redis::pipe();
            pipe.atomic();
            for id in &doomed {
                pipe.zrem(&keys.waiting, id)
                    .ignore()
                    .zrem(&keys.active, id)
                    .ignore()
                    .hdel(&keys.jobs, id)
                    .ignore()
                    .hdel(&keys.attempts, id)
                    .ignore()
                    .hdel(&keys.claims, id)
                    .ignore();
            }
            pipe.query_async::<()>(&mut conn).await?;
        }

        let completed = self.flush_finished(&keys.completed, matches).await?;
        let failed = self.flush_finished(&keys.failed, matches).await?;
        Ok(doomed.len() + completed + failed)
    }

    async fn recover_stalled(&self, topic: &str, older_than: Duration) -> Result<usize> {
        let keys = self.keys(topic);
        let now = now_ms();
        let cutoff = now - older_than.as_millis() as i64;
        let mut conn = self.conn.clone();
        let moved: usize = self
            .recover
            .key(&keys.active)
            .key(&keys.waiting)
            .key(&keys.claims)
            .arg(cutoff)
            .arg(now)
            .invoke_async(&mut conn)
            .await?;
        Ok(moved)
    }

    async fn contains(&self, topic: &str, job_id: &str) -> Result<bool> {
        let keys = self.keys(topic);
        let mut conn = self.conn.clone();
        let (waiting, active): (Option<f64>, Option<f64>) = redis::pipe()
            .zscore(&keys.waiting, job_id)
            .zscore(&keys.active, job_id)
            .query_async(&mut conn)
            .await?;
        Ok(waiting.is_some() || active.is_some())
    }

    async fn counts(&self, topic: &str) -> Result<JobCounts> {
        let keys = self.keys(topic);
        let mut conn = self.conn.clone();
        let (waiting, active, completed, failed): (usize, usize, usize, usize) = redis::pipe()
            .zcard(&keys.waiting)
            .zcard(&keys.active)
            .llen(&keys.completed)
            .llen(&keys.failed)
            .query_async(&mut conn)
            .await?;
        Ok(JobCounts {
            waiting,
            active,
            completed,
            failed,
        })
    }
}
