//! The check-instance cycle.
//!
//! Each job probes one instance, records the result and publishes the next job
//! for the same instance. The job id is the instance id, so an instance never has
//! more than one pending check.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::Result;
use crate::models::{CheckUpdate, Instance, InstanceStatus};
use crate::notify::Notifier;
use crate::probe::{ProbeOutcome, Prober};
use crate::queue::{Job, JobHandler, JobQueue, NewJob};
use crate::store::{HistoryRepository, InstanceRepository, NotificationRepository};
use crate::uptime;

pub const TOPIC: &str = "check-instance";

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Job payload. Only `instance_id` is authoritative; the rest are hints kept for
/// logs and for rescheduling when the registry cannot be read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInstanceJob {
    pub instance_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl CheckInstanceJob {
    pub fn for_instance(instance: &Instance) -> Self {
        Self {
            instance_id: instance.id,
            interval: Some(instance.interval),
            name: Some(instance.name.clone()),
            url: Some(instance.url.clone()),
        }
    }
}

pub fn interval_delay(interval_secs: i32) -> Duration {
    Duration::from_secs(u64::try_from(interval_secs).unwrap_or(0).max(1))
}

/// Matches every check job that targets `instance_id`.
pub fn references(instance_id: Uuid) -> impl Fn(&Value) -> bool + Send + Sync {
    let id = instance_id.to_string();
    move |payload| payload.get("instanceId").and_then(Value::as_str) == Some(id.as_str())
}

fn check_job(job: &CheckInstanceJob, delay: Duration) -> Result<NewJob> {
    let payload = serde_json::to_value(job)?;
    Ok(NewJob::new(TOPIC, payload)
        .with_id(job.instance_id.to_string())
        .with_delay(delay))
}

pub async fn publish_check(
    queue: &dyn JobQueue,
    job: &CheckInstanceJob,
    delay: Duration,
) -> Result<String> {
    queue.publish(check_job(job, delay)?).await
}

/// Publish the follow-up check of a cycle. A check that is already waiting and
/// due sooner, such as the one an edit publishes mid-cycle, is left in place.
pub async fn reschedule_check(
    queue: &dyn JobQueue,
    job: &CheckInstanceJob,
    delay: Duration,
) -> Result<String> {
    queue.publish(check_job(job, delay)?.keep_earlier()).await
}

/// Replace whatever check is pending for `instance` with one due after `delay`.
pub async fn schedule_check(
    queue: &dyn JobQueue,
    instance: &Instance,
    delay: Duration,
) -> Result<String> {
    publish_check(queue, &CheckInstanceJob::for_instance(instance), delay).await
}

pub async fn flush_instance(queue: &dyn JobQueue, instance_id: Uuid) -> Result<usize> {
    queue.flush(TOPIC, &references(instance_id)).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Rescheduled { delay: Duration },
    /// The instance is gone; no further job was published.
    Dropped,
}

pub struct CheckInstanceHandler {
    instances: Arc<dyn InstanceRepository>,
    history: Arc<dyn HistoryRepository>,
    notifications: Arc<dyn NotificationRepository>,
    prober: Arc<dyn Prober>,
    notifier: Arc<dyn Notifier>,
    queue: Arc<dyn JobQueue>,
    probe_timeout: Duration,
    default_interval: Duration,
}

impl CheckInstanceHandler {
    pub fn new<S>(
        store: Arc<S>,
        prober: Arc<dyn Prober>,
        notifier: Arc<dyn Notifier>,
        queue: Arc<dyn JobQueue>,
    ) -> Self
    where
        S: InstanceRepository + HistoryRepository + NotificationRepository + 'static,
    {
        Self {
            instances: store.clone(),
            history: store.clone(),
            notifications: store,
            prober,
            notifier,
            queue,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            default_interval: DEFAULT_INTERVAL,
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Delay used when the registry is unreadable and the job carries no hint.
    pub fn with_default_interval(mut self, interval: Duration) -> Self {
        self.default_interval = interval;
        self
    }

    pub async fn run_cycle(&self, job: &CheckInstanceJob) -> Result<CycleOutcome> {
        let id = job.instance_id;

        let instance = match self.instances.get(id).await {
            Ok(Some(instance)) => instance,
            Ok(None) => {
                info!(instance_id = %id, "Instance no longer registered, dropping check");
                return Ok(CycleOutcome::Dropped);
            }
            Err(e) => {
                let delay = job.interval.map(interval_delay).unwrap_or(self.default_interval);
                warn!(
                    instance_id = %id,
                    error = %e,
                    delay_secs = delay.as_secs(),
                    "Instance lookup failed, rescheduling from job hints"
                );
                reschedule_check(&*self.queue, job, delay).await?;
                return Ok(CycleOutcome::Rescheduled { delay });
            }
        };

        let outcome = self.prober.probe(&instance.url, self.probe_timeout).await;
        log_outcome(&instance, &outcome);

        if let Err(e) = self.history.append(id, outcome.reachable).await {
            error!(instance_id = %id, error = %e, "Failed to record check history");
        }

        let uptime = match self.current_uptime(id).await {
            Ok(uptime) => uptime,
            Err(e) => {
                error!(instance_id = %id, error = %e, "Failed to aggregate uptime");
                instance.uptime.unwrap_or(0.0)
            }
        };

        if !outcome.reachable {
            self.alert(&instance).await;
        }

        let update = CheckUpdate {
            status: InstanceStatus::from_reachable(outcome.reachable),
            uptime,
            response_time_ms: outcome
                .reachable
                .then(|| i32::try_from(outcome.latency_ms).unwrap_or(i32::MAX)),
            checked_at: Utc::now(),
        };
        match self.instances.update_after_check(id, &update).await {
            Ok(true) => {}
            Ok(false) => {
                info!(instance_id = %id, "Instance deleted during check, dropping");
                return Ok(CycleOutcome::Dropped);
            }
            Err(e) => error!(instance_id = %id, error = %e, "Failed to update instance status"),
        }

        // Re-read so an interval edited mid-cycle takes effect now.
        let current = match self.instances.get(id).await {
            Ok(Some(current)) => current,
            Ok(None) => {
                info!(instance_id = %id, "Instance deleted during check, dropping");
                return Ok(CycleOutcome::Dropped);
            }
            Err(e) => {
                warn!(instance_id = %id, error = %e, "Failed to re-read instance, keeping interval");
                instance
            }
        };

        let delay = interval_delay(current.interval);
        reschedule_check(&*self.queue, &CheckInstanceJob::for_instance(&current), delay).await?;
        Ok(CycleOutcome::Rescheduled { delay })
    }

    async fn current_uptime(&self, id: Uuid) -> Result<f64> {
        let online = self.history.count_online(id).await?;
        let total = self.history.count_total(id).await?;
        Ok(uptime::uptime(online, total))
    }

    async fn alert(&self, instance: &Instance) {
        let Some(channel_id) = instance.notification_id else {
            return;
        };
        match self.notifications.get(channel_id).await {
            Ok(Some(channel)) => self.notifier.notify(&channel, &instance.name).await,
            Ok(None) => warn!(
                instance_id = %instance.id,
                channel_id = %channel_id,
                "Linked notification channel not found"
            ),
            Err(e) => error!(
                instance_id = %instance.id,
                channel_id = %channel_id,
                error = %e,
                "Failed to load notification channel"
            ),
        }
    }
}

fn log_outcome(instance: &Instance, outcome: &ProbeOutcome) {
    if outcome.reachable {
        debug!(
            instance_id = %instance.id,
            url = %instance.url,
            latency_ms = outcome.latency_ms,
            "Instance is up"
        );
    } else {
        warn!(
            instance_id = %instance.id,
            url = %instance.url,
            status_code = ?outcome.status_code,
            error = outcome.error.as_deref().unwrap_or(""),
            "Instance is down"
        );
    }
}

#[async_trait]
impl JobHandler for CheckInstanceHandler {
    async fn handle(&self, job: &Job) -> Result<()> {
        let payload: CheckInstanceJob = serde_json::from_value(job.payload.clone())?;
        match self.run_cycle(&payload).await? {
            CycleOutcome::Rescheduled { delay } => debug!(
                instance_id = %payload.instance_id,
                delay_secs = delay.as_secs(),
                "Next check scheduled"
            ),
            CycleOutcome::Dropped => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_wire_format() {
        let id = Uuid::new_v4();
        let job = CheckInstanceJob {
            instance_id: id,
            interval: Some(30),
            name: None,
            url: None,
        };
        assert_eq!(
            serde_json::to_value(&job).unwrap(),
            json!({ "instanceId": id.to_string(), "interval": 30 })
        );

        let bare: CheckInstanceJob =
            serde_json::from_value(json!({ "instanceId": id.to_string() })).unwrap();
        assert_eq!(bare.interval, None);
    }

    #[test]
    fn test_references_matches_only_its_instance() {
        let id = Uuid::new_v4();
        let matches = references(id);
        assert!(matches(&json!({ "instanceId": id.to_string() })));
        assert!(!matches(&json!({ "instanceId": Uuid::new_v4().to_string() })));
        assert!(!matches(&json!({})));
    }

    #[test]
    fn test_interval_delay_floor() {
        assert_eq!(interval_delay(10), Duration::from_secs(10));
        assert_eq!(interval_delay(0), Duration::from_secs(1));
        assert_eq!(interval_delay(-5), Duration::from_secs(1));
    }
}
