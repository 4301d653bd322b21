use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use uptime_core::check::{CheckInstanceHandler, CheckInstanceJob, CycleOutcome, TOPIC};
use uptime_core::instances::InstanceService;
use uptime_core::models::{
    CheckUpdate, Instance, InstanceInput, InstanceStatus, NotificationChannel,
    NotificationDetails, SlackDetails,
};
use uptime_core::notify::Notifier;
use uptime_core::probe::{ProbeOutcome, Prober};
use uptime_core::queue::{Consumer, ConsumerOptions, JobQueue, MemoryQueue};
use uptime_core::store::{
    HistoryRepository, InstanceRepository, MemoryStore, NotificationRepository,
};
use uptime_core::{Error, Result};

/// Replays a fixed sequence of reachability results, then stays up.
struct ScriptedProber {
    script: Mutex<VecDeque<bool>>,
}

impl ScriptedProber {
    fn new(script: impl IntoIterator<Item = bool>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
        }
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, _url: &str, _timeout: Duration) -> ProbeOutcome {
        let reachable = self.script.lock().unwrap().pop_front().unwrap_or(true);
        if reachable {
            ProbeOutcome::up(42)
        } else {
            ProbeOutcome::down(5, "connection refused")
        }
    }
}

/// Deletes the instance while the probe is in flight.
struct DeletingProber {
    store: Arc<MemoryStore>,
    id: Uuid,
}

#[async_trait]
impl Prober for DeletingProber {
    async fn probe(&self, _url: &str, _timeout: Duration) -> ProbeOutcome {
        InstanceRepository::delete(&*self.store, self.id).await.unwrap();
        ProbeOutcome::up(10)
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(Uuid, String)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, channel: &NotificationChannel, instance_name: &str) {
        self.sent
            .lock()
            .unwrap()
            .push((channel.id, instance_name.to_string()));
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    queue: Arc<MemoryQueue>,
    notifier: Arc<RecordingNotifier>,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            queue: Arc::new(MemoryQueue::default()),
            notifier: Arc::new(RecordingNotifier::default()),
        }
    }

    fn handler(&self, prober: impl Prober + 'static) -> CheckInstanceHandler {
        CheckInstanceHandler::new(
            self.store.clone(),
            Arc::new(prober),
            self.notifier.clone(),
            self.queue.clone(),
        )
    }

    async fn instance(&self, interval: i32, notification_id: Option<Uuid>) -> Instance {
        InstanceRepository::insert(&*self.store, &input(interval, notification_id))
            .await
            .unwrap()
    }

    async fn channel(&self) -> NotificationChannel {
        NotificationRepository::insert(
            &*self.store,
            "ops",
            &NotificationDetails::Slack(SlackDetails {
                webhook_url: "https://hooks.slack.test/x".to_string(),
                channel_name: None,
            }),
        )
        .await
        .unwrap()
    }

    async fn reload(&self, id: Uuid) -> Instance {
        InstanceRepository::get(&*self.store, id).await.unwrap().unwrap()
    }

    fn sent(&self) -> usize {
        self.notifier.sent.lock().unwrap().len()
    }
}

fn input(interval: i32, notification_id: Option<Uuid>) -> InstanceInput {
    InstanceInput {
        name: "svc".to_string(),
        url: "http://svc.test/health".to_string(),
        interval,
        notification_id,
    }
}

#[tokio::test]
async fn reachable_instance_goes_online_with_full_uptime() {
    let h = Harness::new();
    let instance = h.instance(30, None).await;
    let handler = h.handler(ScriptedProber::new([true]));

    let outcome = handler
        .run_cycle(&CheckInstanceJob::for_instance(&instance))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        CycleOutcome::Rescheduled {
            delay: Duration::from_secs(30)
        }
    );
    let after = h.reload(instance.id).await;
    assert_eq!(after.status, Some(InstanceStatus::Online));
    assert_eq!(after.uptime, Some(100.0));
    assert_eq!(after.response_time_ms, Some(42));

    let history = h.store.history_of(instance.id).await;
    assert_eq!(history.len(), 1);
    assert!(history[0].online);
    assert!(h.queue.contains(TOPIC, &instance.id.to_string()).await.unwrap());
}

#[tokio::test]
async fn unreachable_instance_alerts_linked_channel_once() {
    let h = Harness::new();
    let channel = h.channel().await;
    let instance = h.instance(30, Some(channel.id)).await;
    let handler = h.handler(ScriptedProber::new([false]));

    handler
        .run_cycle(&CheckInstanceJob::for_instance(&instance))
        .await
        .unwrap();

    let after = h.reload(instance.id).await;
    assert_eq!(after.status, Some(InstanceStatus::Offline));
    assert_eq!(after.uptime, Some(0.0));
    assert_eq!(after.response_time_ms, None);

    let sent = h.notifier.sent.lock().unwrap().clone();
    assert_eq!(sent, vec![(channel.id, "svc".to_string())]);
}

#[tokio::test]
async fn unreachable_instance_without_channel_stays_quiet() {
    let h = Harness::new();
    let instance = h.instance(30, None).await;
    let handler = h.handler(ScriptedProber::new([false]));

    handler
        .run_cycle(&CheckInstanceJob::for_instance(&instance))
        .await
        .unwrap();

    assert_eq!(h.reload(instance.id).await.status, Some(InstanceStatus::Offline));
    assert_eq!(h.sent(), 0);
}

#[tokio::test]
async fn uptime_tracks_mixed_history() {
    let h = Harness::new();
    let channel = h.channel().await;
    let instance = h.instance(30, Some(channel.id)).await;
    let script = [true, true, false, true, true, false, true, true, false, true];
    let handler = h.handler(ScriptedProber::new(script));

    for _ in 0..script.len() {
        handler
            .run_cycle(&CheckInstanceJob::for_instance(&instance))
            .await
            .unwrap();
    }

    let after = h.reload(instance.id).await;
    assert_eq!(after.uptime, Some(70.0));
    assert_eq!(after.status, Some(InstanceStatus::Online));
    // Every failed check alerts; there is no debouncing.
    assert_eq!(h.sent(), 3);
    // A failed check keeps the last good response time.
    assert_eq!(after.response_time_ms, Some(42));
    assert_eq!(h.queue.counts(TOPIC).await.unwrap().waiting, 1);
}

#[tokio::test]
async fn missing_instance_is_dropped() {
    let h = Harness::new();
    let handler = h.handler(ScriptedProber::new([]));
    let job = CheckInstanceJob {
        instance_id: Uuid::new_v4(),
        interval: Some(30),
        name: None,
        url: None,
    };

    assert_eq!(handler.run_cycle(&job).await.unwrap(), CycleOutcome::Dropped);
    assert_eq!(h.queue.counts(TOPIC).await.unwrap().waiting, 0);
}

#[tokio::test]
async fn delete_during_check_drops_without_recreating() {
    let h = Harness::new();
    let instance = h.instance(30, None).await;
    let handler = h.handler(DeletingProber {
        store: h.store.clone(),
        id: instance.id,
    });

    let outcome = handler
        .run_cycle(&CheckInstanceJob::for_instance(&instance))
        .await
        .unwrap();

    assert_eq!(outcome, CycleOutcome::Dropped);
    assert!(InstanceRepository::get(&*h.store, instance.id).await.unwrap().is_none());
    assert!(h.store.history_of(instance.id).await.is_empty());
    assert!(!h.queue.contains(TOPIC, &instance.id.to_string()).await.unwrap());
}

#[tokio::test]
async fn write_failures_still_reschedule() {
    let h = Harness::new();
    let instance = h.instance(15, None).await;
    let handler = h.handler(ScriptedProber::new([true]));
    h.store.set_unavailable(true);

    let outcome = handler
        .run_cycle(&CheckInstanceJob::for_instance(&instance))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        CycleOutcome::Rescheduled {
            delay: Duration::from_secs(15)
        }
    );
    assert!(h.store.history_of(instance.id).await.is_empty());
    assert!(h.queue.contains(TOPIC, &instance.id.to_string()).await.unwrap());
}

/// Registry whose reads and writes all fail.
struct OfflineRegistry;

fn offline<T>() -> Result<T> {
    Err(Error::internal("registry offline"))
}

#[async_trait]
impl InstanceRepository for OfflineRegistry {
    async fn get(&self, _id: Uuid) -> Result<Option<Instance>> {
        offline()
    }
    async fn list(&self) -> Result<Vec<Instance>> {
        offline()
    }
    async fn insert(&self, _input: &InstanceInput) -> Result<Instance> {
        offline()
    }
    async fn update(&self, _id: Uuid, _input: &InstanceInput) -> Result<Option<Instance>> {
        offline()
    }
    async fn update_after_check(&self, _id: Uuid, _update: &CheckUpdate) -> Result<bool> {
        offline()
    }
    async fn delete(&self, _id: Uuid) -> Result<bool> {
        offline()
    }
}

#[async_trait]
impl HistoryRepository for OfflineRegistry {
    async fn append(&self, _instance_id: Uuid, _online: bool) -> Result<()> {
        offline()
    }
    async fn count_online(&self, _instance_id: Uuid) -> Result<i64> {
        offline()
    }
    async fn count_total(&self, _instance_id: Uuid) -> Result<i64> {
        offline()
    }
    async fn recent(&self, _instance_id: Uuid, _limit: usize) -> Result<Vec<bool>> {
        offline()
    }
}

#[async_trait]
impl NotificationRepository for OfflineRegistry {
    async fn get(&self, _id: Uuid) -> Result<Option<NotificationChannel>> {
        offline()
    }
    async fn insert(
        &self,
        _name: &str,
        _details: &NotificationDetails,
    ) -> Result<NotificationChannel> {
        offline()
    }
    async fn update(
        &self,
        _id: Uuid,
        _name: &str,
        _details: &NotificationDetails,
    ) -> Result<Option<NotificationChannel>> {
        offline()
    }
    async fn delete(&self, _id: Uuid) -> Result<bool> {
        offline()
    }
}

#[tokio::test]
async fn lookup_failure_reschedules_from_hint_or_default() {
    let queue = Arc::new(MemoryQueue::default());
    let handler = CheckInstanceHandler::new(
        Arc::new(OfflineRegistry),
        Arc::new(ScriptedProber::new([])),
        Arc::new(RecordingNotifier::default()),
        queue.clone(),
    )
    .with_default_interval(Duration::from_secs(45));

    let hinted = CheckInstanceJob {
        instance_id: Uuid::new_v4(),
        interval: Some(20),
        name: Some("svc".to_string()),
        url: None,
    };
    assert_eq!(
        handler.run_cycle(&hinted).await.unwrap(),
        CycleOutcome::Rescheduled {
            delay: Duration::from_secs(20)
        }
    );

    let bare = CheckInstanceJob {
        instance_id: Uuid::new_v4(),
        interval: None,
        name: None,
        url: None,
    };
    assert_eq!(
        handler.run_cycle(&bare).await.unwrap(),
        CycleOutcome::Rescheduled {
            delay: Duration::from_secs(45)
        }
    );
    assert_eq!(queue.counts(TOPIC).await.unwrap().waiting, 2);
}

#[tokio::test(start_paused = true)]
async fn interval_edit_takes_effect_on_next_check() {
    let h = Harness::new();
    let service = InstanceService::new(h.store.clone(), h.queue.clone());
    let instance = service.register(input(300, None)).await.unwrap();

    let consumer = Consumer::spawn(
        h.queue.clone(),
        TOPIC,
        Arc::new(h.handler(ScriptedProber::new([]))),
        ConsumerOptions {
            concurrency: 1,
            poll_interval: Duration::from_millis(100),
            stalled_after: Duration::from_secs(60),
        },
    );

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.store.history_of(instance.id).await.len(), 1);
    let pending = h.queue.next_due_in(TOPIC).await.unwrap();
    assert!(pending > Duration::from_secs(290));

    service.edit(instance.id, input(10, None)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.store.history_of(instance.id).await.len(), 2);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.store.history_of(instance.id).await.len(), 3);

    consumer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn removed_instance_is_never_checked_again() {
    let h = Harness::new();
    let service = InstanceService::new(h.store.clone(), h.queue.clone());
    let instance = service.register(input(5, None)).await.unwrap();

    let consumer = Consumer::spawn(
        h.queue.clone(),
        TOPIC,
        Arc::new(h.handler(ScriptedProber::new([]))),
        ConsumerOptions {
            concurrency: 2,
            poll_interval: Duration::from_millis(100),
            stalled_after: Duration::from_secs(60),
        },
    );

    tokio::time::sleep(Duration::from_secs(1)).await;
    service.remove(instance.id).await.unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    let counts = h.queue.counts(TOPIC).await.unwrap();
    assert_eq!(counts.waiting, 0);
    assert_eq!(counts.active, 0);
    consumer.shutdown().await;
}

/// Registry that applies an edit right after the cycle re-reads the instance and
/// hands back the row as it was before the edit.
struct EditAfterReread {
    store: Arc<MemoryStore>,
    service: InstanceService,
    edit: InstanceInput,
    reads: AtomicUsize,
}

#[async_trait]
impl InstanceRepository for EditAfterReread {
    async fn get(&self, id: Uuid) -> Result<Option<Instance>> {
        let current = InstanceRepository::get(&*self.store, id).await?;
        if self.reads.fetch_add(1, Ordering::SeqCst) == 1 {
            self.service.edit(id, self.edit.clone()).await?;
        }
        Ok(current)
    }
    async fn list(&self) -> Result<Vec<Instance>> {
        InstanceRepository::list(&*self.store).await
    }
    async fn insert(&self, input: &InstanceInput) -> Result<Instance> {
        InstanceRepository::insert(&*self.store, input).await
    }
    async fn update(&self, id: Uuid, input: &InstanceInput) -> Result<Option<Instance>> {
        InstanceRepository::update(&*self.store, id, input).await
    }
    async fn update_after_check(&self, id: Uuid, update: &CheckUpdate) -> Result<bool> {
        self.store.update_after_check(id, update).await
    }
    async fn delete(&self, id: Uuid) -> Result<bool> {
        InstanceRepository::delete(&*self.store, id).await
    }
}

#[async_trait]
impl HistoryRepository for EditAfterReread {
    async fn append(&self, instance_id: Uuid, online: bool) -> Result<()> {
        self.store.append(instance_id, online).await
    }
    async fn count_online(&self, instance_id: Uuid) -> Result<i64> {
        self.store.count_online(instance_id).await
    }
    async fn count_total(&self, instance_id: Uuid) -> Result<i64> {
        self.store.count_total(instance_id).await
    }
    async fn recent(&self, instance_id: Uuid, limit: usize) -> Result<Vec<bool>> {
        self.store.recent(instance_id, limit).await
    }
}

#[async_trait]
impl NotificationRepository for EditAfterReread {
    async fn get(&self, id: Uuid) -> Result<Option<NotificationChannel>> {
        NotificationRepository::get(&*self.store, id).await
    }
    async fn insert(&self, name: &str, details: &NotificationDetails) -> Result<NotificationChannel> {
        NotificationRepository::insert(&*self.store, name, details).await
    }
    async fn update(
        &self,
        id: Uuid,
        name: &str,
        details: &NotificationDetails,
    ) -> Result<Option<NotificationChannel>> {
        NotificationRepository::update(&*self.store, id, name, details).await
    }
    async fn delete(&self, id: Uuid) -> Result<bool> {
        NotificationRepository::delete(&*self.store, id).await
    }
}

#[tokio::test(start_paused = true)]
async fn edit_landing_after_reread_is_not_overwritten() {
    let h = Harness::new();
    let instance = h.instance(300, None).await;
    let registry = Arc::new(EditAfterReread {
        store: h.store.clone(),
        service: InstanceService::new(h.store.clone(), h.queue.clone()),
        edit: input(10, None),
        reads: AtomicUsize::new(0),
    });
    let handler = CheckInstanceHandler::new(
        registry.clone(),
        Arc::new(ScriptedProber::new([true])),
        h.notifier.clone(),
        h.queue.clone(),
    );

    let outcome = handler
        .run_cycle(&CheckInstanceJob::for_instance(&instance))
        .await
        .unwrap();

    // The cycle still saw the old row.
    assert_eq!(
        outcome,
        CycleOutcome::Rescheduled {
            delay: Duration::from_secs(300)
        }
    );
    assert_eq!(registry.reads.load(Ordering::SeqCst), 2);
    assert_eq!(h.reload(instance.id).await.interval, 10);

    // The immediate check published by the edit survives the cycle's reschedule.
    assert_eq!(h.queue.counts(TOPIC).await.unwrap().waiting, 1);
    assert_eq!(h.queue.next_due_in(TOPIC).await, Some(Duration::ZERO));
    let next = h.queue.reserve(TOPIC).await.unwrap().unwrap();
    assert_eq!(next.payload["interval"], 10);
}
