use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uptime_core::{
    Result,
    check::{CheckInstanceHandler, TOPIC, schedule_check},
    config::SchedulerConfig,
    notify::HttpNotifier,
    probe::HttpProber,
    queue::{Consumer, ConsumerOptions, JobQueue},
    store::{HistoryRepository, InstanceRepository, NotificationRepository},
};

pub struct CheckScheduler {
    instances: Arc<dyn InstanceRepository>,
    queue: Arc<dyn JobQueue>,
    handler: Arc<CheckInstanceHandler>,
    options: ConsumerOptions,
    consumer: Option<Consumer>,
}

impl CheckScheduler {
    pub fn new<S>(store: Arc<S>, queue: Arc<dyn JobQueue>, config: &SchedulerConfig) -> Self
    where
        S: InstanceRepository + HistoryRepository + NotificationRepository + 'static,
    {
        let http_client = Client::new();
        let handler = CheckInstanceHandler::new(
            store.clone(),
            Arc::new(HttpProber::with_client(http_client.clone())),
            Arc::new(HttpNotifier::with_client(
                http_client,
                config.telegram_api_base.clone(),
                config.notify_timeout(),
            )),
            queue.clone(),
        )
        .with_probe_timeout(config.probe_timeout())
        .with_default_interval(config.default_interval());

        Self::with_handler(store, queue, Arc::new(handler), config)
    }

    fn with_handler(
        instances: Arc<dyn InstanceRepository>,
        queue: Arc<dyn JobQueue>,
        handler: Arc<CheckInstanceHandler>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            instances,
            queue,
            handler,
            options: ConsumerOptions {
                concurrency: config.concurrency,
                poll_interval: config.poll_interval(),
                stalled_after: config.stalled_after(),
            },
            consumer: None,
        }
    }

    pub fn start(&mut self) {
        if self.consumer.is_some() {
            warn!("Check scheduler already started");
            return;
        }
        info!(concurrency = self.options.concurrency, "Starting check scheduler");
        self.consumer = Some(Consumer::spawn(
            self.queue.clone(),
            TOPIC,
            self.handler.clone(),
            self.options.clone(),
        ));
    }

    /// Give every registered instance without a pending check an immediate one.
    pub async fn load_and_schedule_instances(&self) -> Result<usize> {
        let instances = self.instances.list().await?;
        info!("Found {} registered instances", instances.len());

        let mut scheduled = 0;
        for instance in &instances {
            if self.queue.contains(TOPIC, &instance.id.to_string()).await? {
                continue;
            }
            schedule_check(&*self.queue, instance, Duration::ZERO).await?;
            info!(
                instance_id = %instance.id,
                name = %instance.name,
                interval = instance.interval,
                "Scheduled instance"
            );
            scheduled += 1;
        }

        info!(scheduled, "Schedule bootstrap finished");
        Ok(scheduled)
    }

    pub async fn stop(&mut self) {
        info!("Stopping check scheduler");
        if let Some(consumer) = self.consumer.take() {
            consumer.shutdown().await;
        }
        info!("Check scheduler stopped");
    }
}
