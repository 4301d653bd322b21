//! Registry writes and the queue bookkeeping that must accompany them.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::check::{flush_instance, schedule_check};
use crate::models::{ChannelInput, Instance, InstanceInput, NotificationChannel};
use crate::queue::JobQueue;
use crate::store::{InstanceRepository, NotificationRepository};
use crate::{Error, Result};

pub struct InstanceService {
    instances: Arc<dyn InstanceRepository>,
    notifications: Arc<dyn NotificationRepository>,
    queue: Arc<dyn JobQueue>,
}

impl InstanceService {
    pub fn new<S>(store: Arc<S>, queue: Arc<dyn JobQueue>) -> Self
    where
        S: InstanceRepository + NotificationRepository + 'static,
    {
        Self::with_repositories(store.clone(), store, queue)
    }

    pub fn with_repositories(
        instances: Arc<dyn InstanceRepository>,
        notifications: Arc<dyn NotificationRepository>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            instances,
            notifications,
            queue,
        }
    }

    /// An instance may only link a channel that exists.
    async fn check_channel(&self, input: &InstanceInput) -> Result<()> {
        let Some(channel_id) = input.notification_id else {
            return Ok(());
        };
        match self.notifications.get(channel_id).await? {
            Some(_) => Ok(()),
            None => Err(Error::not_found(format!("notification {channel_id}"))),
        }
    }

    /// Insert the instance and check it right away.
    pub async fn register(&self, input: InstanceInput) -> Result<Instance> {
        input.validate()?;
        self.check_channel(&input).await?;
        let instance = self.instances.insert(&input).await?;
        schedule_check(&*self.queue, &instance, Duration::ZERO).await?;
        info!(instance_id = %instance.id, url = %instance.url, "Instance registered");
        Ok(instance)
    }

    /// Apply the edit, drop the pending check and check again right away with the
    /// new settings.
    pub async fn edit(&self, id: Uuid, input: InstanceInput) -> Result<Instance> {
        input.validate()?;
        self.check_channel(&input).await?;
        let instance = self
            .instances
            .update(id, &input)
            .await?
            .ok_or_else(|| Error::not_found(format!("instance {id}")))?;
        flush_instance(&*self.queue, id).await?;
        schedule_check(&*self.queue, &instance, Duration::ZERO).await?;
        info!(instance_id = %id, interval = instance.interval, "Instance updated");
        Ok(instance)
    }

    pub async fn remove(&self, id: Uuid) -> Result<()> {
        let removed = self.instances.delete(id).await?;
        // Flush even when the row was already gone so stray jobs do not linger.
        let flushed = flush_instance(&*self.queue, id).await?;
        if !removed {
            return Err(Error::not_found(format!("instance {id}")));
        }
        info!(instance_id = %id, flushed, "Instance removed");
        Ok(())
    }
}

pub struct ChannelService {
    notifications: Arc<dyn NotificationRepository>,
}

impl ChannelService {
    pub fn new(notifications: Arc<dyn NotificationRepository>) -> Self {
        Self { notifications }
    }

    pub async fn create(&self, input: ChannelInput) -> Result<NotificationChannel> {
        let details = input.validate()?;
        let channel = self.notifications.insert(&input.name, &details).await?;
        info!(channel_id = %channel.id, kind = ?details.kind(), "Notification channel created");
        Ok(channel)
    }

    pub async fn update(&self, id: Uuid, input: ChannelInput) -> Result<NotificationChannel> {
        let details = input.validate()?;
        self.notifications
            .update(id, &input.name, &details)
            .await?
            .ok_or_else(|| Error::not_found(format!("notification {id}")))
    }

    /// Instances that referenced the channel keep running without alerts.
    pub async fn remove(&self, id: Uuid) -> Result<()> {
        if !self.notifications.delete(id).await? {
            return Err(Error::not_found(format!("notification {id}")));
        }
        info!(channel_id = %id, "Notification channel removed");
        Ok(())
    }
}
