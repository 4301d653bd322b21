use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{HistoryRepository, InstanceRepository, NotificationRepository};
use crate::models::{
    CheckRecord, CheckUpdate, Instance, InstanceInput, NotificationChannel, NotificationDetails,
};
use crate::{Error, Result};

#[derive(Default)]
struct Inner {
    instances: HashMap<Uuid, Instance>,
    /// Append order is chronological.
    history: Vec<CheckRecord>,
    notifications: HashMap<Uuid, NotificationChannel>,
}

/// In-process store with the same referential rules as the Postgres schema:
/// history cascades with its instance and deleting a channel clears references.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every write fails as if the database were down. Reads keep working.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::internal("store unavailable"));
        }
        Ok(())
    }

    pub async fn history_of(&self, instance_id: Uuid) -> Vec<CheckRecord> {
        let inner = self.inner.read().await;
        inner
            .history
            .iter()
            .filter(|r| r.instance_id == instance_id)
            .cloned()
            .collect()
    }
}

fn check_channel(inner: &Inner, channel_id: Option<Uuid>) -> Result<()> {
    match channel_id {
        Some(id) if !inner.notifications.contains_key(&id) => {
            Err(Error::not_found(format!("notification {id}")))
        }
        _ => Ok(()),
    }
}

#[async_trait]
impl InstanceRepository for MemoryStore {
    async fn get(&self, id: Uuid) -> Result<Option<Instance>> {
        Ok(self.inner.read().await.instances.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Instance>> {
        let inner = self.inner.read().await;
        let mut instances: Vec<_> = inner.instances.values().cloned().collect();
        instances.sort_by_key(|i| i.created_at);
        Ok(instances)
    }

    async fn insert(&self, input: &InstanceInput) -> Result<Instance> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        check_channel(&inner, input.notification_id)?;

        let now = Utc::now();
        let instance = Instance {
            id: Uuid::new_v4(),
            name: input.name.clone(),
            url: input.url.clone(),
            interval: input.interval,
            status: None,
            response_time_ms: None,
            uptime: None,
            notification_id: input.notification_id,
            created_at: now,
            updated_at: now,
        };
        inner.instances.insert(instance.id, instance.clone());
        Ok(instance)
    }

    async fn update(&self, id: Uuid, input: &InstanceInput) -> Result<Option<Instance>> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        check_channel(&inner, input.notification_id)?;

        let Some(instance) = inner.instances.get_mut(&id) else {
            return Ok(None);
        };
        instance.name = input.name.clone();
        instance.url = input.url.clone();
        instance.interval = input.interval;
        instance.notification_id = input.notification_id;
        instance.updated_at = Utc::now();
        Ok(Some(instance.clone()))
    }

    async fn update_after_check(&self, id: Uuid, update: &CheckUpdate) -> Result<bool> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        let Some(instance) = inner.instances.get_mut(&id) else {
            return Ok(false);
        };
        instance.status = Some(update.status);
        instance.uptime = Some(update.uptime);
        if update.response_time_ms.is_some() {
            instance.response_time_ms = update.response_time_ms;
        }
        instance.updated_at = update.checked_at;
        Ok(true)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        let removed = inner.instances.remove(&id).is_some();
        inner.history.retain(|r| r.instance_id != id);
        Ok(removed)
    }
}

#[async_trait]
impl HistoryRepository for MemoryStore {
    async fn append(&self, instance_id: Uuid, online: bool) -> Result<()> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        if !inner.instances.contains_key(&instance_id) {
            return Err(Error::not_found(format!("instance {instance_id}")));
        }
        inner.history.push(CheckRecord {
            instance_id,
            online,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn count_online(&self, instance_id: Uuid) -> Result<i64> {
        let inner = self.inner.read().await;
        let count = inner
            .history
            .iter()
            .filter(|r| r.instance_id == instance_id && r.online)
            .count();
        Ok(count as i64)
    }

    async fn count_total(&self, instance_id: Uuid) -> Result<i64> {
        let inner = self.inner.read().await;
        let count = inner
            .history
            .iter()
            .filter(|r| r.instance_id == instance_id)
            .count();
        Ok(count as i64)
    }

    async fn recent(&self, instance_id: Uuid, limit: usize) -> Result<Vec<bool>> {
        let inner = self.inner.read().await;
        Ok(inner
            .history
            .iter()
            .rev()
            .filter(|r| r.instance_id == instance_id)
            .take(limit)
            .map(|r| r.online)
            .collect())
    }
}

#[async_trait]
impl NotificationRepository for MemoryStore {
    async fn get(&self, id: Uuid) -> Result<Option<NotificationChannel>> {
        Ok(self.inner.read().await.notifications.get(&id).cloned())
    }

    async fn insert(&self, name: &str, details: &NotificationDetails) -> Result<NotificationChannel> {
        self.check_available()?;
        let now = Utc::now();
        let channel = NotificationChannel {
            id: Uuid::new_v4(),
            name: name.to_string(),
            details: details.clone(),
            created_at: now,
            updated_at: now,
        };
        self.inner
            .write()
            .await
            .notifications
            .insert(channel.id, channel.clone());
        Ok(channel)
    }

    async fn update(
        &self,
        id: Uuid,
        name: &str,
        details: &NotificationDetails,
    ) -> Result<Option<NotificationChannel>> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        let Some(channel) = inner.notifications.get_mut(&id) else {
            return Ok(None);
        };
        channel.name = name.to_string();
        channel.details = details.clone();
        channel.updated_at = Utc::now();
        Ok(Some(channel.clone()))
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        let removed = inner.notifications.remove(&id).is_some();
        for instance in inner.instances.values_mut() {
            if instance.notification_id == Some(id) {
                instance.notification_id = None;
            }
        }
        Ok(removed)
    }
}
