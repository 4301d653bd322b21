//! Data-access contract for the registry, the check history and notification channels.
//!
//! The check pipeline only talks to these traits. `PgStore` is the production
//! implementation; `MemoryStore` mirrors its referential behaviour in process.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::Result;
use crate::models::{CheckUpdate, Instance, InstanceInput, NotificationChannel, NotificationDetails};

#[async_trait]
pub trait InstanceRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Instance>>;

    async fn list(&self) -> Result<Vec<Instance>>;

    async fn insert(&self, input: &InstanceInput) -> Result<Instance>;

    /// Replace the user-editable fields. `None` when the instance does not exist.
    async fn update(&self, id: Uuid, input: &InstanceInput) -> Result<Option<Instance>>;

    /// Returns `false` when no row was touched, i.e. the instance is gone.
    async fn update_after_check(&self, id: Uuid, update: &CheckUpdate) -> Result<bool>;

    /// Deleting an instance drops its history with it.
    async fn delete(&self, id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait HistoryRepository: Send + Sync {
    async fn append(&self, instance_id: Uuid, online: bool) -> Result<()>;

    async fn count_online(&self, instance_id: Uuid) -> Result<i64>;

    async fn count_total(&self, instance_id: Uuid) -> Result<i64>;

    /// Newest first.
    async fn recent(&self, instance_id: Uuid, limit: usize) -> Result<Vec<bool>>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<NotificationChannel>>;

    async fn insert(&self, name: &str, details: &NotificationDetails) -> Result<NotificationChannel>;

    async fn update(
        &self,
        id: Uuid,
        name: &str,
        details: &NotificationDetails,
    ) -> Result<Option<NotificationChannel>>;

    /// Instances that referenced the channel keep existing with no channel.
    async fn delete(&self, id: Uuid) -> Result<bool>;
}
