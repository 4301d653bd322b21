use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use super::{HistoryRepository, InstanceRepository, NotificationRepository};
use crate::Result;
use crate::db::DatabasePool;
use crate::models::{
    CheckUpdate, Instance, InstanceInput, NotificationChannel, NotificationDetails, NotificationKind,
};

const INSTANCE_COLUMNS: &str = "id, name, url, interval_secs AS interval, status, response_time_ms, \
     uptime::float8 AS uptime, notification_id, created_at, updated_at";

const NOTIFICATION_COLUMNS: &str = "id, name, type, details, created_at, updated_at";

/// Postgres-backed registry, history ledger and channel store.
#[derive(Debug, Clone)]
pub struct PgStore {
    db: DatabasePool,
}

impl PgStore {
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.db
    }
}

/// A link to a channel that does not exist trips the foreign key.
fn channel_violation(e: sqlx::Error, channel_id: Option<Uuid>) -> crate::Error {
    match (&e, channel_id) {
        (sqlx::Error::Database(db), Some(id)) if db.is_foreign_key_violation() => {
            crate::Error::not_found(format!("notification {id}"))
        }
        _ => e.into(),
    }
}

#[derive(Debug, FromRow)]
struct NotificationRow {
    id: Uuid,
    name: String,
    #[sqlx(rename = "type")]
    kind: NotificationKind,
    details: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for NotificationChannel {
    type Error = crate::Error;

    fn try_from(row: NotificationRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            name: row.name,
            details: NotificationDetails::from_parts(row.kind, row.details)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl InstanceRepository for PgStore {
    async fn get(&self, id: Uuid) -> Result<Option<Instance>> {
        let instance = sqlx::query_as::<_, Instance>(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM instances WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(instance)
    }

    async fn list(&self) -> Result<Vec<Instance>> {
        let instances = sqlx::query_as::<_, Instance>(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM instances ORDER BY created_at"
        ))
        .fetch_all(&self.db)
        .await?;
        Ok(instances)
    }

    async fn insert(&self, input: &InstanceInput) -> Result<Instance> {
        let instance = sqlx::query_as::<_, Instance>(&format!(
            r#"
            INSERT INTO instances (id, name, url, interval_secs, notification_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {INSTANCE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&input.name)
        .bind(&input.url)
        .bind(input.interval)
        .bind(input.notification_id)
        .fetch_one(&self.db)
        .await
        .map_err(|e| channel_violation(e, input.notification_id))?;
        Ok(instance)
    }

    async fn update(&self, id: Uuid, input: &InstanceInput) -> Result<Option<Instance>> {
        let instance = sqlx::query_as::<_, Instance>(&format!(
            r#"
            UPDATE instances
            SET name = $2, url = $3, interval_secs = $4, notification_id = $5, updated_at = NOW()
            WHERE id = $1
            RETURNING {INSTANCE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&input.name)
        .bind(&input.url)
        .bind(input.interval)
        .bind(input.notification_id)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| channel_violation(e, input.notification_id))?;
        Ok(instance)
    }

    async fn update_after_check(&self, id: Uuid, update: &CheckUpdate) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE instances
            SET status = $2,
                uptime = CAST($3 AS NUMERIC(5, 2)),
                response_time_ms = COALESCE($4, response_time_ms),
                updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(update.status)
        .bind(update.uptime)
        .bind(update.response_time_ms)
        .bind(update.checked_at)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM instances WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl HistoryRepository for PgStore {
    async fn append(&self, instance_id: Uuid, online: bool) -> Result<()> {
        sqlx::query("INSERT INTO instance_status_history (instance_id, online) VALUES ($1, $2)")
            .bind(instance_id)
            .bind(online)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn count_online(&self, instance_id: Uuid) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM instance_status_history WHERE instance_id = $1 AND online",
        )
        .bind(instance_id)
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }

    async fn count_total(&self, instance_id: Uuid) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM instance_status_history WHERE instance_id = $1",
        )
        .bind(instance_id)
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }

    async fn recent(&self, instance_id: Uuid, limit: usize) -> Result<Vec<bool>> {
        let window = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT online FROM instance_status_history
            WHERE instance_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(instance_id)
        .bind(limit as i64)
        .fetch_all(&self.db)
        .await?;
        Ok(window)
    }
}

#[async_trait]
impl NotificationRepository for PgStore {
    async fn get(&self, id: Uuid) -> Result<Option<NotificationChannel>> {
        let row = sqlx::query_as::<_, NotificationRow>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        row.map(NotificationChannel::try_from).transpose()
    }

    async fn insert(&self, name: &str, details: &NotificationDetails) -> Result<NotificationChannel> {
        let row = sqlx::query_as::<_, NotificationRow>(&format!(
            r#"
            INSERT INTO notifications (id, name, type, details)
            VALUES ($1, $2, $3, $4)
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(details.kind())
        .bind(details.to_json()?)
        .fetch_one(&self.db)
        .await?;
        row.try_into()
    }

    async fn update(
        &self,
        id: Uuid,
        name: &str,
        details: &NotificationDetails,
    ) -> Result<Option<NotificationChannel>> {
        let row = sqlx::query_as::<_, NotificationRow>(&format!(
            r#"
            UPDATE notifications
            SET name = $2, type = $3, details = $4, updated_at = NOW()
            WHERE id = $1
            RETURNING {NOTIFICATION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(name)
        .bind(details.kind())
        .bind(details.to_json()?)
        .fetch_optional(&self.db)
        .await?;
        row.map(NotificationChannel::try_from).transpose()
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
