use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Redis,
    Memory,
}

/// Tunables for the check-instance worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub queue_backend: QueueBackend,
    /// Key prefix for every queue key in Redis.
    pub queue_prefix: String,
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    pub probe_timeout_secs: u64,
    pub notify_timeout_secs: u64,
    /// An active job older than this is considered abandoned and is re-queued.
    pub stalled_after_secs: u64,
    /// How many completed / failed jobs the queue retains per topic.
    pub keep_finished: usize,
    pub default_interval_secs: u64,
    pub telegram_api_base: String,
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }

    pub fn stalled_after(&self) -> Duration {
        Duration::from_secs(self.stalled_after_secs)
    }

    pub fn default_interval(&self) -> Duration {
        Duration::from_secs(self.default_interval_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_backend: QueueBackend::Redis,
            queue_prefix: "uptime".to_string(),
            concurrency: 8,
            poll_interval_ms: 500,
            probe_timeout_secs: 5,
            notify_timeout_secs: 10,
            stalled_after_secs: 60,
            keep_finished: 100,
            default_interval_secs: 60,
            telegram_api_base: "https://api.telegram.org".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub server: ServerConfig,
    pub scheduler: SchedulerConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let scheduler = SchedulerConfig::default();
        let mut cfg = config::Config::builder();

        cfg = cfg
            .set_default("database.host", "localhost")?
            .set_default("database.port", 5432)?
            .set_default("database.max_connections", 10)?
            .set_default("redis.max_connections", 10)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("scheduler.queue_backend", "redis")?
            .set_default("scheduler.queue_prefix", scheduler.queue_prefix)?
            .set_default("scheduler.concurrency", scheduler.concurrency as u64)?
            .set_default("scheduler.poll_interval_ms", scheduler.poll_interval_ms)?
            .set_default("scheduler.probe_timeout_secs", scheduler.probe_timeout_secs)?
            .set_default("scheduler.notify_timeout_secs", scheduler.notify_timeout_secs)?
            .set_default("scheduler.stalled_after_secs", scheduler.stalled_after_secs)?
            .set_default("scheduler.keep_finished", scheduler.keep_finished as u64)?
            .set_default("scheduler.default_interval_secs", scheduler.default_interval_secs)?
            .set_default("scheduler.telegram_api_base", scheduler.telegram_api_base)?;

        if let Ok(database_url) = env::var("DATABASE_URL") {
            cfg = cfg.set_override("database.url", database_url)?;
        }
        cfg = cfg
            .set_override("database.username", env::var("DATABASE_USERNAME").unwrap_or_else(|_| "uptime".to_string()))?
            .set_override("database.password", env::var("DATABASE_PASSWORD").unwrap_or_else(|_| "password".to_string()))?
            .set_override("database.database", env::var("DATABASE_NAME").unwrap_or_else(|_| "uptime".to_string()))?;

        cfg = cfg.set_override(
            "redis.url",
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
        )?;

        if let Ok(port) = env::var("PORT") {
            cfg = cfg.set_override("server.port", port.parse::<u16>().unwrap_or(8080))?;
        }

        // UPTIME__SCHEDULER__CONCURRENCY=16 and friends
        cfg = cfg.add_source(
            config::Environment::with_prefix("UPTIME")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        cfg.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_defaults() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.queue_backend, QueueBackend::Redis);
        assert_eq!(cfg.probe_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.poll_interval(), Duration::from_millis(500));
        assert!(cfg.probe_timeout() < cfg.default_interval());
    }

    #[test]
    fn test_queue_backend_deserializes_lowercase() {
        let backend: QueueBackend = serde_json::from_str("\"memory\"").unwrap();
        assert_eq!(backend, QueueBackend::Memory);
    }
}
