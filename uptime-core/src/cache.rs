use redis::Client;
use redis::aio::MultiplexedConnection;
use tracing::info;

use crate::{config::RedisConfig, error::Result};

pub type RedisPool = Client;

pub async fn create_redis_pool(config: &RedisConfig) -> Result<RedisPool> {
    let client = Client::open(config.url.as_str())?;
    Ok(client)
}

/// Open one multiplexed connection; clones of it share the underlying socket.
pub async fn connect(pool: &RedisPool) -> Result<MultiplexedConnection> {
    let conn = pool.get_multiplexed_async_connection().await?;
    info!("Redis connection established");
    Ok(conn)
}
