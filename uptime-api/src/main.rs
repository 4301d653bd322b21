use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use uptime_core::{
    cache::create_redis_pool,
    config::Config,
    db::{create_pool, run_migrations},
    logging,
    queue::RedisQueue,
    store::PgStore,
};

mod server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_logging("info,tower_http=debug");

    let config = Config::from_env().context("failed to load configuration")?;
    info!(
        host = %config.server.host,
        port = config.server.port,
        "Starting uptime API server"
    );

    let db_pool = create_pool(&config.database)
        .await
        .context("failed to connect to database")?;
    info!("Database connection established");

    run_migrations(&db_pool).await?;
    info!("Database migrations completed");

    let redis_pool = create_redis_pool(&config.redis).await?;
    let queue = RedisQueue::connect(
        &redis_pool,
        &config.scheduler.queue_prefix,
        config.scheduler.keep_finished,
    )
    .await
    .context("failed to connect to redis")?;

    let state = Arc::new(server::AppState::new(
        Arc::new(PgStore::new(db_pool)),
        Arc::new(queue),
    ));

    let app = server::create_app(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!("Server listening on {addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
