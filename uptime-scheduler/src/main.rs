use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};
use uptime_core::{
    cache::create_redis_pool,
    config::{Config, QueueBackend},
    db::{create_pool, run_migrations},
    logging,
    queue::{JobQueue, MemoryQueue, RedisQueue},
    store::PgStore,
};

mod scheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_logging("info");

    let config = Config::from_env().context("failed to load configuration")?;
    let settings = &config.scheduler;
    info!(
        backend = ?settings.queue_backend,
        concurrency = settings.concurrency,
        probe_timeout_secs = settings.probe_timeout_secs,
        "Starting uptime scheduler"
    );

    let db_pool = create_pool(&config.database)
        .await
        .context("failed to connect to database")?;
    info!("Database connection established");

    run_migrations(&db_pool).await?;
    info!("Database migrations completed");

    let queue: Arc<dyn JobQueue> = match settings.queue_backend {
        QueueBackend::Redis => {
            let redis_pool = create_redis_pool(&config.redis).await?;
            let queue = RedisQueue::connect(&redis_pool, &settings.queue_prefix, settings.keep_finished)
                .await
                .context("failed to connect to redis")?;
            Arc::new(queue)
        }
        QueueBackend::Memory => {
            warn!("Using the in-process queue; pending checks are rebuilt from the registry on every start");
            Arc::new(MemoryQueue::new(settings.keep_finished))
        }
    };

    let store = Arc::new(PgStore::new(db_pool));
    let mut scheduler = scheduler::CheckScheduler::new(store, queue, settings);

    scheduler.load_and_schedule_instances().await?;
    scheduler.start();

    info!("Uptime scheduler is running. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received");
    scheduler.stop().await;

    Ok(())
}
