use flowline_engine::{Engine, EventHandler, LoggingNotifier, NatsEventBus, Notifier, SystemClock};
use flowline_scheduler::SlotAllocator;
use flowline_worker::config::WorkerConfig;
use flowline_worker::db::PgFlowStore;
use flowline_worker::directory::PgDirectory;
use flowline_worker::notifier::HttpNotifier;
use sqlx::postgres::PgPoolOptions;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = WorkerConfig::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    let db_pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("failed to run migrations");

    let bus = Arc::new(
        NatsEventBus::connect(config.nats.to_nats_config())
            .await
            .expect("failed to connect to NATS"),
    );

    let notifier: Arc<dyn Notifier> = match &config.notifier.url {
        Some(url) => Arc::new(
            HttpNotifier::new(url, Duration::from_secs(config.notifier.timeout_seconds))
                .expect("failed to build notifier"),
        ),
        None => {
            tracing::warn!("No notifier URL configured, notifications will only be logged");
            Arc::new(LoggingNotifier)
        }
    };

    let slots = match config.engine.rng_seed {
        Some(seed) => SlotAllocator::seeded(seed),
        None => SlotAllocator::from_entropy(),
    };

    let engine = Arc::new(Engine::new(
        PgFlowStore::new(db_pool.clone()),
        Arc::new(PgDirectory::new(db_pool)),
        bus.clone(),
        notifier,
        Arc::new(SystemClock),
        slots,
        config.engine_config(),
    ));

    let sweeper = &config.sweeper;
    spawn_periodic("execution sweep", sweeper.execution_interval_seconds, {
        let engine = engine.clone();
        move || {
            let engine = engine.clone();
            async move { engine.sweep_executions().await }
        }
    });
    spawn_periodic("ramp-up", sweeper.ramp_up_interval_seconds, {
        let engine = engine.clone();
        move || {
            let engine = engine.clone();
            async move { engine.sweep_ramp_up().await }
        }
    });
    spawn_periodic("statistics", sweeper.statistics_interval_seconds, {
        let engine = engine.clone();
        move || {
            let engine = engine.clone();
            async move { engine.sweep_statistics().await }
        }
    });
    spawn_periodic("reschedule", sweeper.reschedule_interval_seconds, {
        let engine = engine.clone();
        move || {
            let engine = engine.clone();
            async move { engine.sweep_reschedule().await }
        }
    });

    let handler = EventHandler::new(engine);
    tokio::select! {
        result = bus.consume(handler) => match result {
            Ok(()) => tracing::warn!("event stream ended"),
            Err(e) => tracing::error!(error = %e, "event consumer failed"),
        },
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
    }
}

/// Runs `job` every `interval_seconds` on its own task.
fn spawn_periodic<F, Fut>(name: &'static str, interval_seconds: u64, job: F)
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tracing::info!(job = name, interval_seconds, "starting periodic job");
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            job().await;
        }
    });
}
