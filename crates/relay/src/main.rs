//! Relay entry point.

use event_store::PostgresEventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use outbox::{
    DownstreamQueue, InMemoryOutboxStore, InMemoryQueue, OutboxPublisher, OutboxRelay,
    OutboxStore, PostgresOutboxStore,
};
use relay::{Config, RedisQueue};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Runs the relay loop and the HTTP server until a shutdown signal arrives.
async fn serve<S, Q>(config: Config, store: S, queue: Q, metrics_handle: PrometheusHandle)
where
    S: OutboxStore + Clone + 'static,
    Q: DownstreamQueue + 'static,
{
    let publisher = OutboxPublisher::new(store.clone(), queue, config.publisher_config());
    let relay = OutboxRelay::new(publisher, config.relay_config());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let relay_task = tokio::spawn(async move { relay.run(shutdown_rx).await });

    let app = relay::create_app(store, metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting relay server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = shutdown_tx.send(true);
    if let Err(error) = relay_task.await {
        tracing::error!(%error, "relay task panicked");
    }
    tracing::info!("relay shut down gracefully");
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    relay::init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Pick the outbox store
    let store = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await
                .expect("failed to connect to Postgres");
            PostgresEventStore::new(pool.clone())
                .run_migrations()
                .await
                .expect("failed to run migrations");
            Some(PostgresOutboxStore::new(pool, config.retry_policy()))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using an in-memory outbox");
            None
        }
    };

    // 4. Pick the downstream queue and run
    let redis_queue = config
        .redis_url
        .as_deref()
        .map(|url| RedisQueue::from_url(url).expect("failed to create Redis pool"));
    if redis_queue.is_none() {
        tracing::warn!("REDIS_URL not set, jobs are kept in memory");
    }

    match (store, redis_queue) {
        (Some(store), Some(queue)) => serve(config, store, queue, metrics_handle).await,
        (Some(store), None) => serve(config, store, InMemoryQueue::new(), metrics_handle).await,
        (None, Some(queue)) => {
            let store = InMemoryOutboxStore::new(config.retry_policy());
            serve(config, store, queue, metrics_handle).await
        }
        (None, None) => {
            let store = InMemoryOutboxStore::new(config.retry_policy());
            serve(config, store, InMemoryQueue::new(), metrics_handle).await
        }
    }
}
