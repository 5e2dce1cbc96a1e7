//! Helpdesk server: wires the ticket engine to `PostgreSQL`, Redis and the
//! HTTP surface, then runs until a shutdown signal arrives.
//!
//! # Lifecycle
//!
//! 1. Connect to `PostgreSQL` and apply migrations
//! 2. Connect to Redis for shared rate limit windows
//! 3. Start the idempotency purge task and the metrics endpoint
//! 4. Serve HTTP until Ctrl+C or SIGTERM
//! 5. Stop background tasks, each bounded by the shutdown timeout

pub mod config;
pub mod metrics;

pub use config::Config;

use anyhow::Context;
use helpdesk_core::environment::SystemClock;
use helpdesk_core::store::{Backend, Stores};
use helpdesk_engine::TicketService;
use helpdesk_postgres::{PostgresIdempotencyStore, PostgresTicketStore, PostgresUserDirectory};
use helpdesk_redis::RedisRateWindowStore;
use helpdesk_web::{AppState, build_router};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// The stores a deployed server runs on.
pub type ProductionBackend = Stores<
    PostgresTicketStore,
    PostgresIdempotencyStore,
    PostgresUserDirectory,
    RedisRateWindowStore,
>;

/// Connect every store and apply the database schema.
///
/// # Errors
///
/// Fails if `PostgreSQL` or Redis is unreachable or a migration fails.
pub async fn build_backend(config: &Config) -> anyhow::Result<ProductionBackend> {
    info!(
        max_connections = config.postgres.max_connections,
        "Connecting to PostgreSQL"
    );
    let pool = PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
        .connect(&config.postgres.url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    helpdesk_postgres::migrate(&pool)
        .await
        .context("Failed to apply migrations")?;

    info!("Connecting to Redis");
    let windows = RedisRateWindowStore::connect(&config.redis.url)
        .await
        .context("Failed to connect to Redis")?;

    Ok(Stores::new(
        PostgresTicketStore::new(pool.clone()),
        PostgresIdempotencyStore::new(pool.clone()),
        PostgresUserDirectory::new(pool),
        windows,
    ))
}

/// Periodically delete expired idempotency records until `shutdown` flips.
///
/// A failed sweep is logged and retried on the next tick.
pub fn spawn_purge_task<B: Backend>(
    service: Arc<TicketService<B>>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match service.purge_expired_idempotency().await {
                        Ok(0) => {}
                        Ok(purged) => info!(purged, "Purged expired idempotency records"),
                        Err(e) => warn!(error = %e, "Idempotency purge failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Idempotency purge task stopped");
    })
}

/// Run the server until a shutdown signal is received.
///
/// # Errors
///
/// Fails on a startup error (storage connection, bind, metrics recorder)
/// or if the HTTP server stops with an I/O error.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let prometheus = metrics::install_recorder()?;

    let backend = build_backend(&config).await?;
    let service = Arc::new(TicketService::new(
        backend,
        Arc::new(SystemClock),
        config.engine_config(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let purge = spawn_purge_task(
        Arc::clone(&service),
        Duration::from_secs(config.engine.idempotency_purge_interval),
        shutdown_rx.clone(),
    );

    let metrics_addr = config.metrics_addr();
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("Failed to bind metrics server to {metrics_addr}"))?;
    info!(address = %metrics_addr, "Prometheus metrics available at /metrics");
    let mut metrics_shutdown = shutdown_rx.clone();
    let metrics_server = tokio::spawn(async move {
        let result = axum::serve(metrics_listener, metrics::metrics_router(prometheus))
            .with_graceful_shutdown(async move {
                let _ = metrics_shutdown.changed().await;
            })
            .await;
        if let Err(e) = result {
            warn!(error = %e, "Metrics server failed");
        }
    });

    let bind_addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind HTTP server to {bind_addr}"))?;
    info!(address = %bind_addr, "Starting HTTP server");

    let app = build_router(AppState::from_shared(service));
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("HTTP server stopped, initiating graceful shutdown...");
    let _ = shutdown_tx.send(true);

    let timeout = Duration::from_secs(config.server.shutdown_timeout);
    for (name, handle) in [("purge", purge), ("metrics", metrics_server)] {
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => info!(task = name, "Task stopped gracefully"),
            Ok(Err(e)) => warn!(task = name, error = %e, "Task failed"),
            Err(_) => warn!(task = name, "Task shutdown timed out"),
        }
    }

    served.context("HTTP server error")?;
    info!("Graceful shutdown complete");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Unable to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal"),
        () = terminate => info!("Received SIGTERM signal"),
    }
}
