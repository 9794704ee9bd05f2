//! notify-api: webhook management API and background delivery runner.

mod config;
mod logging;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use notify_webhooks::migrations::run_migrations;
use notify_webhooks::{
    webhooks_router, DeliveryRepository, DeliveryScheduler, DeliveryWorker, Dispatcher,
    EndpointRepository, EndpointService, EventPublisher, HistoryService, PgDeliveryRepository,
    PgEndpointRepository, TokioScheduler, WebhookWorker, WebhooksState,
};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::info;

use crate::config::AppConfig;

/// Capacity of the in-process event channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() {
    let config = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    logging::init_logging(&config.rust_log);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.host,
        port = config.port,
        env = %config.app_env,
        "Starting notify-api"
    );

    match config.validate_security_config() {
        Ok(warnings) => {
            for warning in &warnings {
                tracing::warn!(target: "security", "{}", warning);
            }
        }
        Err(errors) => {
            for error in &errors {
                tracing::error!(target: "security", "{}", error);
            }
            eprintln!(
                "FATAL: {} insecure setting(s) detected in production mode. \
                 Set WEBHOOK_ENCRYPTION_KEY or use APP_ENV=development.",
                errors.len()
            );
            std::process::exit(1);
        }
    }

    let pool = match PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await
    {
        Ok(pool) => {
            info!("Database connection established");
            pool
        }
        Err(e) => {
            eprintln!("Failed to connect to database: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run_migrations(&pool).await {
        tracing::error!("Failed to run migrations: {e}");
        std::process::exit(1);
    }

    let endpoints: Arc<dyn EndpointRepository> =
        Arc::new(PgEndpointRepository::new(pool.clone()));
    let deliveries: Arc<dyn DeliveryRepository> = Arc::new(PgDeliveryRepository::new(pool));
    let (scheduler, tasks) = TokioScheduler::new();
    let scheduler: Arc<dyn DeliveryScheduler> = Arc::new(scheduler);
    let encryption_key = config.webhook_encryption_key.to_vec();

    let delivery_worker = match DeliveryWorker::new(
        Arc::clone(&endpoints),
        Arc::clone(&deliveries),
        Arc::clone(&scheduler),
        encryption_key.clone(),
        config.webhook.clone(),
    ) {
        Ok(w) => w,
        Err(e) => {
            tracing::error!("Failed to create delivery worker: {e}");
            std::process::exit(1);
        }
    };

    // Producers in this process publish through `publisher`; it is kept
    // alive for the lifetime of the server.
    let (publisher, events) = EventPublisher::new(EVENT_CHANNEL_CAPACITY);
    let dispatcher = Dispatcher::new(
        Arc::clone(&endpoints),
        Arc::clone(&deliveries),
        Arc::clone(&scheduler),
    );
    let runner = WebhookWorker::new(
        dispatcher,
        delivery_worker.clone(),
        Arc::clone(&deliveries),
        scheduler,
        events,
        tasks,
        config.webhook.worker_concurrency,
    );

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let runner_handle = tokio::spawn(runner.run(async move {
        let _ = stop_rx.await;
    }));

    let state = WebhooksState::new(
        EndpointService::new(Arc::clone(&endpoints), encryption_key, config.webhook.clone()),
        HistoryService::new(endpoints, deliveries, delivery_worker),
    );
    let app = webhooks_router(state);

    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(a) => a,
        Err(e) => {
            tracing::error!("Invalid listen address: {e}");
            std::process::exit(1);
        }
    };
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to address {addr}: {e}");
            std::process::exit(1);
        }
    };

    info!(%addr, "Listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {e}");
    }

    let _ = stop_tx.send(());
    if let Err(e) = runner_handle.await {
        tracing::error!("Webhook runner task failed: {e}");
    }
    drop(publisher);

    info!("Server shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
