use actix_web::{middleware, web, App, HttpServer};
use std::sync::Arc;

use admitflow::config;
use admitflow::db;
use admitflow::routes;
use admitflow::services::{McbSyncAdapter, NotificationDispatcher, RetryPolicy, SenderRegistry};
use admitflow::store::{DynStore, MemoryStore, PgStore};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize logging
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    // Load configuration
    let config = config::Config::from_env().map_err(|e| {
        log::error!("Configuration error: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    log::info!("Starting admitflow server on {}:{}", config.host, config.port);

    let store: DynStore = match &config.database {
        Some(database) => {
            let db_pool = db::create_pool(database).await.map_err(|e| {
                log::error!("Database pool error: {}", e);
                std::io::Error::other(e.to_string())
            })?;

            db::run_migrations(&db_pool).await.map_err(|e| {
                log::error!("Migration error: {}", e);
                std::io::Error::other(e.to_string())
            })?;

            Arc::new(PgStore::new(db_pool))
        }
        None => {
            log::warn!("DATABASE_URL not set, using the in-memory store (data is lost on restart)");
            Arc::new(MemoryStore::new())
        }
    };

    if config.security.admin_token.is_none() {
        log::warn!("ADMIN_API_TOKEN not set, all /api requests will be rejected");
    }

    let senders = SenderRegistry::with_defaults(config.notification.sender_timeout);
    let dispatcher = NotificationDispatcher::new(store.clone(), senders, &config.notification);
    let sync = McbSyncAdapter::new(
        store.clone(),
        &config.mcb,
        RetryPolicy::for_sync(&config.notification, &config.mcb),
    );

    log::info!(
        "Notification channels enabled: {:?}",
        config.notification.enabled_channels
    );

    // Clone values for the closure
    let host = config.host.clone();
    let port = config.port;

    let server = HttpServer::new(move || {
        App::new()
            // Share store, services and config with all handlers
            .app_data(web::Data::new(store.clone()))
            .app_data(web::Data::new(dispatcher.clone()))
            .app_data(web::Data::new(sync.clone()))
            .app_data(web::Data::new(config.clone()))
            .wrap(middleware::Logger::default())
            // Health check routes (no auth required)
            .configure(routes::health::configure)
            // API routes (admin token required)
            .configure(routes::enquiries::configure)
            .configure(routes::providers::configure)
    })
    .bind((host.as_str(), port))?
    .shutdown_timeout(30)
    .run();

    // Spawn graceful shutdown handler
    let server_handle = server.handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        log::info!("Shutdown signal received, stopping server...");
        server_handle.stop(true).await;
    });

    server.await
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                log::error!("Failed to install Ctrl+C handler: {}", e);
                // Wait forever if signal handler fails
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
