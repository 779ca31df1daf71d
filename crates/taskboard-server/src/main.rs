//! Taskboard Server - Main entry point

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use taskboard_common::logging::{init_logging, LogConfig};
use tracing::info;

use taskboard_server::{
    api::{self, AppState},
    audit::{routes, AuditSink, AuditStore, MemoryAuditStore, PgAuditStore},
    config::Config,
    instrument::{ConfigRegistry, ConfigResolver, InterceptorChain},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with configuration from environment
    let log_config = LogConfig::builder()
        .log_file_prefix("taskboard-server")
        .filter_directives("taskboard_server=debug,performance=debug,tower_http=debug,sqlx=info")
        .build();

    // Merge with environment variables (they take precedence)
    let log_config = LogConfig::from_env().unwrap_or(log_config);

    let _logging_guard = init_logging(&log_config)?;

    info!("Starting Taskboard Server");

    // Load configuration
    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let store = audit_store(&config).await?;

    // Instrumentation settings: file declarations first, built-in defaults fill gaps
    let registry = match &config.audit.instrumentation_config {
        Some(path) => ConfigRegistry::from_toml_file(path)
            .with_context(|| format!("Failed to load instrumentation config {}", path.display()))?,
        None => ConfigRegistry::default(),
    };
    let registry = routes::declare(registry.into_builder()).build();
    info!(units = registry.units.len(), "Instrumentation registry loaded");

    let (sink, worker) = AuditSink::spawn(config.audit.sink_config(), Some(Arc::clone(&store)));
    let chain = InterceptorChain::standard(Arc::new(ConfigResolver::new(registry)), sink);

    let app = api::create_router(AppState::new(store, chain), &config);
    api::serve(app, &config.server).await?;

    // Flush queued audit records before exiting
    worker.shutdown().await;
    info!("Audit worker drained");

    Ok(())
}

/// Postgres when configured for database logging, otherwise a bounded in-memory buffer
async fn audit_store(config: &Config) -> Result<Arc<dyn AuditStore>> {
    let url = match (&config.database.url, config.audit.log_to_db) {
        (Some(url), true) => url,
        _ => {
            let store = MemoryAuditStore::new();
            info!(capacity = store.capacity(), "Using in-memory audit store");
            return Ok(Arc::new(store));
        },
    };

    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout_secs))
        .connect(url)
        .await
        .context("Failed to connect to the audit database")?;

    info!("Database connection pool established");

    // Run migrations
    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

    info!("Database migrations completed");

    Ok(Arc::new(PgAuditStore::new(db_pool)))
}
