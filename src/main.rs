//! VirtVault - Retention Sweeper Daemon
//!
//! Boots the engine's ambient stack and runs periodic retention sweeps.
//! Backup triggering is driven by the embedding application, which
//! supplies a snapshot producer and spawns the trigger loop itself.

use std::sync::Arc;

use virtvault_backend::{
    config::Config,
    db,
    error::Result,
    models::storage_backend::StorageBackendRow,
    services::{scheduler_service, storage_service::StorageService},
    storage::retry::RetryPolicy,
    telemetry,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    // Initialize tracing (with OTLP export when configured)
    let _otel_guard =
        telemetry::init_tracing(config.otel_endpoint.as_deref(), "virtvault-backend");
    tracing::info!("Starting VirtVault retention sweeper");

    // Connect to database
    let db_pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Connected to database");

    // Run migrations
    sqlx::migrate!("./migrations").run(&db_pool).await?;
    tracing::info!("Database migrations complete");

    // Provision a default storage backend on first boot
    provision_default_backend(&db_pool, &config).await?;

    // Build the gateway registry from persisted backend rows
    let retry = RetryPolicy {
        max_attempts: config.storage_retry_attempts,
        base_delay: std::time::Duration::from_millis(config.storage_retry_base_delay_ms),
    };
    let rows = load_enabled_backends(&db_pool).await?;
    let storage = Arc::new(StorageService::from_rows(&rows, retry));
    tracing::info!(backends = rows.len(), "Storage backends registered");

    // Spawn the periodic retention sweep loop
    scheduler_service::spawn_retention_sweeper(db_pool, &config, storage);

    tracing::info!("Retention sweeper running");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    Ok(())
}

/// Insert a storage backend row from the environment config when none
/// exists yet, so a fresh install can sweep without manual setup.
async fn provision_default_backend(db: &sqlx::PgPool, config: &Config) -> Result<()> {
    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM storage_backends")
        .fetch_one(db)
        .await?;
    if existing > 0 {
        return Ok(());
    }

    let backend_config = match config.storage_backend.as_str() {
        "filesystem" => serde_json::json!({
            "path": config.storage_path,
            "capacity_bytes": config.storage_capacity_bytes,
        }),
        _ => serde_json::json!({ "capacity_bytes": config.storage_capacity_bytes }),
    };

    sqlx::query(
        "INSERT INTO storage_backends (name, kind, config) VALUES ('default', $1, $2)",
    )
    .bind(&config.storage_backend)
    .bind(&backend_config)
    .execute(db)
    .await?;

    tracing::info!(
        kind = %config.storage_backend,
        "Provisioned default storage backend"
    );
    Ok(())
}

async fn load_enabled_backends(db: &sqlx::PgPool) -> Result<Vec<StorageBackendRow>> {
    Ok(sqlx::query_as::<_, StorageBackendRow>(
        "SELECT id, name, kind, config, enabled, created_at \
         FROM storage_backends WHERE enabled = true ORDER BY name",
    )
    .fetch_all(db)
    .await?)
}
