//! Embedded schema migrations for the webhook tables.

use sqlx::PgPool;

use crate::error::WebhookError;

/// Run all pending migrations from `migrations/`.
///
/// # Errors
///
/// Returns `WebhookError::Migration` if any migration fails to apply.
pub async fn run_migrations(pool: &PgPool) -> Result<(), WebhookError> {
    tracing::info!("Running webhook database migrations...");

    sqlx::migrate!("./migrations").run(pool).await?;

    tracing::info!("Webhook migrations completed successfully");
    Ok(())
}
