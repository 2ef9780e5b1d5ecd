pub mod api; // HTTP router, middleware, endpoints, server
pub mod config;
pub mod core_state; // Shared state + store lifecycle
pub mod models;
pub mod db;
pub mod validation;
pub mod authorization; // Caller identity + role guards
pub mod auth; // Passwords, bearer sessions
pub mod visibility; // Role-scoped read filter
pub mod patient_profile; // Patient self-resolution
pub mod appointment; // Conflict checker + booking
pub mod medical_record;
pub mod directory; // Patient / doctor / user administration

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

/// Pause between store connection attempts at startup.
const STORE_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Store(#[from] core_state::CoreError),
    #[error("Admin bootstrap failed: {0}")]
    Bootstrap(#[from] auth::AuthError),
    #[error("Database error: {0}")]
    Database(#[from] db::DatabaseError),
    #[error(transparent)]
    Server(#[from] api::server::ServerError),
    #[error("Cannot listen for shutdown signal: {0}")]
    Signal(std::io::Error),
}

/// Start the service and serve until Ctrl-C.
pub async fn run() -> Result<(), RunError> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    let config = config::AppConfig::from_env()?;
    tracing::info!(
        version = config::APP_VERSION,
        db = %config.db_path.display(),
        "hospital-api starting"
    );

    let core = Arc::new(core_state::CoreState::new(config));
    core.connect_with_retry(core.config.store_connect_attempts, STORE_RETRY_DELAY)
        .await?;
    prepare_store(&core)?;

    let mut server = api::start_api_server(core.clone()).await?;
    tracing::info!(addr = %server.info.server_addr, "Listening");

    tokio::signal::ctrl_c().await.map_err(RunError::Signal)?;
    server.shutdown();
    server.wait().await;
    core.disconnect()?;
    Ok(())
}

/// One-off startup chores: bootstrap admin, drop expired sessions.
fn prepare_store(core: &core_state::CoreState) -> Result<(), RunError> {
    let conn = core.open_db()?;
    if let Some(admin) = &core.config.admin {
        auth::bootstrap_admin(&conn, &admin.email, &admin.password)?;
    }
    let pruned = db::prune_expired_sessions(&conn, &chrono::Utc::now())?;
    if pruned > 0 {
        tracing::info!(pruned, "Removed expired sessions");
    }
    Ok(())
}
