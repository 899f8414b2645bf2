//! Standalone QR pass server.
//!
//! Configuration comes from the environment:
//!
//! - `QR_PASS_*` token and rate-limit settings, see `PassConfig`
//! - `QR_PASS_BIND`: listen address (default `0.0.0.0:8080`)
//! - `QR_PASS_DATABASE`: SQLite file; in-memory storage when unset
//! - `QR_PASS_IDENTITIES`: optional JSON file with identities to load at startup
//! - `QR_PASS_ISSUER_SECRET`: secret required to issue tokens
//! - `QR_PASS_ADMIN_SECRET`: secret for the admin routes (disabled when unset)
//! - `RUST_LOG`: log filter (default `info`)

use std::path::Path;
use std::sync::Arc;

use qr_pass::http::{SharedSecretCheck, router};
use qr_pass::storage::{MemoryStorage, PassStorage, SqliteStorage};
use qr_pass::{ConfigPreset, Identity, PassConfig, PassError, PassServer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_BIND: &str = "0.0.0.0:8080";

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

async fn load_identities<S: PassStorage>(storage: &S, path: &Path) -> Result<usize, PassError> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        PassError::Configuration(format!("cannot read {}: {e}", path.display()))
    })?;
    let identities: Vec<Identity> = serde_json::from_str(&raw).map_err(|e| {
        PassError::Configuration(format!("invalid identity file {}: {e}", path.display()))
    })?;
    for identity in &identities {
        storage.upsert_identity(identity).await?;
    }
    Ok(identities.len())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down QR pass server...");
}

async fn serve<S: PassStorage + 'static>(
    storage: Arc<S>,
    config: PassConfig,
    bind: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let issuer_secret = env_opt("QR_PASS_ISSUER_SECRET").ok_or_else(|| {
        PassError::Configuration("QR_PASS_ISSUER_SECRET must be set".to_string())
    })?;
    let admin_secret = env_opt("QR_PASS_ADMIN_SECRET");
    if admin_secret.is_none() {
        warn!("QR_PASS_ADMIN_SECRET is not set; admin routes are disabled");
    }
    let credentials = Arc::new(SharedSecretCheck::new(issuer_secret, admin_secret));

    let server = Arc::new(
        PassServer::builder()
            .with_storage(storage)
            .with_config(config)
            .build_and_init()
            .await?,
    );

    // Schema exists only after init.
    if let Some(path) = env_opt("QR_PASS_IDENTITIES") {
        let loaded = load_identities(server.storage().as_ref(), Path::new(&path)).await?;
        info!("Loaded {} identities from {}", loaded, path);
    }

    let sweeper = server.start_sweeper();

    let app = router(Arc::clone(&server), credentials);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("QR pass server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.stop().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config = PassConfig::from(ConfigPreset::FromEnv);
    let bind = env_opt("QR_PASS_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());

    match env_opt("QR_PASS_DATABASE") {
        Some(path) => {
            info!("Using SQLite storage at {}", path);
            serve(Arc::new(SqliteStorage::new(&path)?), config, &bind).await
        }
        None => {
            warn!("QR_PASS_DATABASE is not set; tokens are kept in memory only");
            serve(Arc::new(MemoryStorage::new()), config, &bind).await
        }
    }
}
