// Transaction Summary - Web Server
// Upload form + REST API with Axum

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;
use txn_summary::api::{bind_addr_from, router, AppState};
use txn_summary::{Settings, SqliteStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::var_os("TXN_CONFIG").map(std::path::PathBuf::from);
    let settings = Settings::load(config_path.as_deref()).context("failed to load settings")?;

    let db_path = &settings.database.path;
    let store = SqliteStore::open(db_path, &settings.retry_policy())
        .with_context(|| format!("failed to open database {}", db_path.display()))?;
    info!(path = %db_path.display(), "database opened");

    let state = AppState::new(
        store,
        settings.delivery_sink(),
        settings.year_policy(),
        settings.size_limit_bytes(),
    );
    let app = router(state);

    let addr = bind_addr_from(|key| std::env::var(key).ok())?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!(%addr, "server running");
    info!("upload form: http://{addr}/  api: http://{addr}/api/health");

    axum::serve(listener, app).await.context("server stopped")?;

    Ok(())
}
