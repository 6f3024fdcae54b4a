use anyhow::{Context, Result};
use sqlx::{
    PgPool,
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
};
use std::{io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use config::{AppConfig, DatabaseConfig};
use services::{
    intake::IntakeStore, object_store::GcsObjectStore, penduduk_service::PendudukService,
    penduduk_store::PgPendudukStore,
};
use state::AppState;

const INIT_SQL: &str = include_str!("../migrations/0001_init.sql");

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting penduduk-api with config: {:?}", cfg);

    // --- Initialize PostgreSQL pool ---
    let db = connect_pool(&cfg.database);

    // --- Handle migration mode ---
    if migrate {
        run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        db.close().await;
        return Ok(()); // exit after migration
    }

    // A failed check is reported but the server still starts.
    match sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&db).await {
        Ok(_) => tracing::info!(
            "Connected to database {} at {}:{}",
            cfg.database.name,
            cfg.database.host,
            cfg.database.port
        ),
        Err(e) => tracing::error!("Failed to connect to database: {}", e),
    }

    // --- Ensure upload directory exists ---
    let intake = IntakeStore::new(&cfg.upload_dir);
    if !Path::new(&cfg.upload_dir).exists() {
        intake.ensure_dir().await?;
        tracing::info!("Created upload directory at {}", cfg.upload_dir);
    }

    // --- Initialize core service ---
    let http = reqwest::Client::builder()
        .build()
        .context("building storage HTTP client")?;
    let objects = GcsObjectStore::new(http, &cfg.storage);
    let service = PendudukService::new(
        Arc::new(PgPendudukStore::new(db.clone())),
        Arc::new(objects),
        intake,
    );

    // --- Build router ---
    let state = AppState::new(service, cfg.app_env.as_str());
    let app = routes::routes::routes(state, cfg.upload_max_bytes);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!(
        "Server listening on http://{} (env: {})",
        listener.local_addr()?,
        cfg.app_env
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Closing database pool");
    db.close().await;

    Ok(())
}

/// Build the bounded pool. Connections are opened on demand, so an
/// unreachable database does not prevent startup.
fn connect_pool(cfg: &DatabaseConfig) -> PgPool {
    let options = PgConnectOptions::new()
        .host(&cfg.host)
        .port(cfg.port)
        .username(&cfg.user)
        .password(&cfg.password)
        .database(&cfg.name)
        .ssl_mode(if cfg.ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Disable
        });

    PgPoolOptions::new()
        .max_connections(cfg.pool_max)
        .min_connections(cfg.pool_min)
        .acquire_timeout(cfg.connect_timeout)
        .idle_timeout(cfg.idle_timeout)
        .connect_lazy_with(options)
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
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
    tracing::info!("Shutdown signal received, shutting down gracefully");
}

/// Run migrations manually from the embedded SQL file.
async fn run_migrations(db: &PgPool) -> Result<()> {
    let statements = INIT_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt)
            .execute(db)
            .await
            .with_context(|| format!("migration statement failed: {}", stmt))?;
    }

    Ok(())
}
