use anyhow::{Context, Result};
use axum::Router;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::{
    services::{
        coordinator::Pipeline, metadata_store::SqliteMetadataStore, object_store::FsObjectStore,
        transform::ImageResizer,
    },
    state::AppState,
};

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

#[cfg(test)]
mod test_support;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting rendition-pipeline with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("parsing database url `{}`", db_url))?
        .create_if_missing(true);
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("connecting to {}", db_url))?,
    );

    // The schema is idempotent, so it is applied on every start.
    services::metadata_store::run_migrations(&db)
        .await
        .context("applying migrations")?;
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Initialize the pipeline ---
    let store = Arc::new(FsObjectStore::new(cfg.storage_dir.clone()));
    let metadata = Arc::new(SqliteMetadataStore::new(
        db.clone(),
        cfg.pipeline.metadata_collection.clone(),
    ));
    let pipeline = Pipeline::new(
        &cfg.pipeline,
        store.clone(),
        metadata,
        Arc::new(ImageResizer::default()),
    )
    .context("building pipeline")?;

    let state = AppState {
        pipeline: Arc::new(pipeline),
        store,
        db,
    };

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

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

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
