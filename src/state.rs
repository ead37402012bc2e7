//! Shared state handed to every axum handler.

use crate::services::{coordinator::Pipeline, object_store::FsObjectStore};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,

    /// Local object store; uploads land here before their event fires.
    pub store: Arc<FsObjectStore>,

    /// Metadata database pool, probed by `/readyz`.
    pub db: Arc<SqlitePool>,
}
