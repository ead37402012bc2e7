//! Defines the service's HTTP surface.
//!
//! - `POST /events`: storage trigger delivery (runs the pipeline)
//! - `PUT  /{bucket}/{*key}`: upload into the local object store; fires the
//!   finalized-object event in the background
//! - `GET  /healthz`, `GET /readyz`: probes
//!
//! The wildcard `*key` allows nested keys like `upload/2025/cat.jpg`.

use crate::{
    handlers::{
        event_handlers::receive_event,
        health_handlers::{healthz, readyz},
        object_handlers::upload_object,
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Build the router; handlers share `AppState`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/events", post(receive_event))
        .route("/{bucket}/{*key}", put(upload_object))
}
